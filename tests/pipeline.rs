use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::time::timeout;
use waypost::config::ServerConfig;
use waypost::http::{body_channel, BodyReceiver, IncomingRequest, Method};
use waypost::middleware::Next;
use waypost::{created_json, ok_json, Application, Body, Request, Response, ServerError};

fn payload(response: &Response) -> Value {
    serde_json::from_str(&response.body).expect("response body is JSON")
}

fn sample_app() -> Application {
    let mut app = Application::new();

    app.get("/get-test", |req: Request| async move {
        if req.query_param("query") == Some("ping") {
            return ok_json!("Query: ping Response: pong");
        }
        ok_json!("GET endpoint working")
    });

    app.get("/products/:category/:id", |req: Request| async move {
        ok_json!({
            "productId": req.path_var("id"),
            "productCategory": req.path_var("category"),
            "queryParams": {
                "name": req.query_param("name"),
                "surname": req.query_param("surname"),
            }
        })
    });

    app.post("/post-test", |req: Request| async move {
        match req.body {
            Body::Json(value) => Response::created(&value),
            Body::Text(text) => created_json!({ "text": text }),
            Body::Absent => Err(ServerError::BadRequest("missing body".to_string())),
        }
    });

    app.put("/put-test", |_req: Request| async { Response::created(&"PUT endpoint working") });
    app.patch("/patch-test", |_req: Request| async { Response::created(&"PATCH endpoint working") });
    app.delete("/delete-test", |_req: Request| async { Response::created(&"DELETE endpoint working") });

    app
}

#[tokio::test]
async fn get_route_with_query() {
    let app = sample_app();
    let response = app
        .handle(IncomingRequest::new(Method::GET, "/get-test?query=ping", BodyReceiver::empty()))
        .await;
    assert_eq!(response.status, 200);
    assert_eq!(payload(&response), json!("Query: ping Response: pong"));
}

#[tokio::test]
async fn path_variables_and_query_params_reach_the_handler() {
    let app = sample_app();
    let response = app
        .handle(IncomingRequest::new(
            Method::GET,
            "/products/shoes/42?name=Ann&surname=Lee",
            BodyReceiver::empty(),
        ))
        .await;

    assert_eq!(response.status, 200);
    assert_eq!(
        payload(&response),
        json!({
            "productId": "42",
            "productCategory": "shoes",
            "queryParams": {"name": "Ann", "surname": "Lee"}
        })
    );
}

#[tokio::test]
async fn posted_json_is_decoded_before_the_handler() {
    let app = sample_app();
    let (tx, rx) = body_channel();
    let feeder = tokio::spawn(async move {
        for chunk in [r#"{"name":"#, r#""Ann","tags""#, r#":["a","b"]}"#] {
            tx.data(chunk);
            tokio::task::yield_now().await;
        }
        tx.end();
    });

    let response = app
        .handle(IncomingRequest::new(Method::POST, "/post-test", rx).header("Content-Type", "application/json"))
        .await;
    feeder.await.unwrap();

    assert_eq!(response.status, 201);
    assert_eq!(payload(&response), json!({"name": "Ann", "tags": ["a", "b"]}));
}

#[tokio::test]
async fn malformed_json_reaches_the_handler_as_text() {
    let app = sample_app();
    let response = app
        .handle(IncomingRequest::new(Method::POST, "/post-test", BodyReceiver::from_bytes("invalid JSON")))
        .await;
    assert_eq!(response.status, 201);
    assert_eq!(payload(&response), json!({"text": "invalid JSON"}));
}

#[tokio::test]
async fn every_method_shortcut_is_routed() {
    let app = sample_app();
    for (method, path, expected) in [
        (Method::PUT, "/put-test", "PUT endpoint working"),
        (Method::PATCH, "/patch-test", "PATCH endpoint working"),
        (Method::DELETE, "/delete-test", "DELETE endpoint working"),
    ] {
        let response = app
            .handle(IncomingRequest::new(method, path, BodyReceiver::empty()))
            .await;
        assert_eq!(response.status, 201, "{} {}", method, path);
        assert_eq!(payload(&response), json!(expected));
    }
}

#[tokio::test]
async fn unknown_path_or_method_is_404() {
    let app = sample_app();
    for (method, path) in [(Method::GET, "/nope"), (Method::POST, "/get-test"), (Method::GET, "/products/shoes")] {
        let response = app
            .handle(IncomingRequest::new(method, path, BodyReceiver::empty()))
            .await;
        assert_eq!(response.status, 404);
        assert_eq!(payload(&response)["error"]["status"], 404);
    }
}

#[tokio::test]
async fn middleware_runs_in_order_before_the_handler() {
    let trace: Arc<Mutex<Vec<&'static str>>> = Arc::default();
    let mut app = Application::new();

    for name in ["m0", "m1"] {
        let trace = Arc::clone(&trace);
        app.middleware(move |req: Request, next: Next| {
            trace.lock().unwrap().push(name);
            next.handle(req)
        });
    }
    let handler_trace = Arc::clone(&trace);
    app.get("/", move |_req: Request| {
        handler_trace.lock().unwrap().push("handler");
        async { Ok(Response::no_content()) }
    });

    let response = app
        .handle(IncomingRequest::new(Method::GET, "/", BodyReceiver::empty()))
        .await;
    assert_eq!(response.status, 204);
    assert_eq!(*trace.lock().unwrap(), vec!["m0", "m1", "handler"]);
}

#[tokio::test]
async fn rejecting_middleware_halts_the_pipeline() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut app = Application::new();

    app.middleware(|req: Request, next: Next| async move {
        match req.header("authorization") {
            Some(token) if token.starts_with("Bearer ") => next.handle(req).await,
            _ => {
                let mut response = Response::new(401);
                response.body("Unauthorized");
                Ok(response)
            }
        }
    });
    let counted = Arc::clone(&calls);
    app.middleware(move |req: Request, next: Next| {
        counted.fetch_add(1, Ordering::SeqCst);
        next.handle(req)
    });
    app.get("/secret", |_req: Request| async { Ok(Response::text("secret")) });

    let denied = app
        .handle(IncomingRequest::new(Method::GET, "/secret", BodyReceiver::empty()))
        .await;
    assert_eq!(denied.status, 401);
    assert_eq!(denied.body, "Unauthorized");
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let allowed = app
        .handle(
            IncomingRequest::new(Method::GET, "/secret", BodyReceiver::empty())
                .header("Authorization", "Bearer token"),
        )
        .await;
    assert_eq!(allowed.body, "secret");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn broken_body_stream_skips_middleware_and_routing() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut app = Application::new();
    let counted = Arc::clone(&calls);
    app.middleware(move |req: Request, next: Next| {
        counted.fetch_add(1, Ordering::SeqCst);
        next.handle(req)
    });
    app.post("/upload", |_req: Request| async { Ok(Response::no_content()) });

    let (tx, rx) = body_channel();
    tx.data("{\"half\":");
    tx.error(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer"));

    let response = app
        .handle(IncomingRequest::new(Method::POST, "/upload", rx))
        .await;
    assert_eq!(response.status, 400);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn on_error_hook_renders_handler_errors() {
    let mut app = Application::new();
    app.on_error(|err| {
        let mut response = Response::new(err.status_code());
        response.body(format!("custom: {}", err));
        response
    });
    app.get("/forbidden", |_req: Request| async {
        Err::<Response, _>(ServerError::Forbidden("nope".to_string()))
    });

    let response = app
        .handle(IncomingRequest::new(Method::GET, "/forbidden", BodyReceiver::empty()))
        .await;
    assert_eq!(response.status, 403);
    assert_eq!(response.body, "custom: Forbidden: nope");
}

#[tokio::test]
async fn in_flight_requests_do_not_block_each_other() {
    let app = Arc::new(sample_app());

    let (slow_tx, slow_rx) = body_channel();
    let slow = {
        let app = Arc::clone(&app);
        tokio::spawn(async move {
            app.handle(IncomingRequest::new(Method::POST, "/post-test", slow_rx)).await
        })
    };

    let fast = app
        .handle(IncomingRequest::new(Method::GET, "/get-test", BodyReceiver::empty()))
        .await;
    assert_eq!(payload(&fast), json!("GET endpoint working"));
    assert!(!slow.is_finished());

    slow_tx.data("[1,2,3]");
    slow_tx.end();
    let slow = slow.await.unwrap();
    assert_eq!(payload(&slow), json!([1, 2, 3]));
}

#[tokio::test]
async fn serves_requests_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut config = ServerConfig::new();
    config.read_chunk_size(4);
    tokio::spawn(async move { sample_app().serve(listener, &config).await });

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let body = r#"{"via":"tcp"}"#;
    let request = format!(
        "POST /post-test HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = String::new();
    stream.read_to_string(&mut raw).await.unwrap();
    assert!(raw.starts_with("HTTP/1.1 201 Created\r\n"), "{}", raw);
    assert!(raw.ends_with(r#"{"via":"tcp"}"#), "{}", raw);
}

async fn send(addr: std::net::SocketAddr, path: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path);
    stream.write_all(request.as_bytes()).await.unwrap();
    stream
}

async fn read_all(mut stream: TcpStream) -> String {
    let mut raw = String::new();
    stream.read_to_string(&mut raw).await.unwrap();
    raw
}

#[tokio::test]
async fn connection_limit_holds_later_connections_back() {
    let entered = Arc::new(Notify::new());
    let gate = Arc::new(Notify::new());
    let mut app = Application::new();
    {
        let entered = Arc::clone(&entered);
        let gate = Arc::clone(&gate);
        app.get("/slow", move |_req: Request| {
            let entered = Arc::clone(&entered);
            let gate = Arc::clone(&gate);
            async move {
                entered.notify_one();
                gate.notified().await;
                Ok::<_, ServerError>(Response::text("slow"))
            }
        });
    }
    app.get("/fast", |_req: Request| async { Ok::<_, ServerError>(Response::text("fast")) });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut config = ServerConfig::new();
    config.max_connections(1);
    tokio::spawn(async move { app.serve(listener, &config).await });

    let first = send(addr, "/slow").await;
    entered.notified().await;
    let mut second = send(addr, "/fast").await;

    let mut buf = [0u8; 1];
    let waiting = timeout(Duration::from_millis(200), second.read(&mut buf)).await;
    assert!(waiting.is_err(), "second connection was served while the first held the only slot");

    gate.notify_one();
    let first = read_all(first).await;
    assert!(first.starts_with("HTTP/1.1 200 OK\r\n"), "{}", first);
    assert!(first.ends_with("slow"), "{}", first);

    let second = read_all(second).await;
    assert!(second.starts_with("HTTP/1.1 200 OK\r\n"), "{}", second);
    assert!(second.ends_with("fast"), "{}", second);
}

#[tokio::test]
async fn zero_connection_limit_still_serves() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut config = ServerConfig::new();
    config.max_connections = 0;
    tokio::spawn(async move { sample_app().serve(listener, &config).await });

    let raw = timeout(Duration::from_secs(5), read_all(send(addr, "/get-test").await))
        .await
        .expect("zero limit must not block every connection");
    assert!(raw.starts_with("HTTP/1.1 200 OK\r\n"), "{}", raw);
    assert!(raw.ends_with(r#""GET endpoint working""#), "{}", raw);
}
