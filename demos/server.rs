//! Demo server for Waypost
//!
//! Shows route registration with path variables and query parameters,
//! body decoding for POST requests, and two middleware:
//! - an API key check that rejects requests without a valid key
//! - a request logger that times the rest of the pipeline
//!
//! Run with `PORT=3000 APP_ENV=development cargo run --example server`.

use std::time::Instant;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use waypost::config::ServerConfig;
use waypost::http::Request;
use waypost::middleware::{Middleware, MiddlewareResult, Next};
use waypost::{ok_json, Application, Response, ServerError};

struct ApiKeyAuth {
    key: String,
}

impl Middleware for ApiKeyAuth {
    fn call(&self, req: Request, next: Next) -> MiddlewareResult {
        let expected = self.key.clone();
        Box::pin(async move {
            match req.header("x-api-key") {
                Some(key) if key == expected => next.handle(req).await,
                _ => Err(ServerError::Unauthorized("missing or invalid API key".to_string())),
            }
        })
    }
}

struct RequestLogger;

impl Middleware for RequestLogger {
    fn call(&self, req: Request, next: Next) -> MiddlewareResult {
        Box::pin(async move {
            let start = Instant::now();
            let method = req.method;
            let path = req.path.clone();
            let res = next.handle(req).await;
            let status = match &res {
                Ok(res) => res.status,
                Err(err) => err.status_code(),
            };
            tracing::info!(%method, %path, status, elapsed_ms = start.elapsed().as_millis() as u64, "handled");
            res
        })
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "waypost=debug,server=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;
    let mut app = Application::new();

    app.middleware(ApiKeyAuth {
        key: std::env::var("API_KEY").unwrap_or_else(|_| "secret".to_string()),
    });
    app.middleware(RequestLogger);

    app.get("/get-test", |req: Request| async move {
        if req.query_param("query") == Some("ping") {
            let mut response = Response::new(200);
            response.json(&"Query: ping Response: pong")?;
            return Ok(response);
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

    app.post("/post-test", |req: Request| async move { Response::created(&req.body.as_json()) });
    app.put("/put-test", |_req: Request| async { Response::created(&"PUT endpoint working") });
    app.delete("/delete-test", |_req: Request| async { Response::created(&"DELETE endpoint working") });
    app.patch("/patch-test", |_req: Request| async { Response::created(&"PATCH endpoint working") });

    app.listen(&config)?;
    Ok(())
}
