//! Application is the main entry point for the Waypost framework.
//!
//! Routes and middleware are registered against an [`Application`] while it
//! is being set up. Serving consumes it, which freezes the route table for
//! the rest of the process.
//!
//! # Examples
//!
//! ```rust
//! use waypost::app::Application;
//! use waypost::ok_json;
//!
//! let mut app = Application::new();
//! app.get("/products/:category/:id", |req| async move {
//!     ok_json!({
//!         "productId": req.path_var("id"),
//!         "productCategory": req.path_var("category"),
//!     })
//! });
//! ```

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{Handler, HttpResponse, IntoResponse};
use crate::http::{body_channel, decode_body, BodySender, IncomingRequest, Method, Request, Response};
use crate::middleware::{Middleware, MiddlewareChain};
use crate::router::Router;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::io::{Error, ErrorKind};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, BufReader};
use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tokio::sync::Semaphore;
use tracing::Instrument;

type ErrorHandler = Arc<dyn Fn(ServerError) -> Response + Send + Sync>;

impl Handler for Router {
    fn handle(&self, req: Request) -> BoxFuture<'static, HttpResponse> {
        self.resolve_route(req)
    }
}

/// The application facade: owns the route table and the middleware chain
/// and drives each request through body decoding, middleware and routing.
///
/// # Example
///
/// ```rust,no_run
/// use waypost::app::Application;
/// use waypost::config::ServerConfig;
/// use waypost::http::Response;
///
/// let mut app = Application::new();
/// app.get("/", |_req| async { Ok(Response::text("Hello")) });
/// app.listen(&ServerConfig::default()).unwrap();
/// ```
pub struct Application {
    router: Arc<Router>,
    middlewares: MiddlewareChain,
    on_error: Option<ErrorHandler>,
}

impl Default for Application {
    fn default() -> Self {
        Self::new()
    }
}

impl Application {
    pub fn new() -> Self {
        Self {
            router: Arc::new(Router::new()),
            middlewares: MiddlewareChain::new(),
            on_error: None,
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    fn router_mut(&mut self) -> &mut Router {
        Arc::get_mut(&mut self.router)
            .expect("routes cannot be registered while requests are in flight")
    }

    /// Turns errors returned by middleware or handlers into responses.
    /// Without a hook they render as [`Response::error`].
    pub fn on_error<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(ServerError) -> Response + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(handler));
        self
    }

    /// Appends a middleware; it runs after every middleware added before it.
    pub fn middleware(&mut self, middleware: impl Middleware) -> &mut Self {
        self.middlewares.add(middleware);
        self
    }

    /// Registers a handler for an arbitrary method.
    ///
    /// # Panics
    ///
    /// Panics if `path` is empty.
    pub fn route<H: Handler>(&mut self, method: Method, path: &str, handler: H) -> &mut Self {
        self.router_mut().route(method, path, handler);
        self
    }

    pub fn get<F, R>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(Request) -> R + Send + Sync + 'static,
        R: IntoResponse + 'static,
    {
        self.route(Method::GET, path, handler)
    }

    pub fn post<F, R>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(Request) -> R + Send + Sync + 'static,
        R: IntoResponse + 'static,
    {
        self.route(Method::POST, path, handler)
    }

    pub fn put<F, R>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(Request) -> R + Send + Sync + 'static,
        R: IntoResponse + 'static,
    {
        self.route(Method::PUT, path, handler)
    }

    pub fn patch<F, R>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(Request) -> R + Send + Sync + 'static,
        R: IntoResponse + 'static,
    {
        self.route(Method::PATCH, path, handler)
    }

    pub fn delete<F, R>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(Request) -> R + Send + Sync + 'static,
        R: IntoResponse + 'static,
    {
        self.route(Method::DELETE, path, handler)
    }

    /// Runs one request through the pipeline and returns its response.
    ///
    /// Errors from middleware or handlers are rendered through the
    /// `on_error` hook. Panics are not caught here.
    pub async fn handle(&self, incoming: IncomingRequest) -> Response {
        match self.dispatch(incoming).await {
            Ok(response) => response,
            Err(err) => self.handle_error(err),
        }
    }

    /// The pipeline itself: body decoding for methods that carry a body,
    /// then every middleware in order, then route resolution.
    ///
    /// A failed body stream ends the request with
    /// [`ServerError::BodyAborted`] before any middleware runs.
    pub async fn dispatch(&self, incoming: IncomingRequest) -> HttpResponse {
        let IncomingRequest {
            method,
            target,
            headers,
            body,
        } = incoming;

        let mut req = Request::new(method, &target, headers);
        if method.carries_body() {
            req = decode_body(req, body).await?;
        }

        let endpoint: Arc<dyn Handler> = self.router.clone();
        self.middlewares.run(req, endpoint).await
    }

    fn handle_error(&self, error: ServerError) -> Response {
        if let Some(handler) = &self.on_error {
            handler(error)
        } else {
            Response::error(error)
        }
    }

    /// Binds `config.addr()` on a new runtime and serves until the process
    /// exits.
    pub fn listen(self, config: &ServerConfig) -> ServerResult<()> {
        let runtime = Runtime::new()?;
        runtime.block_on(async {
            let listener = TcpListener::bind(config.addr()).await?;
            tracing::info!(
                addr = %config.addr(),
                environment = %config.environment,
                "server listening"
            );
            self.serve(listener, config).await
        })
    }

    /// Accepts connections from `listener`, one request per connection.
    pub async fn serve(self, listener: TcpListener, config: &ServerConfig) -> ServerResult<()> {
        let app = Arc::new(self);
        let slots = Arc::new(Semaphore::new(config.max_connections.max(1)));
        let chunk_size = config.read_chunk_size;

        loop {
            let permit = Arc::clone(&slots)
                .acquire_owned()
                .await
                .map_err(|e| ServerError::Internal(e.to_string()))?;

            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::error!(error = %e, "connection failed");
                    continue;
                }
            };

            let app = Arc::clone(&app);
            let span = tracing::info_span!("connection", %peer);
            tokio::spawn(
                async move {
                    if let Err(e) = app.handle_connection(stream, chunk_size).await {
                        tracing::error!(error = %e, "connection error");
                    }
                    drop(permit);
                }
                .instrument(span),
            );
        }
    }

    async fn handle_connection<S>(&self, mut stream: S, chunk_size: usize) -> Result<(), Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut reader = BufReader::new(&mut stream);
        let head = match read_head(&mut reader).await? {
            Some(head) => head,
            None => return Ok(()),
        };

        let response = match head {
            Ok(head) => {
                let content_length = match head.headers.get("content-length") {
                    Some(value) => value.trim().parse::<usize>().map_err(|_| {
                        Error::new(ErrorKind::InvalidData, "invalid Content-Length")
                    }),
                    None => Ok(0),
                };

                match content_length {
                    Ok(content_length) => {
                        let (tx, rx) = body_channel();
                        let incoming = IncomingRequest {
                            method: head.method,
                            target: head.target.clone(),
                            headers: head.headers,
                            body: rx,
                        };

                        let pump = pump_body(&mut reader, content_length, chunk_size, tx);
                        let dispatch = AssertUnwindSafe(self.handle(incoming)).catch_unwind();
                        let ((), outcome) = tokio::join!(pump, dispatch);

                        let response = outcome.unwrap_or_else(|panic| {
                            let msg = if let Some(msg) = panic.downcast_ref::<&str>() {
                                msg.to_string()
                            } else if let Some(msg) = panic.downcast_ref::<String>() {
                                msg.clone()
                            } else {
                                "Unknown panic".to_string()
                            };
                            tracing::error!(panic = %msg, "handler panicked");
                            self.handle_error(ServerError::Internal(msg))
                        });
                        tracing::info!(
                            method = %head.method,
                            target = %head.target,
                            status = response.status,
                            "request completed"
                        );
                        response
                    }
                    Err(e) => self.handle_error(ServerError::BadRequest(e.to_string())),
                }
            }
            Err(err) => self.handle_error(err),
        };
        drop(reader);

        let mut response = response;
        response.header("Connection", "close");
        response.write_to(&mut stream).await
    }
}

struct RequestHead {
    method: Method,
    target: String,
    headers: HashMap<String, String>,
}

/// Reads the request line and headers. `Ok(None)` means the peer closed
/// the connection before sending anything; an inner `Err` is a malformed
/// head that still deserves a response.
async fn read_head<R>(reader: &mut R) -> Result<Option<ServerResult<RequestHead>>, Error>
where
    R: AsyncBufRead + Unpin,
{
    let mut request_line = Vec::new();
    if reader.read_until(b'\n', &mut request_line).await? == 0 {
        return Ok(None);
    }

    let mut header_lines = Vec::new();
    loop {
        let mut line = Vec::new();
        if reader.read_until(b'\n', &mut line).await? == 0
            || line.iter().all(u8::is_ascii_whitespace)
        {
            break;
        }
        header_lines.push(line);
    }

    Ok(Some(parse_head(request_line, header_lines)))
}

fn parse_head(request_line: Vec<u8>, header_lines: Vec<Vec<u8>>) -> ServerResult<RequestHead> {
    let utf8 = |bytes: Vec<u8>| {
        String::from_utf8(bytes)
            .map_err(|_| ServerError::BadRequest("request head is not valid UTF-8".to_string()))
    };

    let request_line = utf8(request_line)?;
    let mut headers = HashMap::new();
    for line in header_lines {
        let line = utf8(line)?;
        if let Some((key, value)) = line.trim().split_once(':') {
            headers.insert(key.trim().to_lowercase(), value.trim().to_string());
        }
    }

    let mut parts = request_line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(method), Some(target)) => Ok(RequestHead {
            method: method.parse()?,
            target: target.to_string(),
            headers,
        }),
        _ => Err(ServerError::BadRequest("invalid request line".to_string())),
    }
}

/// Streams `length` body bytes from `reader` into `tx` in chunks of at most
/// `chunk_size`. Stops quietly if the application dropped the receiver.
async fn pump_body<R>(reader: &mut R, length: usize, chunk_size: usize, tx: BodySender)
where
    R: AsyncRead + Unpin,
{
    let mut remaining = length;
    let mut buf = vec![0u8; chunk_size.clamp(1, length.max(1))];
    while remaining > 0 {
        let want = remaining.min(buf.len());
        match reader.read(&mut buf[..want]).await {
            Ok(0) => {
                tx.error(Error::new(ErrorKind::UnexpectedEof, "connection closed mid-body"));
                return;
            }
            Ok(n) => {
                remaining -= n;
                if !tx.data(&buf[..n]) {
                    return;
                }
            }
            Err(e) => {
                tx.error(e);
                return;
            }
        }
    }
    tx.end();
}
