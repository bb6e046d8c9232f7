//! Ordered request interceptors.
//!
//! A middleware receives the request and a [`Next`] handle. Calling
//! [`Next::handle`] runs the rest of the pipeline: the following middleware,
//! or the route dispatch once the list is exhausted. Returning without
//! calling it ends the pipeline with whatever the middleware returned.
//!
//! ```rust
//! use waypost::middleware::{Middleware, MiddlewareResult, Next};
//! use waypost::http::Request;
//! use waypost::ServerError;
//!
//! struct RequireToken;
//!
//! impl Middleware for RequireToken {
//!     fn call(&self, req: Request, next: Next) -> MiddlewareResult {
//!         Box::pin(async move {
//!             match req.header("Authorization") {
//!                 Some(token) if token.starts_with("Bearer ") => next.handle(req).await,
//!                 _ => Err(ServerError::Unauthorized("Authentication required".to_string())),
//!             }
//!         })
//!     }
//! }
//! ```

use crate::handler::{Handler, HttpResponse, IntoResponse};
use crate::http::Request;
use futures::future::BoxFuture;
use std::sync::Arc;

pub type MiddlewareResult = BoxFuture<'static, HttpResponse>;

pub trait Middleware: Send + Sync + 'static {
    fn call(&self, req: Request, next: Next) -> MiddlewareResult;
}

impl<F, R> Middleware for F
where
    F: Fn(Request, Next) -> R + Send + Sync + 'static,
    R: IntoResponse,
{
    fn call(&self, req: Request, next: Next) -> MiddlewareResult {
        (self)(req, next).into_response_future()
    }
}

type Stages = Arc<[Arc<dyn Middleware>]>;

/// The remainder of the pipeline, from one stage onwards.
///
/// `handle` consumes the value, so a middleware can continue the pipeline
/// at most once.
pub struct Next {
    stages: Stages,
    index: usize,
    endpoint: Arc<dyn Handler>,
}

impl Next {
    /// A continuation that goes straight to `endpoint`.
    pub fn new<H: Handler>(endpoint: H) -> Self {
        Self {
            stages: Arc::from(Vec::new()),
            index: 0,
            endpoint: Arc::new(endpoint),
        }
    }

    pub async fn handle(self, req: Request) -> HttpResponse {
        self.run(req).await
    }

    fn run(mut self, req: Request) -> MiddlewareResult {
        match self.stages.get(self.index).cloned() {
            Some(middleware) => {
                self.index += 1;
                middleware.call(req, self)
            }
            None => self.endpoint.handle(req),
        }
    }
}

#[derive(Clone)]
pub struct MiddlewareChain {
    stages: Stages,
}

impl Default for MiddlewareChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self {
            stages: Arc::from(Vec::new()),
        }
    }

    pub fn add<M: Middleware>(&mut self, middleware: M) -> &mut Self {
        let mut stages = self.stages.to_vec();
        stages.push(Arc::new(middleware));
        self.stages = stages.into();
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Runs every middleware in registration order, then `endpoint`.
    pub fn run(&self, req: Request, endpoint: Arc<dyn Handler>) -> MiddlewareResult {
        Next {
            stages: Arc::clone(&self.stages),
            index: 0,
            endpoint,
        }
        .run(req)
    }
}
