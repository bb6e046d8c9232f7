mod pattern;

pub use pattern::{RoutePattern, Segment};

use crate::handler::{Handler, HttpResponse, IntoResponse};
use crate::http::{Method, Request, Response};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) struct Route {
    pub(crate) pattern: RoutePattern,
    pub(crate) handler: Arc<dyn Handler>,
}

/// The route table.
///
/// Routes are kept per method in registration order and resolved by a
/// linear scan, so among patterns that match the same path the one
/// registered first wins.
#[derive(Default)]
pub struct Router {
    routes: HashMap<Method, Vec<Route>>,
}

impl Router {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
        }
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

    /// Registers `handler` for `method` and `path`.
    ///
    /// # Panics
    ///
    /// Panics if `path` is empty.
    pub fn route<H: Handler>(&mut self, method: Method, path: &str, handler: H) -> &mut Self {
        let pattern = RoutePattern::parse(path)
            .unwrap_or_else(|e| panic!("invalid route `{}`: {}", path, e));
        tracing::debug!(%method, pattern = pattern.as_str(), "route registered");
        self.routes.entry(method).or_default().push(Route {
            pattern,
            handler: Arc::new(handler),
        });
        self
    }

    /// Finds the first route registered for `method` whose pattern matches
    /// `path`, along with the captured path variables.
    pub fn resolve(&self, method: Method, path: &str) -> Option<(Arc<dyn Handler>, HashMap<String, String>)> {
        let segments: Vec<&str> = path.split('/').collect();
        self.routes.get(&method)?.iter().find_map(|route| {
            route
                .pattern
                .matches(&segments)
                .map(|vars| (Arc::clone(&route.handler), vars))
        })
    }

    /// Resolves `req` and runs the matching handler, or answers with the
    /// standard 404 response when nothing matches.
    pub fn resolve_route(&self, mut req: Request) -> BoxFuture<'static, HttpResponse> {
        match self.resolve(req.method, &req.path) {
            Some((handler, vars)) => {
                tracing::debug!(method = %req.method, path = %req.path, "route matched");
                req.path_vars = vars;
                handler.handle(req)
            }
            None => {
                tracing::debug!(method = %req.method, path = %req.path, "no route matched");
                Box::pin(async { Ok(Response::not_found()) })
            }
        }
    }

    pub fn len(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
