//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Store the (method, path) → handler table
//! - Dispatch a request to its handler, or synthesize a 404
//!
//! # Design Decisions
//! - Built once through `RouterBuilder`, immutable afterwards (shared via Arc)
//! - Exact literal match on method and path; the query string is ignored
//! - Duplicate registrations are a startup error, not a silent override

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use thiserror::Error;

use crate::http::error::HandlerError;
use crate::http::message::{Message, Method};
use crate::http::request::RequestId;
use crate::http::response;
use crate::net::connection::ConnectionId;

/// Per-request context handed to handlers and services.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Remote address of the client connection.
    pub peer_addr: SocketAddr,
    /// Connection the request arrived on.
    pub connection_id: ConnectionId,
    /// Correlation ID of this request.
    pub request_id: RequestId,
}

/// Anything that turns one request into one response.
///
/// The connection handler is generic over this, so the router (backend,
/// chat-app) and the reverse proxy share the same read/dispatch/write loop.
pub trait Service: Send + Sync + 'static {
    fn call(&self, req: Message, ctx: RequestContext) -> BoxFuture<'_, Result<Message, HandlerError>>;
}

/// A request handler bound to one route.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, req: Message, ctx: RequestContext) -> BoxFuture<'static, Result<Message, HandlerError>>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Message, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Message, HandlerError>> + Send + 'static,
{
    fn call(&self, req: Message, ctx: RequestContext) -> BoxFuture<'static, Result<Message, HandlerError>> {
        (self)(req, ctx).boxed()
    }
}

/// Adapt a synchronous method on shared state into a [`Handler`].
pub fn with_state<S>(
    state: &Arc<S>,
    f: fn(&S, Message, &RequestContext) -> Result<Message, HandlerError>,
) -> impl Handler
where
    S: Send + Sync + 'static,
{
    let state = Arc::clone(state);
    move |req: Message, ctx: RequestContext| {
        let state = Arc::clone(&state);
        async move { f(&state, req, &ctx) }
    }
}

/// Startup-time route registration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("route {method} {path} registered twice")]
    Duplicate { method: String, path: String },

    #[error("route path must start with '/': {0}")]
    InvalidPath(String),
}

type RouteKey = (Method, String);

/// Collects routes before the table is frozen.
#[derive(Default)]
pub struct RouterBuilder {
    routes: HashMap<RouteKey, Arc<dyn Handler>>,
    errors: Vec<RouteError>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for exactly `method` + `path`.
    pub fn route(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        if !path.starts_with('/') {
            self.errors.push(RouteError::InvalidPath(path.to_string()));
            return self;
        }
        let key = (method, path.to_string());
        if self.routes.contains_key(&key) {
            self.errors.push(RouteError::Duplicate {
                method: key.0.to_string(),
                path: key.1,
            });
            return self;
        }
        self.routes.insert(key, Arc::new(handler));
        self
    }

    /// Freeze the table. Fails with the first registration error.
    pub fn build(mut self) -> Result<Router, RouteError> {
        if !self.errors.is_empty() {
            return Err(self.errors.remove(0));
        }
        tracing::debug!(routes = self.routes.len(), "Router built");
        Ok(Router { routes: self.routes })
    }
}

/// Immutable (method, path) dispatch table.
pub struct Router {
    routes: HashMap<RouteKey, Arc<dyn Handler>>,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Look up the handler for a request, if any.
    pub fn lookup(&self, method: &Method, path: &str) -> Option<Arc<dyn Handler>> {
        self.routes.get(&(method.clone(), path.to_string())).cloned()
    }

    /// Route a request. An unmatched request gets a synthesized 404.
    pub async fn dispatch(&self, req: Message, ctx: RequestContext) -> Result<Message, HandlerError> {
        let (method, path) = match (req.method(), req.path()) {
            (Some(m), Some(p)) => (m.clone(), p.to_string()),
            _ => return Ok(response::error(400, "expected a request")),
        };

        match self.lookup(&method, &path) {
            Some(handler) => handler.call(req, ctx).await,
            None => {
                tracing::debug!(request_id = %ctx.request_id, method = %method, path = %path, "No route matched");
                Ok(response::not_found(&path))
            }
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Service for Router {
    fn call(&self, req: Message, ctx: RequestContext) -> BoxFuture<'_, Result<Message, HandlerError>> {
        self.dispatch(req, ctx).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::response::text;

    fn ctx() -> RequestContext {
        RequestContext {
            peer_addr: "127.0.0.1:1".parse().unwrap(),
            connection_id: ConnectionId::new(),
            request_id: RequestId::generate(),
        }
    }

    fn hello(_req: Message, _ctx: RequestContext) -> impl Future<Output = Result<Message, HandlerError>> {
        async { Ok(text(200, "hello")) }
    }

    #[tokio::test]
    async fn exact_match_dispatches() {
        let router = Router::builder().route(Method::Get, "/hello", hello).build().unwrap();
        let resp = router.dispatch(Message::request(Method::Get, "/hello?x=1"), ctx()).await.unwrap();
        assert_eq!(resp.status(), Some(200));
        assert_eq!(resp.body, b"hello");
    }

    #[tokio::test]
    async fn no_match_is_404() {
        let router = Router::builder().route(Method::Get, "/hello", hello).build().unwrap();

        let wrong_method = router.dispatch(Message::request(Method::Post, "/hello"), ctx()).await.unwrap();
        assert_eq!(wrong_method.status(), Some(404));

        let prefix = router.dispatch(Message::request(Method::Get, "/hello/world"), ctx()).await.unwrap();
        assert_eq!(prefix.status(), Some(404));
    }

    #[test]
    fn duplicate_route_rejected() {
        let err = Router::builder()
            .route(Method::Get, "/a", hello)
            .route(Method::Get, "/a", hello)
            .build()
            .err()
            .unwrap();
        assert_eq!(
            err,
            RouteError::Duplicate {
                method: "GET".into(),
                path: "/a".into()
            }
        );
    }

    #[test]
    fn relative_path_rejected() {
        assert!(Router::builder().route(Method::Get, "a", hello).build().is_err());
    }

    #[tokio::test]
    async fn with_state_binds_shared_state() {
        struct Counter(std::sync::atomic::AtomicUsize);
        fn bump(state: &Counter, _req: Message, _ctx: &RequestContext) -> Result<Message, HandlerError> {
            let n = state.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            Ok(text(200, n.to_string()))
        }

        let state = Arc::new(Counter(std::sync::atomic::AtomicUsize::new(0)));
        let router = Router::builder()
            .route(Method::Post, "/bump", with_state(&state, bump))
            .build()
            .unwrap();
        router.dispatch(Message::request(Method::Post, "/bump"), ctx()).await.unwrap();
        let resp = router.dispatch(Message::request(Method::Post, "/bump"), ctx()).await.unwrap();
        assert_eq!(resp.body, b"2");
    }
}
