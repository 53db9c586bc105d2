//! Route and handler contracts.
//!
//! A [`Route`] decides whether it can serve a request and, if so, builds a
//! one-shot [`Handler`] for it. Embedders add new route kinds by implementing
//! `Route`; the built-in static file, upload and WebSocket routes use the same
//! contract.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::future::BoxFuture;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;

use crate::net::connection::{ConnectionGuard, ConnectionTracker};
use crate::routing::matcher::{AndMatcher, Matcher, RouteMatch};

/// A request matcher plus handler factory.
pub trait Route: Send + Sync {
    /// Whether this route serves `request` arriving on a channel with the
    /// given security.
    fn can_handle(&self, request: &Request<Body>, is_secure: bool) -> bool;

    /// Build the handler for a request this route accepted.
    fn create_handler(&self, request: &Request<Body>) -> Box<dyn Handler>;

    /// Name used in logs and metrics.
    fn name(&self) -> &str {
        "route"
    }
}

/// Serves exactly one request.
pub trait Handler: Send {
    fn handle(self: Box<Self>, request: Request<Body>, ctx: HandlerContext) -> BoxFuture<'static, Response>;
}

/// What a handler knows about the server it runs in.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    is_secure: bool,
    peer_addr: Option<SocketAddr>,
    tracker: ConnectionTracker,
}

impl HandlerContext {
    pub(crate) fn new(is_secure: bool, peer_addr: Option<SocketAddr>, tracker: ConnectionTracker) -> Self {
        Self {
            is_secure,
            peer_addr,
            tracker,
        }
    }

    /// A context not attached to any running server.
    pub fn detached(is_secure: bool) -> Self {
        Self::new(is_secure, None, ConnectionTracker::new())
    }

    pub fn is_secure(&self) -> bool {
        self.is_secure
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Register work that outlives the request (e.g. an upgraded connection)
    /// so `stop()` waits for it.
    pub fn track(&self) -> ConnectionGuard {
        self.tracker.track()
    }

    /// Flips to `true` when the server starts stopping.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.tracker.shutdown_receiver()
    }
}

/// Used when no route matches.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotFoundHandler;

impl Handler for NotFoundHandler {
    fn handle(self: Box<Self>, request: Request<Body>, _ctx: HandlerContext) -> BoxFuture<'static, Response> {
        let path = request.uri().path().to_string();
        Box::pin(async move {
            tracing::debug!(path = %path, "No route matched");
            (StatusCode::NOT_FOUND, "No matching route found").into_response()
        })
    }
}

/// A route backed by an async closure.
///
/// ```no_run
/// use waypost::routing::{FnRoute, RouteMatch};
///
/// let hello = FnRoute::new("hello", RouteMatch::prefix("/hello"), |_req| async { "hi" });
/// ```
pub struct FnRoute<F> {
    name: String,
    matcher: AndMatcher,
    handler: Arc<F>,
}

impl<F, Fut, R> FnRoute<F>
where
    F: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse,
{
    pub fn new(name: impl Into<String>, conditions: RouteMatch, handler: F) -> Self {
        Self {
            name: name.into(),
            matcher: conditions.compile(),
            handler: Arc::new(handler),
        }
    }
}

impl<F, Fut, R> Route for FnRoute<F>
where
    F: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse,
{
    fn can_handle(&self, request: &Request<Body>, is_secure: bool) -> bool {
        self.matcher.matches(request, is_secure)
    }

    fn create_handler(&self, _request: &Request<Body>) -> Box<dyn Handler> {
        Box::new(FnHandler {
            handler: Arc::clone(&self.handler),
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

struct FnHandler<F> {
    handler: Arc<F>,
}

impl<F, Fut, R> Handler for FnHandler<F>
where
    F: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse,
{
    fn handle(self: Box<Self>, request: Request<Body>, _ctx: HandlerContext) -> BoxFuture<'static, Response> {
        let fut = (self.handler)(request);
        Box::pin(async move { fut.await.into_response() })
    }
}
