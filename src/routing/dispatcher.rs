//! Request dispatch.
//!
//! # Responsibilities
//! - Select the handler for a request: routes are tried newest first, the
//!   first `can_handle` wins, otherwise the not-found handler
//! - Bound the number of concurrently executing handlers (`max_threads`)
//! - Track every executing handler for graceful shutdown
//! - Enforce the per-connection keep-alive request cap
//!
//! # Design Decisions
//! - Reverse registration order lets a later, more specific route shadow an
//!   earlier catch-all without priority numbers
//! - Dispatch only reads the registry snapshot; it never mutates it

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;

use crate::net::connection::{ConnectionContext, ConnectionTracker};
use crate::observability::metrics;
use crate::routing::registry::RouteRegistry;
use crate::routing::route::{Handler, HandlerContext, NotFoundHandler};

const NOT_FOUND_ROUTE: &str = "none";

/// Selects and runs the handler for each request.
#[derive(Debug)]
pub struct Dispatcher {
    routes: Arc<RouteRegistry>,
    is_secure: bool,
    workers: Arc<Semaphore>,
    tracker: ConnectionTracker,
    max_keep_alive_requests: u64,
}

impl Dispatcher {
    pub fn new(
        routes: Arc<RouteRegistry>,
        is_secure: bool,
        max_workers: usize,
        tracker: ConnectionTracker,
    ) -> Self {
        Self {
            routes,
            is_secure,
            workers: Arc::new(Semaphore::new(max_workers)),
            tracker,
            max_keep_alive_requests: 0,
        }
    }

    /// Close connections after this many requests. `0` = unlimited.
    pub fn with_max_keep_alive_requests(mut self, max: u64) -> Self {
        self.max_keep_alive_requests = max;
        self
    }

    pub fn is_secure(&self) -> bool {
        self.is_secure
    }

    /// Pick the handler for `request`. Never fails: unmatched requests get
    /// the not-found handler.
    pub fn select(&self, request: &Request<Body>, is_secure: bool) -> (String, Box<dyn Handler>) {
        let routes = self.routes.snapshot();
        for route in routes.iter().rev() {
            if route.can_handle(request, is_secure) {
                return (route.name().to_string(), route.create_handler(request));
            }
        }
        (NOT_FOUND_ROUTE.to_string(), Box::new(NotFoundHandler))
    }

    /// Run the full dispatch for one request.
    pub async fn dispatch(&self, request: Request<Body>) -> Response {
        let start_time = Instant::now();
        let connection = request.extensions().get::<ConnectionContext>().cloned();

        let _permit = match Arc::clone(&self.workers).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return (StatusCode::SERVICE_UNAVAILABLE, "Server is shutting down").into_response();
            }
        };
        let _guard = self.tracker.track();

        let method = request.method().clone();
        let path = request.uri().path().to_string();
        let (route_name, handler) = self.select(&request, self.is_secure);

        tracing::debug!(
            method = %method,
            path = %path,
            route = %route_name,
            "Dispatching request"
        );

        let ctx = HandlerContext::new(
            self.is_secure,
            connection.as_ref().map(|c| c.peer_addr),
            self.tracker.clone(),
        );
        let mut response = handler.handle(request, ctx).await;

        if let Some(connection) = &connection {
            let served = connection.record_request();
            if self.max_keep_alive_requests > 0 && served >= self.max_keep_alive_requests {
                tracing::trace!(connection_id = %connection.id, served, "Keep-alive request cap reached");
                response
                    .headers_mut()
                    .insert(header::CONNECTION, HeaderValue::from_static("close"));
            }
        }

        metrics::record_request(&route_name, response.status().as_u16(), start_time);
        response
    }
}

/// Axum fallback that hands every request to the dispatcher.
pub async fn dispatch_handler(State(dispatcher): State<Arc<Dispatcher>>, request: Request<Body>) -> Response {
    dispatcher.dispatch(request).await
}
