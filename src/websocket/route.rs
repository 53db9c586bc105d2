//! WebSocket route and per-session handler.
//!
//! # Responsibilities
//! - Accept upgrade requests under the configured prefix
//! - Enforce the origin allow-list and negotiate subprotocols
//! - Run one read loop per session, feeding frames to listeners
//! - Expose the session registry operations to the application
//!
//! # Session lifecycle
//! ```text
//! upgrade ─► register ─► on_open ─► read loop ─► unregister ─► on_close
//!                                      │
//!        peer close / read error / disconnect / server stop / idle timeout
//! ```
//!
//! The session task holds an in-flight guard, so `HttpServer::stop` waits for
//! every session to finish its close sequence.

use axum::body::Body;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::FromRequestParts;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::net::connection::shutdown_requested;
use crate::routing::matcher::{AndMatcher, Matcher, RouteMatch};
use crate::routing::route::{Handler, HandlerContext, Route};
use crate::websocket::events::{ListenerSet, WebSocketListener};
use crate::websocket::frame::Frame;
use crate::websocket::registry::SessionRegistry;
use crate::websocket::session::{Session, SessionId, SessionInfo};

/// WebSocket route configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebSocketSettings {
    /// Path prefix that upgrade requests must start with.
    pub path_prefix: String,
    /// Only accept upgrades over the secure channel.
    pub require_secure: bool,
    /// Subprotocols offered during negotiation, in preference order.
    pub subprotocols: Vec<String>,
    /// Accepted `Origin` values. Empty accepts any origin.
    pub allowed_origins: Vec<String>,
    /// Upper bound on a single outbound write.
    pub send_timeout_ms: u64,
    /// Largest inbound message accepted.
    pub max_message_size: usize,
    /// Disconnect sessions silent for this long. `0` = never.
    pub idle_timeout_secs: u64,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            path_prefix: "/ws".to_string(),
            require_secure: false,
            subprotocols: Vec::new(),
            allowed_origins: Vec::new(),
            send_timeout_ms: 5_000,
            max_message_size: 64 << 20,
            idle_timeout_secs: 0,
        }
    }
}

impl WebSocketSettings {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    fn route_match(&self) -> RouteMatch {
        RouteMatch {
            path_prefix: self.path_prefix.clone(),
            require_secure: self.require_secure,
            ..RouteMatch::default()
        }
    }

    fn origin_allowed(&self, headers: &HeaderMap) -> bool {
        if self.allowed_origins.is_empty() {
            return true;
        }
        // Non-browser clients send no Origin; the allow-list only guards browsers.
        let Some(origin) = headers.get(header::ORIGIN) else {
            return true;
        };
        let Ok(origin) = origin.to_str() else {
            return false;
        };
        self.allowed_origins
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(origin))
    }
}

/// True if the request asks for a WebSocket upgrade.
pub fn is_upgrade_request(request: &Request<Body>) -> bool {
    request
        .headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

/// State shared between the route and its session tasks.
struct Endpoint {
    settings: WebSocketSettings,
    sessions: SessionRegistry,
    listeners: ListenerSet,
}

/// Serves WebSocket upgrades and owns the sessions they create.
pub struct WebSocketRoute {
    matcher: AndMatcher,
    endpoint: Arc<Endpoint>,
}

impl WebSocketRoute {
    pub fn new(settings: WebSocketSettings) -> Self {
        Self {
            matcher: settings.route_match().compile(),
            endpoint: Arc::new(Endpoint {
                sessions: SessionRegistry::new(settings.send_timeout()),
                listeners: ListenerSet::new(),
                settings,
            }),
        }
    }

    pub fn settings(&self) -> &WebSocketSettings {
        &self.endpoint.settings
    }

    pub async fn broadcast(&self, frame: &Frame) -> usize {
        self.endpoint.sessions.broadcast(frame).await
    }

    pub async fn send(&self, session: SessionId, frame: &Frame) -> bool {
        self.endpoint.sessions.send(session, frame).await
    }

    pub async fn disconnect(&self, session: SessionId) -> bool {
        self.endpoint.sessions.disconnect(session).await
    }

    pub async fn disconnect_all(&self) -> usize {
        self.endpoint.sessions.disconnect_all().await
    }

    pub fn client_count(&self) -> usize {
        self.endpoint.sessions.count()
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.endpoint.sessions.sessions()
    }

    pub fn register_listener(&self, listener: Arc<dyn WebSocketListener>) {
        self.endpoint.listeners.add(listener);
    }

    pub fn unregister_listener(&self, listener: &Arc<dyn WebSocketListener>) -> bool {
        self.endpoint.listeners.remove(listener)
    }
}

impl Route for WebSocketRoute {
    fn can_handle(&self, request: &Request<Body>, is_secure: bool) -> bool {
        self.matcher.matches(request, is_secure) && is_upgrade_request(request)
    }

    fn create_handler(&self, _request: &Request<Body>) -> Box<dyn Handler> {
        Box::new(WebSocketHandler {
            endpoint: Arc::clone(&self.endpoint),
        })
    }

    fn name(&self) -> &str {
        "websocket"
    }
}

impl std::fmt::Debug for WebSocketRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketRoute")
            .field("path_prefix", &self.endpoint.settings.path_prefix)
            .field("clients", &self.client_count())
            .finish()
    }
}

struct WebSocketHandler {
    endpoint: Arc<Endpoint>,
}

impl Handler for WebSocketHandler {
    fn handle(self: Box<Self>, request: Request<Body>, ctx: HandlerContext) -> BoxFuture<'static, Response> {
        Box::pin(self.endpoint.upgrade(request, ctx))
    }
}

impl Endpoint {
    async fn upgrade(self: Arc<Self>, request: Request<Body>, ctx: HandlerContext) -> Response {
        if !self.settings.origin_allowed(request.headers()) {
            tracing::warn!(
                origin = ?request.headers().get(header::ORIGIN),
                peer = ?ctx.peer_addr(),
                "Rejected WebSocket upgrade from disallowed origin"
            );
            return (StatusCode::FORBIDDEN, "Origin not allowed").into_response();
        }

        let (mut parts, _body) = request.into_parts();
        let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
            Ok(upgrade) => upgrade,
            Err(rejection) => {
                tracing::debug!(error = %rejection, path = %parts.uri.path(), "Invalid WebSocket upgrade");
                return rejection.into_response();
            }
        };

        let mut upgrade = upgrade.max_message_size(self.settings.max_message_size);
        if !self.settings.subprotocols.is_empty() {
            upgrade = upgrade.protocols(self.settings.subprotocols.clone());
        }

        let guard = ctx.track();
        let shutdown = ctx.shutdown_receiver();
        let peer_addr = ctx.peer_addr();
        upgrade
            .on_failed_upgrade(|error| tracing::warn!(error = %error, "WebSocket upgrade failed"))
            .on_upgrade(move |socket| async move {
                self.run_session(socket, peer_addr, shutdown).await;
                drop(guard);
            })
    }

    async fn run_session(&self, socket: WebSocket, peer_addr: Option<SocketAddr>, mut shutdown: watch::Receiver<bool>) {
        let protocol = socket.protocol().and_then(|p| p.to_str().ok()).map(str::to_string);
        let (sink, mut stream) = socket.split();
        let session = Arc::new(Session::new(peer_addr, sink));
        let id = session.id();

        self.sessions.register(Arc::clone(&session));
        tracing::info!(session = %id, peer = ?peer_addr, protocol = ?protocol, "WebSocket session opened");
        self.listeners.emit_open(&session.info());

        let idle_timeout = self.settings.idle_timeout();
        let reason = loop {
            tokio::select! {
                message = stream.next() => match message {
                    Some(Ok(Message::Close(_))) | None => break "peer closed",
                    Some(Ok(message)) => {
                        session.touch();
                        if let Some(frame) = Frame::from_message(message) {
                            self.listeners.emit_frame(id, &frame);
                        }
                    }
                    Some(Err(e)) => {
                        tracing::debug!(session = %id, error = %e, "WebSocket read failed");
                        break "read error";
                    }
                },
                _ = session.closed() => break "disconnected",
                _ = shutdown_requested(&mut shutdown) => {
                    self.sessions.disconnect(id).await;
                    break "server stopping";
                }
                _ = idle_expired(&session, idle_timeout) => {
                    self.sessions.disconnect(id).await;
                    break "idle timeout";
                }
            }
        };

        self.sessions.unregister(id);
        self.listeners.emit_close(id);
        tracing::info!(session = %id, reason, "WebSocket session closed");
    }
}

/// Resolves once `session` has been silent for `timeout`; never without one.
/// Activity in either direction while sleeping pushes the deadline out.
async fn idle_expired(session: &Session, timeout: Option<Duration>) {
    let Some(timeout) = timeout else {
        return std::future::pending().await;
    };
    loop {
        let idle = session.idle_for();
        if idle >= timeout {
            return;
        }
        tokio::time::sleep(timeout - idle).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upgrade_request(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::CONNECTION, "upgrade")
            .header(header::UPGRADE, "websocket")
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn only_upgrades_under_prefix_are_handled() {
        let route = WebSocketRoute::new(WebSocketSettings::default());

        assert!(route.can_handle(&upgrade_request("/ws/chat"), false));
        assert!(!route.can_handle(&upgrade_request("/other"), false));

        let plain = Request::builder().uri("/ws/chat").body(Body::empty()).unwrap();
        assert!(!route.can_handle(&plain, false));
    }

    #[test]
    fn secure_only_route_rejects_plain_channel() {
        let route = WebSocketRoute::new(WebSocketSettings {
            require_secure: true,
            ..WebSocketSettings::default()
        });
        assert!(!route.can_handle(&upgrade_request("/ws"), false));
        assert!(route.can_handle(&upgrade_request("/ws"), true));
    }

    #[test]
    fn origin_allow_list() {
        let settings = WebSocketSettings {
            allowed_origins: vec!["https://app.example.com".into()],
            ..WebSocketSettings::default()
        };

        let mut headers = HeaderMap::new();
        assert!(settings.origin_allowed(&headers));

        headers.insert(header::ORIGIN, "https://APP.example.com".parse().unwrap());
        assert!(settings.origin_allowed(&headers));

        headers.insert(header::ORIGIN, "https://evil.example.com".parse().unwrap());
        assert!(!settings.origin_allowed(&headers));
    }

    #[tokio::test]
    async fn disallowed_origin_gets_forbidden() {
        let route = WebSocketRoute::new(WebSocketSettings {
            allowed_origins: vec!["https://app.example.com".into()],
            ..WebSocketSettings::default()
        });
        let mut request = upgrade_request("/ws");
        request
            .headers_mut()
            .insert(header::ORIGIN, "https://evil.example.com".parse().unwrap());

        let response = route
            .create_handler(&request)
            .handle(request, HandlerContext::detached(false))
            .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn malformed_handshake_is_rejected() {
        let route = WebSocketRoute::new(WebSocketSettings::default());
        // No Sec-WebSocket-Key / version headers.
        let request = upgrade_request("/ws");

        let response = route
            .create_handler(&request)
            .handle(request, HandlerContext::detached(false))
            .await;
        assert!(response.status().is_client_error());
        assert_eq!(route.client_count(), 0);
    }

    #[tokio::test]
    async fn operations_on_empty_route_are_harmless() {
        let route = WebSocketRoute::new(WebSocketSettings::default());
        assert_eq!(route.broadcast(&Frame::text("nobody")).await, 0);
        assert!(!route.send(SessionId::next(), &Frame::text("x")).await);
        assert!(!route.disconnect(SessionId::next()).await);
        assert_eq!(route.disconnect_all().await, 0);
        assert!(route.sessions().is_empty());
    }

    #[test]
    fn idle_timeout_zero_means_never() {
        assert_eq!(WebSocketSettings::default().idle_timeout(), None);
        let settings = WebSocketSettings {
            idle_timeout_secs: 30,
            ..WebSocketSettings::default()
        };
        assert_eq!(settings.idle_timeout(), Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn activity_pushes_idle_deadline_out() {
        use futures_util::{sink, SinkExt};

        let drain = sink::drain::<Message>().sink_map_err(|never| -> axum::Error { match never {} });
        let session = Arc::new(Session::new(None, drain));
        let timeout = Some(Duration::from_millis(300));

        let busy = {
            let session = session.clone();
            tokio::spawn(async move {
                for _ in 0..8 {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    session.touch();
                }
            })
        };
        let expired = tokio::time::timeout(Duration::from_millis(700), idle_expired(&session, timeout)).await;
        assert!(expired.is_err(), "busy session reported idle");
        busy.await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), idle_expired(&session, timeout))
            .await
            .expect("silent session never reported idle");
    }
}
