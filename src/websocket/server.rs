//! Ready-made server: static files plus one WebSocket endpoint.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};

use crate::config::ServerSettings;
use crate::http::server::{HttpServer, ServerError};
use crate::http::static_files::{DefaultRoute, DefaultRouteSettings};
use crate::lifecycle::Shutdown;
use crate::routing::route::Route;
use crate::websocket::events::WebSocketListener;
use crate::websocket::frame::Frame;
use crate::websocket::route::{WebSocketRoute, WebSocketSettings};
use crate::websocket::session::{SessionId, SessionInfo};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct WebSocketServerSettings {
    pub server: ServerSettings,
    pub route: DefaultRouteSettings,
    pub websocket: WebSocketSettings,
}

struct Routes {
    files: Arc<dyn Route>,
    websocket: Arc<WebSocketRoute>,
}

/// An [`HttpServer`] preloaded with a [`DefaultRoute`] and a [`WebSocketRoute`].
///
/// Session operations before `load_settings` log an error and do nothing.
pub struct WebSocketServer {
    server: HttpServer,
    routes: RwLock<Option<Routes>>,
}

impl WebSocketServer {
    pub fn new() -> Self {
        Self {
            server: HttpServer::new(),
            routes: RwLock::new(None),
        }
    }

    pub fn with_shutdown(shutdown: &Shutdown) -> Self {
        Self {
            server: HttpServer::with_shutdown(shutdown),
            routes: RwLock::new(None),
        }
    }

    /// The underlying server, for adding further routes.
    pub fn server(&self) -> &HttpServer {
        &self.server
    }

    /// Apply settings and (re)build both routes. Routes from an earlier call
    /// are replaced; sessions on a replaced WebSocket route stay open until
    /// they close on their own.
    pub fn load_settings(&self, settings: WebSocketServerSettings) {
        let files: Arc<dyn Route> = Arc::new(DefaultRoute::new(settings.route));
        let websocket = Arc::new(WebSocketRoute::new(settings.websocket));

        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = routes.take() {
            self.server.remove_route(&old.files);
            let old_websocket: Arc<dyn Route> = old.websocket;
            self.server.remove_route(&old_websocket);
        }

        self.server.load_settings(settings.server);
        self.server.add_route(Arc::clone(&files));
        self.server.add_route(Arc::clone(&websocket) as Arc<dyn Route>);
        *routes = Some(Routes { files, websocket });
    }

    pub async fn start(&self) -> Result<(), ServerError> {
        self.server.start().await
    }

    pub async fn stop(&self) {
        self.server.stop().await;
    }

    pub fn websocket_route(&self) -> Option<Arc<WebSocketRoute>> {
        let route = self
            .routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|r| Arc::clone(&r.websocket));
        if route.is_none() {
            tracing::error!("WebSocket route used before load_settings");
        }
        route
    }

    pub async fn broadcast(&self, frame: &Frame) -> usize {
        match self.websocket_route() {
            Some(route) => route.broadcast(frame).await,
            None => 0,
        }
    }

    pub async fn send(&self, session: SessionId, frame: &Frame) -> bool {
        match self.websocket_route() {
            Some(route) => route.send(session, frame).await,
            None => false,
        }
    }

    pub async fn disconnect(&self, session: SessionId) -> bool {
        match self.websocket_route() {
            Some(route) => route.disconnect(session).await,
            None => false,
        }
    }

    pub async fn disconnect_all(&self) -> usize {
        match self.websocket_route() {
            Some(route) => route.disconnect_all().await,
            None => 0,
        }
    }

    pub fn client_count(&self) -> usize {
        self.websocket_route().map(|r| r.client_count()).unwrap_or(0)
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.websocket_route().map(|r| r.sessions()).unwrap_or_default()
    }

    pub fn register_listener(&self, listener: Arc<dyn WebSocketListener>) -> bool {
        match self.websocket_route() {
            Some(route) => {
                route.register_listener(listener);
                true
            }
            None => false,
        }
    }

    pub fn unregister_listener(&self, listener: &Arc<dyn WebSocketListener>) -> bool {
        self.websocket_route()
            .map(|r| r.unregister_listener(listener))
            .unwrap_or(false)
    }
}

impl Default for WebSocketServer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Quiet;
    impl WebSocketListener for Quiet {}

    #[tokio::test]
    async fn operations_before_load_settings_are_harmless() {
        let server = WebSocketServer::new();
        assert_eq!(server.broadcast(&Frame::text("x")).await, 0);
        assert!(!server.send(SessionId::next(), &Frame::text("x")).await);
        assert!(!server.disconnect(SessionId::next()).await);
        assert_eq!(server.disconnect_all().await, 0);
        assert_eq!(server.client_count(), 0);
        assert!(!server.register_listener(Arc::new(Quiet)));
        assert!(matches!(server.start().await, Err(ServerError::NotConfigured)));
    }

    #[test]
    fn load_settings_installs_both_routes_once() {
        let server = WebSocketServer::new();
        server.load_settings(WebSocketServerSettings::default());
        assert_eq!(server.server().routes().len(), 2);

        // Reloading replaces rather than accumulates.
        server.load_settings(WebSocketServerSettings::default());
        let routes = server.server().routes();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].name(), "static");
        assert_eq!(routes[1].name(), "websocket");
    }

    #[test]
    fn listeners_attach_after_load_settings() {
        let server = WebSocketServer::new();
        server.load_settings(WebSocketServerSettings::default());
        let listener: Arc<dyn WebSocketListener> = Arc::new(Quiet);
        assert!(server.register_listener(listener.clone()));
        assert!(server.unregister_listener(&listener));
        assert!(!server.unregister_listener(&listener));
    }
}
