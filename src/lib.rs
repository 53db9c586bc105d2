//! Embeddable HTTP and WebSocket server.
//!
//! Requests are matched against an ordered route table (the most recently
//! added matching route wins); WebSocket routes keep a registry of live
//! sessions that the application can broadcast to, address individually or
//! disconnect.

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod routing;
pub mod websocket;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::{ServerSettings, WaypostConfig};
pub use http::{HttpServer, ServerError, ServerState};
pub use lifecycle::Shutdown;
pub use routing::{FnRoute, Handler, HandlerContext, Route, RouteMatch};
pub use websocket::{Frame, SessionId, WebSocketListener, WebSocketServer, WebSocketServerSettings};
