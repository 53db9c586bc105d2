//! WebSocket sessions on top of the HTTP server.
//!
//! # Data Flow
//! ```text
//! upgrade request → route.rs (handshake) → session.rs (socket halves)
//!                                        → registry.rs (live set, fan-out)
//!                                        → events.rs (application callbacks)
//! ```

pub mod events;
pub mod frame;
pub mod registry;
pub mod route;
pub mod server;
pub mod session;

pub use events::WebSocketListener;
pub use frame::{Frame, Opcode};
pub use registry::SessionRegistry;
pub use route::{WebSocketRoute, WebSocketSettings};
pub use server::{WebSocketServer, WebSocketServerSettings};
pub use session::{SessionId, SessionInfo};
