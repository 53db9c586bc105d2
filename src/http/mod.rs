//! HTTP side of the server.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (axum-server accept loop, middleware stack)
//!     → routing::Dispatcher (newest matching route wins)
//!     → static_files.rs / upload.rs / websocket::route / application routes
//! ```

pub mod cookie;
pub mod server;
pub mod static_files;
pub mod upload;

pub use cookie::Cookie;
pub use server::{HttpServer, ServerError, ServerState};
pub use static_files::{DefaultRoute, DefaultRouteSettings};
pub use upload::{UploadRoute, UploadSettings};
