//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! ServerSettings
//!     → listener.rs (resolve host, bind with backlog)
//!     → tls.rs (optional rustls config, loaded before binding)
//!     → connection.rs (per-connection context, in-flight tracking)
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - TLS material is validated before the socket is bound, so a failed
//!   secure setup never leaves a listener behind
//! - Every executing handler is tracked so shutdown can wait for it

pub mod connection;
pub mod listener;
pub mod tls;
