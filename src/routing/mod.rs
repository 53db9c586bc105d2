//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (method, path, headers) + channel security
//!     → dispatcher.rs (walk registry newest → oldest)
//!     → route.rs (Route::can_handle / Route::create_handler)
//!     → matcher.rs (evaluate match conditions)
//!     → Handler, or NotFoundHandler when nothing matched
//! ```
//!
//! # Design Decisions
//! - Last registered route wins overlaps
//! - No regex in hot path (prefix matching only)
//! - Unmatched requests are answered, never dropped

pub mod dispatcher;
pub mod matcher;
pub mod registry;
pub mod route;

pub use dispatcher::Dispatcher;
pub use matcher::RouteMatch;
pub use registry::RouteRegistry;
pub use route::{FnRoute, Handler, HandlerContext, NotFoundHandler, Route};
