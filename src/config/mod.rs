//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → WaypostConfig (validated value object)
//!     → ServerSettings handed to HttpServer::load_settings
//! ```
//!
//! # Design Decisions
//! - Settings are a fresh value per server instance; no shared mutable defaults
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{ObservabilityConfig, ServerSettings, TlsConfig, WaypostConfig};
