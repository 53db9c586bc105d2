//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (worker counts, timeouts > 0)
//! - Check that secure mode has certificate material
//! - Check route prefixes are absolute paths
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: WaypostConfig → Result<(), Vec<ValidationError>>

use crate::config::schema::{ServerSettings, WaypostConfig};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validate the whole configuration, collecting every error.
pub fn validate_config(config: &WaypostConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = validate_server(&config.server);

    check_prefix(&mut errors, "static_files.path_prefix", &config.static_files.path_prefix);
    check_prefix(&mut errors, "websocket.path_prefix", &config.websocket.path_prefix);
    if config.websocket.send_timeout_ms == 0 {
        errors.push(ValidationError::new("websocket.send_timeout_ms", "must be greater than 0"));
    }

    if let Some(upload) = &config.upload {
        check_prefix(&mut errors, "upload.path_prefix", &upload.path_prefix);
        if upload.write_buffer_size == 0 {
            errors.push(ValidationError::new("upload.write_buffer_size", "must be greater than 0"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate server settings on their own (used by `HttpServer::load_settings` callers too).
pub fn validate_server(settings: &ServerSettings) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if settings.host.trim().is_empty() {
        errors.push(ValidationError::new("server.host", "must not be empty"));
    }
    if settings.max_threads == 0 {
        errors.push(ValidationError::new("server.max_threads", "must be greater than 0"));
    }
    if settings.max_queued == 0 {
        errors.push(ValidationError::new("server.max_queued", "must be greater than 0"));
    }
    if settings.request_timeout_secs == 0 {
        errors.push(ValidationError::new("server.request_timeout_secs", "must be greater than 0"));
    }
    if settings.use_secure_channel && settings.tls.is_none() {
        errors.push(ValidationError::new(
            "server.tls",
            "cert_path and key_path are required when use_secure_channel is set",
        ));
    }

    errors
}

fn check_prefix(errors: &mut Vec<ValidationError>, field: &'static str, prefix: &str) {
    if !prefix.starts_with('/') {
        errors.push(ValidationError::new(field, format!("'{prefix}' must start with '/'")));
    }
}
