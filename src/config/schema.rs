//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files, and
//! every section falls back to documented defaults so minimal configs work.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::http::static_files::DefaultRouteSettings;
use crate::http::upload::UploadSettings;
use crate::websocket::route::WebSocketSettings;

/// Root configuration for the waypost binary.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct WaypostConfig {
    /// Listener and worker settings.
    pub server: ServerSettings,

    /// Static file route (registered first, acts as the catch-all).
    pub static_files: DefaultRouteSettings,

    /// WebSocket route settings.
    pub websocket: WebSocketSettings,

    /// Optional upload route. Absent = no upload endpoint.
    pub upload: Option<UploadSettings>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Server settings, loaded before `start()`.
///
/// | option                    | default             | effect                                          |
/// |---------------------------|---------------------|-------------------------------------------------|
/// | `host`                    | `http://127.0.0.1`  | advertised URL; its host part is the bind host  |
/// | `port`                    | `8080`              | listening port (`0` = ephemeral)                |
/// | `use_secure_channel`      | `false`             | serve over TLS                                  |
/// | `tls`                     | none                | PEM cert/key, required when secure              |
/// | `max_queued`              | `64`                | TCP listen backlog                              |
/// | `max_threads`             | `64`                | concurrent in-flight request handlers           |
/// | `keep_alive`              | `true`              | HTTP/1 keep-alive                               |
/// | `max_keep_alive_requests` | `0`                 | requests per connection, `0` = unlimited        |
/// | `keep_alive_timeout_secs` | `10`                | idle wait for the next request header           |
/// | `request_timeout_secs`    | `60`                | per-request deadline (408 on expiry)            |
/// | `thread_idle_time_secs`   | `10`                | drain grace for open connections on `stop()`    |
/// | `name`                    | `""`                | advertised name, empty = `host:port`            |
/// | `software_version`        | `waypost/<version>` | `Server` response header                        |
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub use_secure_channel: bool,
    pub tls: Option<TlsConfig>,
    pub max_queued: u32,
    pub max_threads: usize,
    pub keep_alive: bool,
    pub max_keep_alive_requests: u64,
    pub keep_alive_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub thread_idle_time_secs: u64,
    pub name: String,
    pub software_version: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "http://127.0.0.1".to_string(),
            port: 8080,
            use_secure_channel: false,
            tls: None,
            max_queued: 64,
            max_threads: 64,
            keep_alive: true,
            max_keep_alive_requests: 0,
            keep_alive_timeout_secs: 10,
            request_timeout_secs: 60,
            thread_idle_time_secs: 10,
            name: String::new(),
            software_version: concat!("waypost/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ServerSettings {
    /// Advertised server name: the configured one, or `host:port`.
    pub fn server_name(&self) -> String {
        if self.name.is_empty() {
            format!("{}:{}", self.host, self.port)
        } else {
            self.name.clone()
        }
    }

    /// Base URL of the server, `host:port/`.
    pub fn url(&self) -> String {
        format!("{}:{}/", self.host, self.port)
    }

    pub fn keep_alive_timeout(&self) -> Duration {
        Duration::from_secs(self.keep_alive_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn thread_idle_time(&self) -> Duration {
        Duration::from_secs(self.thread_idle_time_secs)
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate chain file (PEM).
    pub cert_path: PathBuf,

    /// Path to private key file (PEM).
    pub key_path: PathBuf,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    pub log_level: String,

    /// Emit JSON log lines instead of the human-readable format.
    pub json_logs: bool,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
