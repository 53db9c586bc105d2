//! Metrics collection and exposition.
//!
//! # Metrics
//! - `waypost_requests_total` (counter): dispatched requests by route, status
//! - `waypost_request_duration_seconds` (histogram): handler latency
//! - `waypost_ws_sessions_active` (gauge): registered WebSocket sessions
//! - `waypost_ws_frames_sent_total` (counter): frames accepted by peers
//! - `waypost_ws_send_failures_total` (counter): failed sends by reason

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Initialize the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(route: &str, status: u16, start: Instant) {
    counter!(
        "waypost_requests_total",
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("waypost_request_duration_seconds", "route" => route.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn session_opened() {
    gauge!("waypost_ws_sessions_active").increment(1.0);
}

pub fn session_closed() {
    gauge!("waypost_ws_sessions_active").decrement(1.0);
}

pub fn frame_sent() {
    counter!("waypost_ws_frames_sent_total").increment(1);
}

pub fn send_failed(reason: &'static str) {
    counter!("waypost_ws_send_failures_total", "reason" => reason).increment(1);
}
