//! Metrics collection and exposition.
//!
//! # Metrics
//! - `sockstack_requests_total` (counter): requests by role, method, status
//! - `sockstack_request_duration_seconds` (histogram): handling latency
//! - `sockstack_active_connections` (gauge): open connections by role
//! - `sockstack_upstream_errors_total` (counter): proxy upstream failures by kind
//! - `sockstack_sessions_total` (counter): session events (issued, revoked, expired)
//! - `sockstack_p2p_frames_total` (counter): P2P frames by direction
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so tests need no setup
//! - The Prometheus exporter is only installed when enabled in config

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with an HTTP scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record one handled request.
pub fn record_request(role: &'static str, method: &str, status: u16, start: Instant) {
    counter!(
        "sockstack_requests_total",
        "role" => role,
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("sockstack_request_duration_seconds", "role" => role).record(start.elapsed().as_secs_f64());
}

pub fn connection_opened(role: &'static str) {
    gauge!("sockstack_active_connections", "role" => role).increment(1.0);
}

pub fn connection_closed(role: &'static str) {
    gauge!("sockstack_active_connections", "role" => role).decrement(1.0);
}

/// Record a failed upstream exchange (`connect`, `timeout`, `malformed`, `io`).
pub fn record_upstream_error(kind: &'static str) {
    counter!("sockstack_upstream_errors_total", "kind" => kind).increment(1);
}

/// Record a session lifecycle event (`issued`, `revoked`, `expired`).
pub fn record_session_event(event: &'static str) {
    counter!("sockstack_sessions_total", "event" => event).increment(1);
}

/// Record a P2P frame (`sent` or `received`).
pub fn record_p2p_frame(direction: &'static str) {
    counter!("sockstack_p2p_frames_total", "direction" => direction).increment(1);
}
