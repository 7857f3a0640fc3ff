//! Metrics collection and export for Hype.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "hype_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "hype_connections_active";
    pub const EVENTS_TOTAL: &str = "hype_events_total";
    pub const EVENTS_BYTES: &str = "hype_events_bytes";
    pub const ONLINE_USERS: &str = "hype_online_users";
    pub const CALLS_ACTIVE: &str = "hype_calls_active";
    pub const LATENCY_SECONDS: &str = "hype_latency_seconds";
    pub const ERRORS_TOTAL: &str = "hype_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::EVENTS_TOTAL, "Total number of events processed");
    metrics::describe_counter!(names::EVENTS_BYTES, "Total bytes of events processed");
    metrics::describe_gauge!(names::ONLINE_USERS, "Users with at least one connection");
    metrics::describe_gauge!(names::CALLS_ACTIVE, "Calls currently offering or active");
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Event processing latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record an event crossing the socket.
pub fn record_event(kind: &'static str, bytes: usize, direction: &'static str) {
    counter!(names::EVENTS_TOTAL, "event" => kind, "direction" => direction).increment(1);
    counter!(names::EVENTS_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record event processing latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Update the presence and call gauges.
pub fn set_hub_gauges(online_users: usize, calls: usize) {
    gauge!(names::ONLINE_USERS).set(online_users as f64);
    gauge!(names::CALLS_ACTIVE).set(calls as f64);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorders_without_exporter() {
        // No recorder installed: every call is a no-op.
        let _guard = ConnectionMetricsGuard::new();
        record_event("chat_message", 42, "inbound");
        record_error("decode");
        set_hub_gauges(1, 0);
    }
}
