//! Metrics collection and export for Callwire.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use callwire_core::RegistryStats;
use callwire_protocol::SignalKind;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "callwire_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "callwire_connections_active";
    pub const ENDPOINTS_REGISTERED: &str = "callwire_endpoints_registered";
    pub const PRESENCE_BROADCASTS_TOTAL: &str = "callwire_presence_broadcasts_total";
    pub const SIGNALS_TOTAL: &str = "callwire_signals_total";
    pub const MESSAGES_TOTAL: &str = "callwire_messages_total";
    pub const MESSAGES_BYTES: &str = "callwire_messages_bytes";
    pub const DISPATCH_SECONDS: &str = "callwire_dispatch_seconds";
    pub const ERRORS_TOTAL: &str = "callwire_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of WebSocket connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of open WebSocket connections"
    );
    metrics::describe_gauge!(
        names::ENDPOINTS_REGISTERED,
        "Current number of endpoints in the presence roster"
    );
    metrics::describe_counter!(
        names::PRESENCE_BROADCASTS_TOTAL,
        "Total number of presence broadcasts"
    );
    metrics::describe_counter!(
        names::SIGNALS_TOTAL,
        "Signaling events by kind and outcome"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of WebSocket messages");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of WebSocket messages");
    metrics::describe_histogram!(
        names::DISPATCH_SECONDS,
        "Inbound frame dispatch latency in seconds"
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

/// Publish the registry's current counters.
pub fn record_registry(stats: RegistryStats) {
    gauge!(names::ENDPOINTS_REGISTERED).set(stats.endpoints as f64);
    counter!(names::PRESENCE_BROADCASTS_TOTAL).absolute(stats.presence_broadcasts);
}

/// Record one signaling event and what happened to it.
pub fn record_signal(kind: SignalKind, outcome: &'static str) {
    counter!(names::SIGNALS_TOTAL, "kind" => kind.as_str(), "outcome" => outcome).increment(1);
}

/// Record a message.
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record dispatch latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::DISPATCH_SECONDS).record(seconds);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
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
    fn test_recording_without_recorder() {
        let _guard = ConnectionMetricsGuard::new();
        record_signal(SignalKind::NegotiationOffer, "forwarded");
        record_registry(RegistryStats {
            endpoints: 2,
            presence_broadcasts: 5,
        });
    }
}
