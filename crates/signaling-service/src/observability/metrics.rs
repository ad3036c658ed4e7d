//! Metrics definitions for the signaling service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `signaling_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded; room names and connection ids never appear as labels:
//! - `actor_type`: 2 values (room, connection)
//! - `outcome`: bounded by join/relay results (~5 values)
//! - `kind`: bounded by server event kinds (~11 values)
//! - `reason`: bounded by `SignalingError::as_label` (7 values)
//! - `event`: bounded by client event names (8 values)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Request handling is in-memory; interesting latencies are sub-millisecond
        .set_buckets_for_metric(
            Matcher::Prefix("signaling_request".to_string()),
            &[
                0.0001, 0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250,
            ],
        )
        .map_err(|e| format!("Failed to set request latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Connection & Room Metrics (Gauges)
// ============================================================================

/// Set the number of registered WebSocket connections.
///
/// Metric: `signaling_connections_active`
pub fn set_connections_active(count: usize) {
    // usize to f64 conversion is safe for realistic connection counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("signaling_connections_active").set(count as f64);
}

/// Set the number of non-empty rooms.
///
/// Metric: `signaling_rooms_active`
pub fn set_rooms_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("signaling_rooms_active").set(count as f64);
}

// ============================================================================
// Operation Metrics (Counters)
// ============================================================================

/// Record a join attempt.
///
/// Metric: `signaling_joins_total`
/// Labels: `outcome` (joined, rejoined, room_full, rejected, error)
pub fn record_join(outcome: &str) {
    counter!("signaling_joins_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record a relayed handshake payload.
///
/// Metric: `signaling_signals_relayed_total`
/// Labels: `kind` (offer, answer), `outcome` (delivered, dropped)
pub fn record_signal_relayed(kind: &str, outcome: &str) {
    counter!(
        "signaling_signals_relayed_total",
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record one fan-out and the number of members it reached.
///
/// Metrics: `signaling_broadcasts_total`, `signaling_broadcast_deliveries_total`
/// Labels: `kind` (server event kind)
pub fn record_broadcast(kind: &str, delivered: usize) {
    counter!("signaling_broadcasts_total", "kind" => kind.to_string()).increment(1);
    counter!("signaling_broadcast_deliveries_total", "kind" => kind.to_string())
        .increment(delivered as u64);
}

/// Record an outbound event that was not delivered.
///
/// Metric: `signaling_messages_dropped_total`
/// Labels: `reason` (unknown_target, outbound_queue_full)
pub fn record_message_dropped(reason: &str) {
    counter!("signaling_messages_dropped_total", "reason" => reason.to_string()).increment(1);
}

/// Record a client request rejected with an error.
///
/// Metric: `signaling_requests_rejected_total`
/// Labels: `reason` (error label)
pub fn record_request_rejected(reason: &str) {
    counter!("signaling_requests_rejected_total", "reason" => reason.to_string()).increment(1);
}

/// Record an actor panic.
///
/// Metric: `signaling_actor_panics_total`
/// Labels: `actor_type`
pub fn record_actor_panic(actor_type: &str) {
    counter!("signaling_actor_panics_total", "actor_type" => actor_type.to_string())
        .increment(1);
}

// ============================================================================
// Latency Metrics (Histograms)
// ============================================================================

/// Record client request handling latency.
///
/// Metric: `signaling_request_latency_seconds`
/// Labels: `event` (client event name)
pub fn record_request_latency(event: &str, duration: Duration) {
    histogram!("signaling_request_latency_seconds", "event" => event.to_string())
        .record(duration.as_secs_f64());
}
