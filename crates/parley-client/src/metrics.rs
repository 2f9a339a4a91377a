//! Prometheus metrics for the client controllers

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, Counter, CounterVec, Histogram,
};

lazy_static! {
    // ============================================================================
    // Message Metrics
    // ============================================================================

    /// Placeholders inserted by the outbox
    pub static ref MESSAGES_STAGED: Counter =
        register_counter!("parley_messages_staged_total", "Optimistic placeholders inserted").unwrap();

    /// Writes acknowledged by the store
    pub static ref MESSAGES_DELIVERED: Counter =
        register_counter!("parley_messages_delivered_total", "Message writes acknowledged").unwrap();

    /// Failed writes by failure kind
    pub static ref MESSAGES_FAILED: CounterVec = register_counter_vec!(
        "parley_messages_failed_total",
        "Message writes that failed",
        &["failure"]
    ).unwrap();

    /// Manual retries of failed messages
    pub static ref MESSAGES_RETRIED: Counter =
        register_counter!("parley_messages_retried_total", "Manual message retries").unwrap();

    /// Time from dispatch to acknowledgement
    pub static ref SEND_LATENCY: Histogram = register_histogram!(
        "parley_send_latency_seconds",
        "Message write latency in seconds",
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    ).unwrap();

    // ============================================================================
    // Conversation Metrics
    // ============================================================================

    /// Batched archive/delete calls by operation and outcome
    pub static ref BATCH_OPERATIONS: CounterVec = register_counter_vec!(
        "parley_batch_operations_total",
        "Batched conversation mutations",
        &["operation", "outcome"]
    ).unwrap();

    // ============================================================================
    // Presence Metrics
    // ============================================================================

    /// Typing flag writes by value
    pub static ref TYPING_PUBLISHES: CounterVec = register_counter_vec!(
        "parley_typing_publishes_total",
        "Typing flag writes",
        &["state"]
    ).unwrap();

    // ============================================================================
    // Dashboard Metrics
    // ============================================================================

    /// Dashboard loads by where the data came from
    pub static ref DASHBOARD_LOADS: CounterVec = register_counter_vec!(
        "parley_dashboard_loads_total",
        "Dashboard loads by source",
        &["source"]
    ).unwrap();
}

/// Export all registered metrics in the Prometheus text format
pub fn export() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %err, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
