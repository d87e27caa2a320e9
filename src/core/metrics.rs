// src/core/metrics.rs

//! Defines and registers Prometheus metrics for server monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, TextEncoder, register_counter, register_counter_vec,
    register_gauge, register_histogram,
};

lazy_static! {
    // --- Server-wide Gauges ---
    /// The number of sessions currently running.
    pub static ref CONNECTED_CLIENTS: Gauge =
        register_gauge!("modbus_connected_clients", "Number of currently connected clients.").unwrap();


    // --- Server-wide Counters ---
    /// The total number of connections accepted by the server since startup.
    pub static ref CONNECTIONS_RECEIVED_TOTAL: Counter =
        register_counter!("modbus_connections_received_total", "Total number of connections received.").unwrap();
    /// Connections closed right away because `max_clients` was reached.
    pub static ref CONNECTIONS_REJECTED_TOTAL: Counter =
        register_counter!("modbus_connections_rejected_total", "Total number of connections rejected due to the client limit.").unwrap();
    /// The total number of frames dispatched to the processor.
    pub static ref FRAMES_PROCESSED_TOTAL: Counter =
        register_counter!("modbus_frames_processed_total", "Total number of MODBUS frames processed.").unwrap();
    /// Responses that carried a MODBUS exception code.
    pub static ref EXCEPTION_RESPONSES_TOTAL: Counter =
        register_counter!("modbus_exception_responses_total", "Total number of exception responses sent.").unwrap();
    /// Ended sessions, labeled by the terminal state they reached.
    pub static ref SESSION_TERMINATIONS_TOTAL: CounterVec =
        register_counter_vec!("modbus_session_terminations_total", "Total number of ended sessions, labeled by reason.", &["reason"]).unwrap();


    // --- Histograms ---
    /// A histogram of request processing latencies.
    pub static ref FRAME_LATENCY_SECONDS: Histogram =
        register_histogram!("modbus_frame_latency_seconds", "Latency of frame processing in seconds.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
