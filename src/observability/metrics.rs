//! Metrics collection and exposition.
//!
//! # Metrics
//! - `guard_decisions_total` (counter): decisions by guard and outcome
//! - `guard_http_requests_total` (counter): requests by method, status
//! - `guard_http_request_duration_seconds` (histogram): latency distribution
//! - `guard_active_sessions` (gauge): sessions currently held
//!
//! Recording is a no-op until a recorder is installed, so guards can be used
//! without the exporter.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::guard::GuardKind;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_decision(guard: GuardKind, outcome: &'static str) {
    counter!(
        "guard_decisions_total",
        "guard" => guard.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "guard_http_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("guard_http_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_sessions(count: usize) {
    gauge!("guard_active_sessions").set(count as f64);
}
