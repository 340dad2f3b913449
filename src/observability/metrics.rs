//! Metrics collection and exposition.
//!
//! # Metrics
//! - `sentinel_requests_total` (counter): requests seen by the guard
//! - `sentinel_blocked_total` (counter): denied requests, by reason
//! - `sentinel_sanitized_total` (counter): requests with fields scrubbed
//! - `sentinel_honeypot_hits_total` (counter): decoy interactions
//! - `sentinel_csrf_failures_total` (counter): by rejection code
//! - `sentinel_attack_signals_total` (counter): by family
//! - `sentinel_anomalies_total` (counter): by kind
//! - `sentinel_blocked_addresses_total` (counter): block transitions
//! - `sentinel_body_inspection_skipped_total` (counter): payloads above
//!   the inspection cap that were forwarded without textual analysis
//!
//! # Design Decisions
//! - Low-overhead metric updates (atomic operations)
//! - Labels for reason, family, kind
//! - Exporter bound separately from the service listener

use std::net::SocketAddr;

use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter on its own listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter started"),
        Err(e) => tracing::error!(error = %e, "Failed to start metrics exporter"),
    }
}

pub fn record_request_guarded() {
    counter!("sentinel_requests_total").increment(1);
}

pub fn record_blocked(reason: &'static str) {
    counter!("sentinel_blocked_total", "reason" => reason).increment(1);
}

pub fn record_sanitized() {
    counter!("sentinel_sanitized_total").increment(1);
}

pub fn record_honeypot_hit() {
    counter!("sentinel_honeypot_hits_total").increment(1);
}

pub fn record_csrf_failure(code: &'static str) {
    counter!("sentinel_csrf_failures_total", "code" => code).increment(1);
}

pub fn record_attack_signal(family: &'static str) {
    counter!("sentinel_attack_signals_total", "family" => family).increment(1);
}

pub fn record_anomaly(kind: &'static str) {
    counter!("sentinel_anomalies_total", "kind" => kind).increment(1);
}

pub fn record_address_blocked() {
    counter!("sentinel_blocked_addresses_total").increment(1);
}

pub fn record_body_inspection_skipped() {
    counter!("sentinel_body_inspection_skipped_total").increment(1);
}
