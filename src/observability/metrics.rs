//! Metrics collection and exposition.
//!
//! # Metrics
//! - `relay_responses_total` (counter): completed relays by status class
//! - `relay_aborts_total` (counter): aborted relays by error kind
//! - `relay_body_bytes_total` (counter): body bytes written to clients
//! - `relay_duration_seconds` (histogram): time from metadata to flush
//! - `relay_hook_failures_total` (counter): failed hooks by name
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Prometheus exposition is optional and installed by the binary

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

fn status_class(status: u16) -> &'static str {
    match status {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    }
}

pub fn record_relay(status: u16, body_bytes: u64, started: Instant) {
    metrics::counter!("relay_responses_total", "status" => status_class(status)).increment(1);
    metrics::counter!("relay_body_bytes_total").increment(body_bytes);
    metrics::histogram!("relay_duration_seconds", "outcome" => "done")
        .record(started.elapsed().as_secs_f64());
}

pub fn record_abort(kind: &'static str, started: Instant) {
    metrics::counter!("relay_aborts_total", "kind" => kind).increment(1);
    metrics::histogram!("relay_duration_seconds", "outcome" => "aborted")
        .record(started.elapsed().as_secs_f64());
}

pub fn record_hook_failure(hook: &str) {
    metrics::counter!("relay_hook_failures_total", "hook" => hook.to_string()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classes() {
        assert_eq!(status_class(204), "2xx");
        assert_eq!(status_class(417), "4xx");
        assert_eq!(status_class(999), "other");
    }
}
