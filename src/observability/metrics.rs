//! Metrics collection and exposition.
//!
//! # Metrics
//! - `guard_admission_in_flight` (gauge): requests holding an admission slot
//! - `guard_admission_wait_seconds` (histogram): time spent waiting for a slot
//! - `guard_rate_limit_total` (counter): limiter decisions by `outcome`
//! - `guard_rate_limit_store_errors_total` (counter): storage faults by `op`
//! - `guard_signature_total` (counter): verification results by `outcome`
//!
//! # Design Decisions
//! - Guards emit through the `metrics` facade directly; nothing is recorded
//!   until a recorder is installed
//! - Exposition is a separate Prometheus listener, off by default

use std::net::SocketAddr;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};

/// Bucket bounds for admission waits, in seconds.
const WAIT_BUCKETS: &[f64] = &[0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0];

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full("guard_admission_wait_seconds".to_string()),
            WAIT_BUCKETS,
        )?
        .install()?;

    describe_metrics();
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Register help text for every guard metric.
pub fn describe_metrics() {
    describe_gauge!(
        "guard_admission_in_flight",
        "Requests currently holding an admission slot"
    );
    describe_histogram!(
        "guard_admission_wait_seconds",
        Unit::Seconds,
        "Time spent waiting for an admission slot"
    );
    describe_counter!(
        "guard_rate_limit_total",
        "Rate limiter decisions by outcome"
    );
    describe_counter!(
        "guard_rate_limit_store_errors_total",
        "Counter storage faults by operation"
    );
    describe_counter!(
        "guard_signature_total",
        "Signature verification results by outcome"
    );
}
