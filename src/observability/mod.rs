//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Guards produce:
//!     → logging.rs (structured log events, request id on every rejection)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON lines)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Rejection reasons are logged, never returned to the client
//! - Metrics are cheap (atomic increments) and no-ops until a recorder is installed

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::init_metrics;
