//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! relay pipeline, server, codecs produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Session ID flows through every relay log line
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
