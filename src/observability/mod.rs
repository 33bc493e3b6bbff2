//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters and gauges)
//!
//! Consumers:
//!     → stdout (fmt layer, filtered by RUST_LOG or observability.log_level)
//!     → Prometheus scrape endpoint (only when observability.metrics_enabled)
//! ```
//!
//! # Design Decisions
//! - Metric updates go through the `metrics` facade; without an installed
//!   recorder they are no-ops
//! - Log level comes from the environment first, then config

pub mod logging;
pub mod metrics;
