//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All guard components produce:
//!     → tracing (structured log events, initialized in main)
//!     → metrics.rs (counters)
//!
//! Consumers:
//!     → Log aggregation (stdout, file, remote)
//!     → Metrics endpoint (Prometheus scrape)
//! ```

pub mod metrics;
