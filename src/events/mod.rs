//! Security event logging subsystem.
//!
//! # Data Flow
//! ```text
//! All guard components produce:
//!     → redact.rs (strip sensitive values by key name)
//!     → log.rs (bounded FIFO, severity-leveled tracing mirror)
//!
//! Consumers:
//!     → pipeline reporting API (trailing-window metrics)
//!     → scanner (periodic window scans)
//! ```

pub mod log;
pub mod redact;
pub mod types;

pub use log::{SecurityEventLog, SecurityMetrics};
pub use types::{EventCategory, SecurityEvent, Severity};
