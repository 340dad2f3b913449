//! Periodic vulnerability synthesis.
//!
//! # Data Flow
//! ```text
//! pipeline response observations
//!     → event log (tagged detail markers)
//!     → builtin.rs scanners over the trailing window
//!     → findings.rs store (deduplicated by kind + route)
//!     → reporting API (sorted by severity)
//! ```

pub mod builtin;
pub mod findings;

pub use builtin::{default_scanners, run_scan, ScanReport, Scanner};
pub use findings::{FindingKind, FindingStore, VulnerabilityFinding};
