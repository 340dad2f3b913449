//! Endpoint behavior profiling.
//!
//! # Design Decisions
//! - Exponential moving averages, not windows: O(1) per observation
//! - Warm-up gating keeps cold routes from flooding the log
//! - Learning mode trains baselines without flagging, for startup ingestion

pub mod endpoint;

pub use endpoint::{Anomaly, EndpointBehaviorProfiler, EndpointProfile, RouteSample};
