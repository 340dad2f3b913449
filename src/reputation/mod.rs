//! Source-address reputation tracking.
//!
//! # Design Decisions
//! - Per-entry locking via dashmap: the block transition is decided while
//!   the entry guard is held, so it fires exactly once
//! - Score decays with a half-life of inactivity, applied lazily on
//!   observe and by the periodic sweep
//! - Blocking is a one-way transition; decay never resets it

pub mod tracker;

pub use tracker::{Disposition, IpProfile, IpReputationTracker, Observation};
