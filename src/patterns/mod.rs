//! Signature-based attack-pattern matching.
//!
//! # Design Decisions
//! - Pure classification: the matcher never mutates state or emits events
//! - First match per family short-circuits that family to bound cost
//! - XXE signatures only run when the content-type indicates XML
//! - Patterns compiled once at startup, not per request

pub mod families;
pub mod matcher;

pub use families::AttackFamily;
pub use matcher::{AttackPatternMatcher, AttackSignal};
