//! Adaptive request-protection layer for axum services.

pub mod config;
pub mod csrf;
pub mod events;
pub mod honeypot;
pub mod lifecycle;
pub mod observability;
pub mod patterns;
pub mod pipeline;
pub mod profiler;
pub mod reputation;
pub mod scanner;

pub use config::schema::GuardConfig;
pub use lifecycle::Shutdown;
pub use pipeline::guard::{guard_middleware, AuthContext, IssuedCsrfToken};
pub use pipeline::state::SecurityMonitorState;
