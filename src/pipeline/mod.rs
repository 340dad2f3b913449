//! Request guard pipeline.
//!
//! # Data Flow
//! 1. `surface` renders the raw request into a [`surface::SerializedRequest`].
//! 2. `guard` runs the inspection pass: honeypot, CSRF, signatures,
//!    reputation, then the downstream handler.
//! 3. Post-response accounting feeds the profiler and the event log;
//!    `state` owns every registry and the background scan task.
//! 4. `report` exposes the accumulated posture to operators.

pub mod guard;
pub mod report;
pub mod state;
pub mod surface;

pub use guard::{guard_middleware, AuthContext, IssuedCsrfToken};
pub use report::{findings_report, security_report, SecurityReport};
pub use state::SecurityMonitorState;
pub use surface::SerializedRequest;
