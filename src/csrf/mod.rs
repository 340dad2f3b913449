//! CSRF token protocol.
//!
//! # Design Decisions
//! - Stateless: validity is re-derived from the token, never stored
//! - Session binding via length-prefixed canonical message
//! - Constant-time signature comparison (subtle)
//! - Double-submit cookie confirmation handled by the pipeline, as an
//!   HMAC-independent second check

pub mod protocol;

pub use protocol::{issue, validate, CsrfRejection, CSRF_COOKIE_NAME, CSRF_HEADER_NAME};
