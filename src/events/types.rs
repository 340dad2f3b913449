//! Security event types.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Event severity, ordered so `CRITICAL` compares highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Catalogue of security event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventCategory {
    LoginSuccess,
    LoginFailure,
    AccessDenied,
    RateLimitExceeded,
    SqlInjectionAttempt,
    XssAttempt,
    CsrfAttempt,
    SuspiciousActivity,
    AutomatedAttack,
    SecurityAlert,
    ApiError,
}

/// An immutable, structured security event.
///
/// Detail values are redacted before construction; nothing sensitive
/// should survive into the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    pub category: EventCategory,
    pub severity: Severity,
    pub source_addr: Option<IpAddr>,
    pub user_id: Option<String>,
    pub route: Option<String>,
    pub succeeded: bool,
    pub details: BTreeMap<String, String>,
}

/// Current time in epoch milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }
}
