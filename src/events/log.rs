//! Bounded, append-only security event log.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::RwLock;

use serde::Serialize;

use crate::events::redact::redact_details;
use crate::events::types::{now_ms, EventCategory, SecurityEvent, Severity};

/// Failure count per address above which it is reported as suspicious.
const SUSPICIOUS_FAILURE_COUNT: usize = 10;

/// Rolling metrics over a trailing event window.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityMetrics {
    pub total_events: usize,
    pub failed_logins: usize,
    pub access_denied: usize,
    pub rate_limit_exceeded: usize,
    pub critical_events: usize,
    pub suspicious_addresses: Vec<IpAddr>,
}

/// Append-only bounded FIFO of security events.
///
/// Writers take the lock only to push and evict; readers clone the
/// trailing window out, so scans never pin the log for long.
pub struct SecurityEventLog {
    events: RwLock<VecDeque<SecurityEvent>>,
    capacity: usize,
}

impl SecurityEventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Record an event: redact details, stamp it, append, evict the oldest
    /// past capacity, and mirror it to the tracing subscriber at a level
    /// matching its severity.
    pub fn record(
        &self,
        category: EventCategory,
        severity: Severity,
        source_addr: Option<IpAddr>,
        user_id: Option<String>,
        route: Option<String>,
        succeeded: bool,
        details: BTreeMap<String, String>,
    ) {
        let event = SecurityEvent {
            timestamp_ms: now_ms(),
            category,
            severity,
            source_addr,
            user_id,
            route,
            succeeded,
            details: redact_details(details),
        };

        match severity {
            Severity::Critical | Severity::High => tracing::error!(
                category = ?event.category,
                severity = ?event.severity,
                source = ?event.source_addr,
                route = ?event.route,
                "security event"
            ),
            Severity::Medium => tracing::warn!(
                category = ?event.category,
                source = ?event.source_addr,
                route = ?event.route,
                "security event"
            ),
            Severity::Low => tracing::debug!(
                category = ?event.category,
                source = ?event.source_addr,
                route = ?event.route,
                "security event"
            ),
        }

        let mut events = self.events.write().expect("event log lock poisoned");
        // Insertion order stays time-monotonic even if the wall clock
        // steps backwards between stamping and locking.
        let mut event = event;
        if let Some(last) = events.back() {
            if event.timestamp_ms < last.timestamp_ms {
                event.timestamp_ms = last.timestamp_ms;
            }
        }
        events.push_back(event);
        while events.len() > self.capacity {
            events.pop_front();
        }
    }

    /// Clone out all events newer than the cutoff.
    pub fn window(&self, window_hours: u64) -> Vec<SecurityEvent> {
        let cutoff = now_ms().saturating_sub(window_hours * 3_600_000);
        let events = self.events.read().expect("event log lock poisoned");
        events
            .iter()
            .rev()
            .take_while(|e| e.timestamp_ms >= cutoff)
            .cloned()
            .collect()
    }

    /// Compute rolling metrics over the trailing window.
    pub fn metrics(&self, window_hours: u64) -> SecurityMetrics {
        let recent = self.window(window_hours);

        let count_category =
            |c: EventCategory| recent.iter().filter(|e| e.category == c).count();

        SecurityMetrics {
            total_events: recent.len(),
            failed_logins: count_category(EventCategory::LoginFailure),
            access_denied: count_category(EventCategory::AccessDenied),
            rate_limit_exceeded: count_category(EventCategory::RateLimitExceeded),
            critical_events: recent
                .iter()
                .filter(|e| e.severity == Severity::Critical)
                .count(),
            suspicious_addresses: suspicious_addresses(&recent),
        }
    }

    /// Most recent HIGH/CRITICAL events, newest first.
    pub fn recent_alerts(&self, limit: usize) -> Vec<SecurityEvent> {
        let events = self.events.read().expect("event log lock poisoned");
        events
            .iter()
            .rev()
            .filter(|e| e.severity >= Severity::High)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.read().expect("event log lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Addresses with more than `SUSPICIOUS_FAILURE_COUNT` failed events.
fn suspicious_addresses(events: &[SecurityEvent]) -> Vec<IpAddr> {
    let mut counts: HashMap<IpAddr, usize> = HashMap::new();
    for event in events.iter().filter(|e| !e.succeeded) {
        if let Some(addr) = event.source_addr {
            *counts.entry(addr).or_insert(0) += 1;
        }
    }
    counts
        .into_iter()
        .filter(|(_, n)| *n > SUSPICIOUS_FAILURE_COUNT)
        .map(|(addr, _)| addr)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn record_simple(log: &SecurityEventLog, category: EventCategory, severity: Severity) {
        log.record(
            category,
            severity,
            Some(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9))),
            None,
            Some("/api/loans".into()),
            false,
            BTreeMap::new(),
        );
    }

    #[test]
    fn evicts_oldest_past_capacity() {
        let log = SecurityEventLog::new(3);
        for _ in 0..5 {
            record_simple(&log, EventCategory::LoginFailure, Severity::Medium);
        }
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn metrics_count_by_category_and_severity() {
        let log = SecurityEventLog::new(100);
        record_simple(&log, EventCategory::LoginFailure, Severity::Medium);
        record_simple(&log, EventCategory::LoginFailure, Severity::Medium);
        record_simple(&log, EventCategory::AccessDenied, Severity::High);
        record_simple(&log, EventCategory::SqlInjectionAttempt, Severity::Critical);

        let metrics = log.metrics(24);
        assert_eq!(metrics.total_events, 4);
        assert_eq!(metrics.failed_logins, 2);
        assert_eq!(metrics.access_denied, 1);
        assert_eq!(metrics.critical_events, 1);
    }

    #[test]
    fn suspicious_addresses_require_many_failures() {
        let log = SecurityEventLog::new(100);
        for _ in 0..11 {
            record_simple(&log, EventCategory::LoginFailure, Severity::Medium);
        }
        let metrics = log.metrics(24);
        assert_eq!(metrics.suspicious_addresses.len(), 1);
    }

    #[test]
    fn details_are_redacted_on_entry() {
        let log = SecurityEventLog::new(10);
        let mut details = BTreeMap::new();
        details.insert("password".to_string(), "hunter2".to_string());
        log.record(
            EventCategory::ApiError,
            Severity::Low,
            None,
            None,
            None,
            false,
            details,
        );
        let recent = log.window(1);
        assert_eq!(recent[0].details["password"], "[REDACTED]");
    }

    #[test]
    fn timestamps_are_monotone() {
        let log = SecurityEventLog::new(10);
        for _ in 0..4 {
            record_simple(&log, EventCategory::SuspiciousActivity, Severity::Low);
        }
        let events = log.window(1);
        for pair in events.windows(2) {
            // window() returns newest-first
            assert!(pair[0].timestamp_ms >= pair[1].timestamp_ms);
        }
    }
}
