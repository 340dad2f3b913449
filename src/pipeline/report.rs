//! Pull-style reporting over the guard's registries.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::events::log::SecurityMetrics;
use crate::events::types::{SecurityEvent, Severity};
use crate::pipeline::state::SecurityMonitorState;
use crate::scanner::findings::VulnerabilityFinding;

/// Aggregated security posture for dashboards and operators.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityReport {
    pub metrics: SecurityMetrics,
    pub recent_alerts: Vec<SecurityEvent>,
    pub tracked_addresses: usize,
    pub tracked_routes: usize,
    pub finding_counts: BTreeMap<Severity, usize>,
}

/// Snapshot of metrics, alerts, and registry sizes over the configured
/// scan window.
pub fn security_report(state: &SecurityMonitorState) -> SecurityReport {
    let window_hours = state.config().scan.window_hours;
    SecurityReport {
        metrics: state.event_log.metrics(window_hours),
        recent_alerts: state.event_log.recent_alerts(10),
        tracked_addresses: state.reputation.tracked_addresses(),
        tracked_routes: state.profiler.tracked_routes(),
        finding_counts: state.findings.severity_counts(),
    }
}

/// All open findings, most severe first.
pub fn findings_report(state: &SecurityMonitorState) -> Vec<VulnerabilityFinding> {
    state.findings.sorted_by_severity()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::GuardConfig;

    #[test]
    fn report_reflects_empty_state() {
        let state = SecurityMonitorState::new(GuardConfig::default()).unwrap();
        let report = security_report(&state);
        assert_eq!(report.metrics.total_events, 0);
        assert_eq!(report.tracked_addresses, 0);
        assert!(report.recent_alerts.is_empty());
    }
}
