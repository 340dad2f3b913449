//! Scanner trait and the built-in window scanners.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::events::types::{now_ms, SecurityEvent, Severity};
use crate::scanner::findings::{FindingKind, FindingStore, VulnerabilityFinding};

/// Detail key the pipeline stamps on response observations, consumed here.
pub const OBSERVATION_KEY: &str = "observation";
pub const OBS_STACK_TRACE: &str = "stack_trace_5xx";
pub const OBS_MISSING_HEADERS: &str = "missing_security_headers";
pub const OBS_UNAUTH_ID_ACCESS: &str = "unauthenticated_id_access";

/// A pluggable vulnerability scanner over the recent event window.
///
/// Built-ins cover what the guard observes passively; heavier checks
/// (dependency audits, file permissions) slot in behind the same trait.
pub trait Scanner: Send + Sync {
    fn name(&self) -> &'static str;
    fn scan(&self, window: &[SecurityEvent]) -> Vec<VulnerabilityFinding>;
}

fn observations<'a>(
    window: &'a [SecurityEvent],
    observation: &str,
) -> impl Iterator<Item = &'a SecurityEvent> {
    let observation = observation.to_string();
    window
        .iter()
        .filter(move |e| e.details.get(OBSERVATION_KEY) == Some(&observation))
}

/// Flags 5xx responses whose bodies leaked stack traces.
pub struct StackTraceLeakScanner;

impl Scanner for StackTraceLeakScanner {
    fn name(&self) -> &'static str {
        "stack_trace_leak"
    }

    fn scan(&self, window: &[SecurityEvent]) -> Vec<VulnerabilityFinding> {
        observations(window, OBS_STACK_TRACE)
            .filter_map(|event| {
                let route = event.route.clone()?;
                let mut evidence = BTreeMap::new();
                if let Some(excerpt) = event.details.get("excerpt") {
                    evidence.insert("excerpt".to_string(), excerpt.clone());
                }
                Some(VulnerabilityFinding::new(
                    FindingKind::InformationDisclosure,
                    Severity::Medium,
                    route,
                    evidence,
                    "Strip stack traces from error responses in production",
                    0.1,
                    "CWE-209",
                    "A01",
                ))
            })
            .collect()
    }
}

/// Flags routes responding without the expected security headers.
pub struct MissingHeadersScanner;

impl Scanner for MissingHeadersScanner {
    fn name(&self) -> &'static str {
        "missing_security_headers"
    }

    fn scan(&self, window: &[SecurityEvent]) -> Vec<VulnerabilityFinding> {
        observations(window, OBS_MISSING_HEADERS)
            .filter_map(|event| {
                let route = event.route.clone()?;
                let mut evidence = BTreeMap::new();
                if let Some(missing) = event.details.get("missing") {
                    evidence.insert("missing".to_string(), missing.clone());
                }
                Some(VulnerabilityFinding::new(
                    FindingKind::MissingSecurityHeaders,
                    Severity::Low,
                    route,
                    evidence,
                    "Add the standard security response headers",
                    0.05,
                    "CWE-693",
                    "A05",
                ))
            })
            .collect()
    }
}

/// Flags ID-shaped paths served without any authorization.
pub struct IdorScanner;

impl Scanner for IdorScanner {
    fn name(&self) -> &'static str {
        "idor"
    }

    fn scan(&self, window: &[SecurityEvent]) -> Vec<VulnerabilityFinding> {
        observations(window, OBS_UNAUTH_ID_ACCESS)
            .filter_map(|event| {
                let route = event.route.clone()?;
                Some(VulnerabilityFinding::new(
                    FindingKind::Idor,
                    Severity::High,
                    route,
                    BTreeMap::new(),
                    "Require authorization on object-identified routes",
                    0.3,
                    "CWE-639",
                    "A01",
                ))
            })
            .collect()
    }
}

/// The scanners the guard runs by default.
pub fn default_scanners() -> Vec<Box<dyn Scanner>> {
    vec![
        Box::new(StackTraceLeakScanner),
        Box::new(MissingHeadersScanner),
        Box::new(IdorScanner),
    ]
}

/// Summary emitted after each periodic scan.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub timestamp_ms: u64,
    pub window_events: usize,
    pub new_findings: usize,
    pub total_findings: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

/// Run every scanner over the window, fold results into the store, and
/// produce a summary report.
pub fn run_scan(
    scanners: &[Box<dyn Scanner>],
    window: &[SecurityEvent],
    store: &FindingStore,
) -> ScanReport {
    let mut new_findings = 0;
    for scanner in scanners {
        for finding in scanner.scan(window) {
            if store.upsert(finding) {
                new_findings += 1;
            }
        }
    }
    let counts = store.severity_counts();
    let count = |s: Severity| counts.get(&s).copied().unwrap_or(0);
    ScanReport {
        timestamp_ms: now_ms(),
        window_events: window.len(),
        new_findings,
        total_findings: store.len(),
        critical: count(Severity::Critical),
        high: count(Severity::High),
        medium: count(Severity::Medium),
        low: count(Severity::Low),
    }
}
