//! Vulnerability findings and their deduplicating store.

use std::collections::BTreeMap;

use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use crate::events::types::{now_ms, Severity};

/// Classes of findings the built-in scanners produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingKind {
    InformationDisclosure,
    MissingSecurityHeaders,
    Idor,
}

impl FindingKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FindingKind::InformationDisclosure => "INFORMATION_DISCLOSURE",
            FindingKind::MissingSecurityHeaders => "MISSING_SECURITY_HEADERS",
            FindingKind::Idor => "IDOR",
        }
    }
}

/// A detected (or suspected) vulnerability.
#[derive(Debug, Clone, Serialize)]
pub struct VulnerabilityFinding {
    pub id: Uuid,
    pub kind: FindingKind,
    pub severity: Severity,
    pub route: String,
    pub evidence: BTreeMap<String, String>,
    pub recommendation: String,
    pub first_detected_ms: u64,
    /// 0–1; lower means more trustworthy.
    pub false_positive_confidence: f64,
    pub cwe_id: &'static str,
    pub owasp_category: &'static str,
}

impl VulnerabilityFinding {
    pub fn new(
        kind: FindingKind,
        severity: Severity,
        route: String,
        evidence: BTreeMap<String, String>,
        recommendation: impl Into<String>,
        false_positive_confidence: f64,
        cwe_id: &'static str,
        owasp_category: &'static str,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            severity,
            route,
            evidence,
            recommendation: recommendation.into(),
            first_detected_ms: now_ms(),
            false_positive_confidence,
            cwe_id,
            owasp_category,
        }
    }
}

/// Findings deduplicated by (kind, route); re-detections keep the original
/// id and first-detected timestamp.
#[derive(Default)]
pub struct FindingStore {
    findings: DashMap<(FindingKind, String), VulnerabilityFinding>,
}

impl FindingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless an equivalent finding already exists. Returns whether
    /// the finding was new.
    pub fn upsert(&self, finding: VulnerabilityFinding) -> bool {
        let key = (finding.kind, finding.route.clone());
        let mut new = false;
        self.findings.entry(key).or_insert_with(|| {
            new = true;
            finding
        });
        new
    }

    /// All current findings, most severe first.
    pub fn sorted_by_severity(&self) -> Vec<VulnerabilityFinding> {
        let mut all: Vec<_> = self.findings.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then(a.first_detected_ms.cmp(&b.first_detected_ms))
        });
        all
    }

    pub fn len(&self) -> usize {
        self.findings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    /// Count of findings at each severity, for the summary report.
    pub fn severity_counts(&self) -> BTreeMap<Severity, usize> {
        let mut counts = BTreeMap::new();
        for entry in self.findings.iter() {
            *counts.entry(entry.severity).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(kind: FindingKind, severity: Severity, route: &str) -> VulnerabilityFinding {
        VulnerabilityFinding::new(
            kind,
            severity,
            route.to_string(),
            BTreeMap::new(),
            "fix it",
            0.1,
            "CWE-000",
            "A00",
        )
    }

    #[test]
    fn deduplicates_by_kind_and_route() {
        let store = FindingStore::new();
        assert!(store.upsert(finding(FindingKind::Idor, Severity::High, "/api/users/1")));
        assert!(!store.upsert(finding(FindingKind::Idor, Severity::High, "/api/users/1")));
        assert!(store.upsert(finding(FindingKind::Idor, Severity::High, "/api/users/2")));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn sorted_most_severe_first() {
        let store = FindingStore::new();
        store.upsert(finding(
            FindingKind::MissingSecurityHeaders,
            Severity::Low,
            "/a",
        ));
        store.upsert(finding(FindingKind::Idor, Severity::High, "/b"));
        store.upsert(finding(
            FindingKind::InformationDisclosure,
            Severity::Medium,
            "/c",
        ));
        let sorted = store.sorted_by_severity();
        assert_eq!(sorted[0].severity, Severity::High);
        assert_eq!(sorted[2].severity, Severity::Low);
    }
}
