//! Stateless signature engine.

use regex::Regex;
use serde::Serialize;

use crate::events::types::Severity;
use crate::patterns::families::{AttackFamily, SIGNATURE_SETS};

/// One family firing on a request surface.
#[derive(Debug, Clone, Serialize)]
pub struct AttackSignal {
    pub family: AttackFamily,
    pub severity: Severity,
    pub confidence: f64,
    /// The matched excerpt, used for in-place sanitization and evidence.
    pub matched: String,
}

struct CompiledFamily {
    family: AttackFamily,
    regexes: Vec<Regex>,
    xml_only: bool,
}

/// Classifies a request's serialized textual surface against known
/// injection families. Pure: no mutation, no event emission; the caller
/// decides disposition.
pub struct AttackPatternMatcher {
    families: Vec<CompiledFamily>,
}

impl AttackPatternMatcher {
    /// Compile all signature sets. Patterns are static, so failure here is
    /// a programming error surfaced at startup, not per-request.
    pub fn new() -> Result<Self, regex::Error> {
        let mut families = Vec::with_capacity(SIGNATURE_SETS.len());
        for set in SIGNATURE_SETS {
            let regexes = set
                .patterns
                .iter()
                .map(|p| Regex::new(p))
                .collect::<Result<Vec<_>, _>>()?;
            families.push(CompiledFamily {
                family: set.family,
                regexes,
                xml_only: set.xml_only,
            });
        }
        Ok(Self { families })
    }

    /// Run every family detector over the lower-cased surface. The first
    /// matching pattern short-circuits its family to bound cost; multiple
    /// families may still fire on one request.
    pub fn classify(&self, surface: &str, content_type_is_xml: bool) -> Vec<AttackSignal> {
        let mut signals = Vec::new();
        for family in &self.families {
            if family.xml_only && !content_type_is_xml {
                continue;
            }
            for regex in &family.regexes {
                if let Some(m) = regex.find(surface) {
                    signals.push(AttackSignal {
                        family: family.family,
                        severity: family.family.severity(),
                        confidence: family.family.confidence(),
                        matched: m.as_str().to_string(),
                    });
                    break;
                }
            }
        }
        signals
    }
}
