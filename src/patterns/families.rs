//! Attack family definitions and signature sets.

use serde::Serialize;

use crate::events::types::Severity;

/// Named injection-attack classes detected by the matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttackFamily {
    SqlInjection,
    Xss,
    CommandInjection,
    PathTraversal,
    XxeInjection,
}

impl AttackFamily {
    /// Families whose detection blocks the request outright.
    pub fn is_critical(self) -> bool {
        matches!(self, AttackFamily::SqlInjection | AttackFamily::CommandInjection)
    }

    pub fn severity(self) -> Severity {
        match self {
            AttackFamily::SqlInjection | AttackFamily::CommandInjection => Severity::Critical,
            AttackFamily::Xss | AttackFamily::PathTraversal | AttackFamily::XxeInjection => {
                Severity::High
            }
        }
    }

    /// Stable label for metrics and log fields.
    pub fn label(self) -> &'static str {
        match self {
            AttackFamily::SqlInjection => "sql_injection",
            AttackFamily::Xss => "xss",
            AttackFamily::CommandInjection => "command_injection",
            AttackFamily::PathTraversal => "path_traversal",
            AttackFamily::XxeInjection => "xxe_injection",
        }
    }

    pub fn confidence(self) -> f64 {
        match self {
            AttackFamily::SqlInjection => 0.9,
            AttackFamily::Xss => 0.85,
            AttackFamily::CommandInjection => 0.9,
            AttackFamily::PathTraversal => 0.95,
            AttackFamily::XxeInjection => 0.9,
        }
    }
}

/// Signature set for one family. Patterns are matched against the
/// lower-cased textual surface, so they are written lower-case.
pub(super) struct FamilySignatures {
    pub family: AttackFamily,
    pub patterns: &'static [&'static str],
    /// Only consulted when the request content-type indicates XML.
    pub xml_only: bool,
}

pub(super) const SIGNATURE_SETS: &[FamilySignatures] = &[
    FamilySignatures {
        family: AttackFamily::SqlInjection,
        patterns: &[
            r"\b(union|select|insert|update|delete|drop|create|alter|exec|execute)\b.*\b(from|where|table|database)\b",
            r"\b(or|and)\b\s*\d+\s*=\s*\d+",
            r#"('|")\s*(or|and)\s*('|")\s*=\s*('|")"#,
            r"\bwaitfor\s+delay\b|\b(sleep|benchmark|pg_sleep)\s*\(",
            r"\b(load_file|into\s+outfile|into\s+dumpfile)\b",
        ],
        xml_only: false,
    },
    FamilySignatures {
        family: AttackFamily::Xss,
        patterns: &[
            r"<script[^>]*>",
            r"javascript:\s*[^\s]+",
            r#"\bon\w+\s*=\s*["'][^"']+["']"#,
            r"<iframe[^>]*>",
            r"<object[^>]*>",
            r"\beval\s*\(",
            r"\bexpression\s*\(",
        ],
        xml_only: false,
    },
    FamilySignatures {
        family: AttackFamily::CommandInjection,
        patterns: &[
            r"(\||;|&&|`|\$\(|\$\{)\s*(ls|cat|grep|find|wget|curl|nc|bash|sh|cmd|powershell)\b",
            r"\b(system|exec|popen|proc_open|shell_exec|passthru)\s*\(",
        ],
        xml_only: false,
    },
    FamilySignatures {
        family: AttackFamily::PathTraversal,
        patterns: &[r"\.\.[/\\]", r"%2e%2e[/\\]", r"\.\.%2f", r"\.\.%5c"],
        xml_only: false,
    },
    FamilySignatures {
        family: AttackFamily::XxeInjection,
        patterns: &[
            r"<!entity",
            r#"system\s+["'](file:|http:|https:|ftp:|php:|zlib:|data:|glob:|phar:|ssh2:|rar:|ogg:|expect:)"#,
        ],
        xml_only: true,
    },
];
