//! Sensitive-field redaction.

use std::collections::BTreeMap;

/// Key-name substrings whose values never enter the event log.
/// Includes the pt-BR field names carried by upstream form payloads.
const SENSITIVE_KEYS: &[&str] = &[
    "password", "senha", "token", "secret", "key", "cpf", "rg", "card", "document",
];

const REDACTED: &str = "[REDACTED]";

/// Replace values of sensitive-looking keys with a placeholder.
pub fn redact_details(details: BTreeMap<String, String>) -> BTreeMap<String, String> {
    details
        .into_iter()
        .map(|(k, v)| {
            if is_sensitive_key(&k) {
                (k, REDACTED.to_string())
            } else {
                (k, v)
            }
        })
        .collect()
}

/// Whether a key name looks like it holds a credential or personal number.
pub fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    SENSITIVE_KEYS.iter().any(|s| lower.contains(s))
}
