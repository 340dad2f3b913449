//! Stateless session-bound CSRF tokens.
//!
//! Token wire format: `signature.nonce.timestamp` where `signature` is
//! hex HMAC-SHA256 over a length-prefixed canonical message. Validity is
//! re-derived at check time from the token itself; nothing is stored
//! server-side.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::events::types::now_ms;

type HmacSha256 = Hmac<Sha256>;

/// Cookie carrying the token for the double-submit check.
pub const CSRF_COOKIE_NAME: &str = "__Secure-CSRF-Token";

/// Request header the client echoes the token in.
pub const CSRF_HEADER_NAME: &str = "x-csrf-token";

/// Why a state-changing request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CsrfRejection {
    #[error("CSRF token required")]
    Missing,
    #[error("Invalid CSRF token")]
    Invalid,
    #[error("CSRF token mismatch")]
    Mismatch,
}

impl CsrfRejection {
    /// Machine-readable reason code for the 403 body.
    pub fn code(self) -> &'static str {
        match self {
            CsrfRejection::Missing => "CSRF_TOKEN_MISSING",
            CsrfRejection::Invalid => "CSRF_TOKEN_INVALID",
            CsrfRejection::Mismatch => "CSRF_TOKEN_MISMATCH",
        }
    }
}

/// Canonical signed message. Each variable-length field is preceded by its
/// length so field boundaries cannot be shifted by crafted values.
fn canonical_message(session_id: &str, nonce: &str, timestamp: &str) -> String {
    format!(
        "{}!{}!{}!{}!{}",
        session_id.len(),
        session_id,
        nonce.len(),
        nonce,
        timestamp
    )
}

fn sign(secret: &[u8], message: &str) -> Vec<u8> {
    let mut mac =
        HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(message.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// Issue a fresh token bound to `session_id`.
pub fn issue(secret: &str, session_id: &str) -> String {
    let mut nonce_bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = hex::encode(nonce_bytes);
    let timestamp = now_ms().to_string();

    let message = canonical_message(session_id, &nonce, &timestamp);
    let signature = hex::encode(sign(secret.as_bytes(), &message));

    format!("{signature}.{nonce}.{timestamp}")
}

/// Validate a presented token against `session_id` at time `now_ms`.
///
/// Pure function of its inputs: no shared mutable state, safe to call
/// concurrently. The signature comparison is constant-time.
pub fn validate(
    secret: &str,
    token: &str,
    session_id: &str,
    now_ms: u64,
    max_age_ms: u64,
) -> bool {
    if token.is_empty() || session_id.is_empty() {
        return false;
    }

    let mut parts = token.split('.');
    let (signature, nonce, timestamp) = match (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) {
        (Some(s), Some(n), Some(t), None) => (s, n, t),
        _ => return false,
    };

    let token_time: u64 = match timestamp.parse() {
        Ok(t) => t,
        Err(_) => return false,
    };
    if now_ms.saturating_sub(token_time) > max_age_ms {
        return false;
    }

    let presented = match hex::decode(signature) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let message = canonical_message(session_id, nonce, timestamp);
    let expected = sign(secret.as_bytes(), &message);

    presented.ct_eq(&expected).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SECRET: &str = "unit-test-signing-secret";
    const MAX_AGE_MS: u64 = 3_600_000;

    #[test]
    fn round_trip_validates_immediately() {
        let token = issue(SECRET, "session-123");
        assert!(validate(SECRET, &token, "session-123", now_ms(), MAX_AGE_MS));
    }

    #[test]
    fn rejects_one_second_past_max_age() {
        let token = issue(SECRET, "session-123");
        let issued_at: u64 = token.rsplit('.').next().unwrap().parse().unwrap();
        assert!(validate(
            SECRET,
            &token,
            "session-123",
            issued_at + MAX_AGE_MS,
            MAX_AGE_MS
        ));
        assert!(!validate(
            SECRET,
            &token,
            "session-123",
            issued_at + MAX_AGE_MS + 1_000,
            MAX_AGE_MS
        ));
    }

    #[test]
    fn rejects_other_session() {
        let token = issue(SECRET, "session-123");
        assert!(!validate(SECRET, &token, "session-456", now_ms(), MAX_AGE_MS));
    }

    #[test]
    fn rejects_other_secret() {
        let token = issue("some-other-secret", "session-123");
        assert!(!validate(SECRET, &token, "session-123", now_ms(), MAX_AGE_MS));
    }

    #[test]
    fn rejects_malformed_shapes() {
        for token in ["", "a.b", "a.b.c.d", "nothex.bb.123", "deadbeef.bb.notanumber"] {
            assert!(!validate(SECRET, token, "session-123", now_ms(), MAX_AGE_MS));
        }
    }

    #[test]
    fn rejects_tampered_parts() {
        let token = issue(SECRET, "session-123");
        let parts: Vec<&str> = token.split('.').collect();
        let flipped = if parts[1].starts_with('f') { "0" } else { "f" };
        let resigned_nonce = format!("{}.{}{}.{}", parts[0], flipped, &parts[1][1..], parts[2]);
        let shifted_time = format!("{}.{}.{}", parts[0], parts[1], now_ms() + 60_000);
        for forged in [resigned_nonce, shifted_time] {
            assert!(!validate(SECRET, &forged, "session-123", now_ms(), MAX_AGE_MS));
        }
    }

    #[test]
    fn length_prefix_defeats_boundary_shifting() {
        // "ab" + "c..." and "a" + "bc..." must not sign the same message.
        let m1 = canonical_message("ab", "cd", "1");
        let m2 = canonical_message("a", "bcd", "1");
        assert_ne!(sign(SECRET.as_bytes(), &m1), sign(SECRET.as_bytes(), &m2));
    }

    proptest! {
        // Any token not produced by `issue` with this secret must fail.
        #[test]
        fn forged_tokens_never_validate(
            sig in "[0-9a-f]{64}",
            nonce in "[0-9a-f]{64}",
            offset in 0u64..MAX_AGE_MS,
            session in "[a-z0-9-]{1,32}",
        ) {
            let timestamp = now_ms().saturating_sub(offset);
            let forged = format!("{sig}.{nonce}.{timestamp}");
            // The 2^-256 chance of guessing the HMAC is ignored.
            prop_assert!(!validate(SECRET, &forged, &session, now_ms(), MAX_AGE_MS));
        }

        #[test]
        fn issued_tokens_validate_for_any_session(session in "[a-zA-Z0-9_-]{1,64}") {
            let token = issue(SECRET, &session);
            prop_assert!(validate(SECRET, &token, &session, now_ms(), MAX_AGE_MS));
        }
    }
}
