//! Decoy routes and form fields.

use std::collections::BTreeMap;
use std::time::Duration;

use axum::http::StatusCode;

use crate::config::schema::HoneypotConfig;

/// A fake disposition for a trapped request: plausible status, generic
/// message, and a randomized processing delay so automated tooling cannot
/// distinguish the decoy from a real endpoint.
#[derive(Debug, Clone)]
pub struct DecoyResponse {
    pub status: StatusCode,
    pub message: &'static str,
    pub delay: Duration,
}

/// Exact-match check against the configured decoy routes.
pub fn is_decoy_route(path: &str, config: &HoneypotConfig) -> bool {
    config.routes.iter().any(|r| r == path)
}

/// Which configured decoy fields carry a non-empty value.
pub fn extract_filled_decoy_fields(
    fields: &BTreeMap<String, String>,
    config: &HoneypotConfig,
) -> Vec<String> {
    config
        .fields
        .iter()
        .filter(|name| {
            fields
                .get(*name)
                .map(|v| !v.trim().is_empty())
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}

/// Draw a randomized fake response. Never an explicit "blocked" message.
pub fn decoy_response(config: &HoneypotConfig) -> DecoyResponse {
    let status_code = if config.response_statuses.is_empty() {
        404
    } else {
        config.response_statuses[fastrand::usize(..config.response_statuses.len())]
    };
    let status = StatusCode::from_u16(status_code).unwrap_or(StatusCode::NOT_FOUND);
    let message = match status_code {
        401 => "Unauthorized",
        403 => "Access denied",
        500 => "Internal server error",
        _ => "Endpoint not found",
    };
    let delay_ms = if config.max_delay_ms > config.min_delay_ms {
        fastrand::u64(config.min_delay_ms..=config.max_delay_ms)
    } else {
        config.min_delay_ms
    };
    DecoyResponse {
        status,
        message,
        delay: Duration::from_millis(delay_ms),
    }
}
