//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds positive, delay ranges ordered)
//! - Catch placeholder secrets before they reach production
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GuardConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;

use crate::config::schema::{GuardConfig, PLACEHOLDER_CSRF_SECRET};

/// A single semantic validation failure.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("reputation.block_threshold must be positive, got {0}")]
    NonPositiveBlockThreshold(f64),

    #[error("reputation.honeypot_penalty ({penalty}) must be >= block_threshold ({threshold})")]
    WeakHoneypotPenalty { penalty: f64, threshold: f64 },

    #[error("anomaly.ema_alpha must be in (0, 1], got {0}")]
    InvalidEmaAlpha(f64),

    #[error("anomaly.deviation_multiplier must be > 1, got {0}")]
    InvalidDeviationMultiplier(f64),

    #[error("csrf.secret must be at least 16 bytes")]
    ShortCsrfSecret,

    #[error("csrf.secret is the shipped placeholder; set a deployment-specific secret")]
    PlaceholderCsrfSecret,

    #[error("csrf.max_age_secs must be positive")]
    ZeroCsrfMaxAge,

    #[error("honeypot route {0:?} must start with '/'")]
    RelativeHoneypotRoute(String),

    #[error("honeypot.response_statuses must not be empty")]
    NoHoneypotStatuses,

    #[error("honeypot delay range inverted: min {min} > max {max}")]
    InvertedHoneypotDelay { min: u64, max: u64 },

    #[error("scan.interval_secs must be positive")]
    ZeroScanInterval,

    #[error("event_log.capacity must be positive")]
    ZeroEventLogCapacity,
}

/// Validate the configuration, collecting every violation.
pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.reputation.block_threshold <= 0.0 {
        errors.push(ValidationError::NonPositiveBlockThreshold(
            config.reputation.block_threshold,
        ));
    }
    if config.reputation.honeypot_penalty < config.reputation.block_threshold {
        errors.push(ValidationError::WeakHoneypotPenalty {
            penalty: config.reputation.honeypot_penalty,
            threshold: config.reputation.block_threshold,
        });
    }

    if !(config.anomaly.ema_alpha > 0.0 && config.anomaly.ema_alpha <= 1.0) {
        errors.push(ValidationError::InvalidEmaAlpha(config.anomaly.ema_alpha));
    }
    if config.anomaly.deviation_multiplier <= 1.0 {
        errors.push(ValidationError::InvalidDeviationMultiplier(
            config.anomaly.deviation_multiplier,
        ));
    }

    if config.csrf.secret.len() < 16 {
        errors.push(ValidationError::ShortCsrfSecret);
    }
    if config.csrf.secret == PLACEHOLDER_CSRF_SECRET {
        errors.push(ValidationError::PlaceholderCsrfSecret);
    }
    if config.csrf.max_age_secs == 0 {
        errors.push(ValidationError::ZeroCsrfMaxAge);
    }

    for route in &config.honeypot.routes {
        if !route.starts_with('/') {
            errors.push(ValidationError::RelativeHoneypotRoute(route.clone()));
        }
    }
    if config.honeypot.response_statuses.is_empty() {
        errors.push(ValidationError::NoHoneypotStatuses);
    }
    if config.honeypot.min_delay_ms > config.honeypot.max_delay_ms {
        errors.push(ValidationError::InvertedHoneypotDelay {
            min: config.honeypot.min_delay_ms,
            max: config.honeypot.max_delay_ms,
        });
    }

    if config.scan.interval_secs == 0 {
        errors.push(ValidationError::ZeroScanInterval);
    }
    if config.event_log.capacity == 0 {
        errors.push(ValidationError::ZeroEventLogCapacity);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_with_real_secret_is_valid() {
        let mut config = GuardConfig::default();
        config.csrf.secret = "a-sufficiently-long-secret".into();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn collects_multiple_errors() {
        let mut config = GuardConfig::default();
        config.csrf.secret = "short".into();
        config.anomaly.ema_alpha = 0.0;
        config.honeypot.routes.push("no-slash".into());
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn shipped_placeholder_secret_is_rejected() {
        let config = GuardConfig::default();
        let errors = validate_config(&config).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::PlaceholderCsrfSecret)));
    }

    #[test]
    fn honeypot_penalty_below_threshold_rejected() {
        let mut config = GuardConfig::default();
        config.csrf.secret = "a-sufficiently-long-secret".into();
        config.reputation.honeypot_penalty = 10.0;
        assert!(validate_config(&config).is_err());
    }
}
