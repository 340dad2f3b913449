//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the request-protection layer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Listener configuration for the demo server.
    pub listener: ListenerConfig,

    /// Source-address reputation settings.
    pub reputation: ReputationConfig,

    /// Endpoint behavior baseline settings.
    pub anomaly: AnomalyConfig,

    /// CSRF token protocol settings.
    pub csrf: CsrfConfig,

    /// Honeypot decoy settings.
    pub honeypot: HoneypotConfig,

    /// Periodic vulnerability scan settings.
    pub scan: ScanConfig,

    /// Security event log settings.
    pub event_log: EventLogConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Maximum request body size buffered for inspection, in bytes.
    /// Larger bodies skip textual analysis.
    pub max_inspect_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 30,
            max_inspect_body_bytes: 1024 * 1024,
        }
    }
}

/// Source-address reputation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReputationConfig {
    /// Score at which an address becomes blocked.
    pub block_threshold: f64,

    /// Distinct-route fan-out above which the score is bumped.
    pub fanout_threshold: usize,

    /// Distinct user-agent count above which the score is bumped.
    pub user_agent_threshold: usize,

    /// Total request count above which the score is bumped.
    pub volume_threshold: u64,

    /// Score added on any honeypot interaction. Must alone exceed
    /// `block_threshold` so a handful of decoy hits blocks outright.
    pub honeypot_penalty: f64,

    /// Hours of inactivity after which the score is halved.
    pub decay_half_life_hours: u64,

    /// Days of inactivity after which a profile is evicted by the sweep.
    pub eviction_days: u64,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            block_threshold: 50.0,
            fanout_threshold: 50,
            user_agent_threshold: 5,
            volume_threshold: 1000,
            honeypot_penalty: 60.0,
            decay_half_life_hours: 24,
            eviction_days: 7,
        }
    }
}

/// Endpoint behavior baseline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// EMA smoothing factor for latency/size/error-rate baselines.
    pub ema_alpha: f64,

    /// Samples required per route before deviations are flagged.
    pub warmup_samples: u64,

    /// Multiple of the baseline a sample must exceed to be flagged.
    pub deviation_multiplier: f64,

    /// Never-seen parameter names a single request may introduce before
    /// being flagged.
    pub unexpected_param_threshold: usize,

    /// Start in learning mode (no flagging) until toggled off.
    pub learning_mode: bool,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            ema_alpha: 0.1,
            warmup_samples: 20,
            deviation_multiplier: 3.0,
            unexpected_param_threshold: 5,
            learning_mode: false,
        }
    }
}

/// CSRF token protocol configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CsrfConfig {
    /// HMAC signing secret. Must be overridden in production.
    pub secret: String,

    /// Token lifetime in seconds.
    pub max_age_secs: u64,
}

/// Default CSRF secret. Validation rejects it outright, so a loaded
/// configuration must always carry a deployment-specific secret.
pub(crate) const PLACEHOLDER_CSRF_SECRET: &str = "CHANGE_ME_IN_PRODUCTION";

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            secret: PLACEHOLDER_CSRF_SECRET.to_string(),
            max_age_secs: 3600,
        }
    }
}

/// Honeypot decoy configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HoneypotConfig {
    /// Decoy routes no legitimate client ever requests.
    pub routes: Vec<String>,

    /// Decoy form-field names no legitimate client ever fills.
    pub fields: Vec<String>,

    /// Statuses the fake response is drawn from.
    pub response_statuses: Vec<u16>,

    /// Minimum fake-processing delay in milliseconds.
    pub min_delay_ms: u64,

    /// Maximum fake-processing delay in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for HoneypotConfig {
    fn default() -> Self {
        Self {
            routes: default_honeypot_routes(),
            fields: default_honeypot_fields(),
            response_statuses: vec![401, 403, 404, 500],
            min_delay_ms: 500,
            max_delay_ms: 2500,
        }
    }
}

fn default_honeypot_routes() -> Vec<String> {
    [
        "/api/admin/debug",
        "/api/v1/admin",
        "/api/test/backdoor",
        "/api/config",
        "/api/.env",
        "/api/wp-admin",
        "/api/phpmyadmin",
        "/api/shell",
        "/api/cmd",
        "/api/exec",
        "/api/system",
        "/api/eval",
        "/api/console",
        "/api/terminal",
        "/api/ssh",
        "/api/ftp",
        "/api/database/dump",
        "/api/backup",
        "/api/db.sql",
        "/api/users/all",
        "/api/export/users",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_honeypot_fields() -> Vec<String> {
    [
        "email_confirm",
        "username_verify",
        "hidden_field",
        "trap_field",
        "bot_check",
        "security_check",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Periodic vulnerability scan configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Enable the periodic scan task.
    pub enabled: bool,

    /// Interval between scans in seconds.
    pub interval_secs: u64,

    /// Trailing event window the scan inspects, in hours.
    pub window_hours: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 3600,
            window_hours: 24,
        }
    }
}

/// Security event log configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventLogConfig {
    /// Maximum events held in memory; the oldest is evicted past this.
    pub capacity: usize,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self { capacity: 10_000 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
