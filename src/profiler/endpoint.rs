//! Per-route behavioral baselines.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use serde::Serialize;

use crate::config::schema::AnomalyConfig;

/// Request headers that legitimate clients rarely send and attack tooling
/// uses to confuse origin resolution or method handling.
const SUSPICIOUS_HEADERS: &[&str] = &[
    "x-forwarded-host",
    "x-original-url",
    "x-rewrite-url",
    "x-originating-ip",
    "x-forwarded-server",
    "x-http-method-override",
];

/// A statistical deviation from a route's baseline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    ResponseTime { observed_ms: f64, baseline_ms: f64 },
    ResponseSize { observed_bytes: f64, baseline_bytes: f64 },
    UnexpectedParameters { names: Vec<String> },
    SuspiciousHeader { name: String },
}

/// One observed request/response cycle on a route.
pub struct RouteSample<'a> {
    pub latency_ms: f64,
    pub size_bytes: f64,
    pub param_names: &'a [String],
    pub header_names: &'a [String],
    pub is_error: bool,
}

/// Moving baseline for one (method, route) pair.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointProfile {
    pub avg_latency_ms: f64,
    pub avg_size_bytes: f64,
    pub error_rate: f64,
    pub known_param_names: HashSet<String>,
    pub known_header_names: HashSet<String>,
    pub sample_count: u64,
}

impl EndpointProfile {
    fn new() -> Self {
        Self {
            avg_latency_ms: 0.0,
            avg_size_bytes: 0.0,
            error_rate: 0.0,
            known_param_names: HashSet::new(),
            known_header_names: HashSet::new(),
            sample_count: 0,
        }
    }
}

/// Maintains per-route baselines and flags deviations.
///
/// Profiles are created lazily and mutated under the dashmap entry guard,
/// so concurrent requests to the same route cannot lose updates.
pub struct EndpointBehaviorProfiler {
    profiles: DashMap<String, EndpointProfile>,
    /// While set, observations train the baseline but nothing is flagged.
    learning_mode: AtomicBool,
}

impl EndpointBehaviorProfiler {
    pub fn new(learning_mode: bool) -> Self {
        Self {
            profiles: DashMap::new(),
            learning_mode: AtomicBool::new(learning_mode),
        }
    }

    pub fn learning_mode(&self) -> bool {
        self.learning_mode.load(Ordering::Relaxed)
    }

    /// Toggle learning mode, e.g. after ingesting a historical baseline.
    pub fn set_learning_mode(&self, enabled: bool) {
        self.learning_mode.store(enabled, Ordering::Relaxed);
        tracing::info!(enabled, "profiler learning mode changed");
    }

    /// Fold one sample into the route's baseline and return any deviations.
    ///
    /// Flagging only starts once the route has `warmup_samples` behind it
    /// and learning mode is off; the sample still trains the baseline
    /// either way.
    pub fn observe(
        &self,
        route_key: &str,
        sample: RouteSample<'_>,
        config: &AnomalyConfig,
    ) -> Vec<Anomaly> {
        let mut entry = self
            .profiles
            .entry(route_key.to_string())
            .or_insert_with(EndpointProfile::new);
        let profile = entry.value_mut();

        let warmed_up = profile.sample_count >= config.warmup_samples;
        let flagging = warmed_up && !self.learning_mode();
        let mut anomalies = Vec::new();

        if flagging {
            if profile.avg_latency_ms > 0.0
                && sample.latency_ms > profile.avg_latency_ms * config.deviation_multiplier
            {
                anomalies.push(Anomaly::ResponseTime {
                    observed_ms: sample.latency_ms,
                    baseline_ms: profile.avg_latency_ms,
                });
            }
            if profile.avg_size_bytes > 0.0
                && sample.size_bytes > profile.avg_size_bytes * config.deviation_multiplier
            {
                anomalies.push(Anomaly::ResponseSize {
                    observed_bytes: sample.size_bytes,
                    baseline_bytes: profile.avg_size_bytes,
                });
            }

            let unseen: Vec<String> = sample
                .param_names
                .iter()
                .filter(|name| !profile.known_param_names.contains(*name))
                .cloned()
                .collect();
            if unseen.len() > config.unexpected_param_threshold {
                anomalies.push(Anomaly::UnexpectedParameters { names: unseen });
            }
        }

        if !self.learning_mode() {
            for header in sample.header_names {
                if SUSPICIOUS_HEADERS.contains(&header.as_str()) {
                    anomalies.push(Anomaly::SuspiciousHeader {
                        name: header.clone(),
                    });
                }
            }
        }

        // Train the baseline regardless of flagging.
        let alpha = config.ema_alpha;
        if profile.sample_count == 0 {
            profile.avg_latency_ms = sample.latency_ms;
            profile.avg_size_bytes = sample.size_bytes;
            profile.error_rate = if sample.is_error { 1.0 } else { 0.0 };
        } else {
            profile.avg_latency_ms += alpha * (sample.latency_ms - profile.avg_latency_ms);
            profile.avg_size_bytes += alpha * (sample.size_bytes - profile.avg_size_bytes);
            let err = if sample.is_error { 1.0 } else { 0.0 };
            profile.error_rate += alpha * (err - profile.error_rate);
        }
        profile
            .known_param_names
            .extend(sample.param_names.iter().cloned());
        profile
            .known_header_names
            .extend(sample.header_names.iter().cloned());
        profile.sample_count += 1;

        anomalies
    }

    pub fn profile(&self, route_key: &str) -> Option<EndpointProfile> {
        self.profiles.get(route_key).map(|p| p.clone())
    }

    pub fn tracked_routes(&self) -> usize {
        self.profiles.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(latency_ms: f64) -> RouteSample<'static> {
        RouteSample {
            latency_ms,
            size_bytes: 2048.0,
            param_names: &[],
            header_names: &[],
            is_error: false,
        }
    }

    fn warmed_profiler(config: &AnomalyConfig) -> EndpointBehaviorProfiler {
        let profiler = EndpointBehaviorProfiler::new(false);
        for _ in 0..config.warmup_samples {
            assert!(profiler
                .observe("GET:/api/loans", sample(100.0), config)
                .is_empty());
        }
        profiler
    }

    #[test]
    fn no_flags_during_warmup() {
        let config = AnomalyConfig::default();
        let profiler = EndpointBehaviorProfiler::new(false);
        for _ in 0..config.warmup_samples {
            let anomalies = profiler.observe("GET:/api/loans", sample(5000.0), &config);
            assert!(anomalies.is_empty());
        }
    }

    #[test]
    fn latency_spike_flagged_after_warmup() {
        let config = AnomalyConfig::default();
        let profiler = warmed_profiler(&config);
        let anomalies = profiler.observe("GET:/api/loans", sample(1000.0), &config);
        assert!(matches!(
            anomalies.as_slice(),
            [Anomaly::ResponseTime { .. }]
        ));
    }

    #[test]
    fn learning_mode_suppresses_flagging() {
        let config = AnomalyConfig::default();
        let profiler = warmed_profiler(&config);
        profiler.set_learning_mode(true);
        assert!(profiler
            .observe("GET:/api/loans", sample(10_000.0), &config)
            .is_empty());
        profiler.set_learning_mode(false);
        assert!(!profiler
            .observe("GET:/api/loans", sample(10_000.0), &config)
            .is_empty());
    }

    #[test]
    fn unexpected_params_need_more_than_threshold() {
        let config = AnomalyConfig::default();
        let profiler = EndpointBehaviorProfiler::new(false);
        let known: Vec<String> = vec!["page".into(), "sort".into()];
        for _ in 0..config.warmup_samples {
            profiler.observe(
                "GET:/api/loans",
                RouteSample {
                    latency_ms: 100.0,
                    size_bytes: 1024.0,
                    param_names: &known,
                    header_names: &[],
                    is_error: false,
                },
                &config,
            );
        }

        // Five unseen names: at the threshold, not over it.
        let five: Vec<String> = (0..5).map(|i| format!("p{i}")).collect();
        let anomalies = profiler.observe(
            "GET:/api/loans",
            RouteSample {
                latency_ms: 100.0,
                size_bytes: 1024.0,
                param_names: &five,
                header_names: &[],
                is_error: false,
            },
            &config,
        );
        assert!(anomalies.is_empty());

        let six: Vec<String> = (0..6).map(|i| format!("q{i}")).collect();
        let anomalies = profiler.observe(
            "GET:/api/loans",
            RouteSample {
                latency_ms: 100.0,
                size_bytes: 1024.0,
                param_names: &six,
                header_names: &[],
                is_error: false,
            },
            &config,
        );
        assert!(matches!(
            anomalies.as_slice(),
            [Anomaly::UnexpectedParameters { names }] if names.len() == 6
        ));
    }

    #[test]
    fn suspicious_header_flagged_even_before_warmup() {
        let config = AnomalyConfig::default();
        let profiler = EndpointBehaviorProfiler::new(false);
        let headers: Vec<String> = vec!["x-original-url".into()];
        let anomalies = profiler.observe(
            "GET:/api/loans",
            RouteSample {
                latency_ms: 50.0,
                size_bytes: 512.0,
                param_names: &[],
                header_names: &headers,
                is_error: false,
            },
            &config,
        );
        assert_eq!(
            anomalies,
            vec![Anomaly::SuspiciousHeader {
                name: "x-original-url".into()
            }]
        );
    }

    #[test]
    fn baselines_converge_via_ema() {
        let config = AnomalyConfig::default();
        let profiler = EndpointBehaviorProfiler::new(false);
        for _ in 0..200 {
            profiler.observe("GET:/api/loans", sample(100.0), &config);
        }
        let profile = profiler.profile("GET:/api/loans").unwrap();
        assert!((profile.avg_latency_ms - 100.0).abs() < 1.0);
        assert_eq!(profile.sample_count, 200);
    }
}
