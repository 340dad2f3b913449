//! Per-source-address behavioral scoring.

use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::config::schema::ReputationConfig;
use crate::events::log::SecurityEventLog;
use crate::events::types::{now_ms, EventCategory, Severity};
use crate::observability::metrics;
use crate::patterns::matcher::AttackSignal;

/// Behavioral profile for one source address.
#[derive(Debug, Clone, Serialize)]
pub struct IpProfile {
    pub first_seen_ms: u64,
    pub last_seen_ms: u64,
    pub request_count: u64,
    pub distinct_routes: HashSet<String>,
    pub distinct_user_agents: HashSet<String>,
    pub reputation_score: f64,
    pub blocked: bool,
}

impl IpProfile {
    fn new(now: u64) -> Self {
        Self {
            first_seen_ms: now,
            last_seen_ms: now,
            request_count: 0,
            distinct_routes: HashSet::new(),
            distinct_user_agents: HashSet::new(),
            reputation_score: 0.0,
            blocked: false,
        }
    }
}

/// What one observation contributes to the score.
pub struct Observation<'a> {
    /// "METHOD:path" key for fan-out tracking.
    pub route_key: String,
    pub user_agent: Option<&'a str>,
    pub signals: &'a [AttackSignal],
    pub honeypot_hit: bool,
}

/// Outcome of an observation.
#[derive(Debug, Clone, Copy)]
pub struct Disposition {
    pub score: f64,
    pub blocked: bool,
    /// True only for the single observation that crossed the threshold.
    pub newly_blocked: bool,
}

/// Tracks reputation per source address and blocks past a threshold.
///
/// All mutation happens while the dashmap entry guard is held, so
/// concurrent observations for one address can neither lose updates nor
/// double-fire the block transition.
pub struct IpReputationTracker {
    profiles: DashMap<IpAddr, IpProfile>,
    event_log: Arc<SecurityEventLog>,
}

impl IpReputationTracker {
    pub fn new(event_log: Arc<SecurityEventLog>) -> Self {
        Self {
            profiles: DashMap::new(),
            event_log,
        }
    }

    /// Record one request for `addr` and return the resulting disposition.
    ///
    /// Crossing the block threshold sets `blocked` exactly once; only that
    /// transition emits a CRITICAL event. Later observations on an
    /// already-blocked profile are silent.
    pub fn observe(
        &self,
        addr: IpAddr,
        observation: Observation<'_>,
        config: &ReputationConfig,
    ) -> Disposition {
        let now = now_ms();
        let mut entry = self
            .profiles
            .entry(addr)
            .or_insert_with(|| IpProfile::new(now));
        let profile = entry.value_mut();

        decay_score(profile, now, config);

        profile.request_count += 1;
        profile.distinct_routes.insert(observation.route_key);
        if let Some(ua) = observation.user_agent {
            profile.distinct_user_agents.insert(ua.to_string());
        }
        profile.last_seen_ms = now;

        let mut delta = 0.0;
        if profile.distinct_routes.len() > config.fanout_threshold {
            delta += 10.0;
        }
        if profile.distinct_user_agents.len() > config.user_agent_threshold {
            delta += 5.0;
        }
        if profile.request_count > config.volume_threshold {
            delta += 15.0;
        }
        for signal in observation.signals {
            delta += severity_weight(signal.severity);
        }
        if observation.honeypot_hit {
            delta += config.honeypot_penalty;
        }
        profile.reputation_score += delta;

        let newly_blocked = !profile.blocked && profile.reputation_score >= config.block_threshold;
        if newly_blocked {
            profile.blocked = true;
        }
        let disposition = Disposition {
            score: profile.reputation_score,
            blocked: profile.blocked,
            newly_blocked,
        };
        drop(entry);

        if newly_blocked {
            metrics::record_address_blocked();
            let mut details = BTreeMap::new();
            details.insert("score".to_string(), format!("{:.1}", disposition.score));
            details.insert(
                "threshold".to_string(),
                format!("{:.1}", config.block_threshold),
            );
            self.event_log.record(
                EventCategory::SuspiciousActivity,
                Severity::Critical,
                Some(addr),
                None,
                None,
                false,
                details,
            );
        }

        disposition
    }

    /// Whether an address is currently blocked, without recording anything.
    pub fn is_blocked(&self, addr: &IpAddr) -> bool {
        self.profiles.get(addr).map(|p| p.blocked).unwrap_or(false)
    }

    /// Snapshot of one profile, for reporting.
    pub fn profile(&self, addr: &IpAddr) -> Option<IpProfile> {
        self.profiles.get(addr).map(|p| p.clone())
    }

    pub fn tracked_addresses(&self) -> usize {
        self.profiles.len()
    }

    /// Apply decay across all profiles and evict long-idle ones.
    /// Run from the periodic scan task, never on the request path.
    pub fn sweep(&self, config: &ReputationConfig) {
        let now = now_ms();
        let eviction_ms = config.eviction_days * 24 * 3_600_000;
        self.profiles.retain(|_, profile| {
            decay_score(profile, now, config);
            now.saturating_sub(profile.last_seen_ms) < eviction_ms
        });
    }
}

fn severity_weight(severity: Severity) -> f64 {
    match severity {
        Severity::Critical => 25.0,
        Severity::High => 15.0,
        Severity::Medium => 8.0,
        Severity::Low => 3.0,
    }
}

/// Halve the score per `decay_half_life_hours` of inactivity. The blocked
/// flag is never reset by decay.
fn decay_score(profile: &mut IpProfile, now: u64, config: &ReputationConfig) {
    if config.decay_half_life_hours == 0 || profile.reputation_score == 0.0 {
        return;
    }
    let idle_hours =
        now.saturating_sub(profile.last_seen_ms) as f64 / 3_600_000.0;
    if idle_hours > 0.0 {
        profile.reputation_score *=
            0.5_f64.powf(idle_hours / config.decay_half_life_hours as f64);
        if profile.reputation_score < 0.01 {
            profile.reputation_score = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::EventCategory;
    use crate::patterns::families::AttackFamily;
    use std::net::Ipv4Addr;

    fn tracker() -> (IpReputationTracker, Arc<SecurityEventLog>) {
        let log = Arc::new(SecurityEventLog::new(1000));
        (IpReputationTracker::new(log.clone()), log)
    }

    fn addr() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(203, 0, 113, 5))
    }

    fn plain(route: &str, ua: &str) -> Observation<'static> {
        Observation {
            route_key: route.to_string(),
            user_agent: Some(Box::leak(ua.to_string().into_boxed_str())),
            signals: &[],
            honeypot_hit: false,
        }
    }

    #[test]
    fn honeypot_hit_alone_blocks() {
        let (tracker, _log) = tracker();
        let config = ReputationConfig::default();
        let observation = Observation {
            route_key: "GET:/api/.env".into(),
            user_agent: Some("curl/8.0"),
            signals: &[],
            honeypot_hit: true,
        };
        let d = tracker.observe(addr(), observation, &config);
        assert!(d.blocked);
        assert!(d.newly_blocked);
    }

    #[test]
    fn block_event_fires_exactly_once() {
        let (tracker, log) = tracker();
        let config = ReputationConfig::default();
        for _ in 0..5 {
            let observation = Observation {
                route_key: "GET:/api/.env".into(),
                user_agent: None,
                signals: &[],
                honeypot_hit: true,
            };
            let d = tracker.observe(addr(), observation, &config);
            assert!(d.blocked);
        }
        let criticals = log
            .window(1)
            .into_iter()
            .filter(|e| {
                e.category == EventCategory::SuspiciousActivity
                    && e.severity == Severity::Critical
            })
            .count();
        assert_eq!(criticals, 1);
    }

    #[test]
    fn blocked_stays_blocked() {
        let (tracker, _log) = tracker();
        let config = ReputationConfig::default();
        let observation = Observation {
            route_key: "GET:/api/.env".into(),
            user_agent: None,
            signals: &[],
            honeypot_hit: true,
        };
        tracker.observe(addr(), observation, &config);
        for i in 0..10 {
            let d = tracker.observe(addr(), plain(&format!("GET:/r{i}"), "ua"), &config);
            assert!(d.blocked);
            assert!(!d.newly_blocked);
        }
    }

    #[test]
    fn scanning_fanout_with_ua_churn_blocks() {
        // 60 req/min across 55 distinct routes with 6 user agents.
        let (tracker, _log) = tracker();
        let config = ReputationConfig::default();
        let mut last = Disposition {
            score: 0.0,
            blocked: false,
            newly_blocked: false,
        };
        for i in 0..300 {
            let route = format!("GET:/api/probe/{}", i % 55);
            let ua = format!("scanner/{}", i % 6);
            last = tracker.observe(addr(), plain(&route, &ua), &config);
        }
        assert!(last.score >= config.block_threshold);
        assert!(last.blocked);
    }

    #[test]
    fn attack_signals_raise_score_by_severity() {
        let (tracker, _log) = tracker();
        let config = ReputationConfig::default();
        let signals = vec![AttackSignal {
            family: AttackFamily::SqlInjection,
            severity: Severity::Critical,
            confidence: 0.9,
            matched: "' or 1=1".into(),
        }];
        let observation = Observation {
            route_key: "POST:/api/login".into(),
            user_agent: Some("curl/8.0"),
            signals: &signals,
            honeypot_hit: false,
        };
        let d = tracker.observe(addr(), observation, &config);
        assert_eq!(d.score, 25.0);
        assert!(!d.blocked);
    }

    #[test]
    fn concurrent_observations_fire_block_once() {
        let (tracker, log) = tracker();
        let tracker = Arc::new(tracker);
        let config = ReputationConfig::default();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let tracker = tracker.clone();
            let config = config.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..10 {
                    let observation = Observation {
                        route_key: "GET:/api/.env".into(),
                        user_agent: None,
                        signals: &[],
                        honeypot_hit: true,
                    };
                    tracker.observe(addr(), observation, &config);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        let criticals = log
            .window(1)
            .into_iter()
            .filter(|e| e.severity == Severity::Critical)
            .count();
        assert_eq!(criticals, 1);
        assert_eq!(tracker.profile(&addr()).unwrap().request_count, 80);
    }

    #[test]
    fn sweep_evicts_idle_profiles() {
        let (tracker, _log) = tracker();
        let mut config = ReputationConfig::default();
        tracker.observe(addr(), plain("GET:/a", "ua"), &config);
        assert_eq!(tracker.tracked_addresses(), 1);
        // Anything idle for zero days is evicted.
        config.eviction_days = 0;
        tracker.sweep(&config);
        assert_eq!(tracker.tracked_addresses(), 0);
    }
}
