//! Shared guard state, constructed once at startup.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::DashSet;
use regex::Regex;

use crate::config::schema::GuardConfig;
use crate::events::log::SecurityEventLog;
use crate::lifecycle::Shutdown;
use crate::patterns::matcher::AttackPatternMatcher;
use crate::profiler::endpoint::EndpointBehaviorProfiler;
use crate::reputation::tracker::IpReputationTracker;
use crate::scanner::builtin::{default_scanners, run_scan, ScanReport, Scanner};
use crate::scanner::findings::FindingStore;

/// All mutable guard registries behind one explicitly-passed handle.
/// No ambient statics: every component receives this on construction or
/// per call.
pub struct SecurityMonitorState {
    config: ArcSwap<GuardConfig>,
    pub event_log: Arc<SecurityEventLog>,
    pub matcher: AttackPatternMatcher,
    pub reputation: IpReputationTracker,
    pub profiler: EndpointBehaviorProfiler,
    pub findings: FindingStore,
    scanners: Vec<Box<dyn Scanner>>,
    /// Routes already reported for passive response observations, so the
    /// event log is not flooded with one observation per request.
    pub(crate) reported_header_routes: DashSet<String>,
    pub(crate) reported_idor_routes: DashSet<String>,
    /// Paths that address a single record by numeric or UUID identifier.
    pub(crate) id_path: Regex,
}

impl SecurityMonitorState {
    /// Build the full component graph from configured thresholds.
    pub fn new(config: GuardConfig) -> Result<Arc<Self>, regex::Error> {
        Self::with_scanners(config, default_scanners())
    }

    /// Build with a custom scanner set behind the `Scanner` seam.
    pub fn with_scanners(
        config: GuardConfig,
        scanners: Vec<Box<dyn Scanner>>,
    ) -> Result<Arc<Self>, regex::Error> {
        let event_log = Arc::new(SecurityEventLog::new(config.event_log.capacity));
        let learning = config.anomaly.learning_mode;
        Ok(Arc::new(Self {
            config: ArcSwap::from_pointee(config),
            matcher: AttackPatternMatcher::new()?,
            reputation: IpReputationTracker::new(event_log.clone()),
            profiler: EndpointBehaviorProfiler::new(learning),
            findings: FindingStore::new(),
            scanners,
            reported_header_routes: DashSet::new(),
            reported_idor_routes: DashSet::new(),
            id_path: Regex::new(
                r"/(users?|accounts?|orders?|documents?|files?|loans?)/(\d+|[0-9a-fA-F-]{36})(/|$)",
            )?,
            event_log,
        }))
    }

    /// Snapshot of the current configuration. In-flight requests keep the
    /// snapshot they loaded at entry.
    pub fn config(&self) -> Arc<GuardConfig> {
        self.config.load_full()
    }

    /// Swap in a reloaded configuration.
    pub fn update_config(&self, new_config: GuardConfig) {
        self.config.store(Arc::new(new_config));
        tracing::info!("Guard configuration updated");
    }

    /// Run the scanners over the trailing event window once.
    pub fn run_scan_now(&self) -> ScanReport {
        let config = self.config();
        let window = self.event_log.window(config.scan.window_hours);
        let report = run_scan(&self.scanners, &window, &self.findings);
        tracing::info!(
            window_events = report.window_events,
            new_findings = report.new_findings,
            total_findings = report.total_findings,
            critical = report.critical,
            high = report.high,
            "Periodic security scan complete"
        );
        report
    }

    /// Spawn the periodic scan and reputation sweep, wired to shutdown.
    pub fn spawn_background_tasks(self: &Arc<Self>, shutdown: &Shutdown) {
        let config = self.config();
        if !config.scan.enabled {
            return;
        }
        let state = self.clone();
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(config.scan.interval_secs));
            // First tick completes immediately; skip it so the first scan
            // waits a full interval.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let _ = state.run_scan_now();
                        state.reputation.sweep(&state.config().reputation);
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Scan task stopping");
                        break;
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_swap_is_visible_to_new_loads() {
        let state = SecurityMonitorState::new(GuardConfig::default()).unwrap();
        assert_eq!(state.config().reputation.block_threshold, 50.0);
        let mut updated = GuardConfig::default();
        updated.reputation.block_threshold = 75.0;
        state.update_config(updated);
        assert_eq!(state.config().reputation.block_threshold, 75.0);
    }
}
