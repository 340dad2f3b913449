//! Hot reload of the guard configuration.
//!
//! Watches the config file and pushes validated [`GuardConfig`] snapshots
//! over a channel; the state layer swaps them in atomically. A snapshot
//! that fails to load or validate is dropped and the running configuration
//! stays in effect. Editors fire bursts of filesystem events per save, so
//! events inside a short window collapse into a single reload.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::GuardConfig;

/// Events closer together than this are treated as the same save.
const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// Records a reload attempt; returns false when the previous one is still
/// inside the debounce window.
fn should_reload(last: &mut Option<Instant>, now: Instant, window: Duration) -> bool {
    match last {
        Some(previous) if now.duration_since(*previous) < window => false,
        _ => {
            *last = Some(now);
            true
        }
    }
}

/// Watches one configuration file and emits reloaded snapshots.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<GuardConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and the receiver its snapshots arrive on.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<GuardConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. The returned handle must stay alive for events to
    /// keep flowing.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let path = self.path.clone();
        let mut last_reload: Option<Instant> = None;

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let event = match res {
                    Ok(event) => event,
                    Err(error) => {
                        tracing::error!(%error, "Config watch error");
                        return;
                    }
                };
                if !(event.kind.is_modify() || event.kind.is_create()) {
                    return;
                }
                if !should_reload(&mut last_reload, Instant::now(), DEBOUNCE_WINDOW) {
                    return;
                }
                match load_config(&path) {
                    Ok(new_config) => {
                        // The thresholds operators tune most often; log them
                        // so a reload is auditable from the output alone.
                        tracing::info!(
                            block_threshold = new_config.reputation.block_threshold,
                            deviation_multiplier = new_config.anomaly.deviation_multiplier,
                            learning_mode = new_config.anomaly.learning_mode,
                            "Configuration reloaded"
                        );
                        let _ = tx.send(new_config);
                    }
                    Err(error) => {
                        tracing::error!(%error, "Config reload failed, keeping the running configuration");
                    }
                }
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}
