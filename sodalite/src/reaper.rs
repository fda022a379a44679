//! Background sweep failing tasks stuck in processing.
//!
//! The reaper only rewrites the record. A job still running when its task is
//! reaped finds out when its own completion is rejected by the registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Error;
use crate::cache::MetadataCache;
use crate::task::TaskRegistry;

/// Configuration for the stuck-task reaper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    /// Interval between sweeps in seconds.
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    /// Age after which a processing task is considered stuck.
    #[serde(default = "default_stuck_timeout_secs")]
    pub stuck_timeout_secs: u64,
}

fn default_check_interval_secs() -> u64 {
    60
}

fn default_stuck_timeout_secs() -> u64 {
    600
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
            stuck_timeout_secs: default_stuck_timeout_secs(),
        }
    }
}

impl ReaperConfig {
    pub fn with_check_interval_secs(mut self, secs: u64) -> Self {
        self.check_interval_secs = secs;
        self
    }

    pub fn with_stuck_timeout_secs(mut self, secs: u64) -> Self {
        self.stuck_timeout_secs = secs;
        self
    }
}

#[derive(Clone)]
pub struct StuckTaskReaper {
    config: ReaperConfig,
    registry: TaskRegistry,
    cache: Option<MetadataCache>,
}

impl StuckTaskReaper {
    pub fn new(config: ReaperConfig, registry: TaskRegistry) -> Self {
        Self {
            config,
            registry,
            cache: None,
        }
    }

    /// Also drop expired metadata entries on every sweep.
    pub fn with_cache(mut self, cache: MetadataCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Fail every task processing since before `now - stuck_timeout`.
    ///
    /// Returns the ids that were failed by this sweep.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<String> {
        let timeout = chrono::Duration::seconds(self.config.stuck_timeout_secs as i64);
        let cutoff = now - timeout;
        let message = Error::TaskTimeout.to_string();

        let mut reaped = Vec::new();
        for id in self.registry.stuck_since(cutoff) {
            // The task may have finished between the scan and this call.
            match self.registry.fail(&id, message.clone()) {
                Ok(_) => {
                    warn!(task_id = %id, "Reaped stuck task");
                    reaped.push(id);
                }
                Err(e) => debug!(task_id = %id, error = %e, "Stuck task already settled"),
            }
        }

        if let Some(cache) = &self.cache {
            let evicted = cache.cleanup_expired();
            if evicted > 0 {
                debug!(evicted, "Dropped expired metadata entries");
            }
        }

        reaped
    }

    pub fn start_background_task(&self, cancellation_token: CancellationToken) -> JoinHandle<()> {
        let reaper = self.clone();

        tokio::spawn(async move {
            let mut check_interval =
                interval(Duration::from_secs(reaper.config.check_interval_secs.max(1)));
            check_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                interval_secs = reaper.config.check_interval_secs,
                timeout_secs = reaper.config.stuck_timeout_secs,
                "Stuck task reaper started"
            );

            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        info!("Stuck task reaper shutting down");
                        break;
                    }
                    _ = check_interval.tick() => {
                        let reaped = reaper.sweep(Utc::now());
                        if !reaped.is_empty() {
                            info!(count = reaped.len(), "Reaper cycle failed stuck tasks");
                        }
                    }
                }
            }
        })
    }
}
