//! Deferred deletion of produced output files.
//!
//! One worker owns a [`DelayQueue`] of pending deletions; handles talk to it
//! over a channel. Deleting a file that is already gone counts as success.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;
use tokio_util::time::delay_queue::Key;
use tracing::{debug, info, warn};

use crate::utils::fs::remove_file_if_exists;

/// Produced files are kept this long after completion.
pub const DEFAULT_CLEANUP_DELAY: Duration = Duration::from_secs(5 * 60);

#[derive(Debug)]
enum Command {
    Schedule { task_id: String, path: PathBuf },
    Cancel { task_id: String },
}

/// Handle to the cleanup worker.
#[derive(Debug, Clone)]
pub struct CleanupScheduler {
    tx: mpsc::UnboundedSender<Command>,
    delay: Duration,
}

impl CleanupScheduler {
    /// Spawn the worker. It drains nothing on shutdown: pending files stay.
    pub fn start(delay: Duration, cancellation_token: CancellationToken) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_worker(rx, delay, cancellation_token));
        (Self { tx, delay }, handle)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Arm deletion of `path` after the configured delay.
    ///
    /// Scheduling a task again replaces its previous timer.
    pub fn schedule(&self, task_id: impl Into<String>, path: impl Into<PathBuf>) {
        let command = Command::Schedule {
            task_id: task_id.into(),
            path: path.into(),
        };
        if self.tx.send(command).is_err() {
            warn!("Cleanup worker is gone, file will not be reclaimed");
        }
    }

    /// Disarm a pending deletion, if any.
    pub fn cancel(&self, task_id: impl Into<String>) {
        let _ = self.tx.send(Command::Cancel {
            task_id: task_id.into(),
        });
    }

    /// Disarm the timer of `task_id` and delete `path` right away.
    /// Returns whether a file was removed.
    pub async fn delete_now(
        &self,
        task_id: impl Into<String>,
        path: &std::path::Path,
    ) -> crate::Result<bool> {
        self.cancel(task_id);
        remove_file_if_exists(path).await
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<Command>,
    delay: Duration,
    cancellation_token: CancellationToken,
) {
    let mut queue: DelayQueue<String> = DelayQueue::new();
    let mut pending: HashMap<String, (Key, PathBuf)> = HashMap::new();

    debug!(delay_secs = delay.as_secs(), "Cleanup scheduler started");

    loop {
        tokio::select! {
            _ = cancellation_token.cancelled() => {
                debug!(pending = pending.len(), "Cleanup scheduler shutting down");
                break;
            }
            command = rx.recv() => {
                let Some(command) = command else {
                    break;
                };
                match command {
                    Command::Schedule { task_id, path } => {
                        if let Some((key, _)) = pending.remove(&task_id) {
                            queue.remove(&key);
                        }
                        let key = queue.insert(task_id.clone(), delay);
                        debug!(task_id = %task_id, path = %path.display(), "Armed file cleanup");
                        pending.insert(task_id, (key, path));
                    }
                    Command::Cancel { task_id } => {
                        if let Some((key, _)) = pending.remove(&task_id) {
                            queue.remove(&key);
                            debug!(task_id = %task_id, "Disarmed file cleanup");
                        }
                    }
                }
            }
            Some(expired) = queue.next(), if !queue.is_empty() => {
                let task_id = expired.into_inner();
                let Some((_, path)) = pending.remove(&task_id) else {
                    continue;
                };
                match remove_file_if_exists(&path).await {
                    Ok(true) => {
                        info!(task_id = %task_id, path = %path.display(), "Reclaimed output file")
                    }
                    Ok(false) => debug!(task_id = %task_id, "Output file already gone"),
                    Err(e) => {
                        warn!(task_id = %task_id, error = %e, "Failed to reclaim output file")
                    }
                }
            }
        }
    }
}
