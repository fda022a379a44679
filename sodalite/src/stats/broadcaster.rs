//! Live stats push.
//!
//! Snapshots go out on a broadcast channel: immediately when a counter
//! changes, a heartbeat arrives or a subscriber joins, and periodically while
//! anyone is listening.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::accumulator::StatsAccumulator;
use super::bytes_to_mb;

pub const DEFAULT_BROADCAST_INTERVAL: Duration = Duration::from_secs(10);

const CHANNEL_CAPACITY: usize = 16;

/// What subscribers and the health endpoint see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub heartbeats: u64,
    pub connected_clients: usize,
    pub total_conversions: u64,
    pub total_bandwidth_mb: f64,
}

#[derive(Clone)]
pub struct StatsBroadcaster {
    accumulator: StatsAccumulator,
    tx: broadcast::Sender<StatsSnapshot>,
    heartbeats: Arc<AtomicU64>,
    clients: Arc<AtomicUsize>,
}

/// A live subscription. Dropping it decrements the client count.
pub struct StatsSubscription {
    pub receiver: broadcast::Receiver<StatsSnapshot>,
    clients: Arc<AtomicUsize>,
}

impl Drop for StatsSubscription {
    fn drop(&mut self) {
        let remaining = self.clients.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        debug!(remaining, "Stats subscriber left");
    }
}

impl StatsBroadcaster {
    pub fn new(accumulator: StatsAccumulator) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            accumulator,
            tx,
            heartbeats: Arc::new(AtomicU64::new(0)),
            clients: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn accumulator(&self) -> &StatsAccumulator {
        &self.accumulator
    }

    pub fn connected_clients(&self) -> usize {
        self.clients.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            heartbeats: self.heartbeats.load(Ordering::SeqCst),
            connected_clients: self.connected_clients(),
            total_conversions: self.accumulator.total_conversions(),
            total_bandwidth_mb: bytes_to_mb(self.accumulator.total_bandwidth_bytes()),
        }
    }

    /// Join the stream. Everyone, including the new subscriber, gets a fresh
    /// snapshot right away.
    pub fn subscribe(&self) -> StatsSubscription {
        let receiver = self.tx.subscribe();
        let count = self.clients.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(count, "Stats subscriber joined");
        let subscription = StatsSubscription {
            receiver,
            clients: self.clients.clone(),
        };
        self.notify();
        subscription
    }

    /// Count a health probe and push the result.
    pub fn heartbeat(&self) -> StatsSnapshot {
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        self.notify()
    }

    /// Push the current snapshot to every subscriber, if any.
    pub fn notify(&self) -> StatsSnapshot {
        let snapshot = self.snapshot();
        if self.tx.receiver_count() > 0 {
            let _ = self.tx.send(snapshot.clone());
            trace!(?snapshot, "Broadcast stats");
        }
        snapshot
    }

    pub fn start_periodic(
        &self,
        period: Duration,
        cancellation_token: CancellationToken,
    ) -> JoinHandle<()> {
        let broadcaster = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(period_secs = period.as_secs(), "Stats broadcaster started");

            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        info!("Stats broadcaster shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        if broadcaster.connected_clients() > 0 {
                            broadcaster.notify();
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn broadcaster() -> (tempfile::TempDir, StatsBroadcaster) {
        let dir = tempfile::tempdir().unwrap();
        let accumulator = StatsAccumulator::load(dir.path().join("stats.json")).await;
        (dir, StatsBroadcaster::new(accumulator))
    }

    #[tokio::test]
    async fn test_subscriber_count_follows_guards() {
        let (_dir, stats) = broadcaster().await;
        let first = stats.subscribe();
        let second = stats.subscribe();
        assert_eq!(stats.connected_clients(), 2);

        drop(first);
        assert_eq!(stats.connected_clients(), 1);
        drop(second);
        assert_eq!(stats.connected_clients(), 0);
    }

    #[tokio::test]
    async fn test_join_pushes_snapshot() {
        let (_dir, stats) = broadcaster().await;
        let mut sub = stats.subscribe();
        let snapshot = sub.receiver.recv().await.unwrap();
        assert_eq!(snapshot.connected_clients, 1);
    }

    #[tokio::test]
    async fn test_heartbeat_is_counted_and_pushed() {
        let (_dir, stats) = broadcaster().await;
        let mut sub = stats.subscribe();
        let _ = sub.receiver.recv().await.unwrap();

        let returned = stats.heartbeat();
        assert_eq!(returned.heartbeats, 1);
        let pushed = sub.receiver.recv().await.unwrap();
        assert_eq!(pushed.heartbeats, 1);
    }

    #[tokio::test]
    async fn test_counter_changes_show_up_in_snapshot() {
        let (_dir, stats) = broadcaster().await;
        stats
            .accumulator()
            .add_bandwidth(20 * 1024 * 1024)
            .await
            .unwrap();
        stats.accumulator().increment_conversion().await.unwrap();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_bandwidth_mb, 20.0);
        assert_eq!(snapshot.total_conversions, 1);
    }

    #[tokio::test]
    async fn test_periodic_push_while_subscribed() {
        let (_dir, stats) = broadcaster().await;
        let token = CancellationToken::new();
        let mut sub = stats.subscribe();
        let _ = sub.receiver.recv().await.unwrap();

        let handle = stats.start_periodic(Duration::from_millis(20), token.clone());
        let pushed = tokio::time::timeout(Duration::from_secs(1), sub.receiver.recv())
            .await
            .expect("periodic push")
            .unwrap();
        assert_eq!(pushed.connected_clients, 1);

        token.cancel();
        handle.await.unwrap();
    }
}
