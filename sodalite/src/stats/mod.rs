//! Lifetime counters and their live push to subscribers.

pub mod accumulator;
pub mod broadcaster;

pub use accumulator::{StatsAccumulator, StatsFile};
pub use broadcaster::{StatsBroadcaster, StatsSnapshot, StatsSubscription};

/// File name of the persisted counters inside the download directory.
pub const STATS_FILE_NAME: &str = "sodalite_stats.json";

/// Bytes to mebibytes, rounded to two decimals.
pub fn bytes_to_mb(bytes: u64) -> f64 {
    let mb = bytes as f64 / (1024.0 * 1024.0);
    (mb * 100.0).round() / 100.0
}
