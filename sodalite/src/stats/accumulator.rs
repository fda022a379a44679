//! Persisted conversion and bandwidth counters.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::Result;
use crate::utils::fs::{ensure_dir_all, io_error};

/// On-disk layout of the counters file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsFile {
    #[serde(default)]
    pub total_conversions: u64,
    #[serde(default)]
    pub total_bandwidth_bytes: u64,
    pub last_updated: DateTime<Utc>,
}

struct Inner {
    total_conversions: AtomicU64,
    total_bandwidth_bytes: AtomicU64,
    path: PathBuf,
    /// Serializes writers so the temp file is never shared.
    write_lock: Mutex<()>,
}

/// Monotonic counters, written through to a JSON file on every change.
#[derive(Clone)]
pub struct StatsAccumulator {
    inner: Arc<Inner>,
}

impl StatsAccumulator {
    fn with_counts(path: PathBuf, conversions: u64, bandwidth: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                total_conversions: AtomicU64::new(conversions),
                total_bandwidth_bytes: AtomicU64::new(bandwidth),
                path,
                write_lock: Mutex::new(()),
            }),
        }
    }

    /// Load counters from `path`, starting at zero if it is missing or unreadable.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (conversions, bandwidth) = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<StatsFile>(&bytes) {
                Ok(file) => (file.total_conversions, file.total_bandwidth_bytes),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "Corrupt stats file, starting from zero"
                    );
                    (0, 0)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (0, 0),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Unreadable stats file, starting from zero"
                );
                (0, 0)
            }
        };

        debug!(conversions, bandwidth, "Loaded stats counters");
        Self::with_counts(path, conversions, bandwidth)
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn total_conversions(&self) -> u64 {
        self.inner.total_conversions.load(Ordering::Relaxed)
    }

    pub fn total_bandwidth_bytes(&self) -> u64 {
        self.inner.total_bandwidth_bytes.load(Ordering::Relaxed)
    }

    pub async fn increment_conversion(&self) -> Result<u64> {
        let total = self.inner.total_conversions.fetch_add(1, Ordering::Relaxed) + 1;
        self.persist().await?;
        Ok(total)
    }

    pub async fn add_bandwidth(&self, bytes: u64) -> Result<u64> {
        let total = self
            .inner
            .total_bandwidth_bytes
            .fetch_add(bytes, Ordering::Relaxed)
            + bytes;
        self.persist().await?;
        Ok(total)
    }

    /// Write the current counters: temp file in the same directory, then rename.
    pub async fn persist(&self) -> Result<()> {
        let _guard = self.inner.write_lock.lock().await;

        let file = StatsFile {
            total_conversions: self.total_conversions(),
            total_bandwidth_bytes: self.total_bandwidth_bytes(),
            last_updated: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&file)?;

        let path = &self.inner.path;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_dir_all(parent).await?;
        }

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| io_error("writing", &tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| io_error("renaming", &tmp, e))?;
        Ok(())
    }
}
