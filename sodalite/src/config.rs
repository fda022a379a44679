//! Application configuration.
//!
//! Values come from the environment (after `.env` is loaded by `main`),
//! falling back to defaults for anything unset or unparsable.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::reaper::ReaperConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Where outputs, scratch directories and the stats file live.
    pub download_dir: PathBuf,
    pub log_dir: PathBuf,
    /// Tasks allowed in the download/encode phase at once.
    pub max_concurrent_tasks: usize,
    pub cache_ttl_secs: u64,
    /// Delay before a produced file is deleted.
    pub cleanup_delay_secs: u64,
    pub reaper: ReaperConfig,
    pub stats_broadcast_interval_secs: u64,
    pub ffmpeg_path: String,
    pub ytdlp_path: String,
    pub encode_timeout_secs: u64,
    pub extract_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("downloads"),
            log_dir: PathBuf::from("logs"),
            max_concurrent_tasks: 2,
            cache_ttl_secs: 30,
            cleanup_delay_secs: 5 * 60,
            reaper: ReaperConfig::default(),
            stats_broadcast_interval_secs: 10,
            ffmpeg_path: "ffmpeg".to_string(),
            ytdlp_path: "yt-dlp".to_string(),
            encode_timeout_secs: 300,
            extract_timeout_secs: 60,
            request_timeout_secs: 60,
        }
    }
}

impl AppConfig {
    /// Load from environment variables, falling back to defaults.
    ///
    /// Supported env vars:
    /// - `SODALITE_DOWNLOAD_DIR`, `SODALITE_LOG_DIR`
    /// - `SODALITE_MAX_CONCURRENT`
    /// - `SODALITE_CACHE_TTL_SECS`, `SODALITE_CLEANUP_DELAY_SECS`
    /// - `SODALITE_REAPER_INTERVAL_SECS`, `SODALITE_STUCK_TIMEOUT_SECS`
    /// - `SODALITE_STATS_INTERVAL_SECS`
    /// - `SODALITE_FFMPEG_PATH`, `SODALITE_YTDLP_PATH`
    /// - `SODALITE_ENCODE_TIMEOUT_SECS`, `SODALITE_EXTRACT_TIMEOUT_SECS`,
    ///   `SODALITE_REQUEST_TIMEOUT_SECS`
    pub fn from_env_or_default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let text = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = text("SODALITE_DOWNLOAD_DIR") {
            config.download_dir = PathBuf::from(dir);
        }
        if let Some(dir) = text("SODALITE_LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }
        if let Some(path) = text("SODALITE_FFMPEG_PATH") {
            config.ffmpeg_path = path;
        }
        if let Some(path) = text("SODALITE_YTDLP_PATH") {
            config.ytdlp_path = path;
        }

        parse_into(&text, "SODALITE_MAX_CONCURRENT", &mut config.max_concurrent_tasks);
        parse_into(&text, "SODALITE_CACHE_TTL_SECS", &mut config.cache_ttl_secs);
        parse_into(&text, "SODALITE_CLEANUP_DELAY_SECS", &mut config.cleanup_delay_secs);
        parse_into(
            &text,
            "SODALITE_REAPER_INTERVAL_SECS",
            &mut config.reaper.check_interval_secs,
        );
        parse_into(
            &text,
            "SODALITE_STUCK_TIMEOUT_SECS",
            &mut config.reaper.stuck_timeout_secs,
        );
        parse_into(
            &text,
            "SODALITE_STATS_INTERVAL_SECS",
            &mut config.stats_broadcast_interval_secs,
        );
        parse_into(&text, "SODALITE_ENCODE_TIMEOUT_SECS", &mut config.encode_timeout_secs);
        parse_into(&text, "SODALITE_EXTRACT_TIMEOUT_SECS", &mut config.extract_timeout_secs);
        parse_into(&text, "SODALITE_REQUEST_TIMEOUT_SECS", &mut config.request_timeout_secs);

        config.max_concurrent_tasks = config.max_concurrent_tasks.max(1);
        config
    }

    pub fn stats_file(&self) -> PathBuf {
        self.download_dir.join(crate::stats::STATS_FILE_NAME)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn cleanup_delay(&self) -> Duration {
        Duration::from_secs(self.cleanup_delay_secs)
    }

    pub fn stats_broadcast_interval(&self) -> Duration {
        Duration::from_secs(self.stats_broadcast_interval_secs.max(1))
    }

    pub fn encode_timeout(&self) -> Duration {
        Duration::from_secs(self.encode_timeout_secs)
    }

    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse_into<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *slot = value,
            Err(_) => warn!(key, value = %raw, "Ignoring unparsable config value"),
        }
    }
}
