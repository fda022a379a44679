//! Boundary to the per-service metadata extractors.
//!
//! Services form a closed set: adding one is a compile-time change to
//! [`Service`], and every `match` over it has to be updated.

pub mod retry;
pub mod ytdlp;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::media::StreamDescription;

pub use retry::{RetryConfig, with_retry};
pub use ytdlp::{YtDlpConfig, YtDlpExtractor};

/// Errors reported by an [`Extractor`].
#[derive(Debug, Clone, Error)]
pub enum ExtractionError {
    #[error("rate limited by upstream: {0}")]
    RateLimited(String),

    /// Private, login-gated or region-blocked media.
    #[error("media is not accessible: {0}")]
    Unavailable(String),

    #[error("no downloadable media found")]
    NoMedia,

    /// Network-level failure talking to the upstream service.
    #[error("transport error: {0}")]
    Transport(String),

    /// The upstream response did not have the expected shape.
    #[error("failed to parse upstream response: {0}")]
    Parse(String),

    #[error("extractor tool is not available: {0}")]
    ToolUnavailable(String),

    #[error("extraction failed: {0}")]
    Failed(String),
}

impl ExtractionError {
    /// Whether a retry might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Known services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Youtube,
    Instagram,
    Tiktok,
}

impl Service {
    pub const ALL: [Service; 3] = [Self::Youtube, Self::Instagram, Self::Tiktok];

    /// Detect the service a URL belongs to.
    pub fn detect(raw_url: &str) -> Option<Self> {
        let url = Url::parse(raw_url.trim()).ok()?;
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }
        let host = url.host_str()?.to_ascii_lowercase();
        let host = host.strip_prefix("www.").unwrap_or(&host);
        let path = url.path();

        match host {
            "youtu.be" => Some(Self::Youtube),
            "music.youtube.com" => Some(Self::Youtube),
            "youtube.com" | "m.youtube.com"
                if path.starts_with("/watch") || path.starts_with("/shorts") =>
            {
                Some(Self::Youtube)
            }
            "instagram.com" if path.starts_with("/reel") || path.starts_with("/p/") => {
                Some(Self::Instagram)
            }
            h if h == "tiktok.com" || h.ends_with(".tiktok.com") => Some(Self::Tiktok),
            _ => None,
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            Self::Youtube => "youtube",
            Self::Instagram => "instagram",
            Self::Tiktok => "tiktok",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Youtube => "YouTube",
            Self::Instagram => "Instagram",
            Self::Tiktok => "TikTok",
        }
    }

    pub fn example_urls(&self) -> &'static [&'static str] {
        match self {
            Self::Youtube => &[
                "https://youtube.com/watch?v=dQw4w9WgXcQ",
                "https://youtu.be/dQw4w9WgXcQ",
                "https://youtube.com/shorts/abc123",
            ],
            Self::Instagram => &[
                "https://www.instagram.com/p/C123456789/",
                "https://www.instagram.com/reel/ABC123",
            ],
            Self::Tiktok => &["https://www.tiktok.com/@user/video/1234567890"],
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Produces a normalized [`StreamDescription`] for a URL of a known service.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(
        &self,
        service: Service,
        url: &str,
    ) -> Result<StreamDescription, ExtractionError>;
}
