//! [`Extractor`] backed by the `yt-dlp` command line tool.
//!
//! `yt-dlp --dump-single-json` prints the full format list of a URL without
//! downloading anything. The list is normalized here into the best-first
//! candidate lists of a [`StreamDescription`].

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use process_utils::{RunError, run_captured};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::retry::{RetryConfig, with_retry};
use super::{ExtractionError, Extractor, Service};
use crate::media::{AudioCandidate, StreamDescription, VideoCandidate};

/// Default wall-clock bound for one `yt-dlp` invocation.
pub const DEFAULT_EXTRACT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct YtDlpConfig {
    pub binary_path: String,
    pub timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            binary_path: "yt-dlp".to_string(),
            timeout: DEFAULT_EXTRACT_TIMEOUT,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct YtDlpExtractor {
    config: YtDlpConfig,
}

impl YtDlpExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: YtDlpConfig) -> Self {
        Self { config }
    }

    async fn run_once(&self, url: &str) -> Result<String, ExtractionError> {
        let args = [
            "--dump-single-json",
            "--no-playlist",
            "--no-warnings",
            "--skip-download",
            url,
        ];

        let output = run_captured(&self.config.binary_path, args, self.config.timeout)
            .await
            .map_err(|e| match e {
                RunError::NotFound(program) => ExtractionError::ToolUnavailable(program),
                RunError::TimedOut(timeout) => ExtractionError::Transport(format!(
                    "yt-dlp timed out after {}s",
                    timeout.as_secs()
                )),
                other => ExtractionError::Failed(other.to_string()),
            })?;

        if !output.status.success() {
            let stderr = output.stderr_lossy();
            warn!(code = ?output.status.code(), "yt-dlp exited with failure");
            return Err(classify_stderr(&stderr));
        }

        Ok(output.stdout_lossy())
    }
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    async fn extract(
        &self,
        service: Service,
        url: &str,
    ) -> Result<StreamDescription, ExtractionError> {
        debug!(%service, url, "Extracting stream description");
        let raw = with_retry(&self.config.retry, || self.run_once(url)).await?;
        let description = parse_dump(service, &raw)?;
        info!(
            %service,
            videos = description.videos.len(),
            audios = description.audios.len(),
            "Extracted stream description"
        );
        Ok(description)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DumpedInfo {
    title: Option<String>,
    uploader: Option<String>,
    uploader_id: Option<String>,
    channel: Option<String>,
    creator: Option<String>,
    thumbnail: Option<String>,
    formats: Vec<DumpedFormat>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DumpedFormat {
    format_id: Option<String>,
    url: Option<String>,
    protocol: Option<String>,
    vcodec: Option<String>,
    acodec: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    tbr: Option<f64>,
    abr: Option<f64>,
    http_headers: Option<HashMap<String, String>>,
}

impl DumpedFormat {
    fn is_direct(&self) -> bool {
        self.url.is_some()
            && matches!(self.protocol.as_deref(), None | Some("http") | Some("https"))
    }

    fn has_video(&self) -> bool {
        codec_present(self.vcodec.as_deref())
    }

    fn has_audio(&self) -> bool {
        codec_present(self.acodec.as_deref())
    }
}

fn codec_present(codec: Option<&str>) -> bool {
    matches!(codec, Some(c) if c != "none")
}

/// Normalize a `--dump-single-json` document.
fn parse_dump(service: Service, raw: &str) -> Result<StreamDescription, ExtractionError> {
    let info: DumpedInfo =
        serde_json::from_str(raw).map_err(|e| ExtractionError::Parse(e.to_string()))?;

    let author = match service {
        Service::Youtube => info.channel.or(info.uploader),
        Service::Instagram => info.uploader.or(info.uploader_id),
        Service::Tiktok => info.creator.or(info.uploader),
    }
    .unwrap_or_else(|| "unknown".to_string());

    let mut video_formats: Vec<&DumpedFormat> = info
        .formats
        .iter()
        .filter(|f| f.is_direct() && f.has_video())
        .collect();
    video_formats.sort_by(|a, b| {
        b.height
            .unwrap_or(0)
            .cmp(&a.height.unwrap_or(0))
            .then_with(|| b.tbr.unwrap_or(0.0).total_cmp(&a.tbr.unwrap_or(0.0)))
    });

    let mut audio_formats: Vec<&DumpedFormat> = info
        .formats
        .iter()
        .filter(|f| f.is_direct() && f.has_audio() && !f.has_video())
        .collect();
    audio_formats.sort_by(|a, b| {
        b.abr
            .or(b.tbr)
            .unwrap_or(0.0)
            .total_cmp(&a.abr.or(a.tbr).unwrap_or(0.0))
    });

    let mut seen = HashSet::new();
    let videos: Vec<VideoCandidate> = video_formats
        .into_iter()
        .filter_map(|f| {
            let quality = match f.height {
                Some(h) => format!("{h}p"),
                None => f.format_id.clone().unwrap_or_else(|| "source".to_string()),
            };
            seen.insert(quality.clone()).then(|| VideoCandidate {
                url: f.url.clone().unwrap_or_default(),
                headers: f.http_headers.clone(),
                quality,
                width: f.width,
                height: f.height,
                codec: f.vcodec.clone(),
            })
        })
        .collect();

    seen.clear();
    let audios: Vec<AudioCandidate> = audio_formats
        .into_iter()
        .filter_map(|f| {
            let quality = match f.abr.or(f.tbr) {
                Some(rate) => format!("{}kbps", rate.round() as u64),
                None => f.format_id.clone().unwrap_or_else(|| "source".to_string()),
            };
            seen.insert(quality.clone()).then(|| AudioCandidate {
                url: f.url.clone().unwrap_or_default(),
                headers: f.http_headers.clone(),
                quality,
                codec: f.acodec.clone(),
            })
        })
        .collect();

    if videos.is_empty() && audios.is_empty() {
        return Err(ExtractionError::NoMedia);
    }

    Ok(StreamDescription {
        service: service.id().to_string(),
        title: info.title.unwrap_or_else(|| "untitled".to_string()),
        author,
        thumbnail_url: info.thumbnail,
        videos,
        audios,
    })
}

/// Map a failed run's stderr onto an [`ExtractionError`].
fn classify_stderr(stderr: &str) -> ExtractionError {
    let message = stderr
        .lines()
        .rev()
        .find(|l| l.contains("ERROR"))
        .unwrap_or(stderr.trim())
        .trim()
        .to_string();
    let lower = message.to_ascii_lowercase();

    if lower.contains("429") || lower.contains("too many requests") {
        ExtractionError::RateLimited(message)
    } else if lower.contains("private")
        || lower.contains("sign in")
        || lower.contains("login required")
        || lower.contains("not available in your country")
        || lower.contains("geo restrict")
        || lower.contains("geo-restrict")
    {
        ExtractionError::Unavailable(message)
    } else if lower.contains("unsupported url") || lower.contains("no video formats") {
        ExtractionError::NoMedia
    } else if lower.contains("timed out")
        || lower.contains("connection")
        || lower.contains("temporary failure")
        || lower.contains("network is unreachable")
    {
        ExtractionError::Transport(message)
    } else {
        ExtractionError::Failed(message)
    }
}
