//! Stream selector for choosing the video/audio pair of a task.
//!
//! Candidate lists arrive sorted best-first from the extractor, so selection
//! is an exact label match with a head-of-list fallback. Labels are compared
//! case-sensitively: "1080p" does not match "1080P".

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::media::{AudioCandidate, DownloadMode, StreamDescription, VideoCandidate};

/// Quality labels requested by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSelectionConfig {
    pub video_quality: Option<String>,
    pub audio_quality: Option<String>,
    pub mode: DownloadMode,
}

/// Result of a selection. Both sides empty means nothing can be downloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection<'a> {
    pub video: Option<&'a VideoCandidate>,
    pub audio: Option<&'a AudioCandidate>,
}

impl Selection<'_> {
    pub fn is_empty(&self) -> bool {
        self.video.is_none() && self.audio.is_none()
    }
}

/// Stream selector for choosing the best streams.
#[derive(Debug, Clone, Default)]
pub struct StreamSelector {
    config: StreamSelectionConfig,
}

impl StreamSelector {
    /// Create a selector without quality preferences.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: StreamSelectionConfig) -> Self {
        Self { config }
    }

    /// Pick the video and audio candidates for this selector's preferences.
    pub fn select<'a>(&self, description: &'a StreamDescription) -> Selection<'a> {
        let video = match self.config.mode {
            DownloadMode::AudioOnly => None,
            _ => pick(
                &description.videos,
                self.config.video_quality.as_deref(),
                |v| &v.quality,
            ),
        };

        let audio = match self.config.mode {
            DownloadMode::VideoOnly => None,
            _ => pick(
                &description.audios,
                self.config.audio_quality.as_deref(),
                |a| &a.quality,
            ),
        };

        debug!(
            mode = %self.config.mode,
            video = video.map(|v| v.quality.as_str()),
            audio = audio.map(|a| a.quality.as_str()),
            "Selected streams"
        );

        Selection { video, audio }
    }
}

/// Shorthand for a one-off selection.
pub fn select_streams<'a>(
    description: &'a StreamDescription,
    video_quality: Option<&str>,
    audio_quality: Option<&str>,
    mode: DownloadMode,
) -> Selection<'a> {
    StreamSelector::with_config(StreamSelectionConfig {
        video_quality: video_quality.map(str::to_string),
        audio_quality: audio_quality.map(str::to_string),
        mode,
    })
    .select(description)
}

fn pick<'a, T>(
    candidates: &'a [T],
    preferred: Option<&str>,
    label: impl Fn(&T) -> &String,
) -> Option<&'a T> {
    preferred
        .and_then(|wanted| candidates.iter().find(|c| label(c) == wanted))
        .or_else(|| candidates.first())
}
