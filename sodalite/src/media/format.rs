//! Output containers and download modes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Container requested for a processed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Mp4,
    Webm,
    Mkv,
    Mp3,
    M4a,
    Opus,
    Flac,
    Ogg,
    Wav,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 9] = [
        Self::Mp4,
        Self::Webm,
        Self::Mkv,
        Self::Mp3,
        Self::M4a,
        Self::Opus,
        Self::Flac,
        Self::Ogg,
        Self::Wav,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Webm => "webm",
            Self::Mkv => "mkv",
            Self::Mp3 => "mp3",
            Self::M4a => "m4a",
            Self::Opus => "opus",
            Self::Flac => "flac",
            Self::Ogg => "ogg",
            Self::Wav => "wav",
        }
    }

    /// File extension of the produced file (without the dot).
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Mp4 => "video/mp4",
            Self::Webm => "video/webm",
            Self::Mkv => "video/x-matroska",
            Self::Mp3 => "audio/mpeg",
            Self::M4a => "audio/mp4",
            Self::Opus => "audio/opus",
            Self::Flac => "audio/flac",
            Self::Ogg => "audio/ogg",
            Self::Wav => "audio/wav",
        }
    }

    /// Whether the container can hold a video track.
    pub fn supports_video(&self) -> bool {
        matches!(self, Self::Mp4 | Self::Webm | Self::Mkv)
    }

    /// Resolve a MIME type from a file extension, for serving arbitrary outputs.
    pub fn mime_for_extension(ext: &str) -> &'static str {
        ext.parse::<OutputFormat>()
            .map(|f| f.mime_type())
            .unwrap_or("application/octet-stream")
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == lower)
            .ok_or_else(|| format!("unsupported output format: {s}"))
    }
}

/// Which tracks the client wants in the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DownloadMode {
    #[default]
    Default,
    VideoOnly,
    AudioOnly,
}

impl DownloadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::VideoOnly => "video_only",
            Self::AudioOnly => "audio_only",
        }
    }
}

impl fmt::Display for DownloadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Formats accepted by the single-photo pass-through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Jpeg,
    Png,
}

impl ImageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_output_format() {
        assert_eq!("MP4".parse::<OutputFormat>().unwrap(), OutputFormat::Mp4);
        assert_eq!("flac".parse::<OutputFormat>().unwrap(), OutputFormat::Flac);
        assert!("avi".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_mime_for_extension() {
        assert_eq!(OutputFormat::mime_for_extension("mkv"), "video/x-matroska");
        assert_eq!(
            OutputFormat::mime_for_extension("bin"),
            "application/octet-stream"
        );
    }

    #[test]
    fn test_download_mode_serde() {
        let mode: DownloadMode = serde_json::from_str("\"audio_only\"").unwrap();
        assert_eq!(mode, DownloadMode::AudioOnly);
        assert_eq!(
            serde_json::to_string(&DownloadMode::VideoOnly).unwrap(),
            "\"video_only\""
        );
    }
}
