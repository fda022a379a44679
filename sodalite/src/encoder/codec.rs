//! Audio codec policy: copy when the container accepts the source codec,
//! otherwise transcode to the container's default.

use crate::media::OutputFormat;

/// Coarse classification of an extractor-reported codec tag.
///
/// Extractors report tags in many spellings ("mp4a.40.2", "AAC", "opus",
/// "vorbis", "fLaC"), so classification is a case-insensitive substring test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodecFamily {
    Aac,
    Opus,
    Vorbis,
    Flac,
    Mp3,
    Other,
}

impl AudioCodecFamily {
    pub fn classify(codec: &str) -> Self {
        let lower = codec.to_ascii_lowercase();
        if lower.contains("aac") || lower.contains("mp4a") {
            Self::Aac
        } else if lower.contains("opus") {
            Self::Opus
        } else if lower.contains("vorbis") {
            Self::Vorbis
        } else if lower.contains("flac") {
            Self::Flac
        } else if lower.contains("mp3") {
            Self::Mp3
        } else {
            Self::Other
        }
    }
}

/// How the audio track of an encode is produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioPlan {
    Copy,
    Transcode {
        codec: &'static str,
        extra: &'static [&'static str],
    },
}

impl AudioPlan {
    /// Render this plan as ffmpeg output arguments.
    pub fn to_args(&self) -> Vec<String> {
        match self {
            Self::Copy => vec!["-c:a".to_string(), "copy".to_string()],
            Self::Transcode { codec, extra } => {
                let mut args = vec!["-c:a".to_string(), (*codec).to_string()];
                args.extend(extra.iter().map(|s| (*s).to_string()));
                args
            }
        }
    }
}

/// Whether `family` can be stored in `format` without re-encoding.
pub fn is_copy_compatible(format: OutputFormat, family: AudioCodecFamily) -> bool {
    use AudioCodecFamily::*;
    match format {
        OutputFormat::Mp4 | OutputFormat::M4a => family == Aac,
        OutputFormat::Mkv => matches!(family, Aac | Opus | Vorbis | Flac | Mp3),
        OutputFormat::Webm | OutputFormat::Ogg => matches!(family, Opus | Vorbis),
        OutputFormat::Opus => family == Opus,
        OutputFormat::Flac => family == Flac,
        OutputFormat::Mp3 => family == Mp3,
        OutputFormat::Wav => false,
    }
}

/// Codec used when the source audio has to be re-encoded for `format`.
pub fn default_transcode(format: OutputFormat) -> AudioPlan {
    match format {
        OutputFormat::Mp4 | OutputFormat::Mkv | OutputFormat::M4a => AudioPlan::Transcode {
            codec: "aac",
            extra: &["-b:a", "192k"],
        },
        OutputFormat::Webm | OutputFormat::Opus => AudioPlan::Transcode {
            codec: "libopus",
            extra: &[],
        },
        // VBR ~190kbps
        OutputFormat::Mp3 => AudioPlan::Transcode {
            codec: "libmp3lame",
            extra: &["-q:a", "2"],
        },
        OutputFormat::Flac => AudioPlan::Transcode {
            codec: "flac",
            extra: &[],
        },
        OutputFormat::Wav => AudioPlan::Transcode {
            codec: "pcm_s16le",
            extra: &[],
        },
        OutputFormat::Ogg => AudioPlan::Transcode {
            codec: "libvorbis",
            extra: &[],
        },
    }
}

/// Decide the audio plan for a source codec tag and target container.
///
/// An unknown source codec is always transcoded.
pub fn plan_audio(format: OutputFormat, source_codec: Option<&str>) -> AudioPlan {
    match source_codec.map(AudioCodecFamily::classify) {
        Some(family) if is_copy_compatible(format, family) => AudioPlan::Copy,
        _ => default_transcode(format),
    }
}
