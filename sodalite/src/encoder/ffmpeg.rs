//! ffmpeg-backed encoder.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use process_utils::{RunError, run_captured};
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

use super::codec::plan_audio;
use super::{EncodeError, EncodeRequest, Encoder};
use crate::media::OutputFormat;

/// Default hard wall-clock bound for one ffmpeg run.
pub const DEFAULT_ENCODE_TIMEOUT: Duration = Duration::from_secs(300);

/// Bound for the `-version` availability probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Tag written into the `encoder` metadata field of every output.
const ENCODER_TAG: &str = "sodalite";

/// Longest stderr tail kept in an [`EncodeError`].
const MAX_STDERR_CHARS: usize = 4000;

/// Configuration for [`FfmpegEncoder`].
#[derive(Debug, Clone)]
pub struct FfmpegConfig {
    /// Binary name or path.
    pub binary_path: String,
    pub timeout: Duration,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            binary_path: "ffmpeg".to_string(),
            timeout: DEFAULT_ENCODE_TIMEOUT,
        }
    }
}

/// Encoder that shells out to ffmpeg.
pub struct FfmpegEncoder {
    config: FfmpegConfig,
    /// First line of `ffmpeg -version`, cached after a successful probe.
    version: OnceCell<String>,
}

impl FfmpegEncoder {
    pub fn new() -> Self {
        Self::with_config(FfmpegConfig::default())
    }

    pub fn with_config(config: FfmpegConfig) -> Self {
        Self {
            config,
            version: OnceCell::new(),
        }
    }

    /// Cached version string, if the binary has been probed successfully.
    pub fn version(&self) -> Option<&str> {
        self.version.get().map(String::as_str)
    }

    /// Build ffmpeg command arguments for a merge/transcode.
    pub fn build_args(request: &EncodeRequest) -> Result<Vec<String>, EncodeError> {
        let mut args: Vec<String> = vec!["-y".into(), "-hide_banner".into()];

        let inputs: Vec<&PathBuf> = [request.video_path.as_ref(), request.audio_path.as_ref()]
            .into_iter()
            .flatten()
            .collect();
        if inputs.is_empty() {
            return Err(EncodeError::NoInputs);
        }
        for input in &inputs {
            args.push("-i".into());
            args.push(input.to_string_lossy().into_owned());
        }

        let audio_plan = plan_audio(request.format, request.audio_codec.as_deref());

        match (&request.video_path, &request.audio_path) {
            (Some(_), Some(_)) => {
                args.extend(["-map", "0:v:0", "-map", "1:a:0", "-c:v", "copy"].map(String::from));
                args.extend(audio_plan.to_args());
            }
            (Some(_), None) => {
                args.extend(["-c:v", "copy"].map(String::from));
            }
            (None, Some(_)) => {
                args.push("-vn".into());
                args.extend(audio_plan.to_args());
            }
            (None, None) => return Err(EncodeError::NoInputs),
        }

        if let Some(title) = request.title.as_deref().filter(|t| !t.is_empty()) {
            args.extend(["-metadata".to_string(), format!("title={title}")]);
        }
        if let Some(author) = request.author.as_deref().filter(|a| !a.is_empty()) {
            args.extend(["-metadata".to_string(), format!("artist={author}")]);
        }
        args.extend([
            "-metadata".to_string(),
            format!("comment=Downloaded with sodalite from {}", request.service),
            "-metadata".to_string(),
            format!("encoder={ENCODER_TAG}"),
        ]);

        if request.format == OutputFormat::Mp4 {
            // Front-load the moov atom for progressive playback.
            args.extend(["-movflags", "+faststart"].map(String::from));
        }

        args.push(request.output_path.to_string_lossy().into_owned());
        Ok(args)
    }
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn stderr_tail(stderr: &str) -> String {
    let trimmed = stderr.trim();
    let count = trimmed.chars().count();
    if count <= MAX_STDERR_CHARS {
        return trimmed.to_string();
    }
    trimmed.chars().skip(count - MAX_STDERR_CHARS).collect()
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn ensure_available(&self) -> Result<(), EncodeError> {
        let binary = &self.config.binary_path;
        self.version
            .get_or_try_init(|| async {
                let output = run_captured(binary, ["-version"], PROBE_TIMEOUT)
                    .await
                    .map_err(|e| EncodeError::Unavailable {
                        binary: binary.clone(),
                        reason: e.to_string(),
                    })?;
                if !output.status.success() {
                    return Err(EncodeError::Unavailable {
                        binary: binary.clone(),
                        reason: format!("version probe exited with {}", output.status),
                    });
                }
                let version = output
                    .stdout_lossy()
                    .lines()
                    .next()
                    .unwrap_or_default()
                    .to_string();
                debug!(version = %version, "ffmpeg available");
                Ok(version)
            })
            .await
            .map(|_| ())
    }

    async fn merge(&self, request: &EncodeRequest) -> Result<(), EncodeError> {
        let args = Self::build_args(request)?;
        info!(
            format = %request.format,
            output = %request.output_path.display(),
            "Starting ffmpeg"
        );
        debug!(?args, "ffmpeg arguments");

        let output = run_captured(&self.config.binary_path, &args, self.config.timeout)
            .await
            .map_err(|e| match e {
                RunError::NotFound(binary) => EncodeError::Unavailable {
                    binary,
                    reason: "not found".to_string(),
                },
                RunError::TimedOut(timeout) => EncodeError::TimedOut { timeout },
                other => EncodeError::Spawn(other.to_string()),
            })?;

        if !output.status.success() {
            let stderr = stderr_tail(&output.stderr_lossy());
            error!(status = %output.status, stderr = %stderr, "ffmpeg failed");
            return Err(EncodeError::Failed {
                code: output.status.code(),
                stderr,
            });
        }

        info!(output = %request.output_path.display(), "ffmpeg finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(
        video: bool,
        audio: bool,
        format: OutputFormat,
        codec: Option<&str>,
    ) -> EncodeRequest {
        EncodeRequest {
            video_path: video.then(|| PathBuf::from("/tmp/v.tmp")),
            audio_path: audio.then(|| PathBuf::from("/tmp/a.tmp")),
            audio_codec: codec.map(str::to_string),
            output_path: PathBuf::from(format!("/out/final.{}", format.extension())),
            format,
            title: Some("Song".to_string()),
            author: Some("Band".to_string()),
            service: "youtube".to_string(),
        }
    }

    fn contains_pair(args: &[String], a: &str, b: &str) -> bool {
        args.windows(2).any(|w| w[0] == a && w[1] == b)
    }

    #[test]
    fn test_both_streams_copy_video_and_compatible_audio() {
        let args =
            FfmpegEncoder::build_args(&request(true, true, OutputFormat::Webm, Some("opus")))
                .unwrap();
        assert!(contains_pair(&args, "-c:v", "copy"));
        assert!(contains_pair(&args, "-c:a", "copy"));
        assert!(contains_pair(&args, "-map", "1:a:0"));
        assert!(!args.contains(&"-movflags".to_string()));
    }

    #[test]
    fn test_mp4_gets_faststart_and_aac() {
        let args =
            FfmpegEncoder::build_args(&request(true, true, OutputFormat::Mp4, Some("opus")))
                .unwrap();
        assert!(contains_pair(&args, "-c:a", "aac"));
        assert!(contains_pair(&args, "-b:a", "192k"));
        assert!(contains_pair(&args, "-movflags", "+faststart"));
        assert_eq!(args.last().unwrap(), "/out/final.mp4");
    }

    #[test]
    fn test_video_only_copies() {
        let args =
            FfmpegEncoder::build_args(&request(true, false, OutputFormat::Mkv, None)).unwrap();
        assert!(contains_pair(&args, "-c:v", "copy"));
        assert!(!args.iter().any(|a| a == "-c:a"));
    }

    #[test]
    fn test_audio_only_mp3_transcodes() {
        let args =
            FfmpegEncoder::build_args(&request(false, true, OutputFormat::Mp3, Some("opus")))
                .unwrap();
        assert!(args.contains(&"-vn".to_string()));
        assert!(contains_pair(&args, "-c:a", "libmp3lame"));
    }

    #[test]
    fn test_tags_are_injected() {
        let args =
            FfmpegEncoder::build_args(&request(false, true, OutputFormat::Flac, Some("flac")))
                .unwrap();
        assert!(contains_pair(&args, "-metadata", "title=Song"));
        assert!(contains_pair(&args, "-metadata", "artist=Band"));
        assert!(contains_pair(
            &args,
            "-metadata",
            "comment=Downloaded with sodalite from youtube"
        ));
        assert!(contains_pair(&args, "-metadata", "encoder=sodalite"));
    }

    #[test]
    fn test_no_inputs_is_rejected() {
        let result = FfmpegEncoder::build_args(&request(false, false, OutputFormat::Mp4, None));
        assert!(matches!(result, Err(EncodeError::NoInputs)));
    }

    #[test]
    fn test_stderr_tail_truncates_from_front() {
        let long = "x".repeat(MAX_STDERR_CHARS) + "END";
        let tail = stderr_tail(&long);
        assert_eq!(tail.chars().count(), MAX_STDERR_CHARS);
        assert!(tail.ends_with("END"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let encoder = FfmpegEncoder::with_config(FfmpegConfig {
            binary_path: "ffmpeg-does-not-exist-4711".to_string(),
            timeout: Duration::from_secs(5),
        });
        let result = encoder.ensure_available().await;
        assert!(matches!(result, Err(EncodeError::Unavailable { .. })));
        assert!(encoder.version().is_none());
    }
}
