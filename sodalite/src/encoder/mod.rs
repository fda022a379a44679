//! Muxing and transcoding of downloaded streams.

pub mod codec;
pub mod ffmpeg;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::media::OutputFormat;

pub use codec::{AudioCodecFamily, AudioPlan, plan_audio};
pub use ffmpeg::{DEFAULT_ENCODE_TIMEOUT, FfmpegConfig, FfmpegEncoder};

/// Errors raised by an [`Encoder`].
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The external tool is missing or not runnable.
    #[error("encoder {binary} is not available: {reason}")]
    Unavailable { binary: String, reason: String },

    #[error("encoder exited with code {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("encoder timed out after {}s", .timeout.as_secs())]
    TimedOut { timeout: Duration },

    #[error("encoder could not be started: {0}")]
    Spawn(String),

    #[error("at least one input file is required")]
    NoInputs,
}

/// Inputs and tags for one merge/transcode.
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    pub video_path: Option<PathBuf>,
    pub audio_path: Option<PathBuf>,
    /// Codec tag of the audio source, used for the copy-or-transcode decision.
    pub audio_codec: Option<String>,
    pub output_path: PathBuf,
    pub format: OutputFormat,
    pub title: Option<String>,
    pub author: Option<String>,
    pub service: String,
}

/// Produces the final output file from downloaded streams.
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Fail fast if the external tool cannot run.
    async fn ensure_available(&self) -> Result<(), EncodeError>;

    async fn merge(&self, request: &EncodeRequest) -> Result<(), EncodeError>;
}
