//! Media model shared by every stage of the pipeline.

pub mod format;
pub mod types;

pub use format::{DownloadMode, ImageFormat, OutputFormat};
pub use types::{
    AudioCandidate, SanitizedDescription, StreamCandidate, StreamDescription, VideoCandidate,
};
