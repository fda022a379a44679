//! Normalized stream descriptions produced by extractors.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A downloadable video variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoCandidate {
    pub url: String,
    /// Extra request headers required by the origin (signed cookies, referer, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    /// Free-form quality label, e.g. "1080p".
    pub quality: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub codec: Option<String>,
}

/// A downloadable audio variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioCandidate {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    /// Free-form quality label, e.g. "128kbps".
    pub quality: String,
    #[serde(default)]
    pub codec: Option<String>,
}

/// Borrowed view over either candidate kind, used by the downloader.
#[derive(Debug, Clone, Copy)]
pub enum StreamCandidate<'a> {
    Video(&'a VideoCandidate),
    Audio(&'a AudioCandidate),
}

impl<'a> StreamCandidate<'a> {
    pub fn url(&self) -> &'a str {
        match self {
            Self::Video(v) => &v.url,
            Self::Audio(a) => &a.url,
        }
    }

    pub fn headers(&self) -> Option<&'a HashMap<String, String>> {
        match self {
            Self::Video(v) => v.headers.as_ref(),
            Self::Audio(a) => a.headers.as_ref(),
        }
    }

    pub fn quality(&self) -> &'a str {
        match self {
            Self::Video(v) => &v.quality,
            Self::Audio(a) => &a.quality,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Video(_) => "video",
            Self::Audio(_) => "audio",
        }
    }
}

/// Everything an extractor knows about one source URL.
///
/// Candidate lists are sorted best-first by the extractor; consumers never
/// re-sort them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescription {
    pub service: String,
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub videos: Vec<VideoCandidate>,
    #[serde(default)]
    pub audios: Vec<AudioCandidate>,
}

impl StreamDescription {
    /// Strip stream URLs and headers before handing the description to a client.
    pub fn sanitize(&self) -> SanitizedDescription {
        SanitizedDescription {
            service: self.service.clone(),
            title: self.title.clone(),
            author: self.author.clone(),
            thumbnail_url: self.thumbnail_url.clone(),
            videos: self
                .videos
                .iter()
                .map(|v| SanitizedVideo {
                    quality: v.quality.clone(),
                    width: v.width,
                    height: v.height,
                    codec: v.codec.clone(),
                })
                .collect(),
            audios: self
                .audios
                .iter()
                .map(|a| SanitizedAudio {
                    quality: a.quality.clone(),
                    codec: a.codec.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizedVideo {
    pub quality: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub codec: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizedAudio {
    pub quality: String,
    pub codec: Option<String>,
}

/// Client-facing stream description without URLs or headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizedDescription {
    pub service: String,
    pub title: String,
    pub author: String,
    pub thumbnail_url: Option<String>,
    pub videos: Vec<SanitizedVideo>,
    pub audios: Vec<SanitizedAudio>,
}
