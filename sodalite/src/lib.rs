//! sodalite library crate.
//!
//! Media acquisition service: stream extraction, selection, bounded
//! download and encode, task tracking and output reclamation.

pub mod api;
pub mod cache;
pub mod cleanup;
pub mod config;
pub mod downloader;
pub mod encoder;
pub mod error;
pub mod extractor;
pub mod logging;
pub mod media;
pub mod pipeline;
pub mod reaper;
pub mod service;
pub mod stats;
pub mod task;
pub mod utils;

pub use error::{Error, Result};
