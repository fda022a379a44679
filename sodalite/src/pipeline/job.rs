//! The background job behind every process request.
//!
//! A job checks the encoder, waits for an admission slot, downloads the
//! selected streams concurrently into a per-task scratch directory, merges
//! them into the download directory and settles the task. Errors never leave
//! the job: they are recorded on the task and logged.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{Instrument, debug, info, info_span, warn};

use crate::cleanup::CleanupScheduler;
use crate::downloader::{ConcurrencyGate, DownloadError, Fetcher, select_streams};
use crate::encoder::{EncodeRequest, Encoder};
use crate::media::{DownloadMode, OutputFormat, StreamCandidate, StreamDescription};
use crate::stats::StatsBroadcaster;
use crate::task::{Task, TaskPhase, TaskRegistry};
use crate::utils::filename::task_file_stem;
use crate::utils::fs::{io_error, remove_file_if_exists};
use crate::{Error, Result};

/// Audio containers cannot carry the video track whatever mode was asked for.
pub fn effective_mode(mode: DownloadMode, format: OutputFormat) -> DownloadMode {
    if format.supports_video() {
        mode
    } else {
        DownloadMode::AudioOnly
    }
}

/// Shared collaborators of every job.
#[derive(Clone)]
pub struct JobRunner {
    registry: TaskRegistry,
    gate: ConcurrencyGate,
    fetcher: Arc<dyn Fetcher>,
    encoder: Arc<dyn Encoder>,
    cleanup: CleanupScheduler,
    stats: StatsBroadcaster,
    download_dir: PathBuf,
}

impl JobRunner {
    pub fn new(
        registry: TaskRegistry,
        gate: ConcurrencyGate,
        fetcher: Arc<dyn Fetcher>,
        encoder: Arc<dyn Encoder>,
        cleanup: CleanupScheduler,
        stats: StatsBroadcaster,
        download_dir: PathBuf,
    ) -> Self {
        Self {
            registry,
            gate,
            fetcher,
            encoder,
            cleanup,
            stats,
            download_dir,
        }
    }

    /// Run the job for `task_id` on the runtime, detached.
    pub fn spawn(&self, task_id: String, description: Arc<StreamDescription>) {
        let runner = self.clone();
        let span = info_span!("task", task_id = %task_id);
        tokio::spawn(async move { runner.run(&task_id, description).await }.instrument(span));
    }

    /// Drive one task to a terminal status.
    pub async fn run(&self, task_id: &str, description: Arc<StreamDescription>) {
        if let Err(e) = self.encoder.ensure_available().await {
            self.settle_failure(task_id, &Error::from(e));
            return;
        }

        let _permit = match self.gate.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                self.settle_failure(task_id, &e);
                return;
            }
        };

        let task = match self.registry.start(task_id) {
            Ok(task) => task,
            Err(e) => {
                // Deleted or reaped while waiting for a slot.
                debug!(error = %e, "Task no longer startable");
                return;
            }
        };

        match self.execute(&task, &description).await {
            Ok((output_path, file_size)) => {
                self.settle_success(task_id, output_path, file_size).await
            }
            Err(e) => self.settle_failure(task_id, &e),
        }
    }

    async fn execute(
        &self,
        task: &Task,
        description: &StreamDescription,
    ) -> Result<(PathBuf, u64)> {
        let request = &task.request;
        self.registry.set_phase(&task.id, TaskPhase::Downloading)?;

        let mode = effective_mode(request.mode, request.format);
        let selection = select_streams(
            description,
            request.video_quality.as_deref(),
            request.audio_quality.as_deref(),
            mode,
        );
        if selection.is_empty() {
            return Err(Error::NoStreamAvailable);
        }

        let scratch = tempfile::Builder::new()
            .prefix(".sodalite-")
            .tempdir_in(&self.download_dir)
            .map_err(|e| io_error("creating scratch dir in", &self.download_dir, e))?;

        let stem = task_file_stem(
            &description.service,
            &description.title,
            &description.author,
            &task.id,
        );
        let video_path = scratch.path().join(format!("{stem}.video"));
        let audio_path = scratch.path().join(format!("{stem}.audio"));

        // Bytes of every stream that finished, even if its sibling failed.
        let fetched = AtomicU64::new(0);
        let video_download = async {
            match selection.video {
                Some(video) => self
                    .fetch_stream(StreamCandidate::Video(video), &video_path, &fetched)
                    .await
                    .map(Some),
                None => Ok(None),
            }
        };
        let audio_download = async {
            match selection.audio {
                Some(audio) => self
                    .fetch_stream(StreamCandidate::Audio(audio), &audio_path, &fetched)
                    .await
                    .map(Some),
                None => Ok(None),
            }
        };
        let downloads = tokio::try_join!(video_download, audio_download);
        self.record_bandwidth(fetched.load(Ordering::Relaxed)).await;
        let (video_bytes, audio_bytes) = downloads?;

        self.registry.set_phase(&task.id, TaskPhase::Processing)?;

        let output_path = self
            .download_dir
            .join(format!("{stem}.{}", request.format.extension()));
        let encode = EncodeRequest {
            video_path: video_bytes.map(|_| video_path.clone()),
            audio_path: audio_bytes.map(|_| audio_path.clone()),
            audio_codec: selection.audio.and_then(|a| a.codec.clone()),
            output_path: output_path.clone(),
            format: request.format,
            title: Some(description.title.clone()),
            author: Some(description.author.clone()),
            service: description.service.clone(),
        };

        if let Err(e) = self.encoder.merge(&encode).await {
            discard(&output_path).await;
            return Err(e.into());
        }

        let file_size = tokio::fs::metadata(&output_path)
            .await
            .map_err(|e| io_error("reading metadata of", &output_path, e))?
            .len();

        Ok((output_path, file_size))
    }

    /// Fetch one selected stream. An empty stream fails the task whatever the
    /// fetcher reports.
    async fn fetch_stream(
        &self,
        candidate: StreamCandidate<'_>,
        destination: &Path,
        fetched: &AtomicU64,
    ) -> Result<u64> {
        let bytes = self.fetcher.fetch(candidate, destination).await?;
        if bytes == 0 {
            return Err(DownloadError::EmptyBody {
                url: candidate.url().to_string(),
            }
            .into());
        }
        fetched.fetch_add(bytes, Ordering::Relaxed);
        Ok(bytes)
    }

    async fn settle_success(&self, task_id: &str, output_path: PathBuf, file_size: u64) {
        if let Err(e) = self
            .registry
            .complete(task_id, output_path.clone(), file_size)
        {
            // Reaped or deleted while we were working: the file has no owner.
            warn!(error = %e, "Completion rejected, discarding output");
            discard(&output_path).await;
            return;
        }

        self.cleanup.schedule(task_id, output_path);

        if let Err(e) = self.stats.accumulator().increment_conversion().await {
            warn!(error = %e, "Failed to persist conversion count");
        }
        self.stats.notify();
        info!(file_size, "Task finished");
    }

    fn settle_failure(&self, task_id: &str, error: &Error) {
        if let Err(e) = self.registry.fail(task_id, error.to_string()) {
            debug!(error = %e, "Failure not recorded, task already settled");
        }
    }

    async fn record_bandwidth(&self, bytes: u64) {
        if bytes == 0 {
            return;
        }
        if let Err(e) = self.stats.accumulator().add_bandwidth(bytes).await {
            warn!(error = %e, "Failed to persist bandwidth");
        }
        self.stats.notify();
    }
}

async fn discard(path: &Path) {
    if let Err(e) = remove_file_if_exists(path).await {
        warn!(path = %path.display(), error = %e, "Failed to remove output file");
    }
}
