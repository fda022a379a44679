//! The media service: every client-facing operation, and the owner of the
//! cache, registry, gate and background workers behind them.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::MetadataCache;
use crate::cleanup::CleanupScheduler;
use crate::config::AppConfig;
use crate::downloader::{ConcurrencyGate, DownloadError, Fetcher};
use crate::encoder::Encoder;
use crate::extractor::{Extractor, Service};
use crate::media::{DownloadMode, ImageFormat, OutputFormat, SanitizedDescription};
use crate::pipeline::JobRunner;
use crate::reaper::StuckTaskReaper;
use crate::stats::{StatsAccumulator, StatsBroadcaster, StatsSnapshot, bytes_to_mb};
use crate::task::{TaskCounts, TaskPhase, TaskRegistry, TaskRequest, TaskStatus};
use crate::utils::fs::ensure_dir_all;
use crate::{Error, Result};

/// Parameters of a process submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRequest {
    pub url: String,
    #[serde(default)]
    pub video_quality: Option<String>,
    #[serde(default)]
    pub audio_quality: Option<String>,
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default)]
    pub mode: DownloadMode,
}

/// Client view of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusView {
    pub task_id: String,
    pub status: TaskStatus,
    pub phase: TaskPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size_mb: Option<f64>,
    pub video_quality: Option<String>,
    pub audio_quality: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPhaseView {
    pub task_id: String,
    pub phase: TaskPhase,
    pub status: TaskStatus,
}

/// A produced file ready to be streamed to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServedFile {
    pub path: PathBuf,
    pub file_name: String,
    pub mime_type: &'static str,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub example_urls: &'static [&'static str],
}

/// External collaborators of a [`MediaService`].
pub struct MediaServiceParts {
    pub config: AppConfig,
    pub extractor: Arc<dyn Extractor>,
    pub fetcher: Arc<dyn Fetcher>,
    pub encoder: Arc<dyn Encoder>,
    /// Used for the photo pass-through.
    pub http_client: reqwest::Client,
}

pub struct MediaService {
    cache: MetadataCache,
    extractor: Arc<dyn Extractor>,
    registry: TaskRegistry,
    gate: ConcurrencyGate,
    runner: JobRunner,
    cleanup: CleanupScheduler,
    stats: StatsBroadcaster,
    http_client: reqwest::Client,
    cancellation_token: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl MediaService {
    /// Build the service and start its background workers.
    pub async fn start(
        parts: MediaServiceParts,
        cancellation_token: CancellationToken,
    ) -> Result<Self> {
        let MediaServiceParts {
            config,
            extractor,
            fetcher,
            encoder,
            http_client,
        } = parts;

        ensure_dir_all(&config.download_dir).await?;

        let accumulator = StatsAccumulator::load(config.stats_file()).await;
        let stats = StatsBroadcaster::new(accumulator);
        let cache = MetadataCache::with_ttl(config.cache_ttl());
        let registry = TaskRegistry::new();
        let gate = ConcurrencyGate::new(config.max_concurrent_tasks);

        let (cleanup, cleanup_worker) =
            CleanupScheduler::start(config.cleanup_delay(), cancellation_token.child_token());
        let broadcaster_worker = stats.start_periodic(
            config.stats_broadcast_interval(),
            cancellation_token.child_token(),
        );
        let reaper_worker = StuckTaskReaper::new(config.reaper.clone(), registry.clone())
            .with_cache(cache.clone())
            .start_background_task(cancellation_token.child_token());

        let runner = JobRunner::new(
            registry.clone(),
            gate.clone(),
            fetcher,
            encoder,
            cleanup.clone(),
            stats.clone(),
            config.download_dir.clone(),
        );

        info!(
            download_dir = %config.download_dir.display(),
            max_concurrent = config.max_concurrent_tasks,
            "Media service started"
        );

        Ok(Self {
            cache,
            extractor,
            registry,
            gate,
            runner,
            cleanup,
            stats,
            http_client,
            cancellation_token,
            workers: Mutex::new(vec![cleanup_worker, broadcaster_worker, reaper_worker]),
        })
    }

    /// Stop background workers and wait for them.
    pub async fn shutdown(&self) {
        self.cancellation_token.cancel();
        let workers: Vec<_> = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let _ = worker.await;
        }
        debug!("Media service workers stopped");
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn stats(&self) -> &StatsBroadcaster {
        &self.stats
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    pub fn task_counts(&self) -> TaskCounts {
        self.registry.counts()
    }

    fn detect(url: &str) -> Result<Service> {
        Service::detect(url).ok_or_else(|| Error::ServiceDetection(url.to_string()))
    }

    /// Describe the streams behind `url`, served from cache while fresh.
    pub async fn submit_metadata(&self, url: &str) -> Result<SanitizedDescription> {
        let service = Self::detect(url)?;
        let description = self
            .cache
            .get_or_extract(url, || self.extractor.extract(service, url))
            .await?;
        Ok(description.sanitize())
    }

    /// Queue a process task and return its id.
    ///
    /// Stream URLs are signed and short-lived, so the description is always
    /// extracted fresh here; the cache is refreshed with the result.
    pub async fn submit_process(&self, request: ProcessRequest) -> Result<String> {
        if request.mode == DownloadMode::VideoOnly && !request.format.supports_video() {
            return Err(Error::validation(format!(
                "format {} cannot hold a video-only download",
                request.format
            )));
        }

        let service = Self::detect(&request.url)?;
        let description = self.extractor.extract(service, &request.url).await?;
        let description = self.cache.put(&request.url, description);

        let task = self.registry.create(TaskRequest {
            url: request.url,
            service,
            video_quality: request.video_quality,
            audio_quality: request.audio_quality,
            format: request.format,
            mode: request.mode,
        });

        info!(
            task_id = %task.id,
            %service,
            format = %task.request.format,
            "Process task submitted"
        );
        self.runner.spawn(task.id.clone(), description);
        Ok(task.id)
    }

    pub fn get_status(&self, task_id: &str) -> Result<TaskStatusView> {
        let task = self
            .registry
            .get(task_id)
            .ok_or_else(|| Error::not_found("task", task_id))?;

        let download_url = (task.status == TaskStatus::Completed)
            .then(|| format!("/sodalite/download/{}/file", task.id));

        Ok(TaskStatusView {
            task_id: task.id,
            status: task.status,
            phase: task.phase,
            error: task.error,
            download_url,
            file_size_mb: task.file_size.map(bytes_to_mb),
            video_quality: task.request.video_quality,
            audio_quality: task.request.audio_quality,
        })
    }

    pub fn get_phase(&self, task_id: &str) -> Result<TaskPhaseView> {
        let task = self
            .registry
            .get(task_id)
            .ok_or_else(|| Error::not_found("task", task_id))?;
        Ok(TaskPhaseView {
            task_id: task.id,
            phase: task.phase,
            status: task.status,
        })
    }

    /// Resolve the produced file of a completed task, counting it as
    /// outbound bandwidth.
    pub async fn open_file(&self, task_id: &str) -> Result<ServedFile> {
        let task = self
            .registry
            .get(task_id)
            .ok_or_else(|| Error::not_found("task", task_id))?;

        if task.status != TaskStatus::Completed {
            return Err(Error::Conflict(format!(
                "task is {}, not completed",
                task.status
            )));
        }

        let path = task
            .output_path
            .ok_or_else(|| Error::not_found("file", task_id))?;
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found("file", task_id));
            }
            Err(e) => return Err(crate::utils::fs::io_error("reading metadata of", &path, e)),
        };

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{task_id}.{}", task.request.format.extension()));
        let mime_type = path
            .extension()
            .and_then(|e| e.to_str())
            .map(OutputFormat::mime_for_extension)
            .unwrap_or("application/octet-stream");

        if let Err(e) = self.stats.accumulator().add_bandwidth(metadata.len()).await {
            warn!(error = %e, "Failed to persist bandwidth");
        }
        self.stats.notify();

        Ok(ServedFile {
            path,
            file_name,
            mime_type,
            size: metadata.len(),
        })
    }

    /// Forget a task and delete its output right away.
    pub async fn delete_task(&self, task_id: &str) -> Result<()> {
        let task = self
            .registry
            .remove(task_id)
            .ok_or_else(|| Error::not_found("task", task_id))?;

        match task.output_path {
            Some(path) => {
                self.cleanup.delete_now(task_id, &path).await?;
            }
            None => self.cleanup.cancel(task_id),
        }
        info!(task_id, "Task deleted");
        Ok(())
    }

    pub fn services(&self) -> Vec<ServiceInfo> {
        Service::ALL
            .iter()
            .map(|s| ServiceInfo {
                id: s.id(),
                name: s.display_name(),
                example_urls: s.example_urls(),
            })
            .collect()
    }

    /// Count a health probe and return the resulting snapshot.
    pub fn heartbeat(&self) -> StatsSnapshot {
        self.stats.heartbeat()
    }

    /// Download a single image and re-encode it as `format`.
    pub async fn fetch_photo(&self, url: &str, format: ImageFormat) -> Result<Vec<u8>> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(DownloadError::from)?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            }
            .into());
        }
        let body = response.bytes().await.map_err(DownloadError::from)?;
        if body.is_empty() {
            return Err(DownloadError::EmptyBody {
                url: url.to_string(),
            }
            .into());
        }

        tokio::task::spawn_blocking(move || reencode_image(&body, format))
            .await
            .map_err(|e| Error::Other(format!("image worker failed: {e}")))?
    }
}

fn reencode_image(data: &[u8], format: ImageFormat) -> Result<Vec<u8>> {
    let decoded = image::load_from_memory(data)
        .map_err(|e| Error::validation(format!("not a supported image: {e}")))?;

    let mut out = std::io::Cursor::new(Vec::new());
    let written = match format {
        // JPEG has no alpha channel.
        ImageFormat::Jpeg => image::DynamicImage::ImageRgb8(decoded.to_rgb8())
            .write_to(&mut out, image::ImageFormat::Jpeg),
        ImageFormat::Png => decoded.write_to(&mut out, image::ImageFormat::Png),
    };
    written.map_err(|e| Error::Other(format!("failed to encode image: {e}")))?;
    Ok(out.into_inner())
}
