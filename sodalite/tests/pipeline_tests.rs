//! End-to-end tests of the media service with in-process fakes for the
//! extractor, fetcher and encoder.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use sodalite::Error;
use sodalite::config::AppConfig;
use sodalite::downloader::{DownloadError, Fetcher};
use sodalite::encoder::{EncodeError, EncodeRequest, Encoder};
use sodalite::extractor::{ExtractionError, Extractor, Service};
use sodalite::media::{
    AudioCandidate, DownloadMode, OutputFormat, StreamCandidate, StreamDescription,
    VideoCandidate,
};
use sodalite::reaper::{ReaperConfig, StuckTaskReaper};
use sodalite::service::{MediaService, MediaServiceParts, ProcessRequest};
use sodalite::task::{TaskPhase, TaskStatus};
use sodalite::utils::http_client::build_http_client;

const URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

struct FakeExtractor {
    calls: AtomicUsize,
}

#[async_trait]
impl Extractor for FakeExtractor {
    async fn extract(
        &self,
        service: Service,
        _url: &str,
    ) -> Result<StreamDescription, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(StreamDescription {
            service: service.id().to_string(),
            title: "Test Title".to_string(),
            author: "Test Author".to_string(),
            thumbnail_url: None,
            videos: vec![VideoCandidate {
                url: "https://cdn.example/v".to_string(),
                headers: None,
                quality: "720p".to_string(),
                width: Some(1280),
                height: Some(720),
                codec: Some("avc1".to_string()),
            }],
            audios: vec![AudioCandidate {
                url: "https://cdn.example/a".to_string(),
                headers: None,
                quality: "128kbps".to_string(),
                codec: Some("mp4a.40.2".to_string()),
            }],
        })
    }
}

/// Writes a fixed payload once the valve is opened.
struct ValveFetcher {
    open: watch::Sender<bool>,
    payload: Vec<u8>,
    calls: AtomicUsize,
    finished: AtomicUsize,
    /// Stream kind rejected with a 403 once the other stream has finished.
    failing_kind: Option<&'static str>,
    /// Report an empty payload as `Ok(0)` instead of an error.
    lenient_empty: bool,
}

impl ValveFetcher {
    fn new(open: bool, payload: &[u8]) -> Self {
        let (open, _) = watch::channel(open);
        Self {
            open,
            payload: payload.to_vec(),
            calls: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
            failing_kind: None,
            lenient_empty: false,
        }
    }

    fn failing(mut self, kind: &'static str) -> Self {
        self.failing_kind = Some(kind);
        self
    }

    fn lenient_empty(mut self) -> Self {
        self.lenient_empty = true;
        self
    }

    fn release(&self) {
        self.open.send_replace(true);
    }
}

#[async_trait]
impl Fetcher for ValveFetcher {
    async fn fetch(
        &self,
        candidate: StreamCandidate<'_>,
        destination: &Path,
    ) -> Result<u64, DownloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.subscribe();
        let _ = open.wait_for(|is_open| *is_open).await;

        if self.failing_kind == Some(candidate.kind()) {
            let _ = tokio::time::timeout(Duration::from_secs(2), async {
                while self.finished.load(Ordering::SeqCst) == 0 {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await;
            return Err(DownloadError::Status {
                url: candidate.url().to_string(),
                status: 403,
            });
        }

        if self.payload.is_empty() && !self.lenient_empty {
            return Err(DownloadError::EmptyBody {
                url: candidate.url().to_string(),
            });
        }
        tokio::fs::write(destination, &self.payload)
            .await
            .map_err(|source| DownloadError::Write {
                path: destination.to_path_buf(),
                source,
            })?;
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(self.payload.len() as u64)
    }
}

/// Concatenates whatever inputs it gets into the output path.
struct ConcatEncoder {
    available: bool,
    requests: parking_lot::Mutex<Vec<EncodeRequest>>,
}

impl ConcatEncoder {
    fn new(available: bool) -> Self {
        Self {
            available,
            requests: parking_lot::Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Encoder for ConcatEncoder {
    async fn ensure_available(&self) -> Result<(), EncodeError> {
        if self.available {
            Ok(())
        } else {
            Err(EncodeError::Unavailable {
                binary: "ffmpeg".to_string(),
                reason: "not installed".to_string(),
            })
        }
    }

    async fn merge(&self, request: &EncodeRequest) -> Result<(), EncodeError> {
        self.requests.lock().push(request.clone());
        let mut out = Vec::new();
        for input in [&request.video_path, &request.audio_path].into_iter().flatten() {
            out.extend(
                tokio::fs::read(input)
                    .await
                    .map_err(|e| EncodeError::Spawn(e.to_string()))?,
            );
        }
        tokio::fs::write(&request.output_path, out)
            .await
            .map_err(|e| EncodeError::Spawn(e.to_string()))
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    download_dir: PathBuf,
    media: MediaService,
    extractor: Arc<FakeExtractor>,
    fetcher: Arc<ValveFetcher>,
    encoder: Arc<ConcatEncoder>,
}

async fn harness(fetcher: ValveFetcher, encoder: ConcatEncoder) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let download_dir = dir.path().join("downloads");
    let config = AppConfig {
        download_dir: download_dir.clone(),
        max_concurrent_tasks: 2,
        ..AppConfig::default()
    };

    let extractor = Arc::new(FakeExtractor {
        calls: AtomicUsize::new(0),
    });
    let fetcher = Arc::new(fetcher);
    let encoder = Arc::new(encoder);

    let media = MediaService::start(
        MediaServiceParts {
            config,
            extractor: extractor.clone(),
            fetcher: fetcher.clone(),
            encoder: encoder.clone(),
            http_client: build_http_client(Duration::from_secs(5)),
        },
        CancellationToken::new(),
    )
    .await
    .unwrap();

    Harness {
        _dir: dir,
        download_dir,
        media,
        extractor,
        fetcher,
        encoder,
    }
}

fn request(format: OutputFormat, mode: DownloadMode) -> ProcessRequest {
    ProcessRequest {
        url: URL.to_string(),
        video_quality: Some("720p".to_string()),
        audio_quality: None,
        format,
        mode,
    }
}

async fn wait_for_status(media: &MediaService, id: &str, status: TaskStatus) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if media.get_status(id).unwrap().status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("task {id} never reached {status}"));
}

async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition reached");
}

fn output_files(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "mp4"))
        .collect()
}

#[tokio::test]
async fn test_gate_admits_two_of_three_tasks() {
    let h = harness(ValveFetcher::new(false, b"media"), ConcatEncoder::new(true)).await;

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(
            h.media
                .submit_process(request(OutputFormat::Mp4, DownloadMode::Default))
                .await
                .unwrap(),
        );
    }

    wait_until(|| {
        let counts = h.media.task_counts();
        counts.processing == 2 && counts.queued == 1
    })
    .await;

    // Give the queued task a chance to sneak through if the gate leaked.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let phases: Vec<_> = ids
        .iter()
        .map(|id| h.media.get_phase(id).unwrap())
        .collect();
    let downloading = phases
        .iter()
        .filter(|p| p.status == TaskStatus::Processing && p.phase == TaskPhase::Downloading)
        .count();
    let queued = phases
        .iter()
        .filter(|p| p.status == TaskStatus::Queued)
        .count();
    assert_eq!(downloading, 2);
    assert_eq!(queued, 1);
    assert_eq!(h.media.gate().available(), 0);

    h.fetcher.release();
    for id in &ids {
        wait_for_status(&h.media, id, TaskStatus::Completed).await;
    }
    wait_until(|| h.media.stats().accumulator().total_conversions() == 3).await;
    // Permits are released after the task settles, not when it completes.
    wait_until(|| h.media.gate().available() == 2).await;
}

#[tokio::test]
async fn test_completed_task_serves_file_and_counts_bandwidth() {
    let h = harness(ValveFetcher::new(true, b"0123456789"), ConcatEncoder::new(true)).await;

    let id = h
        .media
        .submit_process(request(OutputFormat::Mp4, DownloadMode::Default))
        .await
        .unwrap();
    wait_for_status(&h.media, &id, TaskStatus::Completed).await;

    let status = h.media.get_status(&id).unwrap();
    assert_eq!(status.phase, TaskPhase::Completed);
    assert_eq!(
        status.download_url.as_deref(),
        Some(format!("/sodalite/download/{id}/file").as_str())
    );
    assert!(status.error.is_none());

    // 10 bytes video + 10 bytes audio fetched.
    assert_eq!(h.media.stats().accumulator().total_bandwidth_bytes(), 20);

    let served = h.media.open_file(&id).await.unwrap();
    assert_eq!(served.size, 20);
    assert_eq!(served.mime_type, "video/mp4");
    assert!(served.file_name.starts_with("youtube_"));
    assert!(served.file_name.ends_with(".mp4"));
    assert_eq!(served.path.parent().unwrap(), h.download_dir);
    assert_eq!(h.media.stats().accumulator().total_bandwidth_bytes(), 40);

    let encoded = h.encoder.requests.lock().clone();
    assert_eq!(encoded.len(), 1);
    assert_eq!(encoded[0].title.as_deref(), Some("Test Title"));
    assert_eq!(encoded[0].audio_codec.as_deref(), Some("mp4a.40.2"));
    assert!(encoded[0].video_path.is_some() && encoded[0].audio_path.is_some());

    // Scratch directories are gone once the job ends.
    let leftovers: Vec<_> = std::fs::read_dir(&h.download_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with(".sodalite-"))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn test_zero_byte_download_fails_without_output() {
    let h = harness(ValveFetcher::new(true, b""), ConcatEncoder::new(true)).await;

    let id = h
        .media
        .submit_process(request(OutputFormat::Mp4, DownloadMode::Default))
        .await
        .unwrap();
    wait_for_status(&h.media, &id, TaskStatus::Failed).await;

    let status = h.media.get_status(&id).unwrap();
    assert!(status.error.unwrap().contains("no data"));
    assert!(status.download_url.is_none());
    assert_eq!(status.phase, TaskPhase::Downloading);

    let task = h.media.registry().get(&id).unwrap();
    assert!(task.output_path.is_none());
    assert!(output_files(&h.download_dir).is_empty());
    assert!(matches!(
        h.media.open_file(&id).await,
        Err(Error::Conflict(_))
    ));
    assert_eq!(h.media.gate().available(), 2);
}

#[tokio::test]
async fn test_fetcher_reporting_zero_bytes_fails_task() {
    let h = harness(
        ValveFetcher::new(true, b"").lenient_empty(),
        ConcatEncoder::new(true),
    )
    .await;

    let id = h
        .media
        .submit_process(request(OutputFormat::Mp4, DownloadMode::Default))
        .await
        .unwrap();
    wait_for_status(&h.media, &id, TaskStatus::Failed).await;

    let status = h.media.get_status(&id).unwrap();
    assert!(status.error.unwrap().contains("no data"));
    assert!(status.download_url.is_none());
    assert!(h.media.registry().get(&id).unwrap().output_path.is_none());
    assert!(h.encoder.requests.lock().is_empty());
    assert!(output_files(&h.download_dir).is_empty());
}

#[tokio::test]
async fn test_partial_download_still_counts_fetched_bytes() {
    let h = harness(
        ValveFetcher::new(true, b"12345").failing("audio"),
        ConcatEncoder::new(true),
    )
    .await;

    let id = h
        .media
        .submit_process(request(OutputFormat::Mp4, DownloadMode::Default))
        .await
        .unwrap();
    wait_for_status(&h.media, &id, TaskStatus::Failed).await;
    wait_until(|| h.media.gate().available() == 2).await;

    assert!(h.media.get_status(&id).unwrap().error.unwrap().contains("403"));
    // The video stream finished before the audio stream was refused.
    assert_eq!(h.media.stats().accumulator().total_bandwidth_bytes(), 5);
    assert!(h.encoder.requests.lock().is_empty());
}

#[tokio::test]
async fn test_missing_encoder_fails_before_download() {
    let h = harness(ValveFetcher::new(true, b"media"), ConcatEncoder::new(false)).await;

    let id = h
        .media
        .submit_process(request(OutputFormat::Mp4, DownloadMode::Default))
        .await
        .unwrap();
    wait_for_status(&h.media, &id, TaskStatus::Failed).await;

    assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 0);
    let status = h.media.get_status(&id).unwrap();
    assert_eq!(status.phase, TaskPhase::Initializing);
    assert!(status.error.unwrap().contains("not available"));
}

#[tokio::test]
async fn test_audio_container_downloads_audio_only() {
    let h = harness(ValveFetcher::new(true, b"audio"), ConcatEncoder::new(true)).await;

    let id = h
        .media
        .submit_process(request(OutputFormat::Mp3, DownloadMode::Default))
        .await
        .unwrap();
    wait_for_status(&h.media, &id, TaskStatus::Completed).await;

    assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 1);
    let encoded = h.encoder.requests.lock().clone();
    assert!(encoded[0].video_path.is_none());
    assert_eq!(encoded[0].format, OutputFormat::Mp3);
    assert_eq!(h.media.open_file(&id).await.unwrap().mime_type, "audio/mpeg");
}

#[tokio::test]
async fn test_video_only_into_audio_container_is_rejected() {
    let h = harness(ValveFetcher::new(true, b"x"), ConcatEncoder::new(true)).await;

    let result = h
        .media
        .submit_process(request(OutputFormat::Flac, DownloadMode::VideoOnly))
        .await;
    assert!(matches!(result, Err(Error::Validation(_))));
    assert!(h.media.registry().is_empty());
    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_metadata_is_cached_but_process_reextracts() {
    let h = harness(ValveFetcher::new(true, b"x"), ConcatEncoder::new(true)).await;

    let first = h.media.submit_metadata(URL).await.unwrap();
    let second = h.media.submit_metadata(URL).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.videos[0].quality, "720p");
    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 1);

    h.media
        .submit_process(request(OutputFormat::Mp4, DownloadMode::Default))
        .await
        .unwrap();
    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 2);

    // Refreshed by the process submission.
    h.media.submit_metadata(URL).await.unwrap();
    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unknown_service_creates_no_task() {
    let h = harness(ValveFetcher::new(true, b"x"), ConcatEncoder::new(true)).await;

    let result = h.media.submit_metadata("https://example.com/video").await;
    assert!(matches!(result, Err(Error::ServiceDetection(_))));

    let mut req = request(OutputFormat::Mp4, DownloadMode::Default);
    req.url = "https://example.com/video".to_string();
    assert!(matches!(
        h.media.submit_process(req).await,
        Err(Error::ServiceDetection(_))
    ));
    assert!(h.media.registry().is_empty());
}

#[tokio::test]
async fn test_delete_task_removes_file_and_record() {
    let h = harness(ValveFetcher::new(true, b"abc"), ConcatEncoder::new(true)).await;

    let id = h
        .media
        .submit_process(request(OutputFormat::Mp4, DownloadMode::Default))
        .await
        .unwrap();
    wait_for_status(&h.media, &id, TaskStatus::Completed).await;
    let path = h.media.open_file(&id).await.unwrap().path;
    assert!(path.exists());

    h.media.delete_task(&id).await.unwrap();
    assert!(!path.exists());
    assert!(matches!(
        h.media.get_status(&id),
        Err(Error::NotFound { .. })
    ));
    assert!(matches!(
        h.media.delete_task(&id).await,
        Err(Error::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_reaped_task_rejects_late_completion() {
    let h = harness(ValveFetcher::new(false, b"late"), ConcatEncoder::new(true)).await;

    let id = h
        .media
        .submit_process(request(OutputFormat::Mp4, DownloadMode::Default))
        .await
        .unwrap();
    wait_for_status(&h.media, &id, TaskStatus::Processing).await;

    let reaper = StuckTaskReaper::new(ReaperConfig::default(), h.media.registry().clone());
    let reaped = reaper.sweep(chrono::Utc::now() + chrono::Duration::seconds(601));
    assert_eq!(reaped, vec![id.clone()]);

    h.fetcher.release();
    wait_until(|| h.media.gate().available() == 2).await;

    let status = h.media.get_status(&id).unwrap();
    assert_eq!(status.status, TaskStatus::Failed);
    assert_eq!(
        status.error.as_deref(),
        Some("task timeout - processing took too long")
    );
    assert!(output_files(&h.download_dir).is_empty());
    assert_eq!(h.media.stats().accumulator().total_conversions(), 0);
}

#[tokio::test]
async fn test_health_heartbeat_and_services() {
    let h = harness(ValveFetcher::new(true, b"x"), ConcatEncoder::new(true)).await;

    assert_eq!(h.media.heartbeat().heartbeats, 1);
    assert_eq!(h.media.heartbeat().heartbeats, 2);

    let services = h.media.services();
    let ids: Vec<_> = services.iter().map(|s| s.id).collect();
    assert_eq!(ids, ["youtube", "instagram", "tiktok"]);
    assert!(services.iter().all(|s| !s.example_urls.is_empty()));

    h.media.shutdown().await;
}
