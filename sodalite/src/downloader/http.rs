//! HTTP stream fetcher.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

use crate::media::StreamCandidate;

/// Conservative desktop User-Agent sent with every stream request.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Default bound for obtaining a response and for each body read.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Failure to fetch a single stream.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("download of {url} failed with HTTP status {status}")]
    Status { url: String, status: u16 },

    #[error("download of {url} returned no data")]
    EmptyBody { url: String },

    #[error("download of {url} timed out after {}s", .timeout.as_secs())]
    Timeout { url: String, timeout: Duration },

    #[error("invalid request header {name:?}")]
    InvalidHeader { name: String },

    #[error("download request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("failed writing {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Fetches one stream candidate to a local file.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Stream `candidate` into `destination`, returning the number of bytes written.
    ///
    /// A stream that yields nothing must be reported as
    /// [`DownloadError::EmptyBody`]; callers reject `Ok(0)` the same way.
    async fn fetch(
        &self,
        candidate: StreamCandidate<'_>,
        destination: &Path,
    ) -> Result<u64, DownloadError>;
}

/// [`Fetcher`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: reqwest::Client,
    user_agent: String,
    request_timeout: Duration,
}

impl HttpDownloader {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Default User-Agent merged with the candidate's own headers.
    ///
    /// Candidate headers win on conflict; the candidate itself is untouched.
    fn build_headers(&self, candidate: &StreamCandidate<'_>) -> Result<HeaderMap, DownloadError> {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&self.user_agent) {
            headers.insert(USER_AGENT, value);
        }

        if let Some(extra) = candidate.headers() {
            for (name, value) in extra {
                let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                    DownloadError::InvalidHeader { name: name.clone() }
                })?;
                let header_value = HeaderValue::from_str(value)
                    .map_err(|_| DownloadError::InvalidHeader { name: name.clone() })?;
                headers.insert(header_name, header_value);
            }
        }

        Ok(headers)
    }
}

#[async_trait]
impl Fetcher for HttpDownloader {
    async fn fetch(
        &self,
        candidate: StreamCandidate<'_>,
        destination: &Path,
    ) -> Result<u64, DownloadError> {
        let url = candidate.url();
        let headers = self.build_headers(&candidate)?;

        debug!(kind = candidate.kind(), quality = candidate.quality(), "Requesting stream");

        let request = self.client.get(url).headers(headers).send();
        let response = tokio::time::timeout(self.request_timeout, request)
            .await
            .map_err(|_| DownloadError::Timeout {
                url: url.to_string(),
                timeout: self.request_timeout,
            })??;

        let status = response.status();
        if !status.is_success() {
            warn!(kind = candidate.kind(), status = status.as_u16(), "Stream request rejected");
            return Err(DownloadError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let write_err = |source| DownloadError::Write {
            path: destination.to_path_buf(),
            source,
        };

        let file = tokio::fs::File::create(destination).await.map_err(write_err)?;
        let mut writer = BufWriter::new(file);
        let mut body = response.bytes_stream();
        let mut total_bytes = 0u64;

        loop {
            let next = tokio::time::timeout(self.request_timeout, body.next())
                .await
                .map_err(|_| DownloadError::Timeout {
                    url: url.to_string(),
                    timeout: self.request_timeout,
                })?;
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk?;
            writer.write_all(&chunk).await.map_err(write_err)?;
            total_bytes += chunk.len() as u64;
        }

        writer.flush().await.map_err(write_err)?;

        if total_bytes == 0 {
            return Err(DownloadError::EmptyBody {
                url: url.to_string(),
            });
        }

        info!(
            kind = candidate.kind(),
            quality = candidate.quality(),
            bytes = total_bytes,
            "Stream downloaded"
        );
        Ok(total_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::VideoCandidate;
    use crate::utils::http_client::build_http_client;
    use std::collections::HashMap;

    fn candidate(headers: Option<HashMap<String, String>>) -> VideoCandidate {
        VideoCandidate {
            url: "https://cdn.example/v.mp4".to_string(),
            headers,
            quality: "720p".to_string(),
            width: None,
            height: None,
            codec: None,
        }
    }

    #[test]
    fn test_default_user_agent_is_always_present() {
        let downloader = HttpDownloader::new(build_http_client(DEFAULT_REQUEST_TIMEOUT));
        let video = candidate(None);
        let headers = downloader
            .build_headers(&StreamCandidate::Video(&video))
            .unwrap();
        assert_eq!(headers.get(USER_AGENT).unwrap(), DEFAULT_USER_AGENT);
    }

    #[test]
    fn test_candidate_headers_are_merged_without_mutation() {
        let downloader = HttpDownloader::new(build_http_client(DEFAULT_REQUEST_TIMEOUT));
        let mut extra = HashMap::new();
        extra.insert("Cookie".to_string(), "sig=abc".to_string());
        extra.insert("User-Agent".to_string(), "custom-agent".to_string());
        let video = candidate(Some(extra.clone()));

        let headers = downloader
            .build_headers(&StreamCandidate::Video(&video))
            .unwrap();

        assert_eq!(headers.get("cookie").unwrap(), "sig=abc");
        assert_eq!(headers.get(USER_AGENT).unwrap(), "custom-agent");
        assert_eq!(video.headers, Some(extra));
    }

    #[test]
    fn test_invalid_header_name_is_rejected() {
        let downloader = HttpDownloader::new(build_http_client(DEFAULT_REQUEST_TIMEOUT));
        let mut extra = HashMap::new();
        extra.insert("bad header".to_string(), "x".to_string());
        let video = candidate(Some(extra));

        let result = downloader.build_headers(&StreamCandidate::Video(&video));
        assert!(matches!(result, Err(DownloadError::InvalidHeader { .. })));
    }

    /// Serve one canned HTTP response on a local port and hand back the
    /// raw request line and headers it received.
    async fn serve_once(
        response: &'static [u8],
        stall: Duration,
    ) -> (String, tokio::task::JoinHandle<String>) {
        use tokio::io::AsyncReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/stream", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket.write_all(response).await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(stall).await;
            String::from_utf8_lossy(&request).into_owned()
        });
        (url, handle)
    }

    /// Client for the loopback server, ignoring any proxy in the environment.
    fn local_client() -> reqwest::Client {
        crate::utils::http_client::install_rustls_provider();
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    fn video_at(url: &str) -> VideoCandidate {
        VideoCandidate {
            url: url.to_string(),
            ..candidate(None)
        }
    }

    #[tokio::test]
    async fn test_fetch_streams_body_to_disk() {
        let (url, server) = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
            Duration::ZERO,
        )
        .await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("v.bin");
        let downloader = HttpDownloader::new(local_client());

        let video = video_at(&url);
        let bytes = downloader
            .fetch(StreamCandidate::Video(&video), &dest)
            .await
            .unwrap();

        assert_eq!(bytes, 5);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"hello");
        let request = server.await.unwrap().to_ascii_lowercase();
        assert!(request.contains(&format!(
            "user-agent: {}",
            DEFAULT_USER_AGENT.to_ascii_lowercase()
        )));
    }

    #[tokio::test]
    async fn test_fetch_rejects_error_status() {
        let (url, _server) = serve_once(
            b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            Duration::ZERO,
        )
        .await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("v.bin");
        let downloader = HttpDownloader::new(local_client());

        let video = video_at(&url);
        let result = downloader.fetch(StreamCandidate::Video(&video), &dest).await;

        assert!(matches!(result, Err(DownloadError::Status { status: 404, .. })));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_fetch_rejects_empty_body() {
        let (url, _server) = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            Duration::ZERO,
        )
        .await;
        let dir = tempfile::tempdir().unwrap();
        let downloader = HttpDownloader::new(local_client());

        let video = video_at(&url);
        let result = downloader
            .fetch(StreamCandidate::Video(&video), &dir.path().join("v.bin"))
            .await;

        assert!(matches!(result, Err(DownloadError::EmptyBody { .. })));
    }

    #[tokio::test]
    async fn test_fetch_times_out_on_stalled_body() {
        // Promises 100 bytes, sends 3, then goes quiet.
        let (url, _server) = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nabc",
            Duration::from_secs(5),
        )
        .await;
        let dir = tempfile::tempdir().unwrap();
        let downloader = HttpDownloader::new(local_client())
            .with_request_timeout(Duration::from_millis(200));

        let video = video_at(&url);
        let result = tokio::time::timeout(
            Duration::from_secs(3),
            downloader.fetch(StreamCandidate::Video(&video), &dir.path().join("v.bin")),
        )
        .await
        .expect("fetch gave up on its own");

        assert!(matches!(result, Err(DownloadError::Timeout { .. })));
    }
}
