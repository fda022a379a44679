use std::sync::Arc;

use mimalloc::MiMalloc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use sodalite::api::{ApiServer, ApiServerConfig, AppState};
use sodalite::config::AppConfig;
use sodalite::downloader::HttpDownloader;
use sodalite::encoder::{FfmpegConfig, FfmpegEncoder};
use sodalite::extractor::{RetryConfig, YtDlpConfig, YtDlpExtractor};
use sodalite::logging;
use sodalite::service::{MediaService, MediaServiceParts};
use sodalite::utils::http_client::build_http_client;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env_or_default();
    let logging = logging::init_logging(&config.log_dir)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting sodalite");

    let cancel_token = CancellationToken::new();
    let _log_retention = logging.start_retention_cleanup(cancel_token.child_token());

    let http_client = build_http_client(config.request_timeout());
    let fetcher =
        HttpDownloader::new(http_client.clone()).with_request_timeout(config.request_timeout());
    let encoder = FfmpegEncoder::with_config(FfmpegConfig {
        binary_path: config.ffmpeg_path.clone(),
        timeout: config.encode_timeout(),
    });
    let extractor = YtDlpExtractor::with_config(YtDlpConfig {
        binary_path: config.ytdlp_path.clone(),
        timeout: config.extract_timeout(),
        retry: RetryConfig::default(),
    });

    let media = MediaService::start(
        MediaServiceParts {
            config,
            extractor: Arc::new(extractor),
            fetcher: Arc::new(fetcher),
            encoder: Arc::new(encoder),
            http_client,
        },
        cancel_token.child_token(),
    )
    .await?;
    let media = Arc::new(media);

    let server = ApiServer::new(
        ApiServerConfig::from_env_or_default(),
        AppState::new(media.clone()),
        cancel_token.clone(),
    );

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let result = server.run().await;
    cancel_token.cancel();
    media.shutdown().await;

    result?;
    info!("sodalite stopped");
    Ok(())
}
