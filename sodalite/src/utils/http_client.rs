use std::{sync::OnceLock, time::Duration};

use tracing::{debug, warn};

use crate::downloader::DEFAULT_USER_AGENT;

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Safe to ignore: can happen if another crate installed it first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Build the shared `reqwest::Client` used for stream downloads and photo fetches.
///
/// `read_timeout` bounds each individual body read so a stalled origin cannot
/// hold a download slot forever; the overall transfer is not bounded here.
pub fn build_http_client(read_timeout: Duration) -> reqwest::Client {
    install_rustls_provider();

    let mut builder = reqwest::Client::builder()
        .user_agent(DEFAULT_USER_AGENT)
        .connect_timeout(Duration::from_secs(15))
        .pool_max_idle_per_host(4);

    if read_timeout > Duration::ZERO {
        builder = builder.read_timeout(read_timeout);
    }

    builder.build().unwrap_or_else(|error| {
        warn!(
            error = %error,
            "Failed to create configured HTTP client; falling back to reqwest defaults"
        );
        reqwest::Client::new()
    })
}
