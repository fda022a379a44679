//! API server setup and configuration.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::Request;
use axum::response::Response;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{Span, info};

use crate::api::routes;
use crate::error::{Error, Result};
use crate::service::MediaService;

/// Listener settings for the HTTP surface.
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub enable_cors: bool,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8000,
            enable_cors: true,
        }
    }
}

impl ApiServerConfig {
    /// Defaults overridden by `API_BIND_ADDRESS` and `API_PORT`.
    pub fn from_env_or_default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            bind_address: lookup("API_BIND_ADDRESS")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.bind_address),
            port: lookup("API_PORT")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.port),
            enable_cors: defaults.enable_cors,
        }
    }

    fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .map_err(|e| Error::config(format!("invalid listen address: {e}")))
    }
}

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub start_time: Instant,
    pub media: Arc<MediaService>,
}

impl AppState {
    pub fn new(media: Arc<MediaService>) -> Self {
        Self {
            start_time: Instant::now(),
            media,
        }
    }
}

/// Polled endpoints that would flood the request log.
fn is_quiet_path(path: &str) -> bool {
    path.starts_with("/sodalite/health") || path.starts_with("/sodalite/ws")
}

fn request_span(req: &Request) -> Span {
    if is_quiet_path(req.uri().path()) {
        return Span::none();
    }
    tracing::info_span!("request", method = %req.method(), uri = %req.uri())
}

pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
    cancel_token: CancellationToken,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, state: AppState, cancel_token: CancellationToken) -> Self {
        Self {
            config,
            state,
            cancel_token,
        }
    }

    pub fn build_router(&self) -> Router {
        let router = routes::create_router(self.state.clone()).layer(
            TraceLayer::new_for_http()
                .make_span_with(request_span)
                .on_request(())
                .on_response(|res: &Response, latency: Duration, span: &Span| {
                    if !span.is_disabled() {
                        info!(
                            status = res.status().as_u16(),
                            latency_ms = latency.as_millis() as u64,
                            "Request finished"
                        );
                    }
                }),
        );

        if self.config.enable_cors {
            router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
        } else {
            router
        }
    }

    /// Serve until the cancellation token fires.
    pub async fn run(&self) -> Result<()> {
        let addr = self.config.socket_addr()?;
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "API server listening");

        let cancel_token = self.cancel_token.clone();
        axum::serve(listener, self.build_router())
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                info!("API server shutting down");
            })
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ApiServerConfig::default();
        assert_eq!(config.bind_address, "0.0.0.0");
        assert_eq!(config.port, 8000);
        assert!(config.enable_cors);
    }

    #[test]
    fn test_env_overrides() {
        let config = ApiServerConfig::from_lookup(|key| match key {
            "API_BIND_ADDRESS" => Some("127.0.0.1".to_string()),
            "API_PORT" => Some("not-a-port".to_string()),
            _ => None,
        });
        assert_eq!(config.bind_address, "127.0.0.1");
        assert_eq!(config.port, 8000);
        assert_eq!(
            config.socket_addr().unwrap(),
            "127.0.0.1:8000".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_quiet_paths() {
        assert!(is_quiet_path("/sodalite/health"));
        assert!(is_quiet_path("/sodalite/ws/stats"));
        assert!(!is_quiet_path("/sodalite/process"));
    }
}
