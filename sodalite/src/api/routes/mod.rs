//! API route modules.

pub mod health;
pub mod media;
pub mod stats;
pub mod tasks;

use axum::Router;

use crate::api::server::AppState;

/// Create the main API router with all routes under `/sodalite`.
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .merge(media::router())
        .merge(tasks::router())
        .merge(health::router())
        .merge(stats::router());

    Router::new().nest("/sodalite", api).with_state(state)
}
