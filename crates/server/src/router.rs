//! HTTP router construction.

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::api;
use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/stats", get(api::stats))
        .route("/jobs", post(api::enqueue).get(api::list_jobs))
        .route("/jobs/next", post(api::next_job))
        .route("/jobs/{id}", delete(api::cancel_job))
        .route("/admin/snapshot", post(api::snapshot))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
