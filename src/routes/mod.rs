use axum::{routing::get, routing::post, Router};

use crate::app_state::AppState;

pub mod health;
pub mod jobs;

/// API routes over shared state. Layers and `/metrics` are added by the binary.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/bookings", post(jobs::submit_booking))
        .route("/api/v1/searches", post(jobs::submit_search))
        .route("/api/v1/jobs/{job_id}", get(jobs::get_job_status))
        .with_state(state)
}
