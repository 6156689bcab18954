//! WebAPI - Status Endpoints
//!
//! ## Responsibilities
//!
//! - Liveness and dependency health
//! - Read-only view of per-camera polling state
//! - Latest cycle report

mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let detector_ok = state.detector.health_check().await;

    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_sec: state.uptime_sec(),
        polling_running: state.polling.is_running().await,
        detector_connected: detector_ok,
        cameras_tracked: state.polling.camera_states().await.len(),
    };

    Json(response)
}
