//! API Routes

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};

use crate::error::{Error, Result};
use crate::models::ApiResponse;
use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(super::health_check))
        .route("/api/cameras", get(list_camera_states))
        .route("/api/cycles/latest", get(latest_cycle))
        .with_state(state)
}

async fn list_camera_states(State(state): State<AppState>) -> impl IntoResponse {
    let states = state.polling.camera_states().await;
    Json(ApiResponse::success(states))
}

async fn latest_cycle(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let report = state
        .polling
        .last_report()
        .await
        .ok_or_else(|| Error::NotFound("no polling cycle has completed yet".to_string()))?;
    Ok(Json(ApiResponse::success(report)))
}
