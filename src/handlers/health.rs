use axum::{extract::State, Json};
use std::sync::Arc;
use crate::AppState;
use crate::models::{HealthResponse, ReadyResponse};
use tracing::debug;

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    debug!("Health check requested");
    Json(HealthResponse {
        status: "ok".to_string(),
        service: state.config.cloud_service_name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check endpoint, reporting which features are switched on
pub async fn ready_check(State(state): State<Arc<AppState>>) -> Json<ReadyResponse> {
    debug!("Readiness check requested");
    Json(ReadyResponse {
        status: "ok".to_string(),
        collaboration: state.config.enable_collaboration,
        python_execution: state.config.enable_python_execution,
    })
}
