use crate::{handlers::{cleanup_session, diagnostics, health_check, install_package, ready_check, run_python}, routes::auth_middleware::auth_middleware, AppState};
use axum::{routing::{delete, get, post}, Router, middleware};
use std::sync::Arc;

/// Create API routes
pub fn create_api_routes(state: Arc<AppState>) -> Router {
    Router::<Arc<AppState>>::new()
        .route("/v1/diagnostics", get(diagnostics))
        .route("/python/run", post(run_python))
        .route("/python/install", post(install_package))
        .route("/python/cleanup/:session_id", delete(cleanup_session))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware)) // Applies to all routes added above
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .with_state(state)
}
