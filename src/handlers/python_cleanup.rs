use crate::{models::{CleanupResponse, ErrorResponse}, services::Identity, AppState};
use axum::{extract::{State, Path, Extension}, http::StatusCode, Json};
use std::sync::Arc;
use tracing::info;

/// Tear down an execution session. Unknown sessions succeed too.
pub async fn cleanup_session(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(session_id): Path<String>,
) -> Result<(StatusCode, Json<CleanupResponse>), (StatusCode, Json<ErrorResponse>)> {

    if state.sessions.cleanup(&session_id, &identity.username)? {
        info!("Session '{}' cleaned up by {}", session_id, identity.username);
    }

    Ok((
        StatusCode::OK,
        Json(CleanupResponse {
            status: "cleaned up".to_string(),
        }),
    ))
}
