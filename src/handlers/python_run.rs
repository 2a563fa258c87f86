use crate::{exec::RunSpec, models::{ErrorResponse, RunPythonRequest, RunPythonResponse}, services::Identity, AppState};
use axum::{extract::{State, Extension}, http::StatusCode, Json};
use std::sync::Arc;
use tracing::{error, info};

/// Run the editor buffer in the caller's execution session
pub async fn run_python(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<RunPythonRequest>,
) -> Result<(StatusCode, Json<RunPythonResponse>), (StatusCode, Json<ErrorResponse>)> {

    // Sibling files of the edited script are copied next to it
    let source_dir = state.files.resolve_dir(&identity, &request.path).await;
    if source_dir.is_none() {
        info!("No source folder for '{}' of {}, running without siblings", request.path, identity.username);
    }

    let outcome = state
        .sessions
        .run(RunSpec {
            session_id: request.session_id.clone(),
            owner: identity.username.clone(),
            code: request.content,
            file_name: request.file_name,
            source_dir,
        })
        .await
        .map_err(|e| {
            error!("Run in session '{}' failed: {}", request.session_id, e);
            e
        })?;

    Ok((
        StatusCode::OK,
        Json(RunPythonResponse {
            stdout: outcome.stdout,
            stderr: outcome.stderr,
            returncode: outcome.returncode,
            success: outcome.success,
        }),
    ))
}
