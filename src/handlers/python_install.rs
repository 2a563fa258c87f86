use crate::{models::{ErrorResponse, InstallPackageRequest, InstallPackageResponse}, services::Identity, AppState};
use axum::{extract::{State, Extension}, http::StatusCode, Json};
use std::sync::Arc;
use tracing::error;

/// Install a package into the caller's session virtualenv
pub async fn install_package(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<InstallPackageRequest>,
) -> Result<(StatusCode, Json<InstallPackageResponse>), (StatusCode, Json<ErrorResponse>)> {

    let outcome = state
        .sessions
        .install_package(&request.session_id, &identity.username, &request.package_name)
        .await
        .map_err(|e| {
            error!("Installing '{}' into session '{}' failed: {}", request.package_name, request.session_id, e);
            e
        })?;

    Ok((
        StatusCode::OK,
        Json(InstallPackageResponse {
            stdout: outcome.stdout,
            stderr: outcome.stderr,
            success: outcome.success,
        }),
    ))
}
