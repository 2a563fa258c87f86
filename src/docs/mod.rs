use utoipa::OpenApi;
use crate::models::*;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn health_check_doc() {}

/// Readiness check endpoint
#[utoipa::path(
    get,
    path = "/api/ready",
    responses(
        (status = 200, description = "Service is ready", body = ReadyResponse)
    )
)]
#[allow(dead_code)]
pub async fn ready_check_doc() {}

/// Run a script in an execution session
#[utoipa::path(
    post,
    path = "/api/python/run",
    request_body = RunPythonRequest,
    responses(
        (status = 200, description = "Script ran; failures of the script itself are in the body", body = RunPythonResponse),
        (status = 400, description = "Invalid session id or file name", body = ErrorResponse),
        (status = 401, description = "Missing or invalid credential", body = ErrorResponse),
        (status = 403, description = "Session belongs to another user", body = ErrorResponse),
        (status = 409, description = "Session is busy", body = ErrorResponse),
        (status = 500, description = "Environment could not be prepared", body = ErrorResponse),
        (status = 503, description = "Execution disabled or session limit reached", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn run_python_doc() {}

/// Install a package into a session virtualenv
#[utoipa::path(
    post,
    path = "/api/python/install",
    request_body = InstallPackageRequest,
    responses(
        (status = 200, description = "pip ran", body = InstallPackageResponse),
        (status = 400, description = "Invalid package name or no virtualenvs", body = ErrorResponse),
        (status = 409, description = "Session is busy", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn install_package_doc() {}

/// Tear down an execution session
#[utoipa::path(
    delete,
    path = "/api/python/cleanup/{session_id}",
    params(
        ("session_id" = String, Path, description = "Execution session id")
    ),
    responses(
        (status = 200, description = "Session removed, or never existed", body = CleanupResponse),
        (status = 403, description = "Session belongs to another user", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn cleanup_session_doc() {}

/// Live counters and system stats
#[utoipa::path(
    get,
    path = "/api/v1/diagnostics",
    responses(
        (status = 200, description = "Diagnostics", body = DiagnosticsResponse),
        (status = 403, description = "Admin role required", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn diagnostics_doc() {}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check_doc,
        ready_check_doc,
        run_python_doc,
        install_package_doc,
        cleanup_session_doc,
        diagnostics_doc,
    ),
    components(
        schemas(
            HealthResponse,
            ReadyResponse,
            DiagnosticsResponse,
            ErrorResponse,
            RunPythonRequest,
            RunPythonResponse,
            InstallPackageRequest,
            InstallPackageResponse,
            CleanupResponse,
        )
    ),
    tags(
        (name = "api", description = "API endpoints")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_every_endpoint() {
        let doc = ApiDoc::openapi();
        for path in [
            "/api/health",
            "/api/ready",
            "/api/python/run",
            "/api/python/install",
            "/api/python/cleanup/{session_id}",
            "/api/v1/diagnostics",
        ] {
            assert!(doc.paths.paths.contains_key(path), "{path} missing");
        }
    }
}
