use axum::{http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Response for an error
#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct ErrorResponse {
    pub code: u16,
    pub status: String,
    pub error: String,
}

impl ErrorResponse {
    pub fn reply(status: StatusCode, error: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
        (status, Json(ErrorResponse {
            code: status.as_u16(),
            status: status.to_string(),
            error: error.into(),
        }))
    }
}

/// Failures on the collaboration channel
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CollabError {
    #[error("authentication failed: {0}")]
    AuthenticationFailure(String),

    #[error("access denied to '{0}'")]
    AccessDenied(String),

    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("connection {0} is not a member of the room")]
    NotMember(String),

    #[error("room '{0}' is closed")]
    RoomClosed(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl CollabError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            CollabError::AuthenticationFailure(_) => StatusCode::UNAUTHORIZED,
            CollabError::AccessDenied(_) => StatusCode::FORBIDDEN,
            CollabError::CapacityExceeded(_) => StatusCode::SERVICE_UNAVAILABLE,
            CollabError::MalformedMessage(_) | CollabError::NotMember(_) => StatusCode::BAD_REQUEST,
            CollabError::RoomClosed(_) => StatusCode::CONFLICT,
            CollabError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CollabError> for (StatusCode, Json<ErrorResponse>) {
    fn from(e: CollabError) -> Self {
        ErrorResponse::reply(e.status_code(), e.to_string())
    }
}

/// Protocol-level failures of the execution control plane.
///
/// The executed code's own failures (non-zero exit, crash, timeout) are not
/// errors; they are reported through `RunOutcome`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecError {
    #[error("session '{0}' is busy")]
    SessionBusy(String),

    #[error("execution environment failure: {0}")]
    EnvironmentFailure(String),

    #[error("session '{0}' belongs to another user")]
    Forbidden(String),

    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("code execution is disabled")]
    Disabled,
}

impl ExecError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ExecError::SessionBusy(_) => StatusCode::CONFLICT,
            ExecError::EnvironmentFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ExecError::Forbidden(_) => StatusCode::FORBIDDEN,
            ExecError::CapacityExceeded(_) | ExecError::Disabled => StatusCode::SERVICE_UNAVAILABLE,
            ExecError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<ExecError> for (StatusCode, Json<ErrorResponse>) {
    fn from(e: ExecError) -> Self {
        ErrorResponse::reply(e.status_code(), e.to_string())
    }
}
