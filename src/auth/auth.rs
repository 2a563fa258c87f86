use axum::{http::StatusCode, Json};
use crate::models::ErrorResponse;
use crate::services::Identity;

pub fn ensure_admin(identity: &Identity) -> Result<(), (StatusCode, Json<ErrorResponse>)> {
    if identity.is_admin() {
        return Ok(());
    }
    Err(ErrorResponse::reply(StatusCode::FORBIDDEN, "Admin access required"))
}
