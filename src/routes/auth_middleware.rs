use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
    Json,
};
use std::sync::Arc;
use tracing::{debug, warn};
use crate::AppState;
use crate::models::ErrorResponse;
use crate::services::auth_service::get_auth_token;

/// Resolve the caller's identity and hand it to downstream handlers.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {

    // 1. Get the auth token from the request
    let token = get_auth_token(req.headers()).map_err(|e| {
        debug!("No credential on {}: {}", req.uri().path(), e);
        ErrorResponse::reply(StatusCode::UNAUTHORIZED, e)
    })?;

    // 2. Resolve it to an identity
    let identity = state.identity.resolve(&token).await.map_err(|e| {
        warn!("Rejected credential on {}: {}", req.uri().path(), e);
        e
    })?;

    // 3. Set the identity into request extensions for downstream handlers
    debug!("Authenticated {} for {}", identity.username, req.uri().path());
    req.extensions_mut().insert(identity);

    Ok(next.run(req).await)
}
