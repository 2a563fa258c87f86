use axum::http::{self, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};

/// Name of the cookie the file host stores its session token in
pub const AUTH_COOKIE: &str = "auth_token";

// Get the auth token from request headers
pub fn get_auth_token(headers: &HeaderMap) -> Result<String, String> {
    // 1. Try to get token from Authorization header
    if let Some(auth_header) = headers.get(http::header::AUTHORIZATION) {
        let auth_str = auth_header.to_str().map_err(|_| "Invalid Authorization header".to_string())?;
        Ok(auth_str
            .strip_prefix("Bearer ")
            .unwrap_or(auth_str)
            .to_string())
    }
    // 2. Try to get token from cookies
    else {
        let cookie_header = headers.get(http::header::COOKIE)
            .ok_or_else(|| "Missing Authorization header or Cookie".to_string())?
            .to_str()
            .map_err(|_| "Invalid Cookie header".to_string())?;

        for c in cookie::Cookie::split_parse(cookie_header).flatten() {
            if c.name() == AUTH_COOKIE {
                return Ok(c.value().to_string());
            }
        }
        Err(format!("{AUTH_COOKIE} cookie not found"))
    }
}

/// Browsers cannot set headers on a WebSocket handshake, so the editor passes
/// the token as `?token=`; headers and cookies still work for other clients.
pub fn get_ws_token(query_token: Option<&str>, headers: &HeaderMap) -> Result<String, String> {
    match query_token.map(str::trim) {
        Some(token) if !token.is_empty() => Ok(token.to_string()),
        _ => get_auth_token(headers),
    }
}

// Validate a JWT token and return the token data
pub fn validate_jwt(token: &str, secret: &str) -> Result<TokenData<serde_json::Value>, jsonwebtoken::errors::Error> {
    let validation = Validation::new(Algorithm::HS256);
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    decode::<serde_json::Value>(token, &decoding_key, &validation)
}

/// Roles listed in the `roles` claim, if any
pub fn roles_from_claims(claims: &serde_json::Value) -> Vec<String> {
    claims
        .get("roles")
        .and_then(|v| v.as_array())
        .map(|roles| roles.iter().filter_map(|r| r.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}
