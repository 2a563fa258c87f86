use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::clients::app_service_client::AppServiceClient;
use crate::models::CollabError;
use super::auth_service::{roles_from_claims, validate_jwt};

const ADMIN_ROLE: &str = "admin";

/// Who is behind a connection or request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    pub roles: Vec<String>,
}

impl Identity {
    pub fn new(username: impl Into<String>) -> Self {
        Self { username: username.into(), roles: Vec::new() }
    }

    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == ADMIN_ROLE)
    }
}

/// Maps an opaque credential to an identity. Called once per connection attempt.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, credential: &str) -> Result<Identity, CollabError>;
}

/// Validates HS256 tokens issued by the file host (`sub` is the username).
///
/// When an app service is configured, the user must also still exist and be
/// enabled there; answers are cached per username.
pub struct JwtIdentityResolver {
    secret: Option<String>,
    app_service: Option<Arc<AppServiceClient>>,
    users: Cache<String, bool>,
}

impl JwtIdentityResolver {
    pub fn new(secret: Option<String>, app_service: Option<Arc<AppServiceClient>>, cache_ttl: Duration) -> Self {
        if secret.is_none() {
            warn!("No JWT secret configured - every credential will be rejected");
        }
        Self {
            secret,
            app_service,
            users: Cache::builder()
                .max_capacity(100_000)
                .time_to_live(cache_ttl)
                .build(),
        }
    }

    async fn user_is_active(&self, username: &str) -> Result<bool, CollabError> {
        let Some(client) = &self.app_service else {
            return Ok(true);
        };
        if let Some(active) = self.users.get(username).await {
            return Ok(active);
        }

        info!("User cache miss for {}. Refreshing from app service.", username);
        let active = match client.get_user(username).await {
            Ok(Some(user)) => !user.disabled,
            Ok(None) => false,
            Err(e) => {
                error!("Failed to look up user {}: {}", username, e);
                return Err(CollabError::AuthenticationFailure("user lookup failed".to_string()));
            }
        };
        self.users.insert(username.to_string(), active).await;
        Ok(active)
    }
}

#[async_trait]
impl IdentityResolver for JwtIdentityResolver {
    async fn resolve(&self, credential: &str) -> Result<Identity, CollabError> {
        let secret = self
            .secret
            .as_deref()
            .ok_or_else(|| CollabError::AuthenticationFailure("no JWT secret configured".to_string()))?;

        let token_data = validate_jwt(credential, secret)
            .map_err(|e| CollabError::AuthenticationFailure(format!("JWT validation failed: {e}")))?;

        let username = token_data
            .claims
            .get("sub")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CollabError::AuthenticationFailure("token has no 'sub' claim".to_string()))?
            .to_string();

        if !self.user_is_active(&username).await? {
            return Err(CollabError::AuthenticationFailure(format!("user '{username}' is unknown or disabled")));
        }

        Ok(Identity { roles: roles_from_claims(&token_data.claims), username })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::make_token;

    fn resolver() -> JwtIdentityResolver {
        JwtIdentityResolver::new(Some("secret".into()), None, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn resolves_username_and_roles() {
        let identity = resolver().resolve(&make_token("alice", &["admin"], "secret")).await.unwrap();
        assert_eq!(identity.username, "alice");
        assert!(identity.is_admin());
    }

    #[tokio::test]
    async fn rejects_bad_tokens() {
        let r = resolver();
        assert!(matches!(
            r.resolve(&make_token("alice", &[], "wrong")).await,
            Err(CollabError::AuthenticationFailure(_))
        ));
        assert!(matches!(r.resolve("garbage").await, Err(CollabError::AuthenticationFailure(_))));
        assert!(matches!(
            r.resolve(&make_token("", &[], "secret")).await,
            Err(CollabError::AuthenticationFailure(_))
        ));
    }

    #[tokio::test]
    async fn fails_closed_without_secret() {
        let r = JwtIdentityResolver::new(None, None, Duration::from_secs(60));
        assert!(r.resolve(&make_token("alice", &[], "secret")).await.is_err());
    }
}
