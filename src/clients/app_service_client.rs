use reqwest::{Client, StatusCode};
use jsonwebtoken::{encode, Header, EncodingKey};
use serde::{Serialize, Deserialize};
use chrono::{Utc, Duration};
use thiserror::Error;

/// Client for the file host's own API, used to confirm that the user behind a
/// token still exists and is enabled.
#[derive(Debug)]
pub struct AppServiceClient {
    client: Client,
    base_url: String,
    jwt_secret: String,
    service_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    #[serde(rename = "type")]
    type_: String,
    exp: usize,
}

/// User record as returned by the app service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRecord {
    pub username: String,
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Error)]
pub enum AppServiceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to sign service token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
}

impl AppServiceClient {
    pub fn new(base_url: String, jwt_secret: String, service_name: String) -> Result<Self, AppServiceError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            jwt_secret,
            service_name,
        })
    }

    fn generate_token(&self) -> Result<String, AppServiceError> {
        // 1 minute expiration
        let expiration = (Utc::now() + Duration::seconds(60)).timestamp();

        let claims = Claims {
            sub: self.service_name.clone(),
            type_: "service".to_string(),
            exp: expiration as usize,
        };

        Ok(encode(&Header::default(), &claims, &EncodingKey::from_secret(self.jwt_secret.as_bytes()))?)
    }

    /// Look a user up by name. `None` when the app service does not know it.
    pub async fn get_user(&self, username: &str) -> Result<Option<UserRecord>, AppServiceError> {
        let token = self.generate_token()?;
        let url = format!("{}/auth/users/{}", self.base_url, username);
        let response = self.client.get(&url)
            .header("Authorization", format!("Bearer {}", token))
            .send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let user = response.error_for_status()?.json::<UserRecord>().await?;
        Ok(Some(user))
    }
}
