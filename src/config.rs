use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, error};

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// CORS allowed origins, comma separated
    pub cors_origins: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_service_name")]
    pub cloud_service_name: String,

    /// JWT secret key shared with the file host's auth system
    pub auth_jwt_secret: Option<String>,

    /// Base URL of the file host's app service, used to confirm users still exist
    pub app_service_url: Option<String>,

    /// Root directory holding one folder per user
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,

    #[serde(default = "default_true")]
    pub enable_collaboration: bool,

    #[serde(default = "default_true")]
    pub enable_python_execution: bool,

    /// Maximum number of live rooms
    #[serde(default = "default_max_rooms")]
    pub max_rooms: usize,

    /// Maximum number of concurrent collaboration connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Largest content_update payload accepted, in bytes
    #[serde(default = "default_max_content_bytes")]
    pub max_content_bytes: usize,

    /// Interpreter used for runs when no venv is created
    #[serde(default = "default_exec_interpreter")]
    pub exec_interpreter: String,

    /// Create a Python virtual environment per execution session
    #[serde(default)]
    pub exec_use_venv: bool,

    #[serde(default = "default_exec_timeout_secs")]
    pub exec_timeout_secs: u64,

    #[serde(default = "default_exec_install_timeout_secs")]
    pub exec_install_timeout_secs: u64,

    #[serde(default = "default_exec_max_sessions")]
    pub exec_max_sessions: usize,

    /// Idle execution sessions older than this are torn down
    #[serde(default = "default_exec_idle_timeout_secs")]
    pub exec_idle_timeout_secs: u64,

    #[serde(default = "default_identity_cache_ttl_secs")]
    pub identity_cache_ttl_secs: u64,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        // Load from environment variables using envy
        match envy::from_env::<Config>() {
            Ok(config) => {
                info!("✅ Configuration loaded successfully");
                Ok(config)
            }
            Err(e) => {
                error!("❌ Failed to load configuration: {}", e);
                Err(ConfigError::EnvError(e))
            }
        }
    }

    /// Get the full server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.environment.to_lowercase() == "dev" || self.environment.to_lowercase() == "development"
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }

    pub fn exec_install_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_install_timeout_secs)
    }

    pub fn exec_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_idle_timeout_secs)
    }

    /// Parsed CORS origins, `None` meaning any origin
    pub fn allowed_origins(&self) -> Option<Vec<String>> {
        match self.cors_origins.as_deref().map(str::trim) {
            None | Some("") | Some("*") => None,
            Some(origins) => Some(
                origins
                    .split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect(),
            ),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            cors_origins: None,
            cloud_service_name: default_service_name(),
            auth_jwt_secret: None,
            app_service_url: None,
            storage_root: default_storage_root(),
            enable_collaboration: true,
            enable_python_execution: true,
            max_rooms: default_max_rooms(),
            max_connections: default_max_connections(),
            max_content_bytes: default_max_content_bytes(),
            exec_interpreter: default_exec_interpreter(),
            exec_use_venv: false,
            exec_timeout_secs: default_exec_timeout_secs(),
            exec_install_timeout_secs: default_exec_install_timeout_secs(),
            exec_max_sessions: default_exec_max_sessions(),
            exec_idle_timeout_secs: default_exec_idle_timeout_secs(),
            identity_cache_ttl_secs: default_identity_cache_ttl_secs(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    EnvError(envy::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::EnvError(e) => write!(f, "Environment variable error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    30815
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "filehub-colab".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("storage")
}

fn default_true() -> bool {
    true
}

fn default_max_rooms() -> usize {
    10_000
}

fn default_max_connections() -> usize {
    50_000
}

fn default_max_content_bytes() -> usize {
    5 * 1024 * 1024
}

fn default_exec_interpreter() -> String {
    "python3".to_string()
}

fn default_exec_timeout_secs() -> u64 {
    30
}

fn default_exec_install_timeout_secs() -> u64 {
    60
}

fn default_exec_max_sessions() -> usize {
    256
}

fn default_exec_idle_timeout_secs() -> u64 {
    60 * 60
}

fn default_identity_cache_ttl_secs() -> u64 {
    5 * 60
}
