mod auth;
mod clients;
mod config;
mod docs;
mod exec;
mod handlers;
mod models;
mod routes;
mod services;
mod utils;
mod websocket;
mod ws;

use axum::{http::HeaderValue, routing::get, Router};
use std::panic;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use clients::app_service_client::AppServiceClient;
use config::Config;
use docs::ApiDoc;
use exec::{ExecSessionManager, ExecSettings};
use routes::create_api_routes;
use services::{FileStore, IdentityResolver, JwtIdentityResolver, LocalFileStore};
use websocket::handler::websocket_handler;
use ws::{RegistryLimits, RoomRegistry};

const REAP_INTERVAL: Duration = Duration::from_secs(60);

/// Shared state handed to every handler
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<RoomRegistry>,
    pub sessions: Arc<ExecSessionManager>,
    pub identity: Arc<dyn IdentityResolver>,
    pub files: Arc<dyn FileStore>,
}

impl AppState {
    pub fn from_config(config: Config) -> Self {
        let app_service = match (&config.app_service_url, &config.auth_jwt_secret) {
            (Some(url), Some(secret)) => Some((url.clone(), secret.clone())),
            _ => None,
        }
        .and_then(|(url, secret)| {
            match AppServiceClient::new(url, secret, config.cloud_service_name.clone()) {
                Ok(client) => Some(Arc::new(client)),
                Err(e) => {
                    error!("Failed to create app service client: {}", e);
                    warn!("Users will not be verified against the app service");
                    None
                }
            }
        });

        let identity = JwtIdentityResolver::new(
            config.auth_jwt_secret.clone(),
            app_service,
            Duration::from_secs(config.identity_cache_ttl_secs),
        );

        Self {
            registry: Arc::new(RoomRegistry::new(RegistryLimits {
                max_rooms: config.max_rooms,
                max_connections: config.max_connections,
                max_content_bytes: config.max_content_bytes,
            })),
            sessions: Arc::new(ExecSessionManager::new(ExecSettings::from(&config))),
            identity: Arc::new(identity),
            files: Arc::new(LocalFileStore::new(config.storage_root.clone())),
            config: Arc::new(config),
        }
    }
}

/// Build the full application router
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = match state.config.allowed_origins() {
        None => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
        Some(origins) => {
            let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        }
    };

    let ws_routes = Router::new()
        .route("/ws/*file_path", get(websocket_handler))
        .with_state(state.clone());

    Router::new()
        // Mount API routes
        .nest("/api", create_api_routes(state))
        // Mount the collaboration gateway
        .merge(ws_routes)
        // Mount Swagger UI
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

#[tokio::main]
async fn main() {

    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            // Default to info level, but allow debug for our app
            "filehub_colab=debug,tower_http=debug,axum::rejection=trace,info".into()
        }))
        .init();

    info!("Starting server...");

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });
    let address = config.server_address();
    let idle_timeout = config.exec_idle_timeout();

    if !config.enable_collaboration {
        warn!("Collaboration is disabled - /ws connections will be refused");
    }
    if !config.enable_python_execution {
        warn!("Python execution is disabled");
    }

    let state = Arc::new(AppState::from_config(config));

    // Reap execution sessions nobody has used for a while
    let sessions = state.sessions.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(REAP_INTERVAL);
        loop {
            interval.tick().await;
            let reaped = sessions.reap_idle(idle_timeout);
            if reaped > 0 {
                info!("Reaped {} idle execution sessions", reaped);
            }
        }
    });

    let app_routes = build_router(state.clone());

    let listener = match tokio::net::TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", address, e);
            std::process::exit(1);
        }
    };

    info!("🚀 Server running on http://{}", address);
    info!("📡 WebSocket available at ws://{}/ws/<file path>", address);
    info!("📚 Swagger UI available at http://{}/swagger", address);

    if let Err(e) = axum::serve(listener, app_routes)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
    }

    let cleaned = state.sessions.cleanup_all();
    info!("Shut down, cleaned up {} execution sessions", cleaned);
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
