//! Web layer module
//!
//! HTTP interface of the metadata service. Handlers are thin: device lookups go
//! straight to the [`MetadataResolver`], hooks to the [`IconRefresher`], and the
//! icon directory is served as static files under `/icons/`.

use anyhow::Result;
use axum::{
    Router,
    routing::{get, post},
};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::icons::IconRefresher;
use crate::resolver::MetadataResolver;

pub mod handlers;

/// Web server configuration and setup
pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(config: &Config, state: AppState) -> Result<Self> {
        let app = create_router(state, &config.storage.icon_dir);
        let addr: SocketAddr = format!("{}:{}", config.web.host, config.web.port).parse()?;

        Ok(Self { app, addr })
    }

    /// Start the web server
    pub async fn serve(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }

    /// Get the host address
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    /// Get the port number
    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

/// Create the router with all routes and middleware
pub fn create_router(state: AppState, icon_dir: &Path) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        // Device metadata, with and without the trailing slash
        .route("/devices/{vid}/{pid}/", get(handlers::devices::get_device_metadata))
        .route("/devices/{vid}/{pid}", get(handlers::devices::get_device_metadata))
        // Icon dataset refresh
        .route("/hooks/{secret}/", post(handlers::hooks::refresh_icons))
        .route("/hooks/{secret}", post(handlers::hooks::refresh_icons))
        .route("/hooks/icons/{secret}/", post(handlers::hooks::refresh_icons))
        .route("/hooks/icons/{secret}", post(handlers::hooks::refresh_icons))
        // Extracted icons
        .nest_service("/icons", ServeDir::new(icon_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<MetadataResolver>,
    pub refresher: IconRefresher,
    /// Hooks are refused when unset
    pub webhook_secret: Option<String>,
}
