//! Web server module.

mod handlers;

pub use handlers::*;

use crate::config::ServerConfig;
use crate::monitor::Monitor;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub monitor: Arc<Monitor>,
}

/// Web server for sitewatch.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(config: ServerConfig, monitor: Arc<Monitor>) -> Self {
        Self {
            state: AppState { config, monitor },
        }
    }

    /// Build the router with all routes.
    pub fn routes(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/", get(handlers::handle_health))
            // Targets
            .route("/api/targets", get(handlers::handle_list_targets))
            .route("/api/targets", post(handlers::handle_create_target))
            .route("/api/targets/batch", post(handlers::handle_create_targets))
            .route("/api/targets/{id}", delete(handlers::handle_delete_target))
            .route("/api/targets/{id}/check", post(handlers::handle_check_target))
            .route("/api/check", post(handlers::handle_check_all))
            // Notifications
            .route(
                "/api/notifications/preferences",
                get(handlers::handle_get_preferences),
            )
            .route(
                "/api/notifications/preferences/{id}",
                put(handlers::handle_set_preference),
            )
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB
            .with_state(self.state.clone())
    }

    /// Serve on the configured port until `shutdown` resolves.
    pub async fn start<F>(&self, shutdown: F) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}
