//! Web layer: thin HTTP boundary over the job scheduler.
//!
//! Handlers translate requests into scheduler calls and scheduler results
//! into statuses; no job logic lives here.

use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::errors::{AppError, AppResult};
use crate::jobs::JobScheduler;

pub mod api;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: JobScheduler,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(scheduler: JobScheduler) -> Self {
        Self {
            scheduler,
            started_at: Utc::now(),
        }
    }
}

pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(config: &Config, scheduler: JobScheduler) -> AppResult<Self> {
        let app = Self::create_router(AppState::new(scheduler));
        let addr: SocketAddr = format!("{}:{}", config.web.host, config.web.port)
            .parse()
            .map_err(|e| {
                AppError::configuration(format!(
                    "invalid listen address {}:{}: {e}",
                    config.web.host, config.web.port
                ))
            })?;
        Ok(Self { app, addr })
    }

    /// Router shared by the server and the integration tests.
    pub fn create_router(state: AppState) -> Router {
        Router::new()
            .route("/health", get(api::health))
            .route("/jobs", get(api::list_jobs).post(api::submit_job))
            .route("/jobs/:id", get(api::get_job).delete(api::cancel_job))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Serve until `shutdown` fires, then stop accepting and drain open
    /// connections.
    pub async fn serve(self, shutdown: CancellationToken) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                info!("web server shutting down");
            })
            .await?;
        Ok(())
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}
