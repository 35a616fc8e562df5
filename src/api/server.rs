//! Router assembly and the listening loop.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, patch, post};
use axum::Router;
use log::{info, warn};
use tokio::net::TcpListener;

use crate::cluster::ClusterClient;
use crate::config::Config;
use crate::error::Result;
use crate::store::RunStore;

use super::{handlers, internal, submit, AppState};

/// Upper bound for a multipart submission.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Normalizes the configured prefix to `/a/b`, or empty for the root.
fn normalize_base_path(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

fn wes_routes() -> Router<AppState> {
    Router::new()
        .route("/service-info", get(handlers::get_service_info))
        .route("/runs", get(handlers::list_runs).post(submit::run_workflow))
        .route("/runs/{run_id}", get(handlers::get_run_log))
        .route("/runs/{run_id}/status", get(handlers::get_run_status))
        .route("/runs/{run_id}/cancel", post(handlers::cancel_run))
        .route("/runs/{run_id}/tasks", get(handlers::list_tasks))
        .route("/runs/{run_id}/tasks/{task_id}", get(handlers::get_task))
}

/// Builds the full application router.
pub fn router(state: AppState) -> Router {
    let base_path = normalize_base_path(&state.config.api.server.base_path);
    let wes = if base_path.is_empty() {
        wes_routes()
    } else {
        Router::new().nest(&base_path, wes_routes())
    };

    wes.route("/healthz", get(handlers::healthz))
        .route("/internal/runs/{run_id}", patch(internal::update_run))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down API server");
}

/// Serves the API until interrupted.
pub async fn serve(
    config: Config,
    store: Arc<dyn RunStore>,
    cluster: Arc<dyn ClusterClient>,
) -> Result<()> {
    let addr = format!("{}:{}", config.api.server.host, config.api.server.port);
    let base_path = normalize_base_path(&config.api.server.base_path);
    let app = router(AppState::new(config, store, cluster));

    let listener = TcpListener::bind(&addr).await?;
    info!("Metis API listening on {} (WES routes under '{}')", addr, base_path);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
