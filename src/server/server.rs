use anyhow::{Context, Result};
use std::time::Duration;

use axum::{
    extract::State,
    middleware,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tracing::info;

use super::admin_routes::admin_routes;
use super::metrics::metrics_handler;
use super::state::ServerState;
use super::upload_routes::upload_routes;
use super::log_requests;

#[derive(Serialize)]
struct HealthResponse {
    pub status: &'static str,
    pub app: String,
    pub version: String,
    pub uptime: String,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

/// GET /health
async fn health(State(state): State<ServerState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        app: state.config.app_name.clone(),
        version: state.hash.clone(),
        uptime: format_uptime(state.start_time.elapsed()),
    })
}

pub fn make_app(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(upload_routes())
        .nest("/admin", admin_routes())
        .layer(middleware::from_fn_with_state(state.clone(), log_requests))
        .with_state(state)
}

fn make_metrics_app() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

/// Serve the application and the metrics endpoint until either stops.
pub async fn run_server(state: ServerState) -> Result<()> {
    let port = state.config.port;
    let metrics_port = state.config.metrics_port;
    let app = make_app(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    let metrics_listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", metrics_port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", metrics_port))?;

    info!("Ready to serve at port {}!", port);
    info!("Metrics available at port {}!", metrics_port);

    tokio::select! {
        result = axum::serve(listener, app) => result.context("HTTP server failed"),
        result = axum::serve(metrics_listener, make_metrics_app()) => {
            result.context("Metrics server failed")
        }
    }
}
