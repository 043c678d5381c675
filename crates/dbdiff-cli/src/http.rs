//! HTTP shell: metrics exposition, ad-hoc triggers, health and status.

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use dbdiff::{DiffError, Scheduler, TableComparisonRun};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Debug, Serialize)]
struct CheckResponse {
    message: &'static str,
    enqueued: usize,
    skipped: usize,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    active_runs: usize,
    tables: Vec<TableComparisonRun>,
}

pub fn router(scheduler: Scheduler) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/check", post(check))
        .route("/health", get(health))
        .route("/status", get(status))
        .with_state(scheduler)
}

/// Serve until `shutdown` is cancelled.
pub async fn serve(
    scheduler: Scheduler,
    listen: &str,
    shutdown: CancellationToken,
) -> Result<(), DiffError> {
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| DiffError::Config(format!("cannot listen on {}: {}", listen, e)))?;
    info!("Serving metrics on http://{}/metrics", listener.local_addr()?);

    axum::serve(listener, router(scheduler))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

async fn metrics(State(scheduler): State<Scheduler>) -> impl IntoResponse {
    let ctx = scheduler.context();
    ctx.engine.refresh_pool_usage();
    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        ctx.render_metrics(),
    )
}

async fn check(State(scheduler): State<Scheduler>) -> Json<CheckResponse> {
    let report = scheduler.run_all();
    Json(CheckResponse {
        message: "Comparison triggered",
        enqueued: report.enqueued,
        skipped: report.skipped,
    })
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

async fn status(State(scheduler): State<Scheduler>) -> Json<StatusResponse> {
    Json(StatusResponse {
        active_runs: scheduler.active_runs(),
        tables: scheduler.latest_runs(),
    })
}
