// src/api.rs
//! Operational HTTP surface: health, metrics and recent run reports.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};

use crate::history::RunHistory;
use crate::ingest::RunReport;
use crate::metrics::Metrics;

pub const DEFAULT_RUNS_LIMIT: usize = 10;
pub const MAX_RUNS_LIMIT: usize = 100;

#[derive(Clone)]
pub struct AppState {
    history: Arc<RunHistory>,
}

pub fn create_router(history: Arc<RunHistory>, metrics: Option<&Metrics>) -> Router {
    let state = AppState { history };
    let router = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/runs/last", get(runs_last))
        .route("/runs", get(runs_recent))
        .with_state(state);
    match metrics {
        Some(m) => router.merge(m.router()),
        None => router,
    }
}

async fn runs_last(State(state): State<AppState>) -> Json<Option<RunReport>> {
    Json(state.history.last())
}

#[derive(serde::Deserialize)]
struct RunsQuery {
    #[serde(default)]
    limit: Option<usize>,
}

/// Newest first.
async fn runs_recent(
    State(state): State<AppState>,
    Query(q): Query<RunsQuery>,
) -> Json<Vec<RunReport>> {
    let n = q.limit.unwrap_or(DEFAULT_RUNS_LIMIT).min(MAX_RUNS_LIMIT);
    let mut rows = state.history.snapshot_last_n(n);
    rows.reverse();
    Json(rows)
}

/// Bind `addr` and serve until the task is aborted.
pub async fn serve(addr: &str, router: Router) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("binding {addr}: {e}"))?;
    let local = listener.local_addr()?;
    tracing::info!(target: "api", addr = %local, "http surface listening");
    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(target: "api", error = %e, "http server stopped");
        }
    }))
}
