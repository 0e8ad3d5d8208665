//! API route definitions.

use super::state::AppState;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/scores", get(scores))
        .route("/alerts/recent", get(recent_alerts))
        .route("/sources/top", get(top_sources))
        .route("/rules/reload", post(reload_rules))
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    n: Option<usize>,
}

fn meta() -> Value {
    json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    })
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": meta()
    }))
}

async fn stats(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.pipeline.metrics.stats_snapshot();
    let top = state.pipeline.metrics.top_suspicious_sources(10);
    Json(json!({
        "data": {
            "counters": snapshot,
            "top_sources": top
        },
        "meta": meta()
    }))
}

/// Anomaly score series plus the parallel constant-threshold series the
/// dashboard overlays on it.
async fn scores(State(state): State<AppState>) -> Json<Value> {
    let series = state.pipeline.metrics.score_series();
    let points = series.scores.len();
    Json(json!({
        "data": series,
        "meta": { "points": points }
    }))
}

async fn recent_alerts(
    State(state): State<AppState>,
    Query(q): Query<LimitQuery>,
) -> Json<Value> {
    let alerts = state.pipeline.alerts.recent(q.n.unwrap_or(50));
    let total = alerts.len();
    Json(json!({
        "data": alerts,
        "meta": { "total": total }
    }))
}

async fn top_sources(
    State(state): State<AppState>,
    Query(q): Query<LimitQuery>,
) -> Json<Value> {
    let sources = state.pipeline.metrics.top_suspicious_sources(q.n.unwrap_or(10));
    let total = sources.len();
    Json(json!({
        "data": sources,
        "meta": { "total": total }
    }))
}

async fn reload_rules(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.pipeline.rules.reload(&state.rules_path) {
        Ok(report) => (
            StatusCode::OK,
            Json(json!({
                "data": report,
                "meta": meta()
            })),
        ),
        Err(err) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({
                "data": null,
                "meta": { "error": err.to_string() }
            })),
        ),
    }
}
