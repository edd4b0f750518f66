use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tokio::time::Instant;

use crate::error::OrchError;
use crate::logstream::LogHub;
use crate::queue::OrchQueue;

const DEFAULT_LOG_COUNT: usize = 100;
const HISTORY_VIEW: usize = 10;

pub struct AppState {
    pub hub: Arc<LogHub>,
    pub queue: OrchQueue,
    pub started_at: Instant,
    pub static_dir: Option<PathBuf>,
}

pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/queue", get(queue_status).post(queue_add))
        .route("/api/queue/stats", get(queue_stats))
        .route("/api/queue/clear", post(queue_clear))
        .route("/api/queue/{issue}", delete(queue_remove))
        .route("/api/logs", get(logs_recent))
        .route("/api/logs/issue/{issue}", get(logs_by_issue))
        .route("/api/logs/agent/{agent}", get(logs_by_agent))
        .route("/api/logs/stats", get(logs_stats))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "uptime": state.started_at.elapsed().as_secs(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn queue_status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let snapshot = state.queue.snapshot();
    let last = |records: &[crate::queue::RunRecord]| -> Vec<crate::queue::RunRecord> {
        records
            .iter()
            .rev()
            .take(HISTORY_VIEW)
            .rev()
            .cloned()
            .collect()
    };

    Json(json!({
        "running": snapshot.running,
        "queued": snapshot.queued,
        "completed": last(&snapshot.completed),
        "failed": last(&snapshot.failed),
        "totalCompleted": snapshot.total_completed,
        "totalFailed": snapshot.total_failed,
        "processing": snapshot.processing,
    }))
}

async fn queue_stats(State(state): State<Arc<AppState>>) -> Json<crate::queue::QueueStats> {
    Json(state.queue.stats())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnqueueRequest {
    issue_number: u64,
}

async fn queue_add(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EnqueueRequest>,
) -> Response {
    match state.queue.enqueue(request.issue_number) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(json!({"queued": request.issue_number})),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

async fn queue_remove(
    State(state): State<Arc<AppState>>,
    Path(issue): Path<u64>,
) -> Response {
    match state.queue.remove(issue) {
        Ok(true) => Json(json!({"removed": issue})).into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("issue #{} is not queued", issue)})),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

async fn queue_clear(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({"cleared": state.queue.clear()}))
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    count: Option<usize>,
}

async fn logs_recent(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogsQuery>,
) -> Json<serde_json::Value> {
    let logs = state.hub.recent(query.count.unwrap_or(DEFAULT_LOG_COUNT));
    Json(json!({"count": logs.len(), "logs": logs}))
}

async fn logs_by_issue(
    State(state): State<Arc<AppState>>,
    Path(issue): Path<u64>,
) -> Json<serde_json::Value> {
    let logs = state.hub.by_issue(issue);
    Json(json!({"count": logs.len(), "logs": logs}))
}

async fn logs_by_agent(
    State(state): State<Arc<AppState>>,
    Path(agent): Path<String>,
) -> Json<serde_json::Value> {
    let logs = state.hub.by_agent(&agent);
    Json(json!({"count": logs.len(), "logs": logs}))
}

async fn logs_stats(State(state): State<Arc<AppState>>) -> Json<crate::logstream::LogStats> {
    Json(state.hub.stats())
}

fn error_response(error: OrchError) -> Response {
    let status = match &error {
        OrchError::DuplicateQueueEntry(_) | OrchError::IssueRunning(_) => StatusCode::CONFLICT,
        OrchError::IssueNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({"error": error.to_string()}))).into_response()
}
