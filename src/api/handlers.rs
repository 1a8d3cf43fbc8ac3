//! API Endpoint Handlers
//!
//! Request/response shapes and the core-error to status-code mapping.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};

use crate::activity::ActivityEvent;
use crate::error::PoolError;
use crate::pool::{HealthReport, PoolStats};
use crate::task::{Submission, TaskResult};

use super::ApiState;

/// Structured error body for every non-2xx response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn error_response(err: PoolError) -> ApiError {
    let status = match &err {
        PoolError::InvalidTask(_) => StatusCode::BAD_REQUEST,
        PoolError::QueueFull(_) | PoolError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        PoolError::NotFound(_) => StatusCode::NOT_FOUND,
    };
    (
        status,
        Json(ErrorBody {
            error: err.code().to_string(),
            message: err.to_string(),
        }),
    )
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub task_id: String,
}

/// POST /submit
pub async fn submit(
    State(state): State<ApiState>,
    Json(submission): Json<Submission>,
) -> Result<Json<SubmitResponse>, ApiError> {
    state
        .pool
        .submit(submission)
        .map(|task_id| Json(SubmitResponse { task_id }))
        .map_err(error_response)
}

/// One element of a batch response; exactly one of `task_id`/`error` set.
#[derive(Debug, Serialize, Deserialize)]
pub struct BatchItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// POST /submit_batch
pub async fn submit_batch(
    State(state): State<ApiState>,
    Json(submissions): Json<Vec<Submission>>,
) -> Json<Vec<BatchItem>> {
    let items = state
        .pool
        .submit_batch(submissions)
        .into_iter()
        .map(|outcome| match outcome {
            Ok(task_id) => BatchItem {
                task_id: Some(task_id),
                error: None,
                message: None,
            },
            Err(err) => BatchItem {
                task_id: None,
                error: Some(err.code().to_string()),
                message: Some(err.to_string()),
            },
        })
        .collect();
    Json(items)
}

#[derive(Debug, Deserialize)]
pub struct TaskQuery {
    /// Block up to this many milliseconds for a terminal state.
    pub wait_ms: Option<u64>,
}

/// Result snapshot, with a timeout marker when a bounded wait expired.
#[derive(Debug, Serialize, Deserialize)]
pub struct TaskView {
    #[serde(flatten)]
    pub result: TaskResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timed_out: Option<bool>,
}

/// GET /tasks/{id}
pub async fn get_task(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
    Query(query): Query<TaskQuery>,
) -> Result<Json<TaskView>, ApiError> {
    match query.wait_ms {
        Some(ms) => {
            let awaited = state
                .pool
                .await_result(&task_id, Duration::from_millis(ms))
                .await
                .map_err(error_response)?;
            Ok(Json(TaskView {
                result: awaited.result,
                timed_out: Some(awaited.timed_out),
            }))
        }
        None => state
            .pool
            .get_result(&task_id)
            .map(|result| {
                Json(TaskView {
                    result,
                    timed_out: None,
                })
            })
            .ok_or_else(|| error_response(PoolError::NotFound(task_id))),
    }
}

/// GET /stats
pub async fn stats(State(state): State<ApiState>) -> Json<PoolStats> {
    Json(state.pool.stats())
}

/// GET /health
pub async fn health(State(state): State<ApiState>) -> Json<HealthReport> {
    Json(state.pool.health())
}

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    pub limit: Option<usize>,
}

/// GET /activity?limit=N — most recent events, oldest first.
pub async fn activity(
    State(state): State<ApiState>,
    Query(query): Query<ActivityQuery>,
) -> Json<Vec<ActivityEvent>> {
    Json(state.pool.activity(query.limit.unwrap_or(50)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ShutdownRequest {
    pub drain_timeout_secs: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ShutdownResponse {
    pub stopped: bool,
}

/// POST /shutdown
pub async fn shutdown(
    State(state): State<ApiState>,
    body: Option<Json<ShutdownRequest>>,
) -> Json<ShutdownResponse> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let drain = request
        .drain_timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(state.default_drain);

    let stopped = state.pool.stop(drain).await;
    Json(ShutdownResponse { stopped })
}
