//! Operator HTTP API
//!
//! Thin axum surface over the pool: submissions in, snapshots out. The
//! pool owns all semantics; this layer only translates errors into status
//! codes.

pub mod handlers;
pub mod server;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;

use crate::pool::WorkerPool;

pub use server::ApiServer;

/// Shared state for all endpoint handlers.
#[derive(Clone)]
pub struct ApiState {
    pub pool: Arc<WorkerPool>,
    /// Drain window used when `POST /shutdown` omits one.
    pub default_drain: Duration,
}

impl ApiState {
    pub fn new(pool: Arc<WorkerPool>, default_drain: Duration) -> Self {
        Self { pool, default_drain }
    }
}

/// Create the full API router.
///
/// Routes:
/// - POST /submit - accept one task
/// - POST /submit_batch - accept many tasks, partial failure per element
/// - GET /tasks/{id} - result snapshot, optional bounded wait
/// - GET /stats - per-category and breaker snapshot
/// - GET /health - conjunctive health report
/// - GET /activity - recent events, oldest first
/// - POST /shutdown - drain and stop the pool
pub fn api_router(state: ApiState) -> Router {
    Router::new()
        .route("/submit", post(handlers::submit))
        .route("/submit_batch", post(handlers::submit_batch))
        .route("/tasks/{id}", get(handlers::get_task))
        .route("/stats", get(handlers::stats))
        .route("/health", get(handlers::health))
        .route("/activity", get(handlers::activity))
        .route("/shutdown", post(handlers::shutdown))
        .with_state(state)
}
