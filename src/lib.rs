//! docpool
//!
//! Category-partitioned worker pool for documentation ingestion pipelines.
//!
//! # Features
//!
//! - **Priority Scheduling**: five priority levels, FIFO within a level
//! - **Category Isolation**: one queue and worker pool per workload class
//! - **Retries**: exponential backoff capped at a configurable ceiling
//! - **Circuit Breakers**: per-dependency fast-fail with single-probe recovery
//! - **Observability**: per-category metrics, activity ring buffer, health
//! - **Operator API**: axum HTTP surface for submit/stats/health/shutdown
//!
//! # Architecture
//!
//! ```text
//! HTTP API ──► Dispatcher ──► CategoryQueue (x5) ──► Worker Loop (x22)
//!                 │                                      │
//!                 │                                      ├── FunctionRegistry
//!                 │                                      ├── BreakerRegistry
//!                 ▼                                      ▼
//!             ResultStore ◄──────────────── Metrics + ActivityLog
//! ```

pub mod activity;
pub mod api;
pub mod breaker;
pub mod config;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod results;
pub mod task;

mod worker;

pub use activity::{ActivityEvent, ActivityKind, ActivityLog};
pub use api::{ApiServer, ApiState};
pub use breaker::{BreakerConfig, BreakerRegistry, BreakerSnapshot, CircuitBreaker, CircuitState};
pub use config::{Config, PoolConfig, WorkerCounts};
pub use error::PoolError;
pub use metrics::{CategoryStats, MetricsRegistry, TaskOutcome};
pub use pool::{HealthReport, PoolState, PoolStats, WorkerPool};
pub use registry::{FunctionRegistry, TaskFunction};
pub use results::AwaitedResult;
pub use task::{
    FailureKind, Submission, Task, TaskCategory, TaskFailure, TaskPriority, TaskResult, TaskStatus,
};
