//! Task Model
//!
//! Immutable submission records, their observable results, and the
//! structured failure type user functions report. A `Task` is never mutated
//! after creation; retries spawn new attempts against the same record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Workload categories. Each category owns its own queue and worker pool,
/// so no workload can starve another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    Scraping,
    RagQuery,
    Embedding,
    Batch,
    Maintenance,
}

impl TaskCategory {
    /// All categories, in a fixed iteration order.
    pub const ALL: [TaskCategory; 5] = [
        TaskCategory::Scraping,
        TaskCategory::RagQuery,
        TaskCategory::Embedding,
        TaskCategory::Batch,
        TaskCategory::Maintenance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scraping => "scraping",
            Self::RagQuery => "rag_query",
            Self::Embedding => "embedding",
            Self::Batch => "batch",
            Self::Maintenance => "maintenance",
        }
    }
}

impl std::fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling priority. Lower ordinal dequeues first; there is no aging,
/// urgent user queries must not wait behind scraping backlogs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Critical,
    High,
    Normal,
    Low,
    Bulk,
}

impl TaskPriority {
    /// Ordinal used as the primary heap key. 0 is most urgent.
    pub fn ordinal(&self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Normal => 2,
            Self::Low => 3,
            Self::Bulk => 4,
        }
    }
}

/// Observable lifecycle states of a task.
///
/// `pending -> running -> {completed | retrying | failed | circuit_open}`;
/// `retrying` returns to `pending` once the backoff delay elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Retrying,
    CircuitOpen,
}

impl TaskStatus {
    /// Terminal states never change afterwards.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::CircuitOpen)
    }
}

/// How a task failure should be treated by the retry machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Transient failure, eligible for retry (the default classification).
    Retryable,
    /// Permanent failure, finalized immediately without breaker updates.
    Fatal,
    /// Per-task wall clock exceeded. Retryable for breaker purposes.
    Timeout,
    /// A dependency breaker rejected the attempt. Never retried.
    CircuitOpen,
    /// The pool shut down before the task finalized.
    Cancelled,
}

/// Structured failure carried on a terminal `failed`/`circuit_open` result.
///
/// User functions classify their own failures; the pool consumes the
/// verdict only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl TaskFailure {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Retryable,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Fatal,
            message: message.into(),
        }
    }

    pub fn timeout(after: std::time::Duration) -> Self {
        Self {
            kind: FailureKind::Timeout,
            message: format!("task exceeded {}ms wall clock", after.as_millis()),
        }
    }

    pub fn circuit_open(dependency: &str) -> Self {
        Self {
            kind: FailureKind::CircuitOpen,
            message: format!("circuit breaker open for dependency '{dependency}'"),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            kind: FailureKind::Cancelled,
            message: "pool shut down before the task finalized".into(),
        }
    }

    /// Everything except an explicit fatal classification may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, FailureKind::Retryable | FailureKind::Timeout)
    }
}

/// A submission as it arrives over the wire. Category and priority are
/// typed, so an unknown value is rejected during deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub category: TaskCategory,
    pub priority: TaskPriority,
    /// Registry name of the function to invoke. Unregistered keys are
    /// rejected at submit time; untrusted submissions cannot name
    /// arbitrary logic.
    pub function_key: String,
    #[serde(default)]
    pub args: Value,
    /// Named external resource this task depends on. When set, the task
    /// is subject to that dependency's circuit breaker.
    #[serde(default)]
    pub dependency: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    3
}

/// An accepted task. Created once at submission and never mutated.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub category: TaskCategory,
    pub priority: TaskPriority,
    pub function_key: String,
    pub args: Value,
    pub dependency: Option<String>,
    pub max_retries: u32,
    pub submitted_at: DateTime<Utc>,
}

impl Task {
    /// Build a task from a validated submission, stamping ID and time.
    pub fn from_submission(submission: Submission) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            category: submission.category,
            priority: submission.priority,
            function_key: submission.function_key,
            args: submission.args,
            dependency: submission.dependency,
            max_retries: submission.max_retries,
            submitted_at: Utc::now(),
        }
    }
}

/// The observable outcome of a task, updated by exactly one worker and
/// read by arbitrary observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub category: TaskCategory,
    pub status: TaskStatus,
    /// The function's return value, present iff `status == completed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Structured failure, present iff `status` is `failed`/`circuit_open`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskFailure>,
    /// Executions actually performed. 0 until the first attempt begins.
    pub attempts: u32,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskResult {
    /// Initial record for a freshly accepted task.
    pub fn pending(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            category: task.category,
            status: TaskStatus::Pending,
            value: None,
            error: None,
            attempts: 0,
            submitted_at: task.submitted_at,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Wall-clock duration from first attempt start to finalization.
    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => {
                Some((end - start).num_milliseconds().max(0) as u64)
            }
            _ => None,
        }
    }
}
