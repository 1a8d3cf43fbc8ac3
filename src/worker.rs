//! Worker Loop
//!
//! Each category owns a fixed set of workers running this loop: pull the
//! most urgent task, consult the dependency's circuit breaker, invoke the
//! registered function, then settle the result (complete, retry with
//! backoff, or fail). The queue wait is interruptible so shutdown can
//! drain in-flight work without waiting on idle workers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::activity::{ActivityKind, ActivityLog};
use crate::breaker::{BreakerRegistry, CircuitState};
use crate::metrics::{MetricsRegistry, TaskOutcome};
use crate::queue::CategoryQueue;
use crate::registry::FunctionRegistry;
use crate::results::ResultStore;
use crate::task::{Task, TaskCategory, TaskFailure, TaskStatus};

/// Everything one worker needs, cloned per worker slot.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub category: TaskCategory,
    pub queue: Arc<CategoryQueue>,
    pub results: Arc<ResultStore>,
    pub breakers: Arc<BreakerRegistry>,
    pub metrics: Arc<MetricsRegistry>,
    pub activity: Arc<ActivityLog>,
    pub functions: Arc<FunctionRegistry>,
    pub max_backoff: Duration,
    pub task_timeout: Option<Duration>,
    pub shutdown: watch::Receiver<bool>,
    /// Alive-worker gauge for this category, feeds `health()`.
    pub alive: Arc<AtomicUsize>,
}

/// Delay before the `attempt`-th retry: `min(2^(attempt-1), cap)`.
pub(crate) fn backoff_delay(attempt: u32, cap: Duration) -> Duration {
    let exp = attempt.saturating_sub(1).min(31);
    Duration::from_secs(1u64 << exp).min(cap)
}

/// Run one worker until shutdown. In-flight attempts always settle; the
/// loop only exits between tasks.
pub(crate) async fn run_worker(mut ctx: WorkerContext, index: usize) {
    ctx.alive.fetch_add(1, Ordering::SeqCst);
    debug!("{} worker {} started", ctx.category, index);

    loop {
        if *ctx.shutdown.borrow() {
            break;
        }

        let task = tokio::select! {
            task = ctx.queue.pop() => task,
            _ = ctx.shutdown.changed() => break,
        };

        run_attempt(&ctx, task).await;
    }

    ctx.alive.fetch_sub(1, Ordering::SeqCst);
    debug!("{} worker {} stopped", ctx.category, index);
}

/// Execute a single attempt of `task` end to end.
async fn run_attempt(ctx: &WorkerContext, task: Task) {
    let mut attempt = 0u32;
    ctx.results.update(&task.id, |result| {
        result.status = TaskStatus::Running;
        if result.started_at.is_none() {
            result.started_at = Some(Utc::now());
        }
        result.attempts += 1;
        attempt = result.attempts;
    });
    ctx.metrics.task_started(task.category);
    ctx.activity.record(
        ActivityKind::Started,
        Some(task.category),
        Some(&task.id),
        format!("task {} started (attempt {attempt})", task.id),
    );

    // Submissions are validated against the registry, so a missing key
    // means the registry changed underneath us.
    let Some(function) = ctx.functions.get(&task.function_key) else {
        warn!("function '{}' vanished from registry", task.function_key);
        settle_failed(
            ctx,
            &task,
            attempt,
            TaskFailure::fatal(format!("function '{}' is not registered", task.function_key)),
        );
        return;
    };

    // Admission: the breaker is the fast-fail gate in front of the call.
    let mut probe = false;
    if let Some(dependency) = &task.dependency {
        let breaker = ctx.breakers.get_or_create(dependency);
        let admit = breaker.admit();
        if admit.transition == Some(CircuitState::HalfOpen) {
            ctx.activity.record(
                ActivityKind::BreakerHalfOpen,
                None,
                None,
                format!("breaker '{dependency}' half-open, admitting probe"),
            );
        }
        if !admit.allowed {
            settle_circuit_open(ctx, &task, dependency);
            return;
        }
        probe = admit.probe;
    }

    let call = function.call(task.args.clone());
    let outcome = match ctx.task_timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(TaskFailure::timeout(limit)),
        },
        None => call.await,
    };

    match outcome {
        Ok(value) => settle_completed(ctx, &task, value, probe),
        Err(failure) if !failure.is_retryable() => {
            // Fatal failures skip breaker updates and retries entirely,
            // but an admitted probe slot must still be handed back.
            if probe {
                if let Some(dependency) = &task.dependency {
                    ctx.breakers.get_or_create(dependency).release_probe();
                }
            }
            settle_failed(ctx, &task, attempt, failure);
        }
        Err(failure) => {
            record_breaker_failure(ctx, &task, probe);
            if attempt < task.max_retries + 1 {
                schedule_retry(ctx, task, attempt, failure);
            } else {
                settle_failed(ctx, &task, attempt, failure);
            }
        }
    }
}

fn settle_completed(ctx: &WorkerContext, task: &Task, value: serde_json::Value, probe: bool) {
    let snapshot = ctx.results.update(&task.id, |result| {
        result.status = TaskStatus::Completed;
        result.value = Some(value);
        result.completed_at = Some(Utc::now());
    });
    ctx.metrics.task_settled(task.category);

    if let Some(dependency) = &task.dependency {
        let breaker = ctx.breakers.get_or_create(dependency);
        if breaker.record_success(probe) == Some(CircuitState::Closed) {
            ctx.activity.record(
                ActivityKind::BreakerClosed,
                None,
                None,
                format!("breaker '{dependency}' closed after recovery"),
            );
        }
    }

    let duration_ms = snapshot.as_ref().and_then(|r| r.duration_ms());
    ctx.metrics.record_completed(
        task.category,
        TaskOutcome {
            task_id: task.id.clone(),
            status: TaskStatus::Completed,
            duration_ms,
            finished_at: Utc::now(),
        },
    );
    ctx.activity.record(
        ActivityKind::Completed,
        Some(task.category),
        Some(&task.id),
        format!("task {} completed", task.id),
    );
}

fn settle_failed(ctx: &WorkerContext, task: &Task, attempt: u32, failure: TaskFailure) {
    ctx.metrics.task_settled(task.category);
    let message = format!(
        "task {} failed after {attempt} attempt(s): {}",
        task.id, failure.message
    );
    record_terminal_failure(
        &ctx.results,
        &ctx.metrics,
        &ctx.activity,
        &task.id,
        task.category,
        failure,
        message,
    );
}

/// Finalize a task as `failed` with full bookkeeping: result record,
/// `failed[category]` counter, outcome ring, and activity event. Shared
/// with the retry timer, which runs outside a worker context and must not
/// let a terminal failure bypass the metrics contract.
fn record_terminal_failure(
    results: &ResultStore,
    metrics: &MetricsRegistry,
    activity: &ActivityLog,
    task_id: &str,
    category: TaskCategory,
    failure: TaskFailure,
    message: String,
) {
    let snapshot = results.finalize_failure(task_id, TaskStatus::Failed, failure);
    metrics.record_failed(
        category,
        TaskOutcome {
            task_id: task_id.to_string(),
            status: TaskStatus::Failed,
            duration_ms: snapshot.as_ref().and_then(|r| r.duration_ms()),
            finished_at: Utc::now(),
        },
    );
    activity.record(ActivityKind::Failed, Some(category), Some(task_id), message);
}

/// Fast-fail contract: the function is never invoked, the failure does not
/// count toward the breaker, and the task is not retried.
fn settle_circuit_open(ctx: &WorkerContext, task: &Task, dependency: &str) {
    ctx.results.finalize_failure(
        &task.id,
        TaskStatus::CircuitOpen,
        TaskFailure::circuit_open(dependency),
    );
    ctx.metrics.task_settled(task.category);
    ctx.metrics.record_circuit_open(
        task.category,
        TaskOutcome {
            task_id: task.id.clone(),
            status: TaskStatus::CircuitOpen,
            duration_ms: None,
            finished_at: Utc::now(),
        },
    );
    ctx.activity.record(
        ActivityKind::CircuitOpen,
        Some(task.category),
        Some(&task.id),
        format!("task {} rejected, breaker '{dependency}' open", task.id),
    );
}

fn record_breaker_failure(ctx: &WorkerContext, task: &Task, probe: bool) {
    if let Some(dependency) = &task.dependency {
        let breaker = ctx.breakers.get_or_create(dependency);
        if breaker.record_failure(probe) == Some(CircuitState::Open) {
            ctx.activity.record(
                ActivityKind::BreakerOpened,
                None,
                None,
                format!("breaker '{dependency}' opened"),
            );
        }
    }
}

/// Park the task for its backoff delay, then re-enqueue at the original
/// priority. The re-enqueue takes a fresh sequence number, so the task
/// yields to equal-priority work submitted while it backed off.
fn schedule_retry(ctx: &WorkerContext, task: Task, attempt: u32, failure: TaskFailure) {
    let delay = backoff_delay(attempt, ctx.max_backoff);
    ctx.metrics.record_retry(task.category);
    ctx.metrics.task_settled(task.category);
    ctx.results.update(&task.id, |result| {
        result.status = TaskStatus::Retrying;
    });
    ctx.activity.record(
        ActivityKind::Retried,
        Some(task.category),
        Some(&task.id),
        format!(
            "task {} retrying in {}s (attempt {attempt} failed: {})",
            task.id,
            delay.as_secs(),
            failure.message
        ),
    );

    let queue = Arc::clone(&ctx.queue);
    let results = Arc::clone(&ctx.results);
    let metrics = Arc::clone(&ctx.metrics);
    let activity = Arc::clone(&ctx.activity);
    let shutdown = ctx.shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;

        if *shutdown.borrow() {
            record_terminal_failure(
                &results,
                &metrics,
                &activity,
                &task.id,
                task.category,
                TaskFailure::cancelled(),
                format!("task {} cancelled before its retry could run", task.id),
            );
            return;
        }

        results.update(&task.id, |result| {
            result.status = TaskStatus::Pending;
        });
        let task_id = task.id.clone();
        let category = task.category;
        if let Err(err) = queue.push(task) {
            warn!("retry re-enqueue failed for task {task_id}: {err}");
            record_terminal_failure(
                &results,
                &metrics,
                &activity,
                &task_id,
                category,
                TaskFailure::retryable(format!("retry re-enqueue failed: queue full for {category}")),
                format!("task {task_id} failed: retry re-enqueue rejected, queue full"),
            );
        }
    });
}
