//! Worker Pool
//!
//! The engine: accepts submissions, routes them to category queues, owns
//! the worker loops, breakers, metrics, and activity log, and exposes the
//! snapshots the operator API serves. Constructed explicitly at startup
//! with all configuration injected; tests instantiate their own pools.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::activity::{ActivityEvent, ActivityKind, ActivityLog};
use crate::breaker::{BreakerRegistry, BreakerSnapshot};
use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::metrics::{CategoryStats, MetricsRegistry};
use crate::queue::CategoryQueue;
use crate::registry::FunctionRegistry;
use crate::results::{AwaitedResult, ResultStore};
use crate::task::{Submission, Task, TaskCategory, TaskFailure, TaskResult};
use crate::worker::{run_worker, WorkerContext};

/// Pool lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PoolState {
    /// Constructed, workers not yet spawned. Submissions queue up.
    Idle = 0,
    /// Workers running.
    Running = 1,
    /// `stop()` in progress; submissions rejected.
    ShuttingDown = 2,
    /// Drain finished; terminal.
    Stopped = 3,
}

impl From<u8> for PoolState {
    fn from(v: u8) -> Self {
        match v {
            0 => PoolState::Idle,
            1 => PoolState::Running,
            2 => PoolState::ShuttingDown,
            _ => PoolState::Stopped,
        }
    }
}

/// Per-category view returned by `stats()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorySnapshot {
    pub queue_size: usize,
    /// Configured worker slots.
    pub workers: usize,
    /// Workers currently live.
    pub alive_workers: usize,
    #[serde(flatten)]
    pub stats: CategoryStats,
}

/// Full observability snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStats {
    pub running: bool,
    pub active_tasks: u64,
    pub categories: BTreeMap<String, CategorySnapshot>,
    pub breakers: BTreeMap<String, BreakerSnapshot>,
}

/// Worker totals for `health()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHealth {
    pub total: usize,
    pub alive: usize,
    pub health_percent: f64,
}

/// Health report. `healthy` is strictly conjunctive: the pool is running,
/// every category has at least one live worker, and no breaker is open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub running: bool,
    pub workers: WorkerHealth,
    pub breakers: BTreeMap<String, BreakerSnapshot>,
    pub uptime_secs: u64,
    pub version: String,
}

/// The category-partitioned worker pool.
pub struct WorkerPool {
    config: PoolConfig,
    functions: Arc<FunctionRegistry>,
    queues: HashMap<TaskCategory, Arc<CategoryQueue>>,
    results: Arc<ResultStore>,
    breakers: Arc<BreakerRegistry>,
    metrics: Arc<MetricsRegistry>,
    activity: Arc<ActivityLog>,
    alive: HashMap<TaskCategory, Arc<AtomicUsize>>,
    state: AtomicU8,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    started_at: Instant,
}

impl WorkerPool {
    /// Build a pool. Workers are not spawned until [`start`](Self::start).
    pub fn new(config: PoolConfig, functions: Arc<FunctionRegistry>) -> Self {
        let seq = Arc::new(AtomicU64::new(0));
        let queues = TaskCategory::ALL
            .iter()
            .map(|c| {
                (
                    *c,
                    Arc::new(CategoryQueue::new(*c, config.queue_soft_cap, Arc::clone(&seq))),
                )
            })
            .collect();
        let alive = TaskCategory::ALL
            .iter()
            .map(|c| (*c, Arc::new(AtomicUsize::new(0))))
            .collect();
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            activity: Arc::new(ActivityLog::new(config.activity_buffer)),
            config,
            functions,
            queues,
            results: Arc::new(ResultStore::new()),
            breakers: Arc::new(BreakerRegistry::new()),
            metrics: Arc::new(MetricsRegistry::new()),
            alive,
            state: AtomicU8::new(PoolState::Idle as u8),
            shutdown_tx,
            workers: Mutex::new(Vec::new()),
            started_at: Instant::now(),
        }
    }

    pub fn state(&self) -> PoolState {
        PoolState::from(self.state.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        self.state() == PoolState::Running
    }

    /// Spawn the worker loops and register the default breakers. Idempotent;
    /// a second call is a no-op.
    pub fn start(&self) {
        if self
            .state
            .compare_exchange(
                PoolState::Idle as u8,
                PoolState::Running as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return;
        }

        for breaker in self.config.breakers.clone() {
            self.breakers.register(breaker);
        }

        let mut handles = self.workers.lock();
        for category in TaskCategory::ALL {
            let count = self.config.workers.for_category(category);
            for index in 0..count {
                let ctx = WorkerContext {
                    category,
                    queue: Arc::clone(&self.queues[&category]),
                    results: Arc::clone(&self.results),
                    breakers: Arc::clone(&self.breakers),
                    metrics: Arc::clone(&self.metrics),
                    activity: Arc::clone(&self.activity),
                    functions: Arc::clone(&self.functions),
                    max_backoff: self.config.max_backoff,
                    task_timeout: self.config.task_timeout,
                    shutdown: self.shutdown_tx.subscribe(),
                    alive: Arc::clone(&self.alive[&category]),
                };
                handles.push(tokio::spawn(run_worker(ctx, index)));
            }
        }

        info!(
            "worker pool started with {} workers across {} categories",
            self.config.workers.total(),
            TaskCategory::ALL.len()
        );
    }

    /// Accept a task. Constant-time with respect to queue size: the only
    /// side effects are bookkeeping and the enqueue itself.
    pub fn submit(&self, submission: Submission) -> Result<String, PoolError> {
        match self.state() {
            PoolState::ShuttingDown | PoolState::Stopped => return Err(PoolError::ShuttingDown),
            PoolState::Idle | PoolState::Running => {}
        }

        if !self.functions.contains(&submission.function_key) {
            return Err(PoolError::InvalidTask(format!(
                "unknown function key '{}'",
                submission.function_key
            )));
        }

        let task = Task::from_submission(submission);
        let task_id = task.id.clone();
        let category = task.category;

        // Insert the result before enqueueing so a fast worker can never
        // observe a task without a record.
        self.results.insert_pending(&task);
        if let Err(err) = self.queues[&category].push(task) {
            self.results.remove(&task_id);
            return Err(err);
        }

        self.activity.record(
            ActivityKind::Submitted,
            Some(category),
            Some(&task_id),
            format!("task {task_id} submitted to {category}"),
        );
        Ok(task_id)
    }

    /// Submit several tasks; partial failure is reported per element.
    pub fn submit_batch(&self, submissions: Vec<Submission>) -> Vec<Result<String, PoolError>> {
        submissions.into_iter().map(|s| self.submit(s)).collect()
    }

    /// Snapshot of the current result state. Never blocks.
    pub fn get_result(&self, task_id: &str) -> Option<TaskResult> {
        self.results.get(task_id)
    }

    /// Block until the task reaches a terminal state or `timeout` elapses.
    pub async fn await_result(
        &self,
        task_id: &str,
        timeout: Duration,
    ) -> Result<AwaitedResult, PoolError> {
        self.results
            .await_terminal(task_id, timeout)
            .await
            .ok_or_else(|| PoolError::NotFound(task_id.to_string()))
    }

    /// Stop accepting submissions, signal the workers, and wait up to
    /// `drain_timeout` for in-flight tasks to finalize. Anything still
    /// non-terminal afterwards is failed with a `cancelled` error.
    pub async fn stop(&self, drain_timeout: Duration) -> bool {
        if self
            .state
            .compare_exchange(
                PoolState::Running as u8,
                PoolState::ShuttingDown as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return match self.state() {
                // Never started: nothing to drain.
                PoolState::Idle => {
                    self.state.store(PoolState::Stopped as u8, Ordering::SeqCst);
                    true
                }
                PoolState::Stopped => true,
                // A concurrent stop() owns the drain.
                _ => false,
            };
        }

        info!("worker pool shutting down, draining for {:?}", drain_timeout);
        let _ = self.shutdown_tx.send(true);

        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        if tokio::time::timeout(drain_timeout, join_all(handles))
            .await
            .is_err()
        {
            warn!("drain timeout elapsed, aborting remaining workers");
            for abort in aborts {
                abort.abort();
            }
            for gauge in self.alive.values() {
                gauge.store(0, Ordering::SeqCst);
            }
        }

        let cancelled = self.results.fail_non_terminal(TaskFailure::cancelled());
        if cancelled > 0 {
            warn!("{cancelled} task(s) cancelled during shutdown");
        }

        self.state.store(PoolState::Stopped as u8, Ordering::SeqCst);
        info!("worker pool stopped");
        true
    }

    /// Per-category and breaker snapshot for the operator UI. Consistent
    /// per category, not a consistent cut across categories.
    pub fn stats(&self) -> PoolStats {
        let categories = TaskCategory::ALL
            .iter()
            .map(|category| {
                (
                    category.to_string(),
                    CategorySnapshot {
                        queue_size: self.queues[category].len(),
                        workers: self.config.workers.for_category(*category),
                        alive_workers: self.alive[category].load(Ordering::SeqCst),
                        stats: self.metrics.stats(*category),
                    },
                )
            })
            .collect();

        PoolStats {
            running: self.is_running(),
            active_tasks: self.metrics.active_total(),
            categories,
            breakers: self.breakers.snapshot(),
        }
    }

    pub fn health(&self) -> HealthReport {
        let running = self.is_running();
        let total = self.config.workers.total();
        let alive: usize = self
            .alive
            .values()
            .map(|gauge| gauge.load(Ordering::SeqCst))
            .sum();
        let every_category_alive = TaskCategory::ALL
            .iter()
            .all(|c| self.alive[c].load(Ordering::SeqCst) >= 1);
        let breakers = self.breakers.snapshot();

        HealthReport {
            healthy: running && every_category_alive && !self.breakers.any_open(),
            running,
            workers: WorkerHealth {
                total,
                alive,
                health_percent: if total == 0 {
                    0.0
                } else {
                    alive as f64 / total as f64 * 100.0
                },
            },
            breakers,
            uptime_secs: self.started_at.elapsed().as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// The most recent `limit` activity events, oldest first.
    pub fn activity(&self, limit: usize) -> Vec<ActivityEvent> {
        self.activity.recent(limit.min(self.activity.capacity()))
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }
}
