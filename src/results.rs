//! Result Store
//!
//! Task results are written by exactly one worker and read by arbitrary
//! observers. Updates are visible atomically; a result that has reached a
//! terminal state never changes afterwards.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::Notify;
use tracing::debug;

use crate::task::{Task, TaskFailure, TaskResult, TaskStatus};

/// Snapshot plus a flag telling the caller whether a bounded wait expired
/// before the task went terminal.
#[derive(Debug, Clone)]
pub struct AwaitedResult {
    pub result: TaskResult,
    pub timed_out: bool,
}

/// In-memory map of task ID to current result.
#[derive(Default)]
pub struct ResultStore {
    results: RwLock<HashMap<String, TaskResult>>,
    /// Woken whenever any result reaches a terminal state.
    terminal: Notify,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the initial `pending` record for an accepted task.
    pub fn insert_pending(&self, task: &Task) {
        self.results
            .write()
            .insert(task.id.clone(), TaskResult::pending(task));
    }

    /// Drop a record, used when enqueueing fails after acceptance.
    pub fn remove(&self, task_id: &str) {
        self.results.write().remove(task_id);
    }

    /// Non-blocking snapshot of the current state.
    pub fn get(&self, task_id: &str) -> Option<TaskResult> {
        self.results.read().get(task_id).cloned()
    }

    /// Apply `f` to the live record. Updates against a terminal result are
    /// ignored; terminal states are monotone. Returns the post-update
    /// snapshot.
    pub fn update<F>(&self, task_id: &str, f: F) -> Option<TaskResult>
    where
        F: FnOnce(&mut TaskResult),
    {
        let snapshot = {
            let mut results = self.results.write();
            let result = results.get_mut(task_id)?;
            if result.is_terminal() {
                debug!("ignoring update to terminal task {task_id}");
                return Some(result.clone());
            }
            f(result);
            result.clone()
        };

        if snapshot.is_terminal() {
            self.terminal.notify_waiters();
        }
        Some(snapshot)
    }

    /// Finalize a record as `failed`/`circuit_open` with a structured error.
    pub fn finalize_failure(
        &self,
        task_id: &str,
        status: TaskStatus,
        failure: TaskFailure,
    ) -> Option<TaskResult> {
        self.update(task_id, |result| {
            result.status = status;
            result.error = Some(failure);
            result.completed_at = Some(Utc::now());
        })
    }

    /// Block until the task is terminal or the timeout elapses; on expiry
    /// the current (possibly non-terminal) snapshot is returned with
    /// `timed_out = true`.
    pub async fn await_terminal(
        &self,
        task_id: &str,
        timeout: std::time::Duration,
    ) -> Option<AwaitedResult> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register interest before checking, so a concurrent
            // finalization cannot slip between the check and the wait.
            let notified = self.terminal.notified();

            let result = self.get(task_id)?;
            if result.is_terminal() {
                return Some(AwaitedResult {
                    result,
                    timed_out: false,
                });
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let result = self.get(task_id)?;
                return Some(AwaitedResult {
                    result,
                    timed_out: true,
                });
            }
        }
    }

    /// Finalize every non-terminal record with `failure`. Used at the end
    /// of a shutdown drain. Returns how many were cancelled.
    pub fn fail_non_terminal(&self, failure: TaskFailure) -> usize {
        let now = Utc::now();
        let mut cancelled = 0;
        {
            let mut results = self.results.write();
            for result in results.values_mut() {
                if !result.is_terminal() {
                    result.status = TaskStatus::Failed;
                    result.error = Some(failure.clone());
                    result.completed_at = Some(now);
                    cancelled += 1;
                }
            }
        }
        if cancelled > 0 {
            self.terminal.notify_waiters();
        }
        cancelled
    }

    pub fn len(&self) -> usize {
        self.results.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
