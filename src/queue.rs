//! Per-Category Priority Queue
//!
//! A heap keyed on `(priority_ordinal, sequence_number)`. The sequence
//! number is a per-process monotone counter assigned at enqueue, so ties
//! within a priority level break FIFO. A retried task re-enters with a
//! fresh sequence number and yields to other work of the same priority.

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::PoolError;
use crate::task::{Task, TaskCategory};

/// Heap entry. Ordering is inverted so the `BinaryHeap` max-heap pops the
/// smallest `(priority, seq)` key first.
struct QueuedTask {
    priority: u8,
    seq: u64,
    task: Task,
}

impl QueuedTask {
    fn key(&self) -> (u8, u64) {
        (self.priority, self.seq)
    }
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other.key().cmp(&self.key())
    }
}

/// Priority-ordered waiting room for a single category.
///
/// Writers are arbitrary submitters; readers are that category's workers.
pub struct CategoryQueue {
    category: TaskCategory,
    heap: Mutex<BinaryHeap<QueuedTask>>,
    notify: Notify,
    /// Soft cap on queued tasks; 0 disables the cap.
    soft_cap: usize,
    /// Shared per-process sequence counter.
    seq: Arc<AtomicU64>,
}

impl CategoryQueue {
    pub fn new(category: TaskCategory, soft_cap: usize, seq: Arc<AtomicU64>) -> Self {
        Self {
            category,
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            soft_cap,
            seq,
        }
    }

    /// Enqueue a task. Constant-time with respect to queue size apart from
    /// the heap insert; fails with `queue_full` at the soft cap, never a
    /// silent drop.
    pub fn push(&self, task: Task) -> Result<(), PoolError> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let entry = QueuedTask {
            priority: task.priority.ordinal(),
            seq,
            task,
        };

        {
            let mut heap = self.heap.lock();
            if self.soft_cap > 0 && heap.len() >= self.soft_cap {
                return Err(PoolError::QueueFull(self.category));
            }
            heap.push(entry);
        }

        self.notify.notify_one();
        Ok(())
    }

    /// Wait for the most urgent queued task. Cancellation-safe: callers
    /// race this against a shutdown signal in `select!`.
    pub async fn pop(&self) -> Task {
        loop {
            let notified = self.notify.notified();

            let popped = {
                let mut heap = self.heap.lock();
                let entry = heap.pop();
                // Wake another waiter if work remains; notify_one stores at
                // most a single permit.
                if entry.is_some() && !heap.is_empty() {
                    self.notify.notify_one();
                }
                entry
            };

            if let Some(entry) = popped {
                return entry.task;
            }

            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn category(&self) -> TaskCategory {
        self.category
    }
}
