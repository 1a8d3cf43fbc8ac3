//! Pool Metrics
//!
//! Per-category counters and duration accumulators plus recent task
//! outcomes. Counters are relaxed atomics so the hot path never contends
//! on a global lock; aggregation is eventually consistent with task state.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::task::{TaskCategory, TaskStatus};

/// Outcomes retained per category for the operator UI.
const RECENT_OUTCOMES: usize = 20;

/// Terminal outcome of one task, kept in a small per-category ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub finished_at: DateTime<Utc>,
}

/// Counters for one category. Many writers, many readers.
#[derive(Default)]
struct CategoryMetrics {
    completed: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
    circuit_open: AtomicU64,
    duration_total_ms: AtomicU64,
    duration_count: AtomicU64,
    active: AtomicU64,
    recent: Mutex<VecDeque<TaskOutcome>>,
}

impl CategoryMetrics {
    fn push_outcome(&self, outcome: TaskOutcome) {
        let mut recent = self.recent.lock();
        if recent.len() >= RECENT_OUTCOMES {
            recent.pop_front();
        }
        recent.push_back(outcome);
    }
}

/// Aggregated view of one category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryStats {
    pub completed: u64,
    pub failed: u64,
    pub retries: u64,
    pub circuit_open: u64,
    pub active: u64,
    /// Mean duration over completed tasks, zero if none completed.
    pub mean_duration_ms: f64,
    pub recent: Vec<TaskOutcome>,
}

/// Metrics for the whole pool, one slot per category.
pub struct MetricsRegistry {
    categories: HashMap<TaskCategory, CategoryMetrics>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            categories: TaskCategory::ALL
                .iter()
                .map(|c| (*c, CategoryMetrics::default()))
                .collect(),
        }
    }

    fn slot(&self, category: TaskCategory) -> &CategoryMetrics {
        // Every category is inserted at construction.
        &self.categories[&category]
    }

    pub fn task_started(&self, category: TaskCategory) {
        self.slot(category).active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_settled(&self, category: TaskCategory) {
        self.slot(category).active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self, category: TaskCategory, outcome: TaskOutcome) {
        let slot = self.slot(category);
        slot.completed.fetch_add(1, Ordering::Relaxed);
        if let Some(ms) = outcome.duration_ms {
            slot.duration_total_ms.fetch_add(ms, Ordering::Relaxed);
            slot.duration_count.fetch_add(1, Ordering::Relaxed);
        }
        slot.push_outcome(outcome);
    }

    pub fn record_failed(&self, category: TaskCategory, outcome: TaskOutcome) {
        let slot = self.slot(category);
        slot.failed.fetch_add(1, Ordering::Relaxed);
        slot.push_outcome(outcome);
    }

    pub fn record_circuit_open(&self, category: TaskCategory, outcome: TaskOutcome) {
        let slot = self.slot(category);
        slot.circuit_open.fetch_add(1, Ordering::Relaxed);
        slot.push_outcome(outcome);
    }

    pub fn record_retry(&self, category: TaskCategory) {
        self.slot(category).retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Consistent snapshot per category; not a consistent cut across
    /// categories.
    pub fn stats(&self, category: TaskCategory) -> CategoryStats {
        let slot = self.slot(category);
        let duration_count = slot.duration_count.load(Ordering::Relaxed);
        let duration_total = slot.duration_total_ms.load(Ordering::Relaxed);
        CategoryStats {
            completed: slot.completed.load(Ordering::Relaxed),
            failed: slot.failed.load(Ordering::Relaxed),
            retries: slot.retries.load(Ordering::Relaxed),
            circuit_open: slot.circuit_open.load(Ordering::Relaxed),
            active: slot.active.load(Ordering::Relaxed),
            mean_duration_ms: if duration_count == 0 {
                0.0
            } else {
                duration_total as f64 / duration_count as f64
            },
            recent: slot.recent.lock().iter().cloned().collect(),
        }
    }

    /// Tasks currently executing across all categories.
    pub fn active_total(&self) -> u64 {
        self.categories
            .values()
            .map(|slot| slot.active.load(Ordering::Relaxed))
            .sum()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(id: &str, status: TaskStatus, duration_ms: Option<u64>) -> TaskOutcome {
        TaskOutcome {
            task_id: id.to_string(),
            status,
            duration_ms,
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn test_mean_duration() {
        let metrics = MetricsRegistry::new();
        metrics.record_completed(
            TaskCategory::Embedding,
            outcome("a", TaskStatus::Completed, Some(100)),
        );
        metrics.record_completed(
            TaskCategory::Embedding,
            outcome("b", TaskStatus::Completed, Some(300)),
        );

        let stats = metrics.stats(TaskCategory::Embedding);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.mean_duration_ms, 200.0);
    }

    #[test]
    fn test_mean_duration_zero_when_none() {
        let metrics = MetricsRegistry::new();
        let stats = metrics.stats(TaskCategory::Batch);
        assert_eq!(stats.completed, 0);
        assert_eq!(stats.mean_duration_ms, 0.0);
    }

    #[test]
    fn test_active_accounting() {
        let metrics = MetricsRegistry::new();
        metrics.task_started(TaskCategory::Scraping);
        metrics.task_started(TaskCategory::RagQuery);
        assert_eq!(metrics.active_total(), 2);
        assert_eq!(metrics.stats(TaskCategory::Scraping).active, 1);

        metrics.task_settled(TaskCategory::Scraping);
        assert_eq!(metrics.active_total(), 1);
    }

    #[test]
    fn test_failure_counters_are_separate() {
        let metrics = MetricsRegistry::new();
        metrics.record_failed(
            TaskCategory::Scraping,
            outcome("a", TaskStatus::Failed, None),
        );
        metrics.record_circuit_open(
            TaskCategory::Scraping,
            outcome("b", TaskStatus::CircuitOpen, None),
        );
        metrics.record_retry(TaskCategory::Scraping);

        let stats = metrics.stats(TaskCategory::Scraping);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.circuit_open, 1);
        assert_eq!(stats.retries, 1);
        assert_eq!(stats.completed, 0);
    }

    #[test]
    fn test_recent_outcomes_ring() {
        let metrics = MetricsRegistry::new();
        for i in 0..(RECENT_OUTCOMES + 5) {
            metrics.record_completed(
                TaskCategory::Batch,
                outcome(&format!("t-{i}"), TaskStatus::Completed, Some(1)),
            );
        }

        let stats = metrics.stats(TaskCategory::Batch);
        assert_eq!(stats.recent.len(), RECENT_OUTCOMES);
        assert_eq!(stats.recent.last().unwrap().task_id, "t-24");
    }
}
