//! Activity Log
//!
//! Bounded ring buffer of human-readable events: submissions, completions,
//! retries, breaker transitions. Readers take a snapshot; appends never
//! block on I/O.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::task::TaskCategory;

/// Event kinds recorded by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Submitted,
    Started,
    Retried,
    Completed,
    Failed,
    CircuitOpen,
    BreakerOpened,
    BreakerHalfOpen,
    BreakerClosed,
}

/// One recorded event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: ActivityKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<TaskCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub message: String,
}

/// Fixed-capacity event buffer. The oldest event is evicted once full.
pub struct ActivityLog {
    events: Mutex<VecDeque<ActivityEvent>>,
    capacity: usize,
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    /// Append one event, evicting the oldest at capacity.
    pub fn record(
        &self,
        kind: ActivityKind,
        category: Option<TaskCategory>,
        task_id: Option<&str>,
        message: impl Into<String>,
    ) {
        let event = ActivityEvent {
            timestamp: Utc::now(),
            kind,
            category,
            task_id: task_id.map(String::from),
            message: message.into(),
        };

        let mut events = self.events.lock();
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// The most recent `limit` events, oldest first, so a UI can append.
    pub fn recent(&self, limit: usize) -> Vec<ActivityEvent> {
        let events = self.events.lock();
        let skip = events.len().saturating_sub(limit);
        events.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_read() {
        let log = ActivityLog::new(10);
        log.record(
            ActivityKind::Submitted,
            Some(TaskCategory::Scraping),
            Some("t-1"),
            "task t-1 submitted",
        );

        let events = log.recent(10);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ActivityKind::Submitted);
        assert_eq!(events[0].task_id.as_deref(), Some("t-1"));
    }

    #[test]
    fn test_capacity_eviction() {
        let log = ActivityLog::new(3);
        for i in 0..5 {
            log.record(ActivityKind::Completed, None, None, format!("event {i}"));
        }

        let events = log.recent(10);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].message, "event 2");
        assert_eq!(events[2].message, "event 4");
    }

    #[test]
    fn test_recent_is_oldest_first() {
        let log = ActivityLog::new(10);
        for i in 0..4 {
            log.record(ActivityKind::Started, None, None, format!("event {i}"));
        }

        let events = log.recent(2);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message, "event 2");
        assert_eq!(events[1].message, "event 3");
    }

    #[test]
    fn test_breaker_events_have_no_task() {
        let log = ActivityLog::new(10);
        log.record(ActivityKind::BreakerOpened, None, None, "breaker 'openai' opened");

        let events = log.recent(1);
        assert!(events[0].task_id.is_none());
        assert!(events[0].category.is_none());
    }
}
