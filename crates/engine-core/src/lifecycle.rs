//! Lifecycle Manager: the state machine, hook registry, and event emission.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use engine_model::{TaskId, TaskStatus};
use serde::Serialize;

/// What caused a transition, carried on every lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Manual,
    Automatic,
    System,
    Error,
    Timeout,
}

#[derive(Debug, Clone, Serialize)]
pub struct LifecycleEvent {
    pub task_id: TaskId,
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub at: DateTime<Utc>,
    pub trigger: Trigger,
    pub metadata: serde_json::Value,
}

/// The directed transition graph. No task skips states.
pub fn is_valid_transition(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    matches!(
        (from, to),
        (Created, Validated)
            | (Validated, Queued)
            | (Queued, Scheduled)
            | (Scheduled, Preparing)
            | (Preparing, ResourceAllocated)
            | (ResourceAllocated, Starting)
            | (Starting, Running)
            | (Starting, Failed)
            | (Running, Completing)
            | (Completing, Completed)
            | (Completing, Failed)
            | (Running, Paused)
            | (Paused, Resuming)
            | (Resuming, Running)
            | (Running, Failed)
            | (Failed, Retrying)
            | (Retrying, Queued)
            | (Failed, RollingBack)
            | (RollingBack, Failed)
            | (Queued, Cancelled)
            | (Scheduled, Cancelled)
            | (Preparing, Cancelled)
            | (Running, Cancelled)
            | (Paused, Cancelled)
            | (Completed, Archived)
            | (Failed, Archived)
            | (Cancelled, Archived)
            | (Queued, Blocked)
            | (Blocked, Queued)
            | (Scheduled, Blocked)
            | (Queued, Expired)
            | (Scheduled, Expired)
    )
}

/// `before`/`after` a target state, ordered by priority (higher runs first). Mirrors the
/// source's fixed five-step pipeline, generalized into an open, user-registerable table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookTiming {
    Before,
    After,
}

/// Bounded per-task event log plus the transition-count matrix
/// used by aggregate metrics.
pub struct LifecycleLog {
    capacity: usize,
    events: std::collections::HashMap<TaskId, VecDeque<LifecycleEvent>>,
    transition_counts: std::collections::HashMap<(TaskStatus, TaskStatus), u64>,
}

impl LifecycleLog {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, events: Default::default(), transition_counts: Default::default() }
    }

    pub fn record(&mut self, event: LifecycleEvent) {
        *self.transition_counts.entry((event.from, event.to)).or_insert(0) += 1;
        let log = self.events.entry(event.task_id.clone()).or_default();
        log.push_back(event);
        while log.len() > self.capacity {
            log.pop_front();
        }
    }

    pub fn for_task(&self, id: &TaskId) -> &[LifecycleEvent] {
        self.events.get(id).map(|d| d.as_slices().0).unwrap_or(&[])
    }

    pub fn transition_count(&self, from: TaskStatus, to: TaskStatus) -> u64 {
        self.transition_counts.get(&(from, to)).copied().unwrap_or(0)
    }
}

impl Default for LifecycleLog {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions_accepted() {
        assert!(is_valid_transition(TaskStatus::Created, TaskStatus::Validated));
        assert!(is_valid_transition(TaskStatus::Running, TaskStatus::Completing));
        assert!(is_valid_transition(TaskStatus::Failed, TaskStatus::Retrying));
        assert!(is_valid_transition(TaskStatus::Retrying, TaskStatus::Queued));
    }

    #[test]
    fn skipping_states_rejected() {
        assert!(!is_valid_transition(TaskStatus::Created, TaskStatus::Running));
        assert!(!is_valid_transition(TaskStatus::Queued, TaskStatus::Completed));
    }

    #[test]
    fn terminal_states_only_advance_to_archived() {
        assert!(is_valid_transition(TaskStatus::Completed, TaskStatus::Archived));
        assert!(!is_valid_transition(TaskStatus::Completed, TaskStatus::Queued));
    }

    #[test]
    fn log_is_bounded_per_task() {
        let mut log = LifecycleLog::new(2);
        let id = TaskId::new("a");
        for _ in 0..5 {
            log.record(LifecycleEvent {
                task_id: id.clone(),
                from: TaskStatus::Queued,
                to: TaskStatus::Scheduled,
                at: Utc::now(),
                trigger: Trigger::Automatic,
                metadata: serde_json::json!({}),
            });
        }
        assert_eq!(log.for_task(&id).len(), 2);
        assert_eq!(log.transition_count(TaskStatus::Queued, TaskStatus::Scheduled), 5);
    }
}
