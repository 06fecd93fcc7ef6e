//! Typed event bus.

use chrono::{DateTime, Utc};
use engine_model::{TaskId, TaskStatus};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::breakdown::BreakdownStrategy;
use crate::health::{BottleneckFinding, HealthStatus};
use crate::scheduler::Algorithm;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum EngineEvent {
    TaskSubmitted { task_id: TaskId, at: DateTime<Utc> },
    StateTransition { task_id: TaskId, from: TaskStatus, to: TaskStatus, at: DateTime<Utc> },
    TaskProgress { task_id: TaskId, message: String, at: DateTime<Utc> },
    TaskCompleted { task_id: TaskId, duration_ms: u64, at: DateTime<Utc> },
    TaskFailed { task_id: TaskId, reason: String, will_retry: bool, at: DateTime<Utc> },
    TaskCancelled { task_id: TaskId, reason: String, at: DateTime<Utc> },
    TaskPaused { task_id: TaskId, at: DateTime<Utc> },
    BreakdownProduced { task_id: TaskId, subtask_ids: Vec<TaskId>, strategy: BreakdownStrategy, at: DateTime<Utc> },
    SchedulingDecision { algorithm: Algorithm, selected: Vec<TaskId>, confidence: f64, at: DateTime<Utc> },
    StarvationDetected { task_id: TaskId, waited_secs: i64, at: DateTime<Utc> },
    BottleneckDetected { finding: BottleneckFinding, at: DateTime<Utc> },
    Health { status: HealthStatus, at: DateTime<Utc> },
    SnapshotWritten { path: String, at: DateTime<Utc> },
}

/// Bounded broadcast bus; slow subscribers drop the oldest events rather than block the
/// coordinator.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Best-effort publish: no subscribers is not an error.
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_receive_published_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(EngineEvent::TaskSubmitted { task_id: TaskId::new("a"), at: Utc::now() });
        let event = rx.try_recv().unwrap();
        matches!(event, EngineEvent::TaskSubmitted { .. });
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new(8);
        bus.publish(EngineEvent::TaskSubmitted { task_id: TaskId::new("a"), at: Utc::now() });
    }
}
