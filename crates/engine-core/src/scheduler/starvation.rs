//! Starvation prevention: effective-only priority boosting, never persisted.

use chrono::{DateTime, Utc};
use engine_model::{Priority, Task};

/// Number of distinct priority buckets; used by the starvation upper bound in P9.
pub const STARVATION_PRIORITY_BUCKETS: usize = Priority::ALL.len();

/// Effective priority for selection purposes only. Boosts one bucket per full
/// `maxStarvationTime` interval the task has been queued, capped at CRITICAL. Never
/// mutates `task.priority`/`task.base_priority`.
pub fn effective_priority(task: &Task, now: DateTime<Utc>, max_starvation_time_secs: i64) -> Priority {
    if max_starvation_time_secs <= 0 {
        return task.priority;
    }
    let waited_secs = (now - task.created_at).num_seconds().max(0);
    let intervals_elapsed = (waited_secs / max_starvation_time_secs) as usize;

    let mut effective = task.priority;
    for _ in 0..intervals_elapsed {
        effective = effective.bump();
    }
    effective
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use engine_model::{Task, TaskId};

    fn make(priority: Priority, created_offset_secs: i64) -> Task {
        let now = Utc::now();
        let mut t = Task::new(TaskId::new("t"), "t".into(), "d".into(), now - Duration::seconds(created_offset_secs));
        t.priority = priority;
        t
    }

    #[test]
    fn no_boost_before_first_interval() {
        let task = make(Priority::Low, 60);
        assert_eq!(effective_priority(&task, Utc::now(), 300), Priority::Low);
    }

    #[test]
    fn one_boost_after_one_interval() {
        let task = make(Priority::Low, 301);
        assert_eq!(effective_priority(&task, Utc::now(), 300), Priority::Medium);
    }

    #[test]
    fn boost_saturates_at_critical() {
        let task = make(Priority::Background, 301 * 10);
        assert_eq!(effective_priority(&task, Utc::now(), 300), Priority::Critical);
    }
}
