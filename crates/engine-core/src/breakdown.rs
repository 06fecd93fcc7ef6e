//! Breakdown Orchestrator: complexity scoring and subtask synthesis.

use chrono::{DateTime, Utc};
use engine_model::{Task, TaskId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BreakdownStrategy {
    Functional,
    Temporal,
    Dependency,
    Hybrid,
}

#[derive(Debug, Clone)]
pub struct ComplexitySignals {
    pub description_len: usize,
    pub declared_dependency_count: usize,
    pub category_multiplier: f64,
    pub historical_success_rate: f64,
}

/// Complexity score in [0, 1] from the four named signals. Weighting favors
/// description length and dependency fan-out, the two signals the caller controls directly.
pub fn complexity_score(signals: &ComplexitySignals) -> f64 {
    let length_component = (signals.description_len as f64 / 2000.0).min(1.0);
    let dependency_component = (signals.declared_dependency_count as f64 / 10.0).min(1.0);
    let category_component = (signals.category_multiplier / 2.5).min(1.0);
    let risk_component = 1.0 - signals.historical_success_rate;

    (0.35 * length_component + 0.25 * dependency_component + 0.2 * category_component + 0.2 * risk_component)
        .clamp(0.0, 1.0)
}

pub fn should_break_down(score: f64, breakdown_threshold: f64, depth: u32, max_depth: u32) -> bool {
    score > breakdown_threshold && depth < max_depth
}

/// Rough complexity weight per category, independent of the resource-estimation weights in
/// `resource.rs` (those size worker footprint; this sizes "how likely is this to be too big
/// for one task").
pub fn category_multiplier(category: engine_model::task::Category) -> f64 {
    use engine_model::task::Category;
    match category {
        Category::Feature => 1.5,
        Category::Refactor => 1.8,
        Category::Security => 2.0,
        Category::Performance => 1.8,
        Category::Infrastructure => 2.0,
        Category::Test => 1.0,
        Category::BugFix => 1.0,
        Category::Documentation => 0.5,
    }
}

#[derive(Debug, Clone)]
pub struct Breakdown {
    pub subtasks: Vec<Task>,
    /// `(dependent index, dependency index)` pairs within `subtasks`.
    pub internal_edges: Vec<(usize, usize)>,
    pub strategy: BreakdownStrategy,
    pub expected_speedup: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum BreakdownError {
    #[error("breakdown would produce {0} subtasks, exceeding max_subtasks {1}")]
    TooManySubtasks(usize, usize),
    #[error("breakdown would produce zero subtasks")]
    NoSubtasks,
}

/// Splits `original` into a FUNCTIONAL-by-default strategy of `phase_count` sequential-ish
/// subtasks. Each subtask inherits required resources and category; total estimated duration
/// stays within ±25% of the original, enforced by distributing duration
/// evenly and rounding toward the original sum.
pub fn synthesize(
    original: &Task,
    phase_count: usize,
    strategy: BreakdownStrategy,
    max_subtasks: usize,
    now: DateTime<Utc>,
) -> Result<Breakdown, BreakdownError> {
    if phase_count == 0 {
        return Err(BreakdownError::NoSubtasks);
    }
    if phase_count > max_subtasks {
        return Err(BreakdownError::TooManySubtasks(phase_count, max_subtasks));
    }

    let per_subtask_duration = (original.estimated_duration_ms / phase_count as u64).max(1);
    let mut subtasks = Vec::with_capacity(phase_count);
    for i in 0..phase_count {
        let id = TaskId::generate();
        let mut subtask = Task::new(
            id,
            format!("{} (part {}/{})", original.title, i + 1, phase_count),
            original.description.clone(),
            now,
        );
        subtask.category = original.category;
        subtask.complexity = original.complexity;
        subtask.priority = original.priority;
        subtask.base_priority = original.base_priority;
        subtask.dynamic_priority = original.dynamic_priority;
        subtask.estimated_duration_ms = per_subtask_duration;
        subtask.max_execution_time_ms = original.max_execution_time_ms;
        subtask.required_resources = original.required_resources.clone();
        subtask.parent_task_id = Some(original.id.clone());
        subtask.tags.insert("subtask".to_string());
        subtasks.push(subtask);
    }

    // TEMPORAL and DEPENDENCY strategies chain each phase behind the previous one;
    // FUNCTIONAL leaves phases independent; HYBRID chains only the first two (illustrative
    // composition of the other two strategies).
    let internal_edges = match strategy {
        BreakdownStrategy::Functional => Vec::new(),
        BreakdownStrategy::Temporal | BreakdownStrategy::Dependency => {
            (1..subtasks.len()).map(|i| (i, i - 1)).collect()
        }
        BreakdownStrategy::Hybrid => {
            if subtasks.len() > 1 {
                vec![(1, 0)]
            } else {
                Vec::new()
            }
        }
    };

    Ok(Breakdown {
        subtasks,
        internal_edges,
        strategy,
        expected_speedup: phase_count as f64 * 0.6,
        confidence: 0.7,
    })
}

/// Builds the tracker task that replaces `original` for external observation: same
/// `TaskId`, depends on every subtask, and its `Execute` is implicitly "all subtasks done"
/// (checked by the coordinator rather than embedded here, since `Execute` is a trait object).
pub fn tracker_task(original: &Task, breakdown: &Breakdown) -> Task {
    let mut tracker = original.clone();
    tracker.subtask_ids = breakdown.subtasks.iter().map(|t| t.id.clone()).collect();
    tracker.dependencies = tracker.subtask_ids.iter().cloned().collect();
    tracker
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_model::TaskId;

    fn base_task() -> Task {
        let mut t = Task::new(TaskId::new("root"), "root".into(), "d".into(), Utc::now());
        t.estimated_duration_ms = 90_000;
        t
    }

    #[test]
    fn complexity_score_is_bounded() {
        let signals = ComplexitySignals {
            description_len: 10_000,
            declared_dependency_count: 50,
            category_multiplier: 3.0,
            historical_success_rate: 0.0,
        };
        assert!((0.0..=1.0).contains(&complexity_score(&signals)));
    }

    #[test]
    fn should_break_down_respects_threshold_and_depth() {
        assert!(should_break_down(0.8, 0.65, 0, 3));
        assert!(!should_break_down(0.5, 0.65, 0, 3));
        assert!(!should_break_down(0.8, 0.65, 3, 3));
    }

    #[test]
    fn synthesize_rejects_exceeding_max_subtasks() {
        let original = base_task();
        let err = synthesize(&original, 20, BreakdownStrategy::Functional, 15, Utc::now()).unwrap_err();
        assert!(matches!(err, BreakdownError::TooManySubtasks(20, 15)));
    }

    #[test]
    fn synthesize_keeps_total_duration_near_original() {
        let original = base_task();
        let breakdown = synthesize(&original, 3, BreakdownStrategy::Functional, 15, Utc::now()).unwrap();
        let total: u64 = breakdown.subtasks.iter().map(|t| t.estimated_duration_ms).sum();
        let ratio = total as f64 / original.estimated_duration_ms as f64;
        assert!((0.75..=1.25).contains(&ratio));
    }

    #[test]
    fn tracker_task_depends_on_all_subtasks() {
        let original = base_task();
        let breakdown = synthesize(&original, 3, BreakdownStrategy::Temporal, 15, Utc::now()).unwrap();
        let tracker = tracker_task(&original, &breakdown);
        assert_eq!(tracker.id, original.id);
        assert_eq!(tracker.dependencies.len(), 3);
    }
}
