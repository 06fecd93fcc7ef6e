//! Priority scheduler: `selectNext` over multiple pluggable algorithms, plus
//! starvation prevention and the deterministic tie-break chain.

mod algorithms;
mod starvation;

pub use algorithms::Algorithm;
pub use starvation::{effective_priority, STARVATION_PRIORITY_BUCKETS};

use std::fmt;

use chrono::{DateTime, Utc};
use engine_model::{Priority, Task, TaskId};

use crate::graph::DependencyGraph;

/// Risk band attached to a scheduling decision's expected outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskBand {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskBand::Low => "low",
            RiskBand::Medium => "medium",
            RiskBand::High => "high",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone)]
pub struct ExpectedOutcome {
    pub total_duration_estimate_ms: u64,
    pub parallelism_factor: f64,
    pub risk_band: RiskBand,
}

/// Everything the scheduler needs beyond the eligible set itself.
#[derive(Debug, Clone)]
pub struct SchedulingContext {
    pub now: DateTime<Utc>,
    pub running_count: usize,
    pub queued_count: usize,
    pub max_concurrent: usize,
    pub resource_utilization: f64,
    pub critical_path: std::collections::HashSet<TaskId>,
    pub max_starvation_time_secs: i64,
}

impl SchedulingContext {
    pub fn queue_pressure(&self) -> f64 {
        let denom = (self.queued_count + self.running_count + 1) as f64;
        self.queued_count as f64 / denom
    }

    pub fn has_urgent_deadlines(&self, eligible: &[Task]) -> bool {
        eligible.iter().any(|t| {
            t.deadline.map(|d| (d - self.now).num_seconds() <= 3600).unwrap_or(false)
        })
    }
}

#[derive(Debug, Clone)]
pub struct SchedulingDecision {
    pub selected: Vec<TaskId>,
    pub reasoning: Vec<String>,
    pub confidence: f64,
    pub expected_outcome: ExpectedOutcome,
    pub alternatives: Vec<Vec<TaskId>>,
    pub algorithm_used: Algorithm,
}

/// `selectNext(eligible, availableSlots, context) -> SchedulingDecision`.
pub fn select_next(
    eligible: &[Task],
    available_slots: usize,
    context: &SchedulingContext,
    algorithm: Algorithm,
    graph: &DependencyGraph,
) -> SchedulingDecision {
    if available_slots == 0 || eligible.is_empty() {
        return SchedulingDecision {
            selected: Vec::new(),
            reasoning: vec!["no available slots or no eligible tasks".to_string()],
            confidence: 1.0,
            expected_outcome: ExpectedOutcome {
                total_duration_estimate_ms: 0,
                parallelism_factor: 0.0,
                risk_band: RiskBand::Low,
            },
            alternatives: Vec::new(),
            algorithm_used: algorithm,
        };
    }

    let resolved = algorithm.resolve(eligible, context);
    let ranked = resolved.rank(eligible, context, graph);

    let selected: Vec<TaskId> = ranked.iter().take(available_slots).map(|t| t.id.clone()).collect();
    let alternatives = ranked
        .iter()
        .skip(available_slots)
        .take(3)
        .map(|t| vec![t.id.clone()])
        .collect();

    let total_duration_estimate_ms = selected
        .iter()
        .filter_map(|id| eligible.iter().find(|t| &t.id == id))
        .map(|t| t.estimated_duration_ms)
        .max()
        .unwrap_or(0);

    let parallelism_factor = if available_slots == 0 { 0.0 } else { selected.len() as f64 / available_slots as f64 };

    let risk_band = if context.resource_utilization > 0.9 {
        RiskBand::High
    } else if context.queue_pressure() > 0.5 {
        RiskBand::Medium
    } else {
        RiskBand::Low
    };

    SchedulingDecision {
        reasoning: vec![format!("selected via {resolved} ({} eligible, {available_slots} slots)", eligible.len())],
        confidence: 0.9,
        expected_outcome: ExpectedOutcome { total_duration_estimate_ms, parallelism_factor, risk_band },
        selected,
        alternatives,
        algorithm_used: algorithm,
    }
}

/// `dynamicPriority` recompute step, called periodically by the coordinator.
pub fn recompute_dynamic_priorities(tasks: &mut [&mut Task], graph: &DependencyGraph, now: DateTime<Utc>) {
    for task in tasks.iter_mut() {
        let hours_waiting = (now - task.created_at).num_seconds() as f64 / 3600.0;
        task.priority_factors.age = (1.0 + hours_waiting / 24.0).min(2.0);

        if let Some(deadline) = task.deadline {
            let remaining = (deadline - now).num_seconds() as f64;
            let week_secs = 7.0 * 24.0 * 3600.0;
            task.priority_factors.system_criticality = (1.0 - remaining / week_secs).max(0.5);
        }

        let blocked_dependents = graph.dependents_of(&task.id).len();
        task.priority_factors.dependency_weight = 1.0 + 0.1 * blocked_dependents as f64;

        task.recompute_dynamic_priority();
    }
}

/// Per-priority slot quotas for WEIGHTED_FAIR.
pub fn weighted_fair_quotas(available_slots: usize) -> std::collections::HashMap<Priority, usize> {
    let ratios = [
        (Priority::Critical, 0.4),
        (Priority::High, 0.3),
        (Priority::Medium, 0.2),
        (Priority::Low, 0.08),
        (Priority::Background, 0.02),
    ];
    let mut quotas = std::collections::HashMap::new();
    for (priority, ratio) in ratios {
        quotas.insert(priority, (available_slots as f64 * ratio).round() as usize);
    }
    quotas
}
