//! The nine selectable scheduling rules plus the shared tie-break chain.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use engine_model::{Priority, Task, TaskId};

use crate::graph::DependencyGraph;

use super::starvation::effective_priority;
use super::{weighted_fair_quotas, SchedulingContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Algorithm {
    Fifo,
    Priority,
    Sjf,
    Deadline,
    Dependency,
    ResourceOptimal,
    WeightedFair,
    RoundRobin,
    HybridAdaptive,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Algorithm::Fifo => "FIFO",
            Algorithm::Priority => "PRIORITY",
            Algorithm::Sjf => "SJF",
            Algorithm::Deadline => "DEADLINE",
            Algorithm::Dependency => "DEPENDENCY",
            Algorithm::ResourceOptimal => "RESOURCE_OPTIMAL",
            Algorithm::WeightedFair => "WEIGHTED_FAIR",
            Algorithm::RoundRobin => "ROUND_ROBIN",
            Algorithm::HybridAdaptive => "HYBRID_ADAPTIVE",
        };
        write!(f, "{s}")
    }
}

impl Default for Algorithm {
    fn default() -> Self {
        Algorithm::HybridAdaptive
    }
}

impl std::str::FromStr for Algorithm {
    type Err = engine_model::EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "FIFO" => Algorithm::Fifo,
            "PRIORITY" => Algorithm::Priority,
            "SJF" => Algorithm::Sjf,
            "DEADLINE" => Algorithm::Deadline,
            "DEPENDENCY" => Algorithm::Dependency,
            "RESOURCE_OPTIMAL" => Algorithm::ResourceOptimal,
            "WEIGHTED_FAIR" => Algorithm::WeightedFair,
            "ROUND_ROBIN" => Algorithm::RoundRobin,
            "HYBRID_ADAPTIVE" => Algorithm::HybridAdaptive,
            other => return Err(engine_model::EnumParseError { kind: "algorithm", value: other.to_string() }),
        })
    }
}

impl Algorithm {
    /// HYBRID_ADAPTIVE picks a concrete algorithm per the current context; every
    /// other variant resolves to itself.
    pub fn resolve(self, eligible: &[Task], context: &SchedulingContext) -> Algorithm {
        if self != Algorithm::HybridAdaptive {
            return self;
        }
        if context.queue_pressure() > 0.8 {
            Algorithm::WeightedFair
        } else if context.resource_utilization > 0.9 {
            Algorithm::ResourceOptimal
        } else if context.has_urgent_deadlines(eligible) {
            Algorithm::Deadline
        } else {
            Algorithm::Priority
        }
    }

    /// Ranks `eligible` best-first per this algorithm's rule, falling back to the shared
    /// tie-break chain on ties.
    pub fn rank<'a>(self, eligible: &'a [Task], context: &SchedulingContext, graph: &DependencyGraph) -> Vec<&'a Task> {
        let mut tasks: Vec<&Task> = eligible.iter().collect();
        match self {
            Algorithm::Fifo => tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| tie_break(a, b, context))),
            Algorithm::Priority => {
                tasks.sort_by(|a, b| priority_key(b, context).cmp(&priority_key(a, context)).then_with(|| tie_break(a, b, context)))
            }
            Algorithm::Sjf => {
                tasks.sort_by(|a, b| a.estimated_duration_ms.cmp(&b.estimated_duration_ms).then_with(|| tie_break(a, b, context)))
            }
            Algorithm::Deadline => tasks.sort_by(|a, b| deadline_key(a).cmp(&deadline_key(b)).then_with(|| tie_break(a, b, context))),
            Algorithm::Dependency => {
                let levels = graph.topological_levels();
                tasks.sort_by(|a, b| {
                    let la = levels.get(&a.id).copied().unwrap_or(u32::MAX);
                    let lb = levels.get(&b.id).copied().unwrap_or(u32::MAX);
                    la.cmp(&lb)
                        .then_with(|| priority_key(b, context).cmp(&priority_key(a, context)))
                        .then_with(|| tie_break(a, b, context))
                });
            }
            Algorithm::ResourceOptimal => {
                tasks.sort_by(|a, b| resource_optimal_score(b).total_cmp(&resource_optimal_score(a)).then_with(|| tie_break(a, b, context)));
            }
            Algorithm::WeightedFair => return weighted_fair_order(eligible, context),
            Algorithm::RoundRobin => return round_robin_order(eligible, context),
            Algorithm::HybridAdaptive => unreachable!("resolve() must be called before rank()"),
        }
        tasks
    }
}

fn priority_key(task: &Task, context: &SchedulingContext) -> (i64, i64) {
    // (effective priority weight, dynamic priority) as an orderable integer pair.
    let effective = effective_priority(task, context.now, context.max_starvation_time_secs);
    (effective.weight() as i64, task.dynamic_priority as i64)
}

fn deadline_key(task: &Task) -> i64 {
    task.deadline.map(|d| d.timestamp()).unwrap_or(i64::MAX)
}

fn resource_optimal_score(task: &Task) -> f64 {
    let resource_units: u64 = task.resource_constraints.values().sum::<u64>().max(1);
    (task.dynamic_priority * task.estimated_duration_ms as f64) / resource_units as f64
}

/// Deterministic fallback: effective priority desc, older createdAt, smaller duration,
/// TaskID lexicographic.
pub fn tie_break(a: &Task, b: &Task, context: &SchedulingContext) -> Ordering {
    let pa = effective_priority(a, context.now, context.max_starvation_time_secs).weight();
    let pb = effective_priority(b, context.now, context.max_starvation_time_secs).weight();
    pb.total_cmp(&pa)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.estimated_duration_ms.cmp(&b.estimated_duration_ms))
        .then_with(|| a.id.cmp(&b.id))
}

fn weighted_fair_order<'a>(eligible: &'a [Task], context: &SchedulingContext) -> Vec<&'a Task> {
    let quotas = weighted_fair_quotas(eligible.len().max(1));
    let mut buckets: HashMap<Priority, Vec<&Task>> = HashMap::new();
    for t in eligible {
        buckets.entry(effective_priority(t, context.now, context.max_starvation_time_secs)).or_default().push(t);
    }
    for bucket in buckets.values_mut() {
        bucket.sort_by(|a, b| tie_break(a, b, context));
    }

    let mut ordered = Vec::with_capacity(eligible.len());
    for priority in Priority::ALL {
        let quota = quotas.get(&priority).copied().unwrap_or(0).max(if buckets.contains_key(&priority) { 1 } else { 0 });
        if let Some(bucket) = buckets.get_mut(&priority) {
            let take = quota.min(bucket.len());
            ordered.extend(bucket.drain(0..take));
        }
    }
    // Residual slots: anything left over, highest-priority bucket first.
    for priority in Priority::ALL {
        if let Some(bucket) = buckets.get_mut(&priority) {
            ordered.append(bucket);
        }
    }
    ordered
}

fn round_robin_order<'a>(eligible: &'a [Task], context: &SchedulingContext) -> Vec<&'a Task> {
    let mut buckets: HashMap<Priority, Vec<&Task>> = HashMap::new();
    for t in eligible {
        buckets.entry(effective_priority(t, context.now, context.max_starvation_time_secs)).or_default().push(t);
    }
    for bucket in buckets.values_mut() {
        bucket.sort_by(|a, b| tie_break(a, b, context));
    }

    let mut ordered = Vec::with_capacity(eligible.len());
    loop {
        let mut progressed = false;
        for priority in Priority::ALL {
            if let Some(bucket) = buckets.get_mut(&priority) {
                if !bucket.is_empty() {
                    ordered.push(bucket.remove(0));
                    progressed = true;
                }
            }
        }
        if !progressed {
            break;
        }
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use engine_model::TaskId;

    fn ctx() -> SchedulingContext {
        SchedulingContext {
            now: Utc::now(),
            running_count: 0,
            queued_count: 3,
            max_concurrent: 4,
            resource_utilization: 0.1,
            critical_path: Default::default(),
            max_starvation_time_secs: 300,
        }
    }

    fn task(id: &str, priority: Priority) -> Task {
        let mut t = Task::new(TaskId::new(id), id.into(), "d".into(), Utc::now());
        t.priority = priority;
        t.dynamic_priority = priority.weight();
        t
    }

    #[test]
    fn priority_algorithm_orders_critical_first() {
        let tasks = vec![task("a", Priority::High), task("b", Priority::Critical), task("c", Priority::Medium)];
        let context = ctx();
        let graph = DependencyGraph::new();
        let ranked = Algorithm::Priority.rank(&tasks, &context, &graph);
        let ids: Vec<_> = ranked.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn fifo_orders_by_creation_time() {
        let mut a = task("a", Priority::Medium);
        a.created_at = Utc::now() - chrono::Duration::seconds(10);
        let b = task("b", Priority::Medium);
        let tasks = vec![b, a];
        let context = ctx();
        let graph = DependencyGraph::new();
        let ranked = Algorithm::Fifo.rank(&tasks, &context, &graph);
        assert_eq!(ranked[0].id.as_str(), "a");
    }

    #[test]
    fn hybrid_adaptive_picks_weighted_fair_under_pressure() {
        let mut context = ctx();
        context.queued_count = 100;
        context.running_count = 1;
        let eligible = vec![task("a", Priority::Medium)];
        assert_eq!(Algorithm::HybridAdaptive.resolve(&eligible, &context), Algorithm::WeightedFair);
    }

    #[test]
    fn hybrid_adaptive_picks_resource_optimal_under_high_utilization() {
        let mut context = ctx();
        context.resource_utilization = 0.95;
        let eligible = vec![task("a", Priority::Medium)];
        assert_eq!(Algorithm::HybridAdaptive.resolve(&eligible, &context), Algorithm::ResourceOptimal);
    }
}
