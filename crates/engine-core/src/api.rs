//! The public facade: the surface area everything else in this crate is
//! built to serve. One `Engine` per running coordinator; all operations take `&self` and
//! are safe to call concurrently, since every mutation routes through the same state mutex.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use engine_model::snapshot::EdgeRecord;
use engine_model::{EdgeType, Task, TaskId, TaskStatus};
use tokio::sync::{broadcast, Mutex};
use tracing::info;

use crate::breakdown::{self, BreakdownStrategy, ComplexitySignals};
use crate::clock::{system_clock, SharedClock};
use crate::config::EngineConfig;
use crate::coordinator::Coordinator;
use crate::error::EngineError;
use crate::events::{EngineEvent, EventBus};
use crate::executor::{ConditionEvaluator, TaskExecutor};
use crate::graph::DependencyGraph;
use crate::health::HealthStatus;
use crate::lifecycle::{is_valid_transition, LifecycleEvent, Trigger};
use crate::metrics::AlertThresholds;
use crate::persistence::PersistenceManager;
use crate::scheduler::{self, Algorithm};
use crate::state::EngineState;

/// Everything a caller needs to describe a new task; defaults mirror [`Task::new`].
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub id: Option<TaskId>,
    pub title: String,
    pub description: String,
    pub category: engine_model::task::Category,
    pub priority: engine_model::task::Priority,
    pub complexity: engine_model::task::Complexity,
    pub estimated_duration_ms: u64,
    pub max_execution_time_ms: u64,
    pub max_retries: u32,
    pub deadline: Option<chrono::DateTime<Utc>>,
    pub required_resources: Vec<String>,
    pub resource_constraints: std::collections::BTreeMap<String, u64>,
    pub dependencies: Vec<(TaskId, EdgeType)>,
    pub pre_conditions: Vec<String>,
    pub post_conditions: Vec<String>,
    pub tags: Vec<String>,
}

impl TaskSpec {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: None,
            title: title.into(),
            description: description.into(),
            category: engine_model::task::Category::Feature,
            priority: engine_model::task::Priority::Medium,
            complexity: engine_model::task::Complexity::Moderate,
            estimated_duration_ms: 60_000,
            max_execution_time_ms: 300_000,
            max_retries: 3,
            deadline: None,
            required_resources: Vec::new(),
            resource_constraints: Default::default(),
            dependencies: Vec::new(),
            pre_conditions: Vec::new(),
            post_conditions: Vec::new(),
            tags: Vec::new(),
        }
    }
}

/// Snapshot view returned by `Get`/`List`; a clone, never a live reference.
pub type TaskSnapshot = Task;

pub struct Engine {
    state: Arc<Mutex<EngineState>>,
    coordinator: Arc<Coordinator>,
    config: EngineConfig,
    events: EventBus,
    clock: SharedClock,
    persistence: Option<PersistenceManager>,
}

impl Engine {
    pub fn new(config: EngineConfig, executor: Arc<dyn TaskExecutor>) -> Arc<Self> {
        Self::with_evaluator(config, executor, Arc::new(crate::executor::AlwaysTrueEvaluator))
    }

    pub fn with_evaluator(
        config: EngineConfig,
        executor: Arc<dyn TaskExecutor>,
        evaluator: Arc<dyn ConditionEvaluator>,
    ) -> Arc<Self> {
        Self::with_clock(config, executor, evaluator, system_clock())
    }

    /// Full constructor taking an explicit [`SharedClock`]; the other constructors are conveniences over this one.
    pub fn with_clock(
        config: EngineConfig,
        executor: Arc<dyn TaskExecutor>,
        evaluator: Arc<dyn ConditionEvaluator>,
        clock: SharedClock,
    ) -> Arc<Self> {
        let state = Arc::new(Mutex::new(EngineState::new(config.algorithm)));
        let events = EventBus::default();
        let coordinator = Coordinator::new(state.clone(), config.clone(), executor, evaluator, events.clone(), clock.clone());
        Arc::new(Self { state, coordinator, config, events, clock, persistence: None })
    }

    /// Attaches a snapshot path; `recover` must be called explicitly before `run` to restore
    /// prior state. Persistence is opt-in so unit tests stay filesystem-free.
    pub fn with_persistence(mut self: Arc<Self>, path: impl Into<PathBuf>) -> Arc<Self> {
        let this = Arc::get_mut(&mut self).expect("attach persistence before spawning run()");
        this.persistence = Some(PersistenceManager::new(path));
        self
    }

    /// Runs the dispatch loop until `shutdown` is called. Intended to be spawned once on a
    /// long-lived task.
    pub async fn run(self: &Arc<Self>) {
        self.coordinator.clone().run().await;
    }

    pub async fn shutdown(&self) {
        self.coordinator.shutdown().await;
        if let Some(persistence) = &self.persistence {
            if let Err(e) = self.write_snapshot(persistence).await {
                tracing::warn!(error = %e, "final snapshot write failed during shutdown");
            }
        }
    }

    /// Restores from the attached snapshot path, if any snapshot exists yet. Must be
    /// called before `run`.
    pub async fn recover(&self) -> Result<bool, EngineError> {
        let Some(persistence) = &self.persistence else { return Ok(false) };
        let recovered = persistence.recover().map_err(|e| EngineError::RecoveryError(e.to_string()))?;
        let Some((snapshot, graph)) = recovered else { return Ok(false) };

        let mut state = self.state.lock().await;
        state.graph = graph;
        state.pools = snapshot.pools;
        state.algorithm = snapshot.scheduler.algorithm.parse().unwrap_or(Algorithm::default());
        for task in snapshot.tasks {
            let _ = state.store.insert(task);
        }
        for id in snapshot.completed_history {
            state.push_completed_history(id);
        }
        for id in snapshot.failed_history {
            state.push_failed_history(id);
        }
        info!(tasks = state.store.len(), "recovered engine state from snapshot");
        Ok(true)
    }

    async fn write_snapshot(&self, persistence: &PersistenceManager) -> Result<(), EngineError> {
        let state = self.state.lock().await;
        let tasks: Vec<Task> = state.store.iter().cloned().collect();
        let edges = edge_records(&state.graph, &tasks);
        let completed_history: Vec<TaskId> = state.completed_history.iter().cloned().collect();
        let failed_history: Vec<TaskId> = state.failed_history.iter().cloned().collect();
        let pools = state.pools.clone();
        let algorithm = state.algorithm;
        let snapshot = persistence
            .build_snapshot(tasks, edges, completed_history, failed_history, pools, algorithm, self.config.max_concurrent_tasks as u32, serde_json::json!({}))
            .map_err(|e| EngineError::PersistenceError(e.to_string()))?;
        persistence.write(&snapshot).map_err(|e| EngineError::PersistenceError(e.to_string()))?;
        self.events.publish(EngineEvent::SnapshotWritten { path: persistence.path().display().to_string(), at: self.clock.now() });
        Ok(())
    }

    /// `Submit(spec) -> TaskId`. Validates, rejects caller-supplied duplicate ids on
    /// non-terminal tasks, rejects cyclic dependencies, and moves the task CREATED -> VALIDATED
    /// -> QUEUED before returning.
    pub async fn submit(&self, spec: TaskSpec) -> Result<TaskId, EngineError> {
        if spec.title.trim().is_empty() {
            return Err(EngineError::InvalidSpec("title must not be empty".to_string()));
        }
        if spec.description.trim().is_empty() {
            return Err(EngineError::InvalidSpec("description must not be empty".to_string()));
        }
        if spec.estimated_duration_ms == 0 {
            return Err(EngineError::InvalidSpec("estimatedDurationMs must be positive".to_string()));
        }

        let now = self.clock.now();
        let id = spec.id.unwrap_or_else(TaskId::generate);
        let description_len = spec.description.len();
        let declared_dependency_count = spec.dependencies.len();
        let category_multiplier = breakdown::category_multiplier(spec.category);
        let mut task = Task::new(id.clone(), spec.title, spec.description, now);
        task.category = spec.category;
        task.priority = spec.priority;
        task.base_priority = spec.priority.weight();
        task.dynamic_priority = spec.priority.weight();
        task.complexity = spec.complexity;
        task.estimated_duration_ms = spec.estimated_duration_ms;
        task.max_execution_time_ms = spec.max_execution_time_ms;
        task.max_retries = spec.max_retries;
        task.deadline = spec.deadline;
        task.required_resources = spec.required_resources.into_iter().collect();
        task.resource_constraints = spec.resource_constraints;
        task.pre_conditions = spec.pre_conditions;
        task.post_conditions = spec.post_conditions;
        task.tags = spec.tags.into_iter().collect();

        let mut state = self.state.lock().await;
        state.store.insert(task).map_err(|_| EngineError::DuplicateId(id.clone()))?;

        for (dependency, edge_type) in &spec.dependencies {
            state
                .graph
                .add_dependency(&id, dependency, *edge_type)
                .map_err(|e| EngineError::CyclicDependency { from: e.from, to: e.to })?;
            state.store.link_dependency(&id, dependency).map_err(|_| EngineError::NotFound(dependency.clone()))?;
        }

        self.advance_locked(&mut state, &id, TaskStatus::Created, TaskStatus::Validated, now);
        self.advance_locked(&mut state, &id, TaskStatus::Validated, TaskStatus::Queued, now);
        state.metrics.record_submitted();
        let historical_success_rate = state.metrics.success_rate();
        drop(state);

        self.events.publish(EngineEvent::TaskSubmitted { task_id: id.clone(), at: now });

        let signals = ComplexitySignals { description_len, declared_dependency_count, category_multiplier, historical_success_rate };
        if let Err(e) = self.maybe_break_down(&id, signals, 0, 3, BreakdownStrategy::Functional).await {
            tracing::warn!(task_id = %id, error = %e, "automatic breakdown failed, leaving task intact");
        }

        self.coordinator.kick();
        Ok(id)
    }

    fn advance_locked(&self, state: &mut EngineState, id: &TaskId, from: TaskStatus, to: TaskStatus, now: chrono::DateTime<Utc>) {
        debug_assert!(is_valid_transition(from, to));
        if state.store.try_transition(id, from, to).unwrap_or(false) {
            state.lifecycle_log.record(LifecycleEvent { task_id: id.clone(), from, to, at: now, trigger: Trigger::System, metadata: serde_json::json!({}) });
        }
    }

    /// `Cancel(id)`. Idempotent: cancelling an already-terminal task is a no-op.
    pub async fn cancel(&self, id: &TaskId) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        let Some(task) = state.store.get(id) else { return Err(EngineError::NotFound(id.clone())) };
        if task.status.is_terminal() {
            return Ok(());
        }
        if task.status.occupies_worker_slot() {
            drop(state);
            self.coordinator.cancel_running(id).await;
            return Ok(());
        }
        let from = task.status;
        if is_valid_transition(from, TaskStatus::Cancelled) {
            let now = self.clock.now();
            self.advance_locked(&mut state, id, from, TaskStatus::Cancelled, now);
            self.events.publish(EngineEvent::TaskCancelled { task_id: id.clone(), reason: "cancelled by caller".to_string(), at: now });
        }
        Ok(())
    }

    /// `Pause(id)`: only a RUNNING task can be paused; others return `UnexpectedState`. Signals
    /// the worker and returns immediately; the actual RUNNING -> PAUSED transition happens once
    /// the coordinator reconciles the worker's acknowledgment, the same way `cancel` on a
    /// running task does not block on the worker actually stopping.
    pub async fn pause(&self, id: &TaskId) -> Result<(), EngineError> {
        let state = self.state.lock().await;
        let actual = state.store.get(id).ok_or_else(|| EngineError::NotFound(id.clone()))?.status;
        if actual != TaskStatus::Running {
            return Err(EngineError::UnexpectedState { id: id.clone(), expected: TaskStatus::Running, actual });
        }
        drop(state);
        self.coordinator.pause_running(id).await;
        Ok(())
    }

    /// `Resume(id)`: PAUSED -> RESUMING -> QUEUED, re-entering the scheduler.
    pub async fn resume(&self, id: &TaskId) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        let actual = state.store.get(id).ok_or_else(|| EngineError::NotFound(id.clone()))?.status;
        if actual != TaskStatus::Paused {
            return Err(EngineError::UnexpectedState { id: id.clone(), expected: TaskStatus::Paused, actual });
        }
        let now = self.clock.now();
        self.advance_locked(&mut state, id, TaskStatus::Paused, TaskStatus::Resuming, now);
        self.advance_locked(&mut state, id, TaskStatus::Resuming, TaskStatus::Queued, now);
        drop(state);
        self.coordinator.kick();
        Ok(())
    }

    /// `Retry(id)`: manually re-queues a FAILED task outside the automatic
    /// retry-with-backoff path, resetting its retry counter.
    pub async fn retry(&self, id: &TaskId) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        let actual = state.store.get(id).ok_or_else(|| EngineError::NotFound(id.clone()))?.status;
        if actual != TaskStatus::Failed {
            return Err(EngineError::UnexpectedState { id: id.clone(), expected: TaskStatus::Failed, actual });
        }
        let now = self.clock.now();
        self.advance_locked(&mut state, id, TaskStatus::Failed, TaskStatus::Retrying, now);
        self.advance_locked(&mut state, id, TaskStatus::Retrying, TaskStatus::Queued, now);
        if let Some(task) = state.store.get_mut(id) {
            task.current_retries = 0;
            task.last_error = None;
        }
        drop(state);
        self.coordinator.kick();
        Ok(())
    }

    pub async fn get(&self, id: &TaskId) -> Option<TaskSnapshot> {
        self.state.lock().await.store.get(id).cloned()
    }

    pub async fn list(&self, status: Option<TaskStatus>) -> Vec<TaskSnapshot> {
        let state = self.state.lock().await;
        state.store.iter().filter(|t| status.map(|s| t.status == s).unwrap_or(true)).cloned().collect()
    }

    /// `Metrics()`: a serializable rollup, suitable for an external `/metrics` surface
    /// layered on top of this crate.
    pub async fn metrics(&self) -> serde_json::Value {
        let state = self.state.lock().await;
        serde_json::json!({
            "successRate": state.metrics.success_rate(),
            "errorRate": state.metrics.error_rate(),
            "throughputPerHour": state.metrics.throughput_per_hour(),
            "averageDurationMs": state.metrics.average_duration_ms(),
            "medianDurationMs": state.metrics.median_duration_ms(),
            "p95DurationMs": state.metrics.p95_duration_ms(),
            "retryRate": state.metrics.retry_rate(),
            "starvationCount": state.metrics.starvation_count(),
            "queuedCount": state.store.iter().filter(|t| t.status == TaskStatus::Queued).count(),
            "runningCount": state.store.running_ids().len(),
        })
    }

    pub async fn health(&self) -> HealthStatus {
        let state = self.state.lock().await;
        state.metrics.health(state.pools.average_utilization(), &AlertThresholds::default())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// `SetAlgorithm(algorithm)`: swaps the active scheduling algorithm without
    /// disturbing in-flight tasks.
    pub async fn set_algorithm(&self, algorithm: Algorithm) {
        self.state.lock().await.algorithm = algorithm;
    }

    /// Runs one periodic housekeeping pass outside the coordinator's dispatch tick: recomputes
    /// dynamic priorities, writes a snapshot if persistence is attached, and publishes a health
    /// event.
    pub async fn housekeeping(&self) -> Result<(), EngineError> {
        let now = self.clock.now();
        {
            let mut state = self.state.lock().await;
            let graph = state.graph.clone();
            let mut tasks: Vec<&mut Task> = state.store.iter_mut().filter(|t| !t.status.is_terminal()).collect();
            scheduler::recompute_dynamic_priorities(&mut tasks, &graph, now);
        }
        let status = self.health().await;
        self.events.publish(EngineEvent::Health { status, at: now });
        if let Some(persistence) = &self.persistence {
            self.write_snapshot(persistence).await?;
        }
        Ok(())
    }

    /// Breakdown Orchestrator entry point: scores `id`'s complexity and, if it clears
    /// the configured threshold, synthesizes subtasks and rewires `id` into a tracker task.
    pub async fn maybe_break_down(&self, id: &TaskId, signals: ComplexitySignals, depth: u32, phase_count: usize, strategy: BreakdownStrategy) -> Result<Option<Vec<TaskId>>, EngineError> {
        let score = breakdown::complexity_score(&signals);
        if !breakdown::should_break_down(score, self.config.breakdown_threshold, depth, self.config.max_breakdown_depth) {
            return Ok(None);
        }

        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let original = state.store.get(id).ok_or_else(|| EngineError::NotFound(id.clone()))?.clone();
        let result = breakdown::synthesize(&original, phase_count, strategy, self.config.max_subtasks, now)
            .map_err(|e| EngineError::InvalidSpec(e.to_string()))?;

        for subtask in &result.subtasks {
            let _ = state.store.insert(subtask.clone());
            state.graph.add_node(&subtask.id);
        }
        for (dependent_idx, dependency_idx) in &result.internal_edges {
            let dependent = result.subtasks[*dependent_idx].id.clone();
            let dependency = result.subtasks[*dependency_idx].id.clone();
            let _ = state.graph.add_dependency(&dependent, &dependency, EdgeType::Blocks);
            let _ = state.store.link_dependency(&dependent, &dependency);
        }

        let tracker = breakdown::tracker_task(&original, &result);
        let subtask_ids: Vec<TaskId> = result.subtasks.iter().map(|t| t.id.clone()).collect();
        for subtask_id in &subtask_ids {
            let _ = state.graph.add_dependency(&tracker.id, subtask_id, EdgeType::Blocks);
        }
        if let Some(existing) = state.store.get_mut(&tracker.id) {
            *existing = tracker;
        }

        self.events.publish(EngineEvent::BreakdownProduced { task_id: id.clone(), subtask_ids: subtask_ids.clone(), strategy, at: now });
        Ok(Some(subtask_ids))
    }
}

fn edge_records(graph: &DependencyGraph, tasks: &[Task]) -> Vec<EdgeRecord> {
    let mut edges = Vec::new();
    for task in tasks {
        for dep in &task.dependencies {
            if let Some(edge_type) = graph.edge_type(&task.id, dep) {
                edges.push(EdgeRecord { from: task.id.clone(), to: dep.clone(), edge_type });
            }
        }
    }
    edges
}
