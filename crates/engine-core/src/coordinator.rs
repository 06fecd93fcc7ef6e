//! Execution Coordinator: bounded-concurrency dispatch loop, retries with backoff,
//! cancellation, and failure cascade.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use engine_model::{EdgeType, Task, TaskId, TaskStatus};
use tokio::sync::{mpsc, Mutex, Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::config::EngineConfig;
use crate::events::{EngineEvent, EventBus};
use crate::executor::{ConditionEvaluator, ExecutionContext, ExecutionOutcome, TaskExecutor, TaskView};
use crate::lifecycle::{is_valid_transition, LifecycleEvent, Trigger};
use crate::resource;
use crate::scheduler::{self, SchedulingContext};
use crate::state::EngineState;

/// Outcome of one worker invocation, reconciled by the coordinator loop. The coordinator
/// observes completion via a channel and never blocks on the callback itself.
enum WorkerResult {
    Success { task_id: TaskId, outcome: ExecutionOutcome },
    Timeout { task_id: TaskId },
    Error { task_id: TaskId, message: String },
    Cancelled { task_id: TaskId },
    Paused { task_id: TaskId },
}

/// Why a running worker's cancellation token fired: a true cancel is terminal and cascades
/// to dependents, a pause is not and must not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Cancel,
    Pause,
}

pub struct Coordinator {
    state: Arc<Mutex<EngineState>>,
    config: EngineConfig,
    executor: Arc<dyn TaskExecutor>,
    evaluator: Arc<dyn ConditionEvaluator>,
    events: EventBus,
    clock: SharedClock,
    semaphore: Arc<Semaphore>,
    cancellation: CancellationToken,
    running_cancel_tokens: Mutex<std::collections::HashMap<TaskId, CancellationToken>>,
    /// Set just before a cancellation token fires, so the worker's select loop can tell a
    /// terminal cancel from a pause (which must not cascade to dependents). Entries are
    /// removed as soon as the corresponding worker reconciles.
    stop_reasons: Arc<Mutex<std::collections::HashMap<TaskId, StopReason>>>,
    /// Wakes `run`'s select loop immediately after a submit/resume/retry, instead of waiting
    /// for the next periodic tick or worker completion.
    kick: Notify,
}

impl Coordinator {
    pub fn new(
        state: Arc<Mutex<EngineState>>,
        config: EngineConfig,
        executor: Arc<dyn TaskExecutor>,
        evaluator: Arc<dyn ConditionEvaluator>,
        events: EventBus,
        clock: SharedClock,
    ) -> Arc<Self> {
        let max_concurrent = config.max_concurrent_tasks;
        Arc::new(Self {
            state,
            config,
            executor,
            evaluator,
            events,
            clock,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            cancellation: CancellationToken::new(),
            running_cancel_tokens: Mutex::new(Default::default()),
            stop_reasons: Arc::new(Mutex::new(Default::default())),
            kick: Notify::new(),
        })
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Requests an out-of-band dispatch tick as soon as `run`'s loop is free to take it.
    pub fn kick(&self) {
        self.kick.notify_one();
    }

    /// One dispatch tick: reserves resources, checks conditions, and spawns workers for as
    /// many eligible tasks as there are free slots. Returns the number of tasks newly dispatched.
    pub async fn tick(self: &Arc<Self>, result_tx: &mpsc::Sender<WorkerResult>) -> usize {
        let mut dispatched = Vec::new();
        {
            let mut state = self.state.lock().await;
            let running = state.store.running_ids().len();
            let free = self.config.max_concurrent_tasks.saturating_sub(running);
            if free == 0 {
                return 0;
            }

            let now = self.clock.now();
            let eligible_ids = state.store.eligible_ids(now);
            let eligible: Vec<Task> = eligible_ids.iter().filter_map(|id| state.store.get(id).cloned()).collect();
            if eligible.is_empty() {
                return 0;
            }

            let queued_count = state.store.iter().filter(|t| t.status == TaskStatus::Queued).count();
            let context = SchedulingContext {
                now,
                running_count: running,
                queued_count,
                max_concurrent: self.config.max_concurrent_tasks,
                resource_utilization: state.pools.average_utilization(),
                critical_path: Default::default(),
                max_starvation_time_secs: self.config.max_starvation_time_secs,
            };

            let algorithm = state.algorithm;
            let decision = scheduler::select_next(&eligible, free, &context, algorithm, &state.graph);
            state.metrics.record_scheduling_decision(decision.algorithm_used, decision.confidence);
            self.events.publish(EngineEvent::SchedulingDecision {
                algorithm: decision.algorithm_used,
                selected: decision.selected.clone(),
                confidence: decision.confidence,
                at: now,
            });

            for task_id in &decision.selected {
                let Some(task) = state.store.get(task_id).cloned() else { continue };
                let required: Vec<String> = task.required_resources.iter().cloned().collect();
                let estimate = if task.resource_constraints.is_empty() {
                    resource::estimate_resources(task.category, task.estimated_duration_ms, &required)
                } else {
                    task.resource_constraints.clone()
                };

                if resource::reserve(&mut state.pools, task_id, &estimate).is_err() {
                    debug!(task_id = %task_id, "resource reservation failed this tick, will retry");
                    continue;
                }

                self.advance(&mut state, task_id, TaskStatus::Queued, TaskStatus::Scheduled, Trigger::Automatic, now);
                self.advance(&mut state, task_id, TaskStatus::Scheduled, TaskStatus::Preparing, Trigger::Automatic, now);
                self.advance(&mut state, task_id, TaskStatus::Preparing, TaskStatus::ResourceAllocated, Trigger::Automatic, now);
                self.advance(&mut state, task_id, TaskStatus::ResourceAllocated, TaskStatus::Starting, Trigger::Automatic, now);

                if !self.evaluator.evaluate(&task, &task.pre_conditions).await {
                    warn!(task_id = %task_id, "pre-conditions failed, failing task");
                    resource::release(&mut state.pools, &estimate);
                    self.advance(&mut state, task_id, TaskStatus::Starting, TaskStatus::Failed, Trigger::Error, now);
                    continue;
                }
                resource::commit(&mut state.pools, &estimate);
                self.advance(&mut state, task_id, TaskStatus::Starting, TaskStatus::Running, Trigger::Automatic, now);

                if let Some(t) = state.store.get_mut(task_id) {
                    t.started_at = Some(now);
                }
                dispatched.push((task, estimate));
            }
        }

        let count = dispatched.len();
        for (task, estimate) in dispatched {
            self.spawn_worker(task, estimate, result_tx.clone()).await;
        }
        count
    }

    fn advance(
        &self,
        state: &mut EngineState,
        task_id: &TaskId,
        from: TaskStatus,
        to: TaskStatus,
        trigger: Trigger,
        now: chrono::DateTime<Utc>,
    ) {
        debug_assert!(is_valid_transition(from, to), "illegal transition {from} -> {to}");
        if state.store.try_transition(task_id, from, to).unwrap_or(false) {
            state.lifecycle_log.record(LifecycleEvent {
                task_id: task_id.clone(),
                from,
                to,
                at: now,
                trigger,
                metadata: serde_json::json!({}),
            });
            self.events.publish(EngineEvent::StateTransition { task_id: task_id.clone(), from, to, at: now });
        }
    }

    async fn spawn_worker(self: &Arc<Self>, task: Task, estimate: BTreeMap<String, u64>, result_tx: mpsc::Sender<WorkerResult>) {
        let permit = Arc::clone(&self.semaphore).acquire_owned().await.expect("semaphore never closed");
        let executor = Arc::clone(&self.executor);
        let task_id = task.id.clone();
        let cancel = CancellationToken::new();
        self.running_cancel_tokens.lock().await.insert(task_id.clone(), cancel.clone());
        let stop_reasons = Arc::clone(&self.stop_reasons);
        let timeout_ms = task.max_execution_time_ms.min(self.config.default_timeout_ms);
        let attempt = task.current_retries + 1;
        let _estimate = estimate;

        tokio::spawn(async move {
            let _permit = permit;
            let ctx = ExecutionContext { task_id: task_id.clone(), attempt, cancellation: cancel.clone() };
            let view = TaskView(task);
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    match stop_reasons.lock().await.remove(&task_id) {
                        Some(StopReason::Pause) => WorkerResult::Paused { task_id: task_id.clone() },
                        _ => WorkerResult::Cancelled { task_id: task_id.clone() },
                    }
                }
                outcome = tokio::time::timeout(std::time::Duration::from_millis(timeout_ms), executor.execute(ctx, view)) => {
                    match outcome {
                        Ok(Ok(outcome)) => WorkerResult::Success { task_id: task_id.clone(), outcome },
                        Ok(Err(e)) => WorkerResult::Error { task_id: task_id.clone(), message: e.0 },
                        Err(_) => WorkerResult::Timeout { task_id: task_id.clone() },
                    }
                }
            };
            let _ = result_tx.send(result).await;
        });
    }

    /// Completion handling: success/timeout/error/cancel branches, resource release,
    /// retry-with-backoff scheduling, and failure cascade to dependents.
    async fn handle_result(self: &Arc<Self>, result: WorkerResult) {
        self.running_cancel_tokens.lock().await.remove(match &result {
            WorkerResult::Success { task_id, .. }
            | WorkerResult::Timeout { task_id }
            | WorkerResult::Error { task_id, .. }
            | WorkerResult::Cancelled { task_id }
            | WorkerResult::Paused { task_id } => task_id,
        });

        let now = self.clock.now();
        let mut state = self.state.lock().await;

        match result {
            WorkerResult::Success { task_id, outcome } => {
                self.advance(&mut state, &task_id, TaskStatus::Running, TaskStatus::Completing, Trigger::Automatic, now);

                let post_conditions_ok = match state.store.get(&task_id) {
                    Some(t) => self.evaluator.evaluate(t, &t.post_conditions).await,
                    None => false,
                };
                if post_conditions_ok {
                    self.advance(&mut state, &task_id, TaskStatus::Completing, TaskStatus::Completed, Trigger::Automatic, now);
                    self.release_resources(&mut state, &task_id);
                    if let Some(t) = state.store.get_mut(&task_id) {
                        t.completed_at = Some(now);
                        t.duration_ms = Some(outcome.duration_ms);
                        t.token_usage = outcome.token_usage;
                    }
                    state.metrics.record_completed(outcome.duration_ms, now);
                    state.push_completed_history(task_id.clone());
                    self.events.publish(EngineEvent::TaskCompleted { task_id: task_id.clone(), duration_ms: outcome.duration_ms, at: now });
                } else {
                    // Post-condition failures are terminal: no automatic retry.
                    self.advance(&mut state, &task_id, TaskStatus::Completing, TaskStatus::Failed, Trigger::Error, now);
                    self.release_resources(&mut state, &task_id);
                    state.metrics.record_failed();
                    state.push_failed_history(task_id.clone());
                    self.events.publish(EngineEvent::TaskFailed {
                        task_id: task_id.clone(),
                        reason: "post-condition evaluation failed".to_string(),
                        will_retry: false,
                        at: now,
                    });
                    self.cascade_terminal(&mut state, &task_id, now);
                }
            }
            WorkerResult::Timeout { task_id } => {
                self.fail_task(&mut state, &task_id, "execution deadline exceeded".to_string(), now, true);
            }
            WorkerResult::Error { task_id, message } => {
                self.fail_task(&mut state, &task_id, message, now, true);
            }
            WorkerResult::Cancelled { task_id } => {
                self.advance(&mut state, &task_id, TaskStatus::Running, TaskStatus::Cancelled, Trigger::Manual, now);
                self.release_resources(&mut state, &task_id);
                state.metrics.record_cancelled();
                self.events.publish(EngineEvent::TaskCancelled { task_id: task_id.clone(), reason: "cancelled".to_string(), at: now });
                self.cascade_terminal(&mut state, &task_id, now);
            }
            WorkerResult::Paused { task_id } => {
                self.advance(&mut state, &task_id, TaskStatus::Running, TaskStatus::Paused, Trigger::Manual, now);
                self.release_resources(&mut state, &task_id);
                self.events.publish(EngineEvent::TaskPaused { task_id: task_id.clone(), at: now });
            }
        }
    }

    fn release_resources(&self, state: &mut EngineState, task_id: &TaskId) {
        let Some(task) = state.store.get(task_id) else { return };
        let required: Vec<String> = task.required_resources.iter().cloned().collect();
        let estimate = if task.resource_constraints.is_empty() {
            resource::estimate_resources(task.category, task.estimated_duration_ms, &required)
        } else {
            task.resource_constraints.clone()
        };
        resource::release(&mut state.pools, &estimate);
    }

    /// Terminal/retry decision for a failed worker invocation (timeout or executor error).
    fn fail_task(self: &Arc<Self>, state: &mut EngineState, task_id: &TaskId, message: String, now: chrono::DateTime<Utc>, from_running: bool) {
        if from_running {
            self.advance(state, task_id, TaskStatus::Running, TaskStatus::Failed, Trigger::Error, now);
        }
        self.release_resources(state, task_id);

        let Some(task) = state.store.get_mut(task_id) else { return };
        task.last_error = Some(message.clone());
        task.error_count += 1;

        let will_retry = task.current_retries < task.max_retries;
        state.metrics.record_failed();
        self.events.publish(EngineEvent::TaskFailed { task_id: task_id.clone(), reason: message, will_retry, at: now });

        if will_retry {
            let delay = self.config.backoff.delay_for_attempt(task.current_retries);
            task.current_retries += 1;
            task.retry_count += 1;
            state.metrics.record_retry();
            self.advance(state, task_id, TaskStatus::Failed, TaskStatus::Retrying, Trigger::Automatic, now);
            self.advance(state, task_id, TaskStatus::Retrying, TaskStatus::Queued, Trigger::Automatic, now);
            if let Some(task) = state.store.get_mut(task_id) {
                task.not_eligible_before = Some(now + chrono::Duration::from_std(delay).unwrap_or_default());
            }
            let coordinator = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                coordinator.kick();
            });
        } else {
            state.push_failed_history(task_id.clone());
            self.cascade_terminal(state, task_id, now);
        }
    }

    /// Terminal FAILED/CANCELLED cascades to transitive dependents: BLOCKS dependents fail,
    /// ENABLES/ENHANCES dependents are rescheduled without that edge.
    fn cascade_terminal(&self, state: &mut EngineState, task_id: &TaskId, now: chrono::DateTime<Utc>) {
        let dependents: Vec<TaskId> = state.graph.dependents_of(task_id).into_iter().cloned().collect();
        for dependent in dependents {
            let edge_type = state.graph.edge_type(&dependent, task_id);
            match edge_type {
                Some(EdgeType::Blocks) | Some(EdgeType::Conflicts) | None => {
                    if let Some(t) = state.store.get(&dependent) {
                        if !t.status.is_terminal() && t.status != TaskStatus::Failed {
                            let from = t.status;
                            if is_valid_transition(from, TaskStatus::Failed) {
                                self.advance(state, &dependent, from, TaskStatus::Failed, Trigger::System, now);
                                self.events.publish(EngineEvent::TaskFailed {
                                    task_id: dependent.clone(),
                                    reason: format!("upstream dependency {task_id} failed"),
                                    will_retry: false,
                                    at: now,
                                });
                            }
                        }
                    }
                }
                Some(EdgeType::Enables) | Some(EdgeType::Enhances) => {
                    state.graph.remove_dependency(&dependent, task_id);
                    state.store.unlink_dependency(&dependent, task_id);
                }
            }
        }
    }

    /// Runs the dispatch loop until the cancellation token fires: reconciles worker
    /// completions as they arrive, and otherwise ticks on a timer or an out-of-band kick.
    pub async fn run(self: Arc<Self>) {
        let (tx, mut rx) = mpsc::channel::<WorkerResult>(256);
        let mut tick_interval = tokio::time::interval(std::time::Duration::from_secs(30));

        loop {
            tokio::select! {
                _ = self.cancellation.cancelled() => {
                    info!("coordinator shutting down");
                    break;
                }
                Some(result) = rx.recv() => {
                    self.handle_result(result).await;
                    self.tick(&tx).await;
                }
                _ = tick_interval.tick() => {
                    self.tick(&tx).await;
                }
                _ = self.kick.notified() => {
                    self.tick(&tx).await;
                }
            }
        }
    }

    /// Signals cancellation of a running task and returns immediately; the worker observes
    /// the token and the coordinator reconciles via `handle_result` once it acknowledges,
    /// up to `cancel_grace_period_secs`.
    pub async fn cancel_running(&self, task_id: &TaskId) -> bool {
        self.stop_running(task_id, StopReason::Cancel).await
    }

    /// Like `cancel_running`, but the worker reconciles as `WorkerResult::Paused` instead of
    /// `WorkerResult::Cancelled`, so `handle_result` does not cascade-fail this task's dependents.
    pub async fn pause_running(&self, task_id: &TaskId) -> bool {
        self.stop_running(task_id, StopReason::Pause).await
    }

    async fn stop_running(&self, task_id: &TaskId, reason: StopReason) -> bool {
        let tokens = self.running_cancel_tokens.lock().await;
        if let Some(token) = tokens.get(task_id) {
            self.stop_reasons.lock().await.insert(task_id.clone(), reason);
            token.cancel();
            true
        } else {
            false
        }
    }

    pub async fn shutdown(&self) {
        let tokens = self.running_cancel_tokens.lock().await;
        for token in tokens.values() {
            token.cancel();
        }
        drop(tokens);
        let _ = tokio::time::timeout(
            std::time::Duration::from_secs(self.config.shutdown_timeout_secs),
            self.cancellation.cancelled(),
        );
        self.cancellation.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::system_clock;
    use crate::executor::{AlwaysTrueEvaluator, ExecutionError};
    use async_trait::async_trait;
    use engine_model::TaskId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ImmediateSuccess(Arc<AtomicUsize>);

    #[async_trait]
    impl TaskExecutor for ImmediateSuccess {
        async fn execute(&self, _ctx: ExecutionContext, _task: TaskView) -> Result<ExecutionOutcome, ExecutionError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(ExecutionOutcome { duration_ms: 5, token_usage: None })
        }
    }

    #[tokio::test]
    async fn tick_dispatches_an_eligible_task_and_completion_marks_it_completed() {
        let mut state = EngineState::new(crate::scheduler::Algorithm::Fifo);
        let mut task = Task::new(TaskId::new("a"), "a".into(), "d".into(), Utc::now());
        task.status = TaskStatus::Queued;
        state.store.insert(task).unwrap();
        let state = Arc::new(Mutex::new(state));

        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator = Coordinator::new(
            state.clone(),
            EngineConfig::default(),
            Arc::new(ImmediateSuccess(calls.clone())),
            Arc::new(AlwaysTrueEvaluator),
            EventBus::new(16),
            system_clock(),
        );

        let (tx, mut rx) = mpsc::channel(8);
        coordinator.tick(&tx).await;
        {
            let locked = state.lock().await;
            assert_eq!(locked.store.get(&TaskId::new("a")).unwrap().status, TaskStatus::Running);
        }

        let result = rx.recv().await.unwrap();
        coordinator.handle_result(result).await;
        let locked = state.lock().await;
        assert_eq!(locked.store.get(&TaskId::new("a")).unwrap().status, TaskStatus::Completed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
