//! Deterministic fixtures for integration tests: a controllable clock and a scripted
//! executor, so tests never depend on wall-clock sleeps or real task outcomes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use engine_core::{Clock, ExecutionContext, ExecutionError, ExecutionOutcome, TaskExecutor, TaskView};
use engine_model::{Task, TaskId};
use tokio::sync::Mutex;

/// A `Clock` whose time only moves when `advance` is called. Starts at a fixed epoch so
/// tests are reproducible across runs.
#[derive(Clone)]
pub struct VirtualClock {
    epoch_millis: Arc<AtomicI64>,
}

impl VirtualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { epoch_millis: Arc::new(AtomicI64::new(start.timestamp_millis())) }
    }

    pub fn advance(&self, delta: Duration) {
        self.epoch_millis.fetch_add(delta.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.epoch_millis.load(Ordering::SeqCst)).unwrap_or_else(Utc::now)
    }
}

/// One scripted result for [`ScriptedExecutor`]; consumed in FIFO order, one per call to
/// `execute` regardless of which task id is asked for.
#[derive(Debug, Clone)]
pub enum Scripted {
    Success { duration_ms: u64 },
    Failure { message: String },
    Hang,
}

/// A `TaskExecutor` that plays back a fixed sequence of outcomes. `Hang` never returns,
/// letting a test exercise the coordinator's timeout path deterministically.
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<Scripted>>,
    default: Scripted,
}

impl ScriptedExecutor {
    pub fn new(script: impl IntoIterator<Item = Scripted>) -> Self {
        Self { script: Mutex::new(script.into_iter().collect()), default: Scripted::Success { duration_ms: 1 } }
    }

    pub fn with_default(mut self, default: Scripted) -> Self {
        self.default = default;
        self
    }
}

#[async_trait]
impl TaskExecutor for ScriptedExecutor {
    async fn execute(&self, ctx: ExecutionContext, _task: TaskView) -> Result<ExecutionOutcome, ExecutionError> {
        let next = {
            let mut script = self.script.lock().await;
            script.pop_front().unwrap_or_else(|| self.default.clone())
        };
        match next {
            Scripted::Success { duration_ms } => Ok(ExecutionOutcome { duration_ms, token_usage: None }),
            Scripted::Failure { message } => Err(ExecutionError(message)),
            Scripted::Hang => {
                ctx.cancellation.cancelled().await;
                Err(ExecutionError("cancelled while hanging".to_string()))
            }
        }
    }
}

/// Minimal builder for tasks in tests, defaulting every field `Task::new` already defaults
/// and exposing only the knobs scenario tests actually vary.
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new(id: &str, now: DateTime<Utc>) -> Self {
        Self { task: Task::new(TaskId::new(id), id.to_string(), format!("{id} description"), now) }
    }

    pub fn priority(mut self, priority: engine_model::Priority) -> Self {
        self.task.priority = priority;
        self.task.base_priority = priority.weight();
        self.task.dynamic_priority = priority.weight();
        self
    }

    pub fn status(mut self, status: engine_model::TaskStatus) -> Self {
        self.task.status = status;
        self
    }

    pub fn estimated_duration_ms(mut self, ms: u64) -> Self {
        self.task.estimated_duration_ms = ms;
        self
    }

    pub fn deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.task.deadline = Some(deadline);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.task.max_retries = max_retries;
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}
