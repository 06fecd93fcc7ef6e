//! Object-safe traits at the engine's external seams: the opaque work callback, the
//! optional learning feedback hook, and the pre/post-condition evaluator.

use async_trait::async_trait;
use engine_model::{Task, TaskId};
use tokio_util::sync::CancellationToken;

/// A read-only view of a task handed to the external callback and to observers. Workers
/// never get a mutable reference to the real `Task`.
#[derive(Debug, Clone)]
pub struct TaskView(pub Task);

impl TaskView {
    pub fn id(&self) -> &TaskId {
        &self.0.id
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub task_id: TaskId,
    pub attempt: u32,
    pub cancellation: CancellationToken,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionOutcome {
    pub duration_ms: u64,
    pub token_usage: Option<u64>,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("execute failed: {0}")]
pub struct ExecutionError(pub String);

/// The opaque `Execute(ctx, task) -> result` callback.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, ctx: ExecutionContext, task: TaskView) -> Result<ExecutionOutcome, ExecutionError>;
}

/// Evaluates the opaque `preConditions`/`postConditions` string expressions. The
/// default always passes.
#[async_trait]
pub trait ConditionEvaluator: Send + Sync {
    async fn evaluate(&self, task: &Task, expressions: &[String]) -> bool;
}

pub struct AlwaysTrueEvaluator;

#[async_trait]
impl ConditionEvaluator for AlwaysTrueEvaluator {
    async fn evaluate(&self, _task: &Task, _expressions: &[String]) -> bool {
        true
    }
}

/// Optional ML feedback hook. `rank_eligible` returning `None` means "no opinion";
/// the scheduler falls back to its configured algorithm.
pub trait PredictorPlugin: Send + Sync {
    fn predict_duration(&self, _task: &TaskView) -> Option<u64> {
        None
    }

    fn predict_failure_probability(&self, _task: &TaskView) -> Option<f64> {
        None
    }

    fn rank_eligible(&self, _tasks: &[TaskView]) -> Option<Vec<TaskId>> {
        None
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPredictor;

impl PredictorPlugin for NoopPredictor {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn always_true_evaluator_passes_any_expression() {
        let now = chrono::Utc::now();
        let task = Task::new(TaskId::new("a"), "a".into(), "d".into(), now);
        let evaluator = AlwaysTrueEvaluator;
        assert!(evaluator.evaluate(&task, &["anything".to_string()]).await);
    }

    #[test]
    fn noop_predictor_has_no_opinion() {
        let predictor = NoopPredictor;
        let now = chrono::Utc::now();
        let view = TaskView(Task::new(TaskId::new("a"), "a".into(), "d".into(), now));
        assert_eq!(predictor.predict_duration(&view), None);
        assert_eq!(predictor.predict_failure_probability(&view), None);
        assert_eq!(predictor.rank_eligible(&[view]), None);
    }
}
