//! Error kinds surfaced by the public API.
//!
//! Only `InvalidSpec`, `DuplicateId`, and `CyclicDependency` are returned directly to a
//! caller of `submit`/`add_dependency`; everything else is reported per-task via terminal
//! state and events.

use engine_model::{EnumParseError, TaskId, TaskStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid task spec: {0}")]
    InvalidSpec(String),

    #[error("task {0} already exists and is not terminal")]
    DuplicateId(TaskId),

    #[error("dependency {from} -> {to} would create a cycle; rejected")]
    CyclicDependency { from: TaskId, to: TaskId },

    #[error("resource unavailable for task {task}: {reason}")]
    ResourceUnavailable { task: TaskId, reason: String },

    #[error("dependency of task {task} failed: {dependency}")]
    DependencyFailed { task: TaskId, dependency: TaskId },

    #[error("task {0} exceeded its execution deadline")]
    ExecutionTimeout(TaskId),

    #[error("task {task} execute callback failed: {message}")]
    ExecutionError { task: TaskId, message: String },

    #[error("task {0} failed post-condition evaluation")]
    PostConditionFailed(TaskId),

    #[error("task {0} was cancelled")]
    Cancelled(TaskId),

    #[error("snapshot write failed: {0}")]
    PersistenceError(String),

    #[error("snapshot unreadable or checksum mismatch: {0}")]
    RecoveryError(String),

    #[error("task {id} has status {actual}, expected {expected}")]
    UnexpectedState { id: TaskId, expected: TaskStatus, actual: TaskStatus },

    #[error("unknown task {0}")]
    NotFound(TaskId),

    #[error(transparent)]
    EnumParse(#[from] EnumParseError),
}
