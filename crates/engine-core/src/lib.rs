//! Scheduling and execution logic for the in-process task engine: dependency graph,
//! priority scheduler, resource accounting, execution coordinator, breakdown orchestrator,
//! lifecycle manager, persistence/recovery, metrics, and the public `Engine` facade.
//!
//! Entities and on-disk formats live in `engine-model`; this crate is where they move.

pub mod api;
pub mod breakdown;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod executor;
pub mod graph;
pub mod health;
pub mod lifecycle;
pub mod metrics;
pub mod persistence;
pub mod resource;
pub mod scheduler;
pub mod state;

pub use api::{Engine, TaskSnapshot, TaskSpec};
pub use clock::{system_clock, Clock, SharedClock, SystemClock};
pub use config::{BackoffCurve, EngineConfig, EngineConfigBuilder};
pub use error::EngineError;
pub use events::{EngineEvent, EventBus};
pub use executor::{
    AlwaysTrueEvaluator, ConditionEvaluator, ExecutionContext, ExecutionError, ExecutionOutcome, NoopPredictor,
    PredictorPlugin, TaskExecutor, TaskView,
};
pub use graph::{CycleError, DependencyGraph};
pub use health::{BottleneckFinding, BottleneckKind, HealthStatus, Severity};
pub use lifecycle::{HookTiming, LifecycleEvent, LifecycleLog, Trigger};
pub use metrics::{AlertThresholds, MetricsRegistry};
pub use scheduler::{Algorithm, SchedulingContext, SchedulingDecision};
pub use state::EngineState;
