//! The single mutex-guarded aggregate the coordinator owns exclusively.

use engine_model::{ResourcePoolState, TaskStore};

use crate::graph::DependencyGraph;
use crate::lifecycle::LifecycleLog;
use crate::metrics::MetricsRegistry;
use crate::scheduler::Algorithm;

/// `store` + `graph` + `pools` are mutated only while the coordinator mutex is held; readers
/// obtain clones, never references, so no caller can mutate a task out from under it.
pub struct EngineState {
    pub store: TaskStore,
    pub graph: DependencyGraph,
    pub pools: ResourcePoolState,
    pub lifecycle_log: LifecycleLog,
    pub metrics: MetricsRegistry,
    pub algorithm: Algorithm,
    pub completed_history: std::collections::VecDeque<engine_model::TaskId>,
    pub failed_history: std::collections::VecDeque<engine_model::TaskId>,
}

const HISTORY_CAP: usize = 100;

impl EngineState {
    pub fn new(algorithm: Algorithm) -> Self {
        Self {
            store: TaskStore::new(),
            graph: DependencyGraph::new(),
            pools: ResourcePoolState::new(),
            lifecycle_log: LifecycleLog::default(),
            metrics: MetricsRegistry::new(),
            algorithm,
            completed_history: Default::default(),
            failed_history: Default::default(),
        }
    }

    pub fn push_completed_history(&mut self, id: engine_model::TaskId) {
        self.completed_history.push_back(id);
        while self.completed_history.len() > HISTORY_CAP {
            self.completed_history.pop_front();
        }
    }

    pub fn push_failed_history(&mut self, id: engine_model::TaskId) {
        self.failed_history.push_back(id);
        while self.failed_history.len() > HISTORY_CAP {
            self.failed_history.pop_front();
        }
    }
}
