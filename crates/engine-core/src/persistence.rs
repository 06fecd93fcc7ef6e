//! Persistence & Recovery: snapshot build/restore and the on-disk-state recovery
//! table. Snapshot serialization itself lives in `engine_model::snapshot`; this
//! module owns the recovery *policy*.

use std::path::{Path, PathBuf};

use chrono::Utc;
use engine_model::snapshot::{EdgeRecord, SchedulerSnapshot, Snapshot};
use engine_model::{ResourcePoolState, Task, TaskId, TaskStatus};

use crate::graph::DependencyGraph;
use crate::scheduler::Algorithm;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RecoveryError {
    #[error(transparent)]
    Snapshot(#[from] engine_model::SnapshotError),
}

/// Collapses an on-disk status to its post-recovery status. Returns `(new_status, bump_retry)`.
pub fn recovery_status(on_disk: TaskStatus) -> (TaskStatus, bool) {
    use TaskStatus::*;
    match on_disk {
        Created | Validated | Queued | Scheduled => (Queued, false),
        Preparing | ResourceAllocated | Starting | Running | Completing => (Queued, true),
        Paused | Resuming => (Queued, false),
        Completed | Failed | Cancelled | Archived => (on_disk, false),
        Blocked => (Queued, false),
        Expired => (Expired, false),
        Retrying | RollingBack => (Queued, true),
    }
}

/// Applies the recovery table to every task in a loaded snapshot and resets the resource
/// pool's live counters, in place.
pub fn apply_recovery(tasks: &mut [Task], pools: &mut ResourcePoolState) {
    for task in tasks.iter_mut() {
        let (new_status, bump_retry) = recovery_status(task.status);
        task.status = new_status;
        if bump_retry {
            task.current_retries += 1;
            task.retry_count += 1;
        }
    }
    pools.reset_live_counters();
}

pub struct PersistenceManager {
    path: PathBuf,
}

impl PersistenceManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn build_snapshot(
        &self,
        tasks: Vec<Task>,
        edges: Vec<EdgeRecord>,
        completed_history: Vec<TaskId>,
        failed_history: Vec<TaskId>,
        pools: ResourcePoolState,
        algorithm: Algorithm,
        max_concurrent: u32,
        metrics: serde_json::Value,
    ) -> Result<Snapshot, engine_model::SnapshotError> {
        let snapshot = Snapshot {
            schema_version: engine_model::SCHEMA_VERSION,
            taken_at: Utc::now(),
            scheduler: SchedulerSnapshot { algorithm: algorithm.to_string(), max_concurrent },
            pools,
            tasks,
            edges,
            completed_history,
            failed_history,
            metrics,
            checksum: None,
        };
        snapshot.with_checksum()
    }

    pub fn write(&self, snapshot: &Snapshot) -> Result<(), engine_model::SnapshotError> {
        snapshot.write_atomic(&self.path)
    }

    /// Loads the latest valid snapshot and applies the recovery-status table. Returns `Ok(None)`
    /// if no snapshot file exists yet (first run); a checksum mismatch or parse failure is a
    /// `RecoveryError`.
    pub fn recover(&self) -> Result<Option<(Snapshot, DependencyGraph)>, RecoveryError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let mut snapshot = Snapshot::read_from(&self.path)?;
        apply_recovery(&mut snapshot.tasks, &mut snapshot.pools);

        let mut graph = DependencyGraph::new();
        for edge in &snapshot.edges {
            graph.add_node(&edge.from);
            graph.add_node(&edge.to);
            let _ = graph.add_dependency(&edge.from, &edge.to, edge.edge_type);
        }
        Ok(Some((snapshot, graph)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovery_table_matches_spec() {
        assert_eq!(recovery_status(TaskStatus::Created), (TaskStatus::Queued, false));
        assert_eq!(recovery_status(TaskStatus::Running), (TaskStatus::Queued, true));
        assert_eq!(recovery_status(TaskStatus::Completed), (TaskStatus::Completed, false));
        assert_eq!(recovery_status(TaskStatus::Paused), (TaskStatus::Queued, false));
        assert_eq!(recovery_status(TaskStatus::Retrying), (TaskStatus::Queued, true));
    }

    #[test]
    fn apply_recovery_bumps_retry_for_running_tasks() {
        let mut task = Task::new(TaskId::new("a"), "a".into(), "d".into(), Utc::now());
        task.status = TaskStatus::Running;
        task.current_retries = 0;
        let mut pools = ResourcePoolState::new();
        pools.set_capacity("cpu", 4);
        pools.entry_mut("cpu").allocated = 2;

        apply_recovery(std::slice::from_mut(&mut task), &mut pools);

        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.current_retries, 1);
        assert_eq!(pools.get("cpu").allocated, 0);
    }

    #[test]
    fn recover_returns_none_when_no_file_exists() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PersistenceManager::new(dir.path().join("missing.json"));
        assert!(manager.recover().unwrap().is_none());
    }

    #[test]
    fn recover_round_trips_a_written_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PersistenceManager::new(dir.path().join("snapshot.json"));
        let mut pools = ResourcePoolState::new();
        pools.set_capacity("cpu", 4);
        let mut task = Task::new(TaskId::new("a"), "a".into(), "d".into(), Utc::now());
        task.status = TaskStatus::Running;

        let snapshot = manager
            .build_snapshot(vec![task], vec![], vec![], vec![], pools, Algorithm::Fifo, 4, serde_json::json!({}))
            .unwrap();
        manager.write(&snapshot).unwrap();

        let (recovered, _graph) = manager.recover().unwrap().unwrap();
        assert_eq!(recovered.tasks[0].status, TaskStatus::Queued);
        assert_eq!(recovered.tasks[0].current_retries, 1);
    }
}
