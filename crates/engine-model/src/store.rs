//! In-memory task table plus its reverse dependency index.
//!
//! Single-writer by convention: the coordinator in `engine_core` is the only caller
//! that mutates a [`TaskStore`]; external readers only ever see [`Task`] clones.

use std::collections::{BTreeSet, HashMap};

use crate::task::{Task, TaskId, TaskStatus};

/// Error returned by store operations. Kept separate from `engine_core::error::EngineError`
/// so this crate has no dependency on the orchestration layer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("unknown task {0}")]
    NotFound(TaskId),
    #[error("task {0} already exists and is not terminal")]
    DuplicateId(TaskId),
}

#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: HashMap<TaskId, Task>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self { tasks: HashMap::new() }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn get_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(id)
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Task> {
        self.tasks.values_mut()
    }

    /// Inserts a brand-new task. Re-using an id that names a non-terminal task is rejected
    /// (surfaced as `EngineError::DuplicateId` at the API boundary).
    pub fn insert(&mut self, task: Task) -> Result<(), StoreError> {
        if let Some(existing) = self.tasks.get(&task.id) {
            if !existing.status.is_terminal() {
                return Err(StoreError::DuplicateId(task.id.clone()));
            }
        }
        self.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    pub fn remove(&mut self, id: &TaskId) -> Option<Task> {
        self.tasks.remove(id)
    }

    /// Wires a typed dependency edge `dependent` -> depends on -> `dependency`, maintaining
    /// the symmetric reverse index. Caller is responsible for cycle detection
    /// (`engine_core::graph`) before calling this.
    pub fn link_dependency(&mut self, dependent: &TaskId, dependency: &TaskId) -> Result<(), StoreError> {
        if !self.tasks.contains_key(dependency) {
            return Err(StoreError::NotFound(dependency.clone()));
        }
        let dep_task = self.tasks.get_mut(dependent).ok_or_else(|| StoreError::NotFound(dependent.clone()))?;
        dep_task.dependencies.insert(dependency.clone());
        let upstream = self.tasks.get_mut(dependency).expect("checked above");
        upstream.dependents.insert(dependent.clone());
        Ok(())
    }

    pub fn unlink_dependency(&mut self, dependent: &TaskId, dependency: &TaskId) {
        if let Some(t) = self.tasks.get_mut(dependent) {
            t.dependencies.remove(dependency);
        }
        if let Some(u) = self.tasks.get_mut(dependency) {
            u.dependents.remove(dependent);
        }
    }

    /// Optimistic-locked transition: succeeds only if the task is currently in `from`.
    /// Mirrors the zero-rows-affected convention of a `WHERE status = $from` update.
    pub fn try_transition(&mut self, id: &TaskId, from: TaskStatus, to: TaskStatus) -> Result<bool, StoreError> {
        let task = self.tasks.get_mut(id).ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if task.status != from {
            return Ok(false);
        }
        task.status = to;
        Ok(true)
    }

    /// Tasks whose BLOCKS/CONFLICTS dependencies are all terminal-completed, who are QUEUED,
    /// and whose backoff window (if any, set on a retry requeue) has elapsed as of `now`.
    pub fn eligible_ids(&self, now: chrono::DateTime<chrono::Utc>) -> Vec<TaskId> {
        self.tasks
            .values()
            .filter(|t| t.status == TaskStatus::Queued)
            .filter(|t| t.not_eligible_before.map(|ts| ts <= now).unwrap_or(true))
            .filter(|t| self.dependencies_satisfied(t))
            .map(|t| t.id.clone())
            .collect()
    }

    pub fn dependencies_satisfied(&self, task: &Task) -> bool {
        task.dependencies.iter().all(|dep_id| {
            self.tasks.get(dep_id).map(|d| d.status == TaskStatus::Completed).unwrap_or(false)
        })
    }

    pub fn running_ids(&self) -> BTreeSet<TaskId> {
        self.tasks.values().filter(|t| t.status == TaskStatus::Running).map(|t| t.id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make(id: &str) -> Task {
        Task::new(TaskId::new(id), id.to_string(), "desc".to_string(), Utc::now())
    }

    #[test]
    fn insert_then_get() {
        let mut store = TaskStore::new();
        store.insert(make("a")).unwrap();
        assert!(store.contains(&TaskId::new("a")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn duplicate_non_terminal_id_rejected() {
        let mut store = TaskStore::new();
        store.insert(make("a")).unwrap();
        let err = store.insert(make("a")).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateId(_)));
    }

    #[test]
    fn duplicate_terminal_id_allowed_to_be_reused() {
        let mut store = TaskStore::new();
        store.insert(make("a")).unwrap();
        store.get_mut(&TaskId::new("a")).unwrap().status = TaskStatus::Completed;
        assert!(store.insert(make("a")).is_ok());
    }

    #[test]
    fn link_dependency_maintains_symmetric_index() {
        let mut store = TaskStore::new();
        store.insert(make("a")).unwrap();
        store.insert(make("b")).unwrap();
        store.link_dependency(&TaskId::new("b"), &TaskId::new("a")).unwrap();
        assert!(store.get(&TaskId::new("b")).unwrap().dependencies.contains(&TaskId::new("a")));
        assert!(store.get(&TaskId::new("a")).unwrap().dependents.contains(&TaskId::new("b")));
    }

    #[test]
    fn eligible_ids_requires_queued_status_and_satisfied_dependencies() {
        let mut store = TaskStore::new();
        let mut a = make("a");
        a.status = TaskStatus::Queued;
        let mut b = make("b");
        b.status = TaskStatus::Queued;
        store.insert(a).unwrap();
        store.insert(b).unwrap();
        store.link_dependency(&TaskId::new("b"), &TaskId::new("a")).unwrap();

        let now = Utc::now();
        assert_eq!(store.eligible_ids(now), vec![TaskId::new("a")]);

        store.get_mut(&TaskId::new("a")).unwrap().status = TaskStatus::Completed;
        assert_eq!(store.eligible_ids(now), vec![TaskId::new("b")]);
    }

    #[test]
    fn eligible_ids_excludes_a_task_still_within_its_backoff_window() {
        let mut store = TaskStore::new();
        let mut a = make("a");
        a.status = TaskStatus::Queued;
        let now = Utc::now();
        a.not_eligible_before = Some(now + chrono::Duration::seconds(30));
        store.insert(a).unwrap();

        assert!(store.eligible_ids(now).is_empty());
        assert_eq!(store.eligible_ids(now + chrono::Duration::seconds(31)), vec![TaskId::new("a")]);
    }

    #[test]
    fn try_transition_rejects_mismatched_expected_state() {
        let mut store = TaskStore::new();
        store.insert(make("a")).unwrap();
        let ok = store.try_transition(&TaskId::new("a"), TaskStatus::Running, TaskStatus::Completed).unwrap();
        assert!(!ok);
        assert_eq!(store.get(&TaskId::new("a")).unwrap().status, TaskStatus::Created);
    }
}
