//! Data model for the task scheduler: entities, the in-memory store, and the
//! on-disk snapshot format. Contains no scheduling or execution logic; see `engine-core`.

pub mod resource;
pub mod snapshot;
pub mod store;
pub mod task;

pub use resource::{ResourceCounts, ResourcePoolState};
pub use snapshot::{EdgeRecord, SchedulerSnapshot, Snapshot, SnapshotError, SCHEMA_VERSION};
pub use store::{StoreError, TaskStore};
pub use task::{Category, Complexity, EdgeType, EnumParseError, Priority, PriorityFactors, Task, TaskId, TaskStatus};
