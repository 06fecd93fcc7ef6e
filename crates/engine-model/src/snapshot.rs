//! Snapshot serialization, checksums, and atomic on-disk writes.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::resource::ResourcePoolState;
use crate::task::{EdgeType, Task, TaskId};

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub from: TaskId,
    pub to: TaskId,
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    pub algorithm: String,
    pub max_concurrent: u32,
}

/// The unit of persistence: everything needed to rehydrate a running engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub schema_version: u32,
    pub taken_at: DateTime<Utc>,
    pub scheduler: SchedulerSnapshot,
    pub pools: ResourcePoolState,
    pub tasks: Vec<Task>,
    pub edges: Vec<EdgeRecord>,
    pub completed_history: Vec<TaskId>,
    pub failed_history: Vec<TaskId>,
    pub metrics: serde_json::Value,
    /// Present only on the serialized/deserialized wire form; absent while building in memory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SnapshotError {
    #[error("failed to serialize snapshot: {0}")]
    Serialize(String),
    #[error("failed to write snapshot to {path}: {source}")]
    Write { path: String, source: std::io::Error },
    #[error("failed to read snapshot from {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("snapshot checksum mismatch: expected {expected}, computed {computed}")]
    ChecksumMismatch { expected: String, computed: String },
    #[error("snapshot missing checksum field")]
    MissingChecksum,
}

impl Snapshot {
    /// SHA-256 over the canonical JSON of the payload with `checksum` omitted, hex-encoded
    /// with a `sha256:` prefix.
    pub fn compute_checksum(&self) -> Result<String, SnapshotError> {
        let mut unchecked = self.clone();
        unchecked.checksum = None;
        let canonical = canonical_json(&unchecked).map_err(|e| SnapshotError::Serialize(e.to_string()))?;
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
    }

    pub fn with_checksum(mut self) -> Result<Self, SnapshotError> {
        let checksum = self.compute_checksum()?;
        self.checksum = Some(checksum);
        Ok(self)
    }

    pub fn verify_checksum(&self) -> Result<(), SnapshotError> {
        let expected = self.checksum.clone().ok_or(SnapshotError::MissingChecksum)?;
        let computed = self.compute_checksum()?;
        if expected != computed {
            return Err(SnapshotError::ChecksumMismatch { expected, computed });
        }
        Ok(())
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        serde_json::to_vec_pretty(self).map_err(|e| SnapshotError::Serialize(e.to_string()))
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
        serde_json::from_slice(bytes).map_err(|e| SnapshotError::Serialize(e.to_string()))
    }

    /// Write-temp-then-rename: never leaves a half-written snapshot on disk.
    pub fn write_atomic(&self, path: &Path) -> Result<(), SnapshotError> {
        let bytes = self.to_json_bytes()?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &bytes)
            .map_err(|source| SnapshotError::Write { path: tmp_path.display().to_string(), source })?;
        std::fs::rename(&tmp_path, path)
            .map_err(|source| SnapshotError::Write { path: path.display().to_string(), source })?;
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Self, SnapshotError> {
        let bytes = std::fs::read(path)
            .map_err(|source| SnapshotError::Read { path: path.display().to_string(), source })?;
        let snapshot = Self::from_json_bytes(&bytes)?;
        snapshot.verify_checksum()?;
        Ok(snapshot)
    }
}

/// Canonicalizes a serde value by recursively sorting object keys, so the checksum is stable
/// regardless of struct field declaration order or HashMap iteration order.
fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    let sorted = sort_value(value);
    serde_json::to_string(&sorted)
}

fn sort_value(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut sorted = BTreeMap::new();
            for (k, v) in map {
                sorted.insert(k, sort_value(v));
            }
            serde_json::to_value(sorted).expect("map of values serializes")
        }
        serde_json::Value::Array(items) => serde_json::Value::Array(items.into_iter().map(sort_value).collect()),
        other => other,
    }
}
