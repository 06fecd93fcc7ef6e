use chrono::Utc;
use engine_model::snapshot::{SchedulerSnapshot, Snapshot};
use engine_model::{ResourcePoolState, Task, TaskId};

fn sample_snapshot() -> Snapshot {
    let mut pools = ResourcePoolState::new();
    pools.set_capacity("cpu", 4);
    let task = Task::new(TaskId::new("a"), "A".to_string(), "do a thing".to_string(), Utc::now());
    Snapshot {
        schema_version: engine_model::SCHEMA_VERSION,
        taken_at: Utc::now(),
        scheduler: SchedulerSnapshot { algorithm: "HYBRID_ADAPTIVE".to_string(), max_concurrent: 5 },
        pools,
        tasks: vec![task],
        edges: vec![],
        completed_history: vec![],
        failed_history: vec![],
        metrics: serde_json::json!({}),
        checksum: None,
    }
}

#[test]
fn checksum_round_trip_is_stable() {
    let snapshot = sample_snapshot().with_checksum().unwrap();
    let bytes = snapshot.to_json_bytes().unwrap();
    let restored = Snapshot::from_json_bytes(&bytes).unwrap();
    restored.verify_checksum().unwrap();
    assert_eq!(snapshot.checksum, restored.checksum);
}

#[test]
fn tampered_payload_fails_checksum_verification() {
    let snapshot = sample_snapshot().with_checksum().unwrap();
    let mut tampered = snapshot.clone();
    tampered.tasks[0].title = "tampered".to_string();
    assert!(tampered.verify_checksum().is_err());
}

#[test]
fn write_atomic_then_read_round_trips_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.json");
    let snapshot = sample_snapshot().with_checksum().unwrap();
    snapshot.write_atomic(&path).unwrap();
    assert!(!path.with_extension("json.tmp").exists());

    let restored = Snapshot::read_from(&path).unwrap();
    assert_eq!(restored.tasks.len(), 1);
    assert_eq!(restored.tasks[0].id, TaskId::new("a"));
}

#[test]
fn missing_checksum_is_rejected() {
    let snapshot = sample_snapshot();
    assert!(snapshot.verify_checksum().is_err());
}
