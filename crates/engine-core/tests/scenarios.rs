//! End-to-end scenarios over the public `Engine` facade: priority ordering, dependency
//! gating, retry-with-backoff, and snapshot recovery of an in-flight task.

use std::sync::Arc;
use std::time::Duration;

use engine_core::{Algorithm, Engine, EngineConfig, EngineError, TaskSpec};
use engine_model::{EdgeType, TaskId, TaskStatus};
use engine_test_utils::{Scripted, ScriptedExecutor, VirtualClock};

async fn wait_until<F>(mut predicate: F, timeout: Duration) -> bool
where
    F: FnMut() -> std::pin::Pin<Box<dyn std::future::Future<Output = bool> + Send>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn higher_priority_task_dispatches_before_lower_priority_when_slots_are_scarce() {
    let config = EngineConfig::builder().max_concurrent_tasks(1).algorithm(Algorithm::Priority).build();
    let executor = Arc::new(ScriptedExecutor::new([Scripted::Hang, Scripted::Hang]));
    let clock: Arc<dyn engine_core::Clock> = Arc::new(VirtualClock::new(chrono::Utc::now()));
    let engine = Engine::with_clock(config, executor, Arc::new(engine_core::AlwaysTrueEvaluator), clock);

    let mut low = TaskSpec::new("low", "d");
    low.priority = engine_model::Priority::Low;
    let low_id = engine.submit(low).await.unwrap();

    let mut high = TaskSpec::new("high", "d");
    high.priority = engine_model::Priority::Critical;
    let high_id = engine.submit(high).await.unwrap();

    let handle = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run().await }
    });

    let found = wait_until(
        {
            let engine = engine.clone();
            let high_id = high_id.clone();
            move || {
                let engine = engine.clone();
                let high_id = high_id.clone();
                Box::pin(async move { engine.get(&high_id).await.map(|t| t.status == TaskStatus::Running).unwrap_or(false) })
            }
        },
        Duration::from_secs(2),
    )
    .await;
    assert!(found, "critical-priority task should have started running first");

    let low_task = engine.get(&low_id).await.unwrap();
    assert_eq!(low_task.status, TaskStatus::Queued, "the single slot went to the higher-priority task");

    engine.shutdown().await;
    handle.abort();
}

#[tokio::test]
async fn dependent_task_is_ineligible_until_its_blocking_dependency_completes() {
    let config = EngineConfig::builder().max_concurrent_tasks(4).build();
    let executor = Arc::new(ScriptedExecutor::new([Scripted::Success { duration_ms: 1 }]));
    let engine = Engine::new(config, executor);

    let mut upstream = TaskSpec::new("upstream", "d");
    upstream.id = Some(TaskId::new("upstream"));
    let upstream_id = engine.submit(upstream).await.unwrap();

    let mut downstream = TaskSpec::new("downstream", "d");
    downstream.id = Some(TaskId::new("downstream"));
    downstream.dependencies.push((upstream_id.clone(), EdgeType::Blocks));
    let downstream_id = engine.submit(downstream).await.unwrap();

    let handle = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run().await }
    });

    let completed = wait_until(
        {
            let engine = engine.clone();
            let downstream_id = downstream_id.clone();
            move || {
                let engine = engine.clone();
                let downstream_id = downstream_id.clone();
                Box::pin(async move { engine.get(&downstream_id).await.map(|t| t.status == TaskStatus::Completed).unwrap_or(false) })
            }
        },
        Duration::from_secs(2),
    )
    .await;
    assert!(completed, "downstream task should complete once its dependency clears");

    let upstream_task = engine.get(&upstream_id).await.unwrap();
    assert_eq!(upstream_task.status, TaskStatus::Completed);

    engine.shutdown().await;
    handle.abort();
}

#[tokio::test]
async fn task_is_retried_after_a_transient_failure_then_completes() {
    let backoff = engine_core::BackoffCurve { base_ms: 200, cap_ms: 200 };
    let config = EngineConfig::builder().max_concurrent_tasks(2).backoff(backoff).build();
    let executor = Arc::new(ScriptedExecutor::new([
        Scripted::Failure { message: "transient".to_string() },
        Scripted::Success { duration_ms: 2 },
    ]));
    let engine = Engine::new(config, executor);

    let mut spec = TaskSpec::new("flaky", "d");
    spec.max_retries = 2;
    let id = engine.submit(spec).await.unwrap();

    let handle = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run().await }
    });

    let started = tokio::time::Instant::now();
    let completed = wait_until(
        {
            let engine = engine.clone();
            let id = id.clone();
            move || {
                let engine = engine.clone();
                let id = id.clone();
                Box::pin(async move { engine.get(&id).await.map(|t| t.status == TaskStatus::Completed).unwrap_or(false) })
            }
        },
        Duration::from_secs(2),
    )
    .await;
    assert!(completed, "task should complete after one automatic retry");
    assert!(started.elapsed() >= Duration::from_millis(200), "completion should not beat the backoff window");

    let task = engine.get(&id).await.unwrap();
    assert_eq!(task.retry_count, 1);

    engine.shutdown().await;
    handle.abort();
}

#[tokio::test]
async fn a_task_still_running_at_snapshot_time_recovers_as_queued_with_a_bumped_retry_count() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot_path = dir.path().join("snapshot.json");

    let config = EngineConfig::builder().max_concurrent_tasks(1).build();
    let executor = Arc::new(ScriptedExecutor::new([Scripted::Hang]));
    let engine = Engine::new(config.clone(), executor).with_persistence(snapshot_path.clone());

    let mut spec = TaskSpec::new("long-runner", "d");
    spec.id = Some(TaskId::new("long-runner"));
    let id = engine.submit(spec).await.unwrap();

    let handle = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run().await }
    });

    let running = wait_until(
        {
            let engine = engine.clone();
            let id = id.clone();
            move || {
                let engine = engine.clone();
                let id = id.clone();
                Box::pin(async move { engine.get(&id).await.map(|t| t.status == TaskStatus::Running).unwrap_or(false) })
            }
        },
        Duration::from_secs(2),
    )
    .await;
    assert!(running, "task should be running before we snapshot mid-flight");

    engine.housekeeping().await.unwrap();
    handle.abort();

    let executor2 = Arc::new(ScriptedExecutor::new([]));
    let engine2 = Engine::new(config, executor2).with_persistence(snapshot_path.clone());
    let recovered = engine2.recover().await.unwrap();
    assert!(recovered);

    let task = engine2.get(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(task.current_retries, 1);
}

#[tokio::test]
async fn submit_rejects_blank_title() {
    let engine = Engine::new(EngineConfig::default(), Arc::new(ScriptedExecutor::new([])));
    let err = engine.submit(TaskSpec::new("   ", "d")).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidSpec(_)));
}

#[tokio::test]
async fn submit_rejects_blank_description() {
    let engine = Engine::new(EngineConfig::default(), Arc::new(ScriptedExecutor::new([])));
    let err = engine.submit(TaskSpec::new("t", "   ")).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidSpec(_)));
}

#[tokio::test]
async fn pausing_a_running_task_does_not_fail_its_blocked_dependent() {
    let config = EngineConfig::builder().max_concurrent_tasks(4).build();
    let executor = Arc::new(ScriptedExecutor::new([Scripted::Hang]));
    let engine = Engine::new(config, executor);

    let mut upstream = TaskSpec::new("upstream", "d");
    upstream.id = Some(TaskId::new("upstream"));
    let upstream_id = engine.submit(upstream).await.unwrap();

    let mut downstream = TaskSpec::new("downstream", "d");
    downstream.id = Some(TaskId::new("downstream"));
    downstream.dependencies.push((upstream_id.clone(), EdgeType::Blocks));
    let downstream_id = engine.submit(downstream).await.unwrap();

    let handle = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run().await }
    });

    let running = wait_until(
        {
            let engine = engine.clone();
            let upstream_id = upstream_id.clone();
            move || {
                let engine = engine.clone();
                let upstream_id = upstream_id.clone();
                Box::pin(async move { engine.get(&upstream_id).await.map(|t| t.status == TaskStatus::Running).unwrap_or(false) })
            }
        },
        Duration::from_secs(2),
    )
    .await;
    assert!(running, "upstream task should start running before we pause it");

    engine.pause(&upstream_id).await.unwrap();

    let paused = wait_until(
        {
            let engine = engine.clone();
            let upstream_id = upstream_id.clone();
            move || {
                let engine = engine.clone();
                let upstream_id = upstream_id.clone();
                Box::pin(async move { engine.get(&upstream_id).await.map(|t| t.status == TaskStatus::Paused).unwrap_or(false) })
            }
        },
        Duration::from_secs(2),
    )
    .await;
    assert!(paused, "upstream task should reach PAUSED, not CANCELLED");

    let downstream_task = engine.get(&downstream_id).await.unwrap();
    assert_eq!(downstream_task.status, TaskStatus::Queued, "a paused dependency must not fail its dependent");

    engine.shutdown().await;
    handle.abort();
}
