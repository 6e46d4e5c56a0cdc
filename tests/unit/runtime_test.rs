//! Tests for tokio spawner and runtime handle

use prometheus_scheduler::runtime::tokio_spawner::TokioSpawner;
use prometheus_scheduler::runtime::SchedulerRuntime;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tokio_spawner_spawn() {
    let spawner = TokioSpawner::new(tokio::runtime::Handle::current());

    let (tx, rx) = tokio::sync::oneshot::channel();
    let handle = spawner.spawn(async move {
        tx.send(123).unwrap();
    });

    let result = rx.await.expect("oneshot result");
    assert_eq!(result, 123);
    handle.await.unwrap();
}

#[tokio::test]
async fn test_tokio_spawner_current() {
    let spawner = TokioSpawner::current().unwrap();
    spawner.spawn(async {}).await.unwrap();
}

#[test]
fn test_tokio_spawner_current_outside_runtime() {
    assert!(TokioSpawner::current().is_err());
}

#[tokio::test]
async fn test_runtime_shutdown_cancels_tasks() {
    let mut runtime = SchedulerRuntime::new(TokioSpawner::current().unwrap());
    runtime.spawn_task("idle", |cancel| async move { cancel.cancelled().await });
    assert_eq!(runtime.task_names(), vec!["idle"]);
    tokio::time::timeout(Duration::from_secs(5), runtime.shutdown())
        .await
        .expect("shutdown completes");
}
