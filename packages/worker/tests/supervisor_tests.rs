#![cfg(unix)]
#![allow(clippy::disallowed_methods)]

use chrono::Utc;
use worker::{Supervisor, WorkerEntry, WorkerRegistry};

/// A stand-in worker: `sh -c 'sleep 30' sh --id <worker-id>`.
fn sleeper(registry: WorkerRegistry) -> Supervisor {
    Supervisor::new(registry, "sh").with_args(["-c", "sleep 30", "sh"])
}

#[tokio::test]
async fn start_records_and_stop_signals_workers() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = sleeper(WorkerRegistry::new(dir.path())).with_log_dir(dir.path().join("logs"));

    let started = supervisor.start(2).await.unwrap();
    assert_eq!(started.len(), 2);
    assert_ne!(started[0].id, started[1].id);
    assert!(started.iter().all(|w| w.id.starts_with("worker-")));
    for worker in &started {
        assert!(dir.path().join("logs").join(format!("{}.log", worker.id)).exists());
    }

    let running = supervisor.running().await.unwrap();
    assert_eq!(running.len(), 2);

    assert_eq!(supervisor.stop().await.unwrap(), 2);
    assert!(supervisor.registry().load().await.unwrap().is_empty());
    assert_eq!(supervisor.stop().await.unwrap(), 0);
}

#[tokio::test]
async fn running_skips_dead_processes() {
    let dir = tempfile::tempdir().unwrap();
    let registry = WorkerRegistry::new(dir.path());
    registry
        .add([
            WorkerEntry {
                id: "worker-live".into(),
                pid: std::process::id(),
                started_at: Utc::now(),
            },
            WorkerEntry {
                id: "worker-gone".into(),
                pid: u32::MAX,
                started_at: Utc::now(),
            },
        ])
        .await
        .unwrap();

    let supervisor = sleeper(registry);
    let running = supervisor.running().await.unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].id, "worker-live");
}

#[tokio::test]
async fn stop_clears_registry_of_dead_workers() {
    let dir = tempfile::tempdir().unwrap();
    let registry = WorkerRegistry::new(dir.path());
    registry
        .add([WorkerEntry {
            id: "worker-gone".into(),
            pid: u32::MAX,
            started_at: Utc::now(),
        }])
        .await
        .unwrap();

    let supervisor = sleeper(registry);
    assert_eq!(supervisor.stop().await.unwrap(), 0);
    assert!(supervisor.registry().load().await.unwrap().is_empty());
}
