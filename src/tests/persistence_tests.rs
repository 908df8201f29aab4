use crate::{
    agent::models::CheckpointUpdate,
    api::Hub,
    config::{ApiConfig, Config, HubConfig},
    coordinator::models::{CreateTask, TaskPriority, TaskStatus},
};
use std::path::PathBuf;

fn config_with_dir(dir: PathBuf) -> Config {
    Config {
        api: ApiConfig {
            host: "127.0.0.1".to_string(),
            port: 3000,
        },
        hub: HubConfig {
            data_dir: Some(dir),
            ..HubConfig::default()
        },
    }
}

/// Every singleton's state survives a hub restart: the databases are the
/// source of truth, the actors just wrap them.
#[tokio::test]
async fn state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with_dir(dir.path().to_path_buf());

    let task_id;
    {
        let hub = Hub::new(&config).unwrap();
        let task = hub
            .coordinator
            .create_task(CreateTask {
                title: "survive the restart".to_string(),
                description: None,
                priority: Some(TaskPriority::High),
                created_by: "u".to_string(),
                tags: vec![],
                files: vec![],
            })
            .await
            .unwrap();
        task_id = task.id.clone();
        hub.coordinator.pickup_task(&task_id, "alice").await.unwrap();

        let alice = hub.agents.get_or_create("alice").await.unwrap();
        alice
            .save_checkpoint(CheckpointUpdate {
                pending_work: Some(vec!["finish the restart test".to_string()]),
                ..Default::default()
            })
            .await
            .unwrap();

        let lock = hub.locks.get_or_create("/src/foo").await.unwrap();
        lock.acquire("alice", None, Some(3_600_000), None)
            .await
            .unwrap();
    }

    // A fresh hub over the same data directory sees everything
    let hub = Hub::new(&config).unwrap();

    let task = hub.coordinator.get_task(&task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::InProgress);
    assert_eq!(task.assignee.as_deref(), Some("alice"));

    let alice = hub.agents.get_or_create("alice").await.unwrap();
    let checkpoint = alice.checkpoint().await.unwrap();
    assert_eq!(
        checkpoint.pending_work,
        vec!["finish the restart test".to_string()]
    );

    let lock = hub.locks.get_or_create("/src/foo").await.unwrap();
    let status = lock.check().await.unwrap();
    assert!(status.locked);
    assert_eq!(status.lock.unwrap().locked_by, "alice");
}

/// An expired lock left over from a previous process is released on the
/// first check, even though its timer died with that process.
#[tokio::test]
async fn stale_lock_from_previous_process_expires_on_check() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with_dir(dir.path().to_path_buf());

    {
        let hub = Hub::new(&config).unwrap();
        let lock = hub.locks.get_or_create("/src/foo").await.unwrap();
        lock.acquire("alice", None, Some(10), None).await.unwrap();
    }

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let hub = Hub::new(&config).unwrap();
    let lock = hub.locks.get_or_create("/src/foo").await.unwrap();
    let status = lock.check().await.unwrap();
    assert!(!status.locked);

    let history = lock.history(10).await.unwrap();
    assert!(history.iter().any(|e| e.action == "expired"));
}
