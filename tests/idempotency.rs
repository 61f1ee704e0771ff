//! Idempotency Integration Tests
//!
//! Status updates are idempotent; submissions are not.

mod common;

use std::sync::Arc;

use chrono::Utc;
use tasksync::core::{JsonlTaskStore, MemoryTaskStore, SafetyLimits, TaskStore};
use tasksync::domain::{Task, TaskId, TaskList, TaskStatus};
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

use common::{orchestrator, tasks_json, Reply, ScriptedChat};

fn one_task() -> TaskList {
    TaskList::new(vec![Task::new("Math homework", Utc::now())])
}

#[tokio::test]
async fn test_set_status_true_then_false() {
    let temp = TempDir::new().unwrap();
    let store = JsonlTaskStore::new(temp.path());
    let ids = store.append("alice", &one_task()).await.unwrap();

    assert!(assert_ok!(
        store.set_status("alice", &ids[0], TaskStatus::Complete).await
    ));

    let log_before = std::fs::read_to_string(store.log_path("alice")).unwrap();
    let state_before = store.read_all("alice").await.unwrap();

    assert!(!assert_ok!(
        store.set_status("alice", &ids[0], TaskStatus::Complete).await
    ));

    // Second call wrote nothing and changed nothing
    let log_after = std::fs::read_to_string(store.log_path("alice")).unwrap();
    assert_eq!(log_before, log_after);
    assert_eq!(store.read_all("alice").await.unwrap(), state_before);
}

#[tokio::test]
async fn test_memory_store_matches_jsonl_semantics() {
    let store = MemoryTaskStore::new();
    let ids = store.append("alice", &one_task()).await.unwrap();

    assert!(store.set_status("alice", &ids[0], TaskStatus::Complete).await.unwrap());
    assert!(!store.set_status("alice", &ids[0], TaskStatus::Complete).await.unwrap());
    assert!(!store.set_status("alice", &ids[0], TaskStatus::Incomplete).await.unwrap());
    assert!(!store
        .set_status("alice", &TaskId::from("missing"), TaskStatus::Complete)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_complete_unknown_user_is_false() {
    let temp = TempDir::new().unwrap();
    let store = JsonlTaskStore::new(temp.path());

    let changed = store
        .set_status("nobody", &TaskId::from("x"), TaskStatus::Complete)
        .await;
    assert!(!assert_ok!(changed));

    // Nothing is created for a user that never stored anything
    assert!(!temp.path().join("nobody").exists());
}

#[tokio::test]
async fn test_invalid_user_is_an_error_not_false() {
    let store = MemoryTaskStore::new();
    assert_err!(
        store
            .set_status("a/b", &TaskId::from("x"), TaskStatus::Complete)
            .await
    );
}

#[tokio::test]
async fn test_same_text_twice_stores_twice() {
    let chat = ScriptedChat::new(vec![
        Reply::text(tasks_json(&["Math homework"])),
        Reply::text("Added."),
        Reply::text(tasks_json(&["Math homework"])),
        Reply::text("Added."),
    ]);
    let store = Arc::new(MemoryTaskStore::new());
    let orchestrator = orchestrator(&chat, &store, SafetyLimits::default());

    for _ in 0..2 {
        orchestrator
            .submit_task("alice", "Math homework")
            .await
            .unwrap()
            .collect()
            .await;
    }

    let tasks = orchestrator.list_tasks("alice").await.unwrap();
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().all(|t| t.description == "Math homework"));
    assert_eq!(store.append_calls(), 2);
}
