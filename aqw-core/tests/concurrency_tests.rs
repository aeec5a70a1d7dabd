//! Concurrency tests
//!
//! Race the per-key critical sections from many tokio tasks:
//! - Exactly one contender wins a lease acquire
//! - Concurrent version creates assign gapless monotonic numbers
//! - Concurrent resolves store exactly one resolution

use aqw_common::events::EventBus;
use aqw_common::models::{ChangeType, ConflictType, VersionState};
use aqw_core::conflict::{ConflictError, ConflictResolver};
use aqw_core::lock::TaskLockManager;
use aqw_core::version::VersionStore;
use chrono::Duration;
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_concurrent_acquire_single_winner() {
    let manager = Arc::new(TaskLockManager::new(EventBus::new(16)));

    let mut handles = Vec::new();
    for i in 0..16 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            manager
                .acquire("t1", &format!("annotator-{i}"), Duration::seconds(60))
                .await
                .is_acquired()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert!(manager.is_locked("t1").await);
}

#[tokio::test]
async fn test_concurrent_creates_gapless_numbering() {
    let store = Arc::new(VersionStore::new(EventBus::new(64)));

    let mut handles = Vec::new();
    for i in 0..32 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .create_version("t1", "alice", json!({"n": i}), ChangeType::Update, None)
                .await
                .unwrap()
                .version_number
        }));
    }

    let mut numbers: Vec<u64> = Vec::new();
    for handle in handles {
        numbers.push(handle.await.unwrap());
    }
    numbers.sort_unstable();
    assert_eq!(numbers, (1..=32).collect::<Vec<u64>>());

    // One current version survives the race
    let all = store.get_all("t1", "alice", false).await;
    let active = all
        .iter()
        .filter(|v| v.state == VersionState::Active)
        .count();
    assert_eq!(active, 1);
}

#[tokio::test]
async fn test_concurrent_resolve_exactly_one_resolution() {
    let resolver = Arc::new(ConflictResolver::new(EventBus::new(16)));
    let conflict = resolver.open_conflict("t1", vec![], ConflictType::Label).await;
    resolver.cast_vote(conflict.id, "r1", "A").await.unwrap();
    resolver.cast_vote(conflict.id, "r2", "A").await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let resolver = resolver.clone();
        let id = conflict.id;
        handles.push(tokio::spawn(
            async move { resolver.resolve_by_vote(id).await },
        ));
    }

    let mut successes = 0;
    let mut already_resolved = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(ConflictError::AlreadyResolved(_)) => already_resolved += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(successes, 1);
    assert_eq!(already_resolved, 7);

    let resolution = resolver.get_resolution(conflict.id).await.unwrap();
    assert_eq!(resolution.result, "A");
}

#[tokio::test]
async fn test_independent_tasks_do_not_contend() {
    let manager = Arc::new(TaskLockManager::new(EventBus::new(64)));

    let mut handles = Vec::new();
    for i in 0..16 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            manager
                .acquire(&format!("task-{i}"), "alice", Duration::seconds(60))
                .await
                .is_acquired()
        }));
    }

    for handle in handles {
        assert!(handle.await.unwrap());
    }
}
