//! I. Mutual exclusion.
//!
//! Rules covered:
//! - 1. Two callers racing for `acct:123` (MEDIUM): one runs, the other gets Locked
//! - 2. Overlapping resource sets never run together
//! - 3. Disjoint resource sets run concurrently
//! - 4. Released locks can be taken again; contention is never retried internally

use crate::{DurationClass, InMemoryLockBackend, LockDurations, LockError, LockManager};
use relay_core::ManualClock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

fn manager() -> (LockManager, InMemoryLockBackend) {
    let clock = Arc::new(ManualClock::new(0));
    let backend = InMemoryLockBackend::new(clock.clone());
    let manager = LockManager::new(Arc::new(backend.clone()), LockDurations::default(), clock);
    (manager, backend)
}

/// Rule 1: Two callers racing for acct:123 (MEDIUM): one runs, the other gets Locked
#[tokio::test]
async fn rule_01_second_caller_is_locked_out() {
    let (manager, _) = manager();
    let (entered_tx, entered_rx) = oneshot::channel();
    let (finish_tx, finish_rx) = oneshot::channel::<()>();

    let first = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .with_lock(&["acct:123"], DurationClass::Medium, |_abort| async move {
                    let _ = entered_tx.send(());
                    let _ = finish_rx.await;
                    "first"
                })
                .await
        })
    };
    entered_rx.await.unwrap();

    let calls = AtomicUsize::new(0);
    let second = manager
        .with_lock(&["acct:123"], DurationClass::Medium, |_abort| async {
            calls.fetch_add(1, Ordering::SeqCst);
        })
        .await;

    match second {
        Err(LockError::Locked { resources }) => assert_eq!(resources, vec!["acct:123".to_string()]),
        other => panic!("expected Locked, got {:?}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    finish_tx.send(()).unwrap();
    assert_eq!(first.await.unwrap().unwrap(), "first");
}

/// Rule 2: Overlapping resource sets never run together
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rule_02_overlapping_sets_never_overlap_in_time() {
    let (manager, _) = manager();
    let inside = Arc::new(AtomicUsize::new(0));
    let max_inside = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));

    let sets: [&[&str]; 3] = [&["acct:1", "acct:2"], &["acct:2", "acct:3"], &["acct:3", "acct:1"]];
    let mut tasks = Vec::new();
    for worker in 0..12 {
        let manager = manager.clone();
        let inside = Arc::clone(&inside);
        let max_inside = Arc::clone(&max_inside);
        let completed = Arc::clone(&completed);
        let set = sets[worker % sets.len()];

        tasks.push(tokio::spawn(async move {
            loop {
                let result = manager
                    .with_lock(set, DurationClass::Short, |_abort| {
                        let inside = Arc::clone(&inside);
                        let max_inside = Arc::clone(&max_inside);
                        async move {
                            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                            max_inside.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(2)).await;
                            inside.fetch_sub(1, Ordering::SeqCst);
                        }
                    })
                    .await;
                match result {
                    Ok(()) => break,
                    Err(e) if e.is_locked() => tokio::time::sleep(Duration::from_millis(1)).await,
                    Err(e) => panic!("unexpected lock error: {}", e),
                }
            }
            completed.fetch_add(1, Ordering::SeqCst);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // Every pair of sets shares a resource, so at most one section ran at a time.
    assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    assert_eq!(completed.load(Ordering::SeqCst), 12);
}

/// Rule 3: Disjoint resource sets run concurrently
#[tokio::test]
async fn rule_03_disjoint_sets_do_not_block() {
    let (manager, backend) = manager();

    let nested = manager
        .with_lock(&["acct:1"], DurationClass::Short, |_abort| {
            let manager = manager.clone();
            async move {
                manager
                    .with_lock(&["acct:2"], DurationClass::Short, |_abort| async { 42 })
                    .await
            }
        })
        .await
        .unwrap()
        .unwrap();

    assert_eq!(nested, 42);
    assert!(!backend.is_held("acct:1"));
    assert!(!backend.is_held("acct:2"));
}

/// Rule 4: Released locks can be taken again
#[tokio::test]
async fn rule_04_release_frees_resources() {
    let (manager, backend) = manager();

    manager
        .with_lock(&["acct:7", "acct:7"], DurationClass::Long, |_abort| async {
            assert!(backend.is_held("acct:7"));
        })
        .await
        .unwrap();
    assert!(!backend.is_held("acct:7"));

    manager
        .with_lock(&["acct:7"], DurationClass::Long, |_abort| async {})
        .await
        .unwrap();

    assert!(matches!(
        manager.with_lock(&[], DurationClass::Short, |_abort| async {}).await,
        Err(LockError::NoResources)
    ));
}
