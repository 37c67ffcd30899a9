//! II. Failover and demotion.
//!
//! Rules covered:
//! - 4. A follower takes over once the leader's lease expires
//! - 5. A leader that finds its lease taken is demoted with `LeaseLost`
//! - 6. Storage outage past the retry budget demotes (fail closed)
//! - 7. Shutdown releases the lease so a follower wins immediately
//! - 8. A crashed leader that keeps silent loses leadership at expiry
//! - 9. A store that stops answering counts as an outage and demotes past the budget
//! - 10. Shutdown completes while the store is not answering

use super::harness::{Cluster, LEASE_NAME, TTL_MS};
use crate::{DemotionReason, LeadershipEvent, LeaseStore, Role};
use std::time::Duration;
use tokio::sync::watch;

/// Rule 4: A follower takes over once the leader's lease expires
#[tokio::test]
async fn rule_04_follower_takes_over_after_expiry() {
    let mut cluster = Cluster::new(2);
    cluster.nodes[0].tick().await;
    cluster.nodes[1].tick().await;
    assert_eq!(cluster.leaders(), vec![0]);

    cluster.clock.advance_ms(TTL_MS);
    cluster.nodes[1].tick().await;

    assert_eq!(cluster.leaders(), vec![1]);
    assert_eq!(cluster.nodes[1].status().term, Some(2));
    assert_eq!(
        cluster.drain_events(1),
        vec![LeadershipEvent::Elected { term: 2 }]
    );
}

/// Rule 5: A leader that finds its lease taken is demoted with LeaseLost
#[tokio::test]
async fn rule_05_lease_lost_demotes() {
    let mut cluster = Cluster::new(2);
    cluster.nodes[0].tick().await;
    let _ = cluster.drain_events(0);

    // Another holder sneaks in behind node 0's back after a release.
    cluster.store.release(LEASE_NAME, "node-0").await.unwrap();
    cluster.nodes[1].tick().await;

    assert_eq!(cluster.nodes[0].tick().await, Role::Follower);
    assert_eq!(
        cluster.drain_events(0),
        vec![LeadershipEvent::Demoted {
            term: Some(1),
            reason: DemotionReason::LeaseLost
        }]
    );
    assert_eq!(cluster.leaders(), vec![1]);
}

/// Rule 6: Storage outage past the retry budget demotes
#[tokio::test]
async fn rule_06_storage_outage_fails_closed() {
    let mut cluster = Cluster::new(2);
    cluster.nodes[0].tick().await;
    let _ = cluster.drain_events(0);

    cluster.store.set_unavailable(true);
    cluster.clock.advance_ms(TTL_MS / 3);
    assert_eq!(cluster.nodes[0].tick().await, Role::Leader);
    cluster.clock.advance_ms(TTL_MS / 3);
    assert_eq!(cluster.nodes[0].tick().await, Role::Follower);
    cluster.nodes[1].tick().await;

    assert!(cluster.leaders().is_empty());
    assert_eq!(
        cluster.drain_events(0),
        vec![LeadershipEvent::Demoted {
            term: Some(1),
            reason: DemotionReason::StorageUnavailable
        }]
    );
}

/// Rule 7: Shutdown releases the lease so a follower wins immediately
#[tokio::test]
async fn rule_07_shutdown_releases_lease() {
    let mut cluster = Cluster::new(2);
    let (tx, rx) = watch::channel(false);
    let task = cluster.nodes[0].spawn(rx);

    let mut handle = cluster.nodes[0].handle();
    while !handle.is_leader() {
        assert!(handle.changed().await);
    }

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();

    assert!(cluster.store.current(LEASE_NAME).await.unwrap().is_none());
    let events = cluster.drain_events(0);
    assert_eq!(
        events.last(),
        Some(&LeadershipEvent::Demoted {
            term: Some(1),
            reason: DemotionReason::Shutdown
        })
    );

    cluster.nodes[1].tick().await;
    assert_eq!(cluster.leaders(), vec![1]);
}

/// Rule 8: A silent leader loses leadership at expiry
#[tokio::test]
async fn rule_08_silent_leader_expires_locally() {
    let mut cluster = Cluster::new(2);
    cluster.nodes[0].tick().await;
    let _ = cluster.drain_events(0);

    cluster.clock.advance_ms(TTL_MS);
    assert!(!cluster.nodes[0].is_leader());

    // The next round first records the expiry, then reacquires with a new term.
    cluster.nodes[0].tick().await;
    assert_eq!(
        cluster.drain_events(0),
        vec![
            LeadershipEvent::Demoted {
                term: Some(1),
                reason: DemotionReason::LeaseExpired
            },
            LeadershipEvent::Elected { term: 2 },
        ]
    );
}

/// Rule 9: A store that stops answering counts as an outage and demotes past the budget
#[tokio::test]
async fn rule_09_unanswered_store_calls_demote() {
    let mut cluster = Cluster::new(2);
    cluster.nodes[0].tick().await;
    let _ = cluster.drain_events(0);
    cluster.store.set_stalled(true);

    let round = tokio::time::timeout(Duration::from_secs(2), cluster.nodes[0].tick())
        .await
        .expect("renewal is bounded by the call timeout");
    assert_eq!(round, Role::Leader);
    assert_eq!(cluster.nodes[0].tick().await, Role::Follower);
    assert_eq!(cluster.nodes[1].tick().await, Role::Follower);

    assert!(cluster.leaders().is_empty());
    assert_eq!(
        cluster.drain_events(0),
        vec![LeadershipEvent::Demoted {
            term: Some(1),
            reason: DemotionReason::StorageUnavailable
        }]
    );
}

/// Rule 10: Shutdown completes while the store is not answering
#[tokio::test]
async fn rule_10_shutdown_with_stalled_store() {
    let cluster = Cluster::new(1);
    cluster.nodes[0].tick().await;
    cluster.store.set_stalled(true);

    let (tx, rx) = watch::channel(false);
    let task = cluster.nodes[0].spawn(rx);
    tokio::time::sleep(Duration::from_millis(20)).await;
    tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("election stops after shutdown")
        .unwrap();
    assert!(!cluster.nodes[0].is_leader());
}
