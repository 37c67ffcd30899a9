//! I. At most one leader.
//!
//! Rules covered:
//! - 1. Simultaneous candidates produce exactly one leader
//! - 2. Under a random schedule of ticks, clock jumps and crashes, no two
//!      instances hold a live lease at the same instant
//! - 3. Terms observed across handovers strictly increase

use super::harness::{Cluster, TTL_MS};
use crate::{LeadershipEvent, LeadershipStatus, Role};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;

/// Rule 1: Simultaneous candidates produce exactly one leader
#[tokio::test]
async fn rule_01_one_winner_among_candidates() {
    let mut cluster = Cluster::new(5);
    cluster.tick_all().await;

    assert_eq!(cluster.leaders(), vec![0]);
    for i in 1..5 {
        assert_eq!(cluster.nodes[i].status().role, Role::Follower);
        assert!(cluster.drain_events(i).is_empty());
    }
    assert_eq!(
        cluster.drain_events(0),
        vec![LeadershipEvent::Elected { term: 1 }]
    );
}

/// Rule 2: Random schedule never yields two live leaders
#[tokio::test]
async fn rule_02_random_schedule_keeps_single_leader() {
    for seed in 0..20u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let cluster = Cluster::new(4);
        let mut crashed: HashSet<usize> = HashSet::new();

        for _ in 0..300 {
            let node = rng.gen_range(0..cluster.nodes.len());
            match rng.gen_range(0..10) {
                0 => {
                    crashed.insert(node);
                }
                1 => {
                    crashed.remove(&node);
                }
                2 => cluster.store.set_unavailable(rng.gen_bool(0.5)),
                _ => {
                    if !crashed.contains(&node) {
                        cluster.nodes[node].tick().await;
                    }
                }
            }
            cluster.clock.advance_ms(rng.gen_range(0..TTL_MS / 2));

            let leaders = cluster.leaders();
            assert!(
                leaders.len() <= 1,
                "seed {}: two live leaders {:?}",
                seed,
                leaders
            );

            let terms: Vec<u64> = leaders
                .iter()
                .filter_map(|&i| cluster.nodes[i].status().term)
                .collect();
            let unique: HashSet<&u64> = terms.iter().collect();
            assert_eq!(unique.len(), terms.len());
        }
    }
}

/// Rule 3: Terms strictly increase across handovers
#[tokio::test]
async fn rule_03_terms_strictly_increase() {
    let mut rng = StdRng::seed_from_u64(42);
    let cluster = Cluster::new(3);
    let mut last_term = 0u64;

    for _ in 0..50 {
        let node = rng.gen_range(0..cluster.nodes.len());
        cluster.nodes[node].tick().await;

        let LeadershipStatus { role, term, .. } = cluster.nodes[node].status();
        if role == Role::Leader {
            let term = term.unwrap();
            assert!(term > last_term);
            last_term = term;
        }
        // Let the lease lapse so the next tick may hand it over.
        cluster.clock.advance_ms(TTL_MS);
    }

    assert!(last_term > 1);
}
