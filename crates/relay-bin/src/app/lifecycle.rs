//! Read-only inspection of a running relay group.

use event_outbox::{OutboxStore, RedisOutboxStore};
use leader_lease::{LeaseStore, RedisLeaseStore};
use relay_core::{RelayConfig, SystemClock};
use serde_json::json;

/// Print the current leadership lease and the outbox depth as JSON.
pub async fn check_status(config: &RelayConfig) -> anyhow::Result<()> {
    let clock = SystemClock::shared();
    let leases = RedisLeaseStore::connect(&config.redis_url, clock).await?;
    let outbox = RedisOutboxStore::connect(&config.redis_url, config.outbox_key()).await?;

    let lease = leases.current(&config.election.name).await?;
    let depth = outbox.len().await?;
    let leaderless = lease.is_none();

    let status = json!({
        "election": config.election.name,
        "leader": lease,
        "outbox_key": outbox.key(),
        "outbox_depth": depth,
    });
    println!("{}", serde_json::to_string_pretty(&status)?);

    if leaderless {
        println!("No instance currently holds the lease");
    }
    Ok(())
}
