//! Relay startup and shutdown.

use super::RelayState;
use relay_core::RelayConfig;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Run the election and the drain loop until Ctrl-C.
pub async fn run_relay(config: RelayConfig) -> anyhow::Result<()> {
    let state = RelayState::connect(config).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let relay = state.relay();
    let stats = relay.stats();
    let election_task = state.election.spawn(shutdown_rx.clone());
    let relay_task = relay.spawn(shutdown_rx);

    info!(
        instance_id = %state.config.instance_id,
        exchange = %state.config.exchange_name,
        "Relay running; press Ctrl-C to stop"
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C; shutting down");
    }
    info!("Shutdown requested");
    shutdown_tx.send_replace(true);

    // The relay stops first so no publish is in flight when the lease goes.
    if let Err(e) = relay_task.await {
        warn!(error = %e, "Relay task ended abnormally");
    }
    if let Err(e) = election_task.await {
        warn!(error = %e, "Election task ended abnormally");
    }

    let snapshot = stats.snapshot();
    info!(
        published = snapshot.published,
        publish_failures = snapshot.publish_failures,
        quarantined = snapshot.quarantined,
        "Relay shut down"
    );
    Ok(())
}
