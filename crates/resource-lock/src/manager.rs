//! `with_lock` driver.

use crate::lease::normalize;
use crate::{AbortSignal, DurationClass, LockBackend, LockDurations, LockError, LockLease, LockResult};
use relay_core::SharedClock;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Aborts the extender when the critical section ends, however it ends.
struct ExtenderGuard(JoinHandle<()>);

impl Drop for ExtenderGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Runs critical sections under distributed locks.
#[derive(Clone)]
pub struct LockManager {
    backend: Arc<dyn LockBackend>,
    durations: LockDurations,
    clock: SharedClock,
}

impl LockManager {
    pub fn new(backend: Arc<dyn LockBackend>, durations: LockDurations, clock: SharedClock) -> Self {
        Self {
            backend,
            durations,
            clock,
        }
    }

    pub fn durations(&self) -> &LockDurations {
        &self.durations
    }

    /// Lock `resources` for a `class`-sized lease and run `critical`.
    ///
    /// Returns [`LockError::Locked`] immediately if any resource is held.
    /// While `critical` runs the lease is extended shortly before it expires;
    /// if an extension fails the [`AbortSignal`] is set and the section is
    /// expected to stop before its next side effect. The lease is released
    /// when `critical` returns.
    pub async fn with_lock<F, Fut, T>(
        &self,
        resources: &[&str],
        class: DurationClass,
        critical: F,
    ) -> LockResult<T>
    where
        F: FnOnce(AbortSignal) -> Fut,
        Fut: Future<Output = T>,
    {
        let resources = normalize(resources);
        if resources.is_empty() {
            return Err(LockError::NoResources);
        }

        let ttl = self.durations.ttl(class);
        let lease = self.backend.acquire(&resources, ttl).await?;
        info!(
            resources = ?lease.resources,
            fence = lease.fence,
            class = ?class,
            ttl_ms = ttl.as_millis() as u64,
            "Lock acquired"
        );

        let (abort_tx, signal) = AbortSignal::channel();
        let extender = ExtenderGuard(tokio::spawn(extend_until_dropped(
            Arc::clone(&self.backend),
            self.clock.clone(),
            lease.clone(),
            ttl,
            self.durations.extension_threshold,
            abort_tx,
        )));

        let output = critical(signal).await;
        drop(extender);

        match tokio::time::timeout(ttl, self.backend.release(&lease)).await {
            Ok(Ok(())) => debug!(resources = ?lease.resources, "Lock released"),
            Ok(Err(e)) => {
                warn!(resources = ?lease.resources, error = %e, "Lock release failed; lease will expire")
            }
            Err(_) => warn!(resources = ?lease.resources, "Lock release got no answer; lease will expire"),
        }
        Ok(output)
    }
}

/// Extend `lease` each time it gets within `threshold` of expiry. On the
/// first extension that fails or does not answer before expiry, set the
/// abort flag and stop.
async fn extend_until_dropped(
    backend: Arc<dyn LockBackend>,
    clock: SharedClock,
    mut lease: LockLease,
    ttl: Duration,
    threshold: Duration,
    abort: watch::Sender<bool>,
) {
    let threshold_ms = threshold.as_millis() as u64;
    loop {
        let wait_ms = lease
            .remaining_ms(clock.now_ms())
            .saturating_sub(threshold_ms);
        tokio::time::sleep(Duration::from_millis(wait_ms)).await;

        // An extension still unanswered when the lease runs out is a failure.
        let remaining = Duration::from_millis(lease.remaining_ms(clock.now_ms()));
        match tokio::time::timeout(remaining, backend.extend(&lease, ttl)).await {
            Ok(Ok(extended)) => {
                debug!(
                    resources = ?extended.resources,
                    expires_at_ms = extended.expires_at_ms,
                    "Lock extended"
                );
                lease = extended;
            }
            Ok(Err(e)) => {
                warn!(resources = ?lease.resources, error = %e, "Lock extension failed; signalling abort");
                abort.send_replace(true);
                return;
            }
            Err(_) => {
                warn!(resources = ?lease.resources, "Lock expired before extension answered; signalling abort");
                abort.send_replace(true);
                return;
            }
        }
    }
}
