//! Cooperative abort flag for critical sections.

use tokio::sync::watch;

/// Becomes set once the lock lease could not be extended.
///
/// Nothing is interrupted when it is set. Code inside the critical section
/// must call [`AbortSignal::is_aborted`] before each externally visible side
/// effect and stop on its own.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    state: watch::Receiver<bool>,
}

impl AbortSignal {
    pub(crate) fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { state: rx })
    }

    pub fn is_aborted(&self) -> bool {
        *self.state.borrow()
    }

    /// Resolves when the signal is set. Never resolves if the lock is
    /// released first.
    pub async fn aborted(&self) {
        let mut state = self.state.clone();
        if state.wait_for(|aborted| *aborted).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
