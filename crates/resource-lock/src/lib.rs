//! Distributed resource locks.
//!
//! [`LockManager::with_lock`] takes a lease over a set of resource names
//! (all or nothing), runs a critical section with an [`AbortSignal`], keeps
//! the lease extended while the section runs, and releases it afterwards.
//!
//! Contention is reported as [`LockError::Locked`] and never retried here;
//! callers choose their own retry policy. The abort signal is advisory: the
//! critical section must check it before any externally visible side effect.

mod abort;
mod backend;
mod class;
mod error;
mod lease;
mod manager;
mod redlock;

#[cfg(test)]
mod tests;

pub use abort::AbortSignal;
pub use backend::{InMemoryLockBackend, LockBackend};
pub use class::{DurationClass, LockDurations};
pub use error::{LockError, LockResult};
pub use lease::LockLease;
pub use manager::LockManager;
pub use redlock::RedisLockBackend;
