//! Lease-based leader election.
//!
//! At most one instance holds the shared leadership lease at any time. An
//! instance that cannot prove it still holds an unexpired lease considers
//! itself a follower, so storage outages can leave the group leaderless for
//! a while but never with two leaders.
//!
//! # State machine
//!
//! ```text
//! Follower --tick--> Candidate --acquired--> Leader
//!     ^                  |                     |
//!     |____ held by _____|                     |
//!     |       other                            |
//!     |____ renew failed / expired / shutdown _|
//! ```
//!
//! Tie-breaks between simultaneous candidates are decided by the store's
//! atomic acquire primitive, never here.

mod election;
mod error;
mod lease;
mod redis_store;
mod store;

#[cfg(test)]
mod tests;

pub use election::{
    DemotionReason, ElectionConfig, LeaderElection, LeaderHandle, LeadershipEvent,
    LeadershipStatus, Role,
};
pub use error::{LeaseError, LeaseResult};
pub use lease::LeadershipLease;
pub use redis_store::RedisLeaseStore;
pub use store::{InMemoryLeaseStore, LeaseStore};
