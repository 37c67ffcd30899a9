//! Behavioural tests for leader election.
//!
//! - `harness.rs`     - Simulated instances sharing one store and one clock
//! - `exclusivity.rs` - I. At most one leader (Rules 1-3)
//! - `failover.rs`    - II. Failover and demotion (Rules 4-10)

mod exclusivity;
mod failover;
