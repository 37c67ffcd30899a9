//! Behavioural tests for the outbox relay.
//!
//! - `harness.rs`      - Shared in-memory store, notifier, broker and lease store
//! - `ordering.rs`     - I. FIFO preservation (Rules 1-3)
//! - `delivery.rs`     - II. At-least-once delivery (Rules 4-8)
//! - `leadership.rs`   - III. Leader-only draining (Rules 9-11)
//! - `crash_resume.rs` - IV. Crash and resume (Rules 12-13)
//! - `wakeups.rs`      - V. Notifications and fallback poll (Rules 14-16)
//! - `stalls.rs`       - VI. Unresponsive outbox store (Rules 17-18)

pub(crate) mod harness;
