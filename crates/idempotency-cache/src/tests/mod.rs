//! Behavioural tests for `IdempotencyCache::handle`.
//!
//! - `replay.rs`    - I. Replay of recorded responses (Rules 1-3)
//! - `conflicts.rs` - II. Key reuse and in-flight requests (Rules 4-6)
//! - `expiry.rs`    - III. TTL expiry (Rules 7-8)
//! - `failures.rs`  - IV. Server errors and handler failures (Rules 9-12)

mod harness;
