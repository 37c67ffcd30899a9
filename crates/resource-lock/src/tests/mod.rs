//! Behavioural tests for `with_lock`.
//!
//! - `mutual_exclusion.rs` - I. Mutual exclusion (Rules 1-4)
//! - `extension.rs`        - II. Lease extension and abort (Rules 5-8)

mod mutual_exclusion;
