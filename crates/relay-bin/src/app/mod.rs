//! Process wiring and lifecycle.

mod init;
mod lifecycle;
mod state;

pub use init::run_relay;
pub use lifecycle::check_status;
pub use state::RelayState;
