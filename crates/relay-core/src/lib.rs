//! Core types, configuration, and utilities for the outbox relay.

mod clock;
mod config;
mod error;
mod logging;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{
    BrokerKind, BrokerSettings, ElectionSettings, IdempotencySettings, LockSettings, RelayConfig, RelaySettings,
    DEFAULT_LOG_LEVEL,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, LogConfig};
