//! Common types and utilities for the TireSense control plane
//!
//! This crate provides the shared vocabulary used across all components of
//! the control plane: domain types, the injectable clock, cancellation
//! tokens, the cooldown ledger, the in-process event bus and the capability
//! traits through which the core reaches external systems.

pub mod bus;
pub mod cancel;
pub mod capabilities;
pub mod clock;
pub mod config;
pub mod cooldown;
pub mod error;
pub mod metrics;
pub mod retry;
pub mod telemetry;
pub mod types;

pub use cancel::{CancelSource, CancelToken};
pub use clock::{Clock, SystemClock, VirtualClock};
pub use config::CoreConfig;
pub use cooldown::{CooldownKey, CooldownLedger};
pub use error::{Error, Result};
pub use retry::{with_retries, RetryPolicy};
pub use types::*;
