//! Runtime for the TireSense control plane
//!
//! The supervisor owns the lifecycle of every long-running worker:
//! dependency-ordered startup, cadence with jitter, crash-safe restart
//! with backoff, escalation past the failure budget, and graceful
//! drain-bounded shutdown.

pub mod app;
pub mod supervisor;
pub mod workers;

pub use app::{build_core, Capabilities, CoreHandles};
pub use supervisor::{
    BackoffPolicy, PanicPolicy, Supervisor, TaskPolicy, Worker, EXIT_OK, EXIT_STARTUP_FAILURE,
    EXIT_SUPERVISOR_ESCALATION,
};
