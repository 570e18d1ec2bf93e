//! Self-healing guard for the TireSense control plane
//!
//! This crate closes the loop between observation and remediation: health
//! probes turn subsystem metrics into incidents, the incident registry
//! tracks what is currently wrong, the recovery engine dispatches
//! cooldown-governed actions against the orchestrator, the predictive
//! scaler resizes deployments ahead of load, and the chaos injector
//! verifies the whole loop keeps healing.

pub mod chaos;
pub mod faults;
pub mod health;
pub mod incidents;
pub mod notify;
pub mod probe;
pub mod probes;
pub mod recovery;
pub mod scaler;
pub mod scan;

pub use chaos::{ChaosInjector, ChaosOutcome, Injection};
pub use faults::FaultPlane;
pub use health::health_snapshot;
pub use incidents::IncidentRegistry;
pub use notify::{LogNotifier, NotificationHub, WebhookNotifier};
pub use probe::{Probe, ProbeReport, ProbeRule};
pub use recovery::{ConditionChecker, RecoveryEngine, RecoveryPlan};
pub use scaler::{LoadSample, PredictiveScaler};
pub use scan::HealthScanner;
