//! Subsystem-specific health probes

pub mod bus;
pub mod cache;
pub mod fleet;
pub mod host;
pub mod orchestrator;
pub mod service;
pub mod store;

pub use bus::BusProbe;
pub use cache::CacheProbe;
pub use fleet::FleetProbe;
pub use host::HostProbe;
pub use orchestrator::OrchestratorProbe;
pub use service::ServiceProbe;
pub use store::StoreProbe;
