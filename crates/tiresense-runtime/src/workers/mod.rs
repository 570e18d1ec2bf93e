//! The control plane's long-running workers

pub mod chaos;
pub mod health;
pub mod ingest;
pub mod inference;
pub mod maintenance;
pub mod scaler;

pub use chaos::ChaosWorker;
pub use health::HealthWorker;
pub use ingest::IngestWorker;
pub use inference::InferenceWorker;
pub use maintenance::MaintenanceWorker;
pub use scaler::ScalerWorker;
