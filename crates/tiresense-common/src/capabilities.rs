//! Narrow, injectable interfaces to external systems
//!
//! Concrete implementations (Kubernetes client, relational store, remote
//! cache, message broker, webhook sinks) live outside the core. Everything
//! the core needs from the outside world passes through one of these
//! traits, so tests run against in-memory fakes and no component reaches
//! for a process-wide singleton.

use crate::error::Result;
use crate::types::{Incident, Notification, Reading, RecoveryRecord, Resolution, WorkloadInfo};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

/// Orchestrator capability used by recovery, scaling and chaos
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn list_workloads(&self, namespace: &str) -> Result<Vec<WorkloadInfo>>;

    /// Trigger a rolling restart of the named workload
    async fn restart_workload(&self, name: &str) -> Result<()>;

    async fn scale_workload(&self, name: &str, desired_replicas: u32) -> Result<()>;

    /// Delete a single instance; used by the chaos injector
    async fn delete_instance(&self, name: &str) -> Result<()>;
}

/// Filter for reading queries
#[derive(Debug, Clone, Default)]
pub struct ReadingFilter {
    pub device_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

/// Filter for incident queries
#[derive(Debug, Clone, Default)]
pub struct IncidentFilter {
    pub subject: Option<String>,
    pub min_severity: Option<crate::types::Severity>,
    pub since: Option<DateTime<Utc>>,
    pub unresolved_only: bool,
}

/// Filter for recovery record queries
#[derive(Debug, Clone, Default)]
pub struct RecoveryFilter {
    pub incident_id: Option<Uuid>,
    pub target: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

/// Tables the maintenance worker operates on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageTable {
    Readings,
    Incidents,
    Recoveries,
}

impl StorageTable {
    pub const ALL: [StorageTable; 3] =
        [StorageTable::Readings, StorageTable::Incidents, StorageTable::Recoveries];

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageTable::Readings => "readings",
            StorageTable::Incidents => "incidents",
            StorageTable::Recoveries => "recoveries",
        }
    }
}

/// Point-in-time statistics used by the relational-store probe
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub active_connections: u32,
    /// Cumulative deadlock counter; probes track the delta
    pub deadlocks_total: u64,
    pub size_bytes: u64,
    pub slow_queries: u32,
    pub disk_usage_percent: f64,
}

/// Persistent storage capability. Appends are transactionally bounded per
/// batch: either the whole batch lands or none of it does.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn append_readings(&self, batch: &[Reading]) -> Result<()>;
    async fn query_readings(&self, filter: &ReadingFilter, limit: usize) -> Result<Vec<Reading>>;

    async fn append_incident(&self, incident: &Incident) -> Result<()>;
    async fn query_incidents(&self, filter: &IncidentFilter) -> Result<Vec<Incident>>;
    async fn append_resolution(&self, resolution: &Resolution) -> Result<()>;

    async fn append_recovery(&self, record: &RecoveryRecord) -> Result<()>;
    async fn query_recoveries(&self, filter: &RecoveryFilter) -> Result<Vec<RecoveryRecord>>;

    /// Delete rows older than `cutoff`; returns the number deleted
    async fn prune_before(&self, table: StorageTable, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Vacuum/analyze-style maintenance on one table
    async fn run_maintenance(&self, table: StorageTable) -> Result<()>;

    async fn stats(&self) -> Result<StoreStats>;
}

/// Statistics exposed by the cache probe
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub used_memory_bytes: u64,
    pub max_memory_bytes: u64,
    pub connected_clients: u32,
}

/// Key/value cache capability with TTL support
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;
    async fn del(&self, key: &str) -> Result<()>;
    async fn flush_all(&self) -> Result<()>;
    async fn stats(&self) -> Result<CacheStats>;
    /// Round-trip latency of a ping
    async fn ping(&self) -> Result<Duration>;
}

/// Fetches the raw metrics text from a scrape endpoint
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn fetch_metrics(&self, endpoint: &str) -> Result<String>;
}

/// Best-effort notification sink. Implementations must not block the core;
/// failures are logged and swallowed by the notification hub.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Host resource usage sampled by the host probe
#[derive(Debug, Clone, Copy, Default)]
pub struct HostSample {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
}

/// Samples CPU, memory and disk of the host running the core
#[async_trait]
pub trait HostMonitor: Send + Sync {
    async fn sample(&self) -> Result<HostSample>;
}

/// Fleet counts from the device registry
#[derive(Debug, Clone, Copy, Default)]
pub struct FleetStatus {
    pub total_devices: u32,
    pub online_devices: u32,
    pub offline_devices: u32,
}

impl FleetStatus {
    pub fn offline_fraction(&self) -> f64 {
        if self.total_devices == 0 {
            0.0
        } else {
            f64::from(self.offline_devices) / f64::from(self.total_devices)
        }
    }
}

/// Device registry queried by the fleet probe
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn fleet_status(&self) -> Result<FleetStatus>;
}

/// Ingress for raw readings; the ingest worker pulls in batches
#[async_trait]
pub trait ReadingSource: Send + Sync {
    async fn pull(&self, max: usize) -> Result<Vec<Reading>>;
}

/// Reachability check against the device message bus
#[async_trait]
pub trait BusEndpoint: Send + Sync {
    /// Connect within the deadline, returning the observed latency
    async fn connect_check(&self, deadline: Duration) -> Result<Duration>;
    /// Optional metrics scrape endpoint, when the broker exposes one
    fn metrics_endpoint(&self) -> Option<String> {
        None
    }
}

/// Regression model consumed by the predictive scaler: maps a feature
/// vector of recent load metrics to predicted load in [0, 1].
pub trait LoadPredictor: Send + Sync {
    fn predict(&self, features: &[f64]) -> Result<f64>;
}
