//! In-memory capability fakes for runtime integration tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tiresense_common::capabilities::{
    BusEndpoint, CacheStats, CacheStore, DeviceRegistry, FleetStatus, HostMonitor, HostSample,
    IncidentFilter, LoadPredictor, MetricsSource, Notifier, Orchestrator, ReadingFilter,
    ReadingSource, RecoveryFilter, Storage, StorageTable, StoreStats,
};
use tiresense_common::{
    Channel, Clock, Incident, Notification, Reading, RecoveryRecord, Resolution, Result,
    VirtualClock, WorkloadInfo, WorkloadPhase,
};
use tiresense_runtime::Capabilities;

pub struct FakeOrchestrator {
    pub workloads: Mutex<Vec<WorkloadInfo>>,
    pub restarts: Mutex<Vec<String>>,
}

#[async_trait]
impl Orchestrator for FakeOrchestrator {
    async fn list_workloads(&self, _namespace: &str) -> Result<Vec<WorkloadInfo>> {
        Ok(self.workloads.lock().clone())
    }
    async fn restart_workload(&self, name: &str) -> Result<()> {
        self.restarts.lock().push(name.to_string());
        Ok(())
    }
    async fn scale_workload(&self, name: &str, desired_replicas: u32) -> Result<()> {
        let mut workloads = self.workloads.lock();
        if let Some(w) = workloads.iter_mut().find(|w| w.name == name) {
            w.desired_replicas = desired_replicas;
            w.current_replicas = desired_replicas;
        }
        Ok(())
    }
    async fn delete_instance(&self, _name: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeStorage {
    pub readings: Mutex<Vec<Reading>>,
    pub incidents: Mutex<Vec<Incident>>,
    pub resolutions: Mutex<Vec<Resolution>>,
    pub recoveries: Mutex<Vec<RecoveryRecord>>,
}

#[async_trait]
impl Storage for FakeStorage {
    async fn append_readings(&self, batch: &[Reading]) -> Result<()> {
        self.readings.lock().extend_from_slice(batch);
        Ok(())
    }
    async fn query_readings(&self, _f: &ReadingFilter, limit: usize) -> Result<Vec<Reading>> {
        Ok(self.readings.lock().iter().take(limit).cloned().collect())
    }
    async fn append_incident(&self, incident: &Incident) -> Result<()> {
        self.incidents.lock().push(incident.clone());
        Ok(())
    }
    async fn query_incidents(&self, _f: &IncidentFilter) -> Result<Vec<Incident>> {
        Ok(self.incidents.lock().clone())
    }
    async fn append_resolution(&self, resolution: &Resolution) -> Result<()> {
        self.resolutions.lock().push(resolution.clone());
        Ok(())
    }
    async fn append_recovery(&self, record: &RecoveryRecord) -> Result<()> {
        self.recoveries.lock().push(record.clone());
        Ok(())
    }
    async fn query_recoveries(&self, _f: &RecoveryFilter) -> Result<Vec<RecoveryRecord>> {
        Ok(self.recoveries.lock().clone())
    }
    async fn prune_before(
        &self,
        _table: StorageTable,
        _cutoff: chrono::DateTime<chrono::Utc>,
    ) -> Result<u64> {
        Ok(0)
    }
    async fn run_maintenance(&self, _table: StorageTable) -> Result<()> {
        Ok(())
    }
    async fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            active_connections: 12,
            deadlocks_total: 0,
            size_bytes: 4096,
            slow_queries: 0,
            disk_usage_percent: 35.0,
        })
    }
}

#[derive(Default)]
pub struct FakeCache {
    pub entries: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl CacheStore for FakeCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }
    async fn set(&self, key: &str, value: &str, _ttl: Option<Duration>) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
    async fn del(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
    async fn flush_all(&self) -> Result<()> {
        self.entries.lock().clear();
        Ok(())
    }
    async fn stats(&self) -> Result<CacheStats> {
        Ok(CacheStats {
            used_memory_bytes: 1 << 20,
            max_memory_bytes: 1 << 30,
            connected_clients: 3,
        })
    }
    async fn ping(&self) -> Result<Duration> {
        Ok(Duration::from_millis(1))
    }
}

pub struct HealthyMetrics;

#[async_trait]
impl MetricsSource for HealthyMetrics {
    async fn fetch_metrics(&self, _endpoint: &str) -> Result<String> {
        Ok("avg_response_time 80\nerror_rate 0.005\nrequest_rate 250\n".to_string())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Notification>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        self.sent.lock().push(notification.clone());
        Ok(())
    }
}

pub struct QuietHost;

#[async_trait]
impl HostMonitor for QuietHost {
    async fn sample(&self) -> Result<HostSample> {
        Ok(HostSample { cpu_percent: 30.0, memory_percent: 40.0, disk_percent: 50.0 })
    }
}

pub struct HealthyFleet;

#[async_trait]
impl DeviceRegistry for HealthyFleet {
    async fn fleet_status(&self) -> Result<FleetStatus> {
        Ok(FleetStatus { total_devices: 100, online_devices: 98, offline_devices: 2 })
    }
}

pub struct ReachableBus;

#[async_trait]
impl BusEndpoint for ReachableBus {
    async fn connect_check(&self, _deadline: Duration) -> Result<Duration> {
        Ok(Duration::from_millis(2))
    }
}

/// Reading source backed by a queue the test fills
pub struct QueuedReadings {
    pub queue: Mutex<VecDeque<Reading>>,
}

impl QueuedReadings {
    pub fn new() -> Arc<Self> {
        Arc::new(QueuedReadings { queue: Mutex::new(VecDeque::new()) })
    }

    pub fn push(&self, reading: Reading) {
        self.queue.lock().push_back(reading);
    }
}

#[async_trait]
impl ReadingSource for QueuedReadings {
    async fn pull(&self, max: usize) -> Result<Vec<Reading>> {
        let mut queue = self.queue.lock();
        let take = queue.len().min(max);
        Ok(queue.drain(..take).collect())
    }
}

pub struct SteadyPredictor(pub f64);

impl LoadPredictor for SteadyPredictor {
    fn predict(&self, _features: &[f64]) -> Result<f64> {
        Ok(self.0)
    }
}

/// A nominal reading for one device at the virtual clock's current time
pub fn reading(clock: &VirtualClock, device: &str, seq: u64, pressure: f64) -> Reading {
    let mut channels = HashMap::new();
    channels.insert(Channel::Temperature, 30.0);
    channels.insert(Channel::Humidity, 45.0);
    channels.insert(Channel::Pressure, pressure);
    channels.insert(Channel::BatteryVoltage, 3.7);
    channels.insert(Channel::SignalStrength, -60.0);
    Reading {
        device_id: device.to_string(),
        timestamp: clock.wall_now() + chrono::Duration::milliseconds(seq as i64),
        arrival_seq: seq,
        channels,
        raw_quality: 1.0,
    }
}

/// Fake-backed capability bundle plus handles the tests inspect
pub struct TestWorld {
    pub clock: Arc<VirtualClock>,
    pub orchestrator: Arc<FakeOrchestrator>,
    pub storage: Arc<FakeStorage>,
    pub cache: Arc<FakeCache>,
    pub notifier: Arc<RecordingNotifier>,
    pub readings: Arc<QueuedReadings>,
}

impl TestWorld {
    pub fn new() -> Self {
        TestWorld {
            clock: Arc::new(VirtualClock::new()),
            orchestrator: Arc::new(FakeOrchestrator {
                workloads: Mutex::new(vec![WorkloadInfo {
                    name: "api-service".to_string(),
                    phase: WorkloadPhase::Running,
                    desired_replicas: 2,
                    current_replicas: 2,
                    restart_count: 0,
                }]),
                restarts: Mutex::new(Vec::new()),
            }),
            storage: Arc::new(FakeStorage::default()),
            cache: Arc::new(FakeCache::default()),
            notifier: Arc::new(RecordingNotifier::default()),
            readings: QueuedReadings::new(),
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            clock: self.clock.clone(),
            orchestrator: self.orchestrator.clone(),
            storage: self.storage.clone(),
            cache: self.cache.clone(),
            metrics: Arc::new(HealthyMetrics),
            notifier: self.notifier.clone(),
            host: Arc::new(QuietHost),
            devices: Arc::new(HealthyFleet),
            readings: self.readings.clone(),
            bus_endpoint: Arc::new(ReachableBus),
            load_predictor: Arc::new(SteadyPredictor(0.5)),
            sequence_weights: None,
        }
    }
}
