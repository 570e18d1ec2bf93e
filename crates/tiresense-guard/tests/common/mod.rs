//! In-memory capability fakes shared by the guard integration tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tiresense_common::capabilities::{
    CacheStats, CacheStore, IncidentFilter, Orchestrator, ReadingFilter, RecoveryFilter, Storage,
    StorageTable, StoreStats,
};
use tiresense_common::{
    Error, Incident, Reading, RecoveryRecord, Resolution, Result, WorkloadInfo, WorkloadPhase,
};
use tiresense_guard::recovery::{ConditionChecker, ConditionStatus};
use tiresense_common::IncidentKind;

/// Orchestrator fake that records every mutation
pub struct FakeOrchestrator {
    pub workloads: Mutex<Vec<WorkloadInfo>>,
    pub restarts: Mutex<Vec<String>>,
    pub deletions: Mutex<Vec<String>>,
    pub fail_restarts: Mutex<bool>,
}

impl FakeOrchestrator {
    pub fn new(workloads: Vec<WorkloadInfo>) -> Arc<Self> {
        Arc::new(FakeOrchestrator {
            workloads: Mutex::new(workloads),
            restarts: Mutex::new(Vec::new()),
            deletions: Mutex::new(Vec::new()),
            fail_restarts: Mutex::new(false),
        })
    }

    pub fn workload(name: &str, replicas: u32) -> WorkloadInfo {
        WorkloadInfo {
            name: name.to_string(),
            phase: WorkloadPhase::Running,
            desired_replicas: replicas,
            current_replicas: replicas,
            restart_count: 0,
        }
    }

    pub fn restart_count(&self) -> usize {
        self.restarts.lock().len()
    }
}

#[async_trait]
impl Orchestrator for FakeOrchestrator {
    async fn list_workloads(&self, _namespace: &str) -> Result<Vec<WorkloadInfo>> {
        Ok(self.workloads.lock().clone())
    }

    async fn restart_workload(&self, name: &str) -> Result<()> {
        if *self.fail_restarts.lock() {
            return Err(Error::Unavailable("orchestrator API error".to_string()));
        }
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

    async fn delete_instance(&self, name: &str) -> Result<()> {
        self.deletions.lock().push(name.to_string());
        Ok(())
    }
}

/// Cache fake over a plain map
#[derive(Default)]
pub struct FakeCache {
    pub entries: Mutex<HashMap<String, String>>,
    pub flushes: Mutex<u32>,
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
        *self.flushes.lock() += 1;
        Ok(())
    }
    async fn stats(&self) -> Result<CacheStats> {
        Ok(CacheStats {
            used_memory_bytes: self.entries.lock().len() as u64 * 64,
            max_memory_bytes: 1 << 30,
            connected_clients: 1,
        })
    }
    async fn ping(&self) -> Result<Duration> {
        Ok(Duration::from_millis(1))
    }
}

/// Storage fake with append-only vectors
#[derive(Default)]
pub struct FakeStorage {
    pub readings: Mutex<Vec<Reading>>,
    pub incidents: Mutex<Vec<Incident>>,
    pub resolutions: Mutex<Vec<Resolution>>,
    pub recoveries: Mutex<Vec<RecoveryRecord>>,
    pub maintenance_runs: Mutex<Vec<StorageTable>>,
}

#[async_trait]
impl Storage for FakeStorage {
    async fn append_readings(&self, batch: &[Reading]) -> Result<()> {
        self.readings.lock().extend_from_slice(batch);
        Ok(())
    }
    async fn query_readings(&self, _filter: &ReadingFilter, limit: usize) -> Result<Vec<Reading>> {
        Ok(self.readings.lock().iter().take(limit).cloned().collect())
    }
    async fn append_incident(&self, incident: &Incident) -> Result<()> {
        self.incidents.lock().push(incident.clone());
        Ok(())
    }
    async fn query_incidents(&self, _filter: &IncidentFilter) -> Result<Vec<Incident>> {
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
    async fn query_recoveries(&self, _filter: &RecoveryFilter) -> Result<Vec<RecoveryRecord>> {
        Ok(self.recoveries.lock().clone())
    }
    async fn prune_before(
        &self,
        table: StorageTable,
        cutoff: chrono::DateTime<chrono::Utc>,
    ) -> Result<u64> {
        match table {
            StorageTable::Readings => {
                let mut readings = self.readings.lock();
                let before = readings.len();
                readings.retain(|r| r.timestamp >= cutoff);
                Ok((before - readings.len()) as u64)
            }
            StorageTable::Incidents => {
                let mut incidents = self.incidents.lock();
                let before = incidents.len();
                incidents.retain(|i| i.observed_at >= cutoff);
                Ok((before - incidents.len()) as u64)
            }
            StorageTable::Recoveries => {
                let mut recoveries = self.recoveries.lock();
                let before = recoveries.len();
                recoveries.retain(|r| r.started_at >= cutoff);
                Ok((before - recoveries.len()) as u64)
            }
        }
    }
    async fn run_maintenance(&self, table: StorageTable) -> Result<()> {
        self.maintenance_runs.lock().push(table);
        Ok(())
    }
    async fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            active_connections: 10,
            deadlocks_total: 0,
            size_bytes: 1024,
            slow_queries: 0,
            disk_usage_percent: 40.0,
        })
    }
}

/// Condition checker scripted per (subject, kind)
#[derive(Default)]
pub struct ScriptedChecker {
    pub statuses: Mutex<HashMap<(String, IncidentKind), ConditionStatus>>,
}

impl ScriptedChecker {
    pub fn set(&self, subject: &str, kind: IncidentKind, status: ConditionStatus) {
        self.statuses.lock().insert((subject.to_string(), kind), status);
    }
}

#[async_trait]
impl ConditionChecker for ScriptedChecker {
    async fn condition(&self, subject: &str, kind: IncidentKind) -> ConditionStatus {
        self.statuses
            .lock()
            .get(&(subject.to_string(), kind))
            .copied()
            .unwrap_or(ConditionStatus::Unknown)
    }
}
