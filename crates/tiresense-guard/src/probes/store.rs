//! Relational-store probe
//!
//! Reads connection, deadlock, size and slow-query statistics through the
//! storage capability. Deadlocks are a cumulative counter, so the probe
//! tracks the delta between cycles.

use crate::probe::{evaluate_rules, Probe, ProbeReport, ProbeRule};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tiresense_common::capabilities::Storage;
use tiresense_common::config::{ProbeThresholds, RecoveryConfig};
use tiresense_common::{ActionKind, Clock, IncidentKind, Result, Severity};

fn high_connections(metrics: &HashMap<String, f64>, t: &ProbeThresholds) -> bool {
    metrics.get("active_connections").copied().unwrap_or(0.0) > f64::from(t.store_max_connections)
}

fn deadlock_surge(metrics: &HashMap<String, f64>, t: &ProbeThresholds) -> bool {
    metrics.get("deadlock_delta").copied().unwrap_or(0.0) > t.store_deadlock_delta as f64
}

fn disk_pressure(metrics: &HashMap<String, f64>, t: &ProbeThresholds) -> bool {
    metrics.get("disk_usage_percent").copied().unwrap_or(0.0) > t.store_disk_percent
}

fn slow_queries(metrics: &HashMap<String, f64>, t: &ProbeThresholds) -> bool {
    metrics.get("slow_queries").copied().unwrap_or(0.0) > f64::from(t.store_slow_queries)
}

const STORE_RULES: [ProbeRule; 4] = [
    ProbeRule {
        name: "database_high_connections",
        kind: IncidentKind::HighConnections,
        severity: Severity::Warning,
        actions: &[ActionKind::Restart, ActionKind::ClearCache],
        auto_recoverable: true,
        predicate: high_connections,
    },
    ProbeRule {
        name: "database_deadlocks",
        kind: IncidentKind::DeadlockSurge,
        severity: Severity::Error,
        actions: &[ActionKind::Restart],
        auto_recoverable: true,
        predicate: deadlock_surge,
    },
    ProbeRule {
        name: "database_disk_space",
        kind: IncidentKind::DiskPressure,
        severity: Severity::Critical,
        actions: &[ActionKind::CleanupResources, ActionKind::RotateLogs],
        auto_recoverable: true,
        predicate: disk_pressure,
    },
    ProbeRule {
        name: "database_slow_queries",
        kind: IncidentKind::SlowQueries,
        severity: Severity::Warning,
        actions: &[ActionKind::UpdateConfig],
        auto_recoverable: true,
        predicate: slow_queries,
    },
];

/// Probe over the relational store
pub struct StoreProbe {
    storage: Arc<dyn Storage>,
    thresholds: ProbeThresholds,
    recovery: RecoveryConfig,
    clock: Arc<dyn Clock>,
    last_deadlocks: Mutex<Option<u64>>,
}

impl StoreProbe {
    pub fn new(
        storage: Arc<dyn Storage>,
        thresholds: ProbeThresholds,
        recovery: RecoveryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        StoreProbe { storage, thresholds, recovery, clock, last_deadlocks: Mutex::new(None) }
    }
}

#[async_trait]
impl Probe for StoreProbe {
    fn component(&self) -> &'static str {
        "database"
    }

    async fn check(&self) -> Result<ProbeReport> {
        let stats = self.storage.stats().await?;

        let deadlock_delta = {
            let mut last = self.last_deadlocks.lock();
            let delta = match *last {
                Some(previous) => stats.deadlocks_total.saturating_sub(previous),
                None => 0,
            };
            *last = Some(stats.deadlocks_total);
            delta
        };

        let mut metrics = HashMap::new();
        metrics.insert("active_connections".to_string(), f64::from(stats.active_connections));
        metrics.insert("deadlock_delta".to_string(), deadlock_delta as f64);
        metrics.insert("database_size_bytes".to_string(), stats.size_bytes as f64);
        metrics.insert("slow_queries".to_string(), f64::from(stats.slow_queries));
        metrics.insert("disk_usage_percent".to_string(), stats.disk_usage_percent);

        let incidents = evaluate_rules(
            self.component(),
            &metrics,
            &STORE_RULES,
            &self.thresholds,
            &self.recovery,
            self.clock.wall_now(),
        );
        Ok(ProbeReport { component: self.component().to_string(), metrics, incidents })
    }
}
