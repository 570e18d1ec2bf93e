//! Health worker
//!
//! One scan cycle: run every probe, reconcile the incident registry,
//! publish a health snapshot (bus plus cache mirror), and hand the ranked
//! active incidents to the recovery engine.

use crate::supervisor::{PanicPolicy, TaskPolicy, Worker};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tiresense_analytics::fusion;
use tiresense_common::bus::EventBus;
use tiresense_common::capabilities::{CacheStore, Storage};
use tiresense_common::{CancelToken, Clock, IncidentKind, Result};
use tiresense_guard::{health_snapshot, HealthScanner, IncidentRegistry, NotificationHub, RecoveryEngine};
use tracing::{debug, warn};

/// Cache key mirroring the latest snapshot for dashboards
const STATUS_CACHE_KEY: &str = "tiresense:system_status";
const STATUS_CACHE_TTL: Duration = Duration::from_secs(300);

pub struct HealthWorker {
    scanner: Arc<HealthScanner>,
    registry: Arc<IncidentRegistry>,
    engine: Arc<RecoveryEngine>,
    storage: Arc<dyn Storage>,
    cache: Arc<dyn CacheStore>,
    bus: EventBus,
    notifications: Arc<NotificationHub>,
    clock: Arc<dyn Clock>,
    period: Duration,
}

impl HealthWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scanner: Arc<HealthScanner>,
        registry: Arc<IncidentRegistry>,
        engine: Arc<RecoveryEngine>,
        storage: Arc<dyn Storage>,
        cache: Arc<dyn CacheStore>,
        bus: EventBus,
        notifications: Arc<NotificationHub>,
        clock: Arc<dyn Clock>,
        period: Duration,
    ) -> Self {
        HealthWorker {
            scanner,
            registry,
            engine,
            storage,
            cache,
            bus,
            notifications,
            clock,
            period,
        }
    }
}

#[async_trait]
impl Worker for HealthWorker {
    fn name(&self) -> &'static str {
        "health"
    }

    fn dependencies(&self) -> Vec<&'static str> {
        vec!["inference"]
    }

    fn policy(&self) -> TaskPolicy {
        TaskPolicy {
            period: self.period,
            jitter: Duration::from_millis(500),
            on_panic: PanicPolicy::Escalate,
            ..TaskPolicy::default()
        }
    }

    async fn tick(&self, cancel: &CancelToken) -> Result<()> {
        let reports = self.scanner.scan_all().await;
        if cancel.is_cancelled() {
            return Ok(());
        }

        let present: BTreeSet<(String, IncidentKind)> = reports
            .iter()
            .flat_map(|r| r.incidents.iter())
            .map(|i| (i.subject.clone(), i.kind))
            .collect();

        for incident in reports.iter().flat_map(|r| r.incidents.iter()) {
            if self.registry.upsert(incident) {
                if let Err(e) = self.storage.append_incident(incident).await {
                    warn!(error = %e, "incident not persisted");
                }
                self.bus.incidents.publish(incident.clone());
                self.notifications.incident(incident);
            }
        }

        // Conditions the scan no longer sees are resolved. Device
        // anomalies belong to the inference loop; workload findings are
        // kept while the orchestrator itself is unreachable, and chaos
        // verdicts only ever age out.
        let orchestrator_down =
            present.contains(&("orchestrator".to_string(), IncidentKind::Unreachable));
        let resolutions = self.registry.resolve_missing(
            |_, kind| match kind {
                k if k.is_device_anomaly() => false,
                IncidentKind::SelfHealFailure => false,
                IncidentKind::WorkloadNotRunning | IncidentKind::CrashLoop => !orchestrator_down,
                _ => true,
            },
            &present,
        );
        for resolution in &resolutions {
            if let Err(e) = self.storage.append_resolution(resolution).await {
                warn!(error = %e, "resolution not persisted");
            }
        }

        // Publish the snapshot on the bus and mirror it into the cache
        let active = self.registry.active();
        let snapshot = health_snapshot(self.clock.wall_now(), &active);
        debug!(score = snapshot.score, incidents = active.len(), "health snapshot");
        self.bus.health.publish(snapshot.clone());
        match serde_json::to_string(&snapshot) {
            Ok(json) => {
                if let Err(e) =
                    self.cache.set(STATUS_CACHE_KEY, &json, Some(STATUS_CACHE_TTL)).await
                {
                    debug!(error = %e, "status cache mirror failed");
                }
            }
            Err(e) => debug!(error = %e, "snapshot serialization failed"),
        }

        if cancel.is_cancelled() {
            return Ok(());
        }

        // Ranked incidents drive the recovery engine
        let mut ranked = active;
        fusion::rank(&mut ranked);
        self.engine.clone().run_cycle(&ranked).await;

        Ok(())
    }
}
