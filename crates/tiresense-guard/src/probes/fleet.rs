//! Sensor-fleet probe
//!
//! Queries the device registry for total/online/offline counts. A large
//! offline fraction is surfaced but never auto-remediated: dead sensors
//! are field hardware, not something the orchestrator can restart.

use crate::probe::{Probe, ProbeReport};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tiresense_common::capabilities::DeviceRegistry;
use tiresense_common::config::{ProbeThresholds, RecoveryConfig};
use tiresense_common::{
    ActionKind, Clock, Evidence, Incident, IncidentKind, Result, Severity,
};

/// Probe over the sensor fleet
pub struct FleetProbe {
    registry: Arc<dyn DeviceRegistry>,
    thresholds: ProbeThresholds,
    recovery: RecoveryConfig,
    clock: Arc<dyn Clock>,
}

impl FleetProbe {
    pub fn new(
        registry: Arc<dyn DeviceRegistry>,
        thresholds: ProbeThresholds,
        recovery: RecoveryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        FleetProbe { registry, thresholds, recovery, clock }
    }
}

#[async_trait]
impl Probe for FleetProbe {
    fn component(&self) -> &'static str {
        "sensor-fleet"
    }

    fn unreachable_actions(&self) -> Vec<ActionKind> {
        vec![ActionKind::Restart]
    }

    async fn check(&self) -> Result<ProbeReport> {
        let status = self.registry.fleet_status().await?;
        let offline_fraction = status.offline_fraction();

        let mut metrics = HashMap::new();
        metrics.insert("total_devices".to_string(), f64::from(status.total_devices));
        metrics.insert("online_devices".to_string(), f64::from(status.online_devices));
        metrics.insert("offline_devices".to_string(), f64::from(status.offline_devices));
        metrics.insert("offline_fraction".to_string(), offline_fraction);

        let mut incidents = Vec::new();
        if status.total_devices > 0 && offline_fraction > self.thresholds.fleet_offline_warning {
            let severity = if offline_fraction > self.thresholds.fleet_offline_critical {
                Severity::Critical
            } else {
                Severity::Warning
            };
            let now = self.clock.wall_now();
            let mut snapshot = BTreeMap::new();
            for (name, value) in &metrics {
                snapshot.insert(name.clone(), *value);
            }
            incidents.push(Incident {
                id: Incident::derive_id(self.component(), IncidentKind::FleetOffline, now),
                subject: self.component().to_string(),
                kind: IncidentKind::FleetOffline,
                severity,
                confidence: 1.0,
                observed_at: now,
                description: format!(
                    "{:.0}% of the fleet is offline ({} of {})",
                    offline_fraction * 100.0,
                    status.offline_devices,
                    status.total_devices
                ),
                evidence: Evidence { scores: Vec::new(), metrics: snapshot, hours_to_threshold: None },
                // Physical sensor outages cannot be healed from here
                auto_recoverable: false,
                recommended_actions: vec![ActionKind::Restart, ActionKind::Failover],
                cooldown_seconds: self.recovery.cooldown_for(IncidentKind::FleetOffline).as_secs(),
            });
        }

        Ok(ProbeReport { component: self.component().to_string(), metrics, incidents })
    }
}
