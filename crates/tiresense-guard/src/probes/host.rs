//! Host probe
//!
//! Samples CPU, memory and disk of the host running the core and applies
//! the resource rule table. Samples pass through the fault plane so chaos
//! pressure injections are visible to the rules.

use crate::faults::FaultPlane;
use crate::probe::{evaluate_rules, Probe, ProbeReport, ProbeRule};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tiresense_common::capabilities::HostMonitor;
use tiresense_common::config::{ProbeThresholds, RecoveryConfig};
use tiresense_common::{ActionKind, Clock, IncidentKind, Result, Severity};

fn high_cpu(metrics: &HashMap<String, f64>, t: &ProbeThresholds) -> bool {
    metrics.get("cpu_usage_percent").copied().unwrap_or(0.0) > t.host_cpu_percent
}

fn high_memory(metrics: &HashMap<String, f64>, t: &ProbeThresholds) -> bool {
    metrics.get("memory_usage_percent").copied().unwrap_or(0.0) > t.host_memory_percent
}

fn disk_critical(metrics: &HashMap<String, f64>, t: &ProbeThresholds) -> bool {
    metrics.get("disk_usage_percent").copied().unwrap_or(0.0) > t.host_disk_percent
}

const HOST_RULES: [ProbeRule; 3] = [
    ProbeRule {
        name: "high_cpu_usage",
        kind: IncidentKind::CpuPressure,
        severity: Severity::Warning,
        actions: &[ActionKind::ScaleUp],
        auto_recoverable: true,
        predicate: high_cpu,
    },
    ProbeRule {
        name: "high_memory_usage",
        kind: IncidentKind::MemoryPressure,
        severity: Severity::Warning,
        actions: &[ActionKind::CleanupResources, ActionKind::ScaleUp],
        auto_recoverable: true,
        predicate: high_memory,
    },
    ProbeRule {
        name: "disk_space_critical",
        kind: IncidentKind::DiskPressure,
        severity: Severity::Critical,
        actions: &[ActionKind::CleanupResources, ActionKind::RotateLogs],
        auto_recoverable: true,
        predicate: disk_critical,
    },
];

/// Probe over the host running the core
pub struct HostProbe {
    monitor: Arc<dyn HostMonitor>,
    faults: Arc<FaultPlane>,
    thresholds: ProbeThresholds,
    recovery: RecoveryConfig,
    clock: Arc<dyn Clock>,
}

impl HostProbe {
    pub fn new(
        monitor: Arc<dyn HostMonitor>,
        faults: Arc<FaultPlane>,
        thresholds: ProbeThresholds,
        recovery: RecoveryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        HostProbe { monitor, faults, thresholds, recovery, clock }
    }
}

#[async_trait]
impl Probe for HostProbe {
    fn component(&self) -> &'static str {
        "host"
    }

    fn unreachable_actions(&self) -> Vec<ActionKind> {
        // The host sampler is local; if it fails there is nothing to restart
        Vec::new()
    }

    async fn check(&self) -> Result<ProbeReport> {
        let sample = self.faults.overlay_host(self.monitor.sample().await?);

        let mut metrics = HashMap::new();
        metrics.insert("cpu_usage_percent".to_string(), sample.cpu_percent);
        metrics.insert("memory_usage_percent".to_string(), sample.memory_percent);
        metrics.insert("disk_usage_percent".to_string(), sample.disk_percent);

        let incidents = evaluate_rules(
            self.component(),
            &metrics,
            &HOST_RULES,
            &self.thresholds,
            &self.recovery,
            self.clock.wall_now(),
        );
        Ok(ProbeReport { component: self.component().to_string(), metrics, incidents })
    }
}
