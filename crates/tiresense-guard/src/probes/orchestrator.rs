//! Orchestrator probe
//!
//! Enumerates managed workloads in the configured namespace, reporting
//! phase and cumulative restart counts. An unreachable orchestrator has no
//! remediation path through itself, so the probe offers no recovery
//! actions for that case.

use crate::probe::{Probe, ProbeReport};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tiresense_common::capabilities::Orchestrator;
use tiresense_common::config::{ProbeThresholds, RecoveryConfig};
use tiresense_common::{
    ActionKind, Clock, Evidence, Incident, IncidentKind, Result, Severity, WorkloadInfo,
    WorkloadPhase,
};

/// Probe over the workload orchestrator
pub struct OrchestratorProbe {
    orchestrator: Arc<dyn Orchestrator>,
    namespace: String,
    thresholds: ProbeThresholds,
    recovery: RecoveryConfig,
    clock: Arc<dyn Clock>,
}

impl OrchestratorProbe {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        namespace: String,
        thresholds: ProbeThresholds,
        recovery: RecoveryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        OrchestratorProbe { orchestrator, namespace, thresholds, recovery, clock }
    }

    fn workload_incidents(&self, workload: &WorkloadInfo, now: DateTime<Utc>) -> Vec<Incident> {
        let mut incidents = Vec::new();
        let mut metrics = BTreeMap::new();
        metrics.insert("desired_replicas".to_string(), f64::from(workload.desired_replicas));
        metrics.insert("current_replicas".to_string(), f64::from(workload.current_replicas));
        metrics.insert("restart_count".to_string(), f64::from(workload.restart_count));

        if workload.phase != WorkloadPhase::Running {
            incidents.push(Incident {
                id: Incident::derive_id(&workload.name, IncidentKind::WorkloadNotRunning, now),
                subject: workload.name.clone(),
                kind: IncidentKind::WorkloadNotRunning,
                severity: Severity::Error,
                confidence: 1.0,
                observed_at: now,
                description: format!("workload {} not running ({:?})", workload.name, workload.phase),
                evidence: Evidence { scores: Vec::new(), metrics: metrics.clone(), hours_to_threshold: None },
                auto_recoverable: true,
                recommended_actions: vec![ActionKind::Restart],
                cooldown_seconds: self.recovery.cooldown_for(IncidentKind::WorkloadNotRunning).as_secs(),
            });
        }

        if workload.restart_count > self.thresholds.crash_loop_restarts {
            incidents.push(Incident {
                id: Incident::derive_id(&workload.name, IncidentKind::CrashLoop, now),
                subject: workload.name.clone(),
                kind: IncidentKind::CrashLoop,
                severity: Severity::Critical,
                confidence: 1.0,
                observed_at: now,
                description: format!(
                    "workload {} restarted {} times",
                    workload.name, workload.restart_count
                ),
                evidence: Evidence { scores: Vec::new(), metrics, hours_to_threshold: None },
                auto_recoverable: true,
                recommended_actions: vec![ActionKind::ScaleUp, ActionKind::UpdateConfig],
                cooldown_seconds: self.recovery.cooldown_for(IncidentKind::CrashLoop).as_secs(),
            });
        }

        incidents
    }
}

#[async_trait]
impl Probe for OrchestratorProbe {
    fn component(&self) -> &'static str {
        "orchestrator"
    }

    /// No applicable action when the orchestrator itself is down
    fn unreachable_actions(&self) -> Vec<ActionKind> {
        Vec::new()
    }

    async fn check(&self) -> Result<ProbeReport> {
        let workloads = self.orchestrator.list_workloads(&self.namespace).await?;
        let now = self.clock.wall_now();

        let mut metrics = HashMap::new();
        metrics.insert("workload_count".to_string(), workloads.len() as f64);
        let running = workloads.iter().filter(|w| w.phase == WorkloadPhase::Running).count();
        metrics.insert("running_count".to_string(), running as f64);
        let restarts: u32 = workloads.iter().map(|w| w.restart_count).sum();
        metrics.insert("total_restarts".to_string(), f64::from(restarts));

        let incidents = workloads
            .iter()
            .flat_map(|w| self.workload_incidents(w, now))
            .collect();

        Ok(ProbeReport { component: self.component().to_string(), metrics, incidents })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiresense_common::VirtualClock;

    struct FakeOrchestrator {
        workloads: Vec<WorkloadInfo>,
    }

    #[async_trait]
    impl Orchestrator for FakeOrchestrator {
        async fn list_workloads(&self, _namespace: &str) -> Result<Vec<WorkloadInfo>> {
            Ok(self.workloads.clone())
        }
        async fn restart_workload(&self, _name: &str) -> Result<()> {
            Ok(())
        }
        async fn scale_workload(&self, _name: &str, _desired: u32) -> Result<()> {
            Ok(())
        }
        async fn delete_instance(&self, _name: &str) -> Result<()> {
            Ok(())
        }
    }

    fn workload(name: &str, phase: WorkloadPhase, restarts: u32) -> WorkloadInfo {
        WorkloadInfo {
            name: name.to_string(),
            phase,
            desired_replicas: 2,
            current_replicas: 2,
            restart_count: restarts,
        }
    }

    fn probe(workloads: Vec<WorkloadInfo>) -> OrchestratorProbe {
        OrchestratorProbe::new(
            Arc::new(FakeOrchestrator { workloads }),
            "tiresense".to_string(),
            ProbeThresholds::default(),
            RecoveryConfig::default(),
            Arc::new(VirtualClock::new()),
        )
    }

    #[tokio::test]
    async fn running_workloads_raise_nothing() {
        let report = probe(vec![workload("api-service", WorkloadPhase::Running, 1)])
            .check()
            .await
            .unwrap();
        assert!(report.incidents.is_empty());
        assert_eq!(report.metrics["running_count"], 1.0);
    }

    #[tokio::test]
    async fn stuck_workload_requests_restart() {
        let report = probe(vec![workload("ingest", WorkloadPhase::Pending, 0)])
            .check()
            .await
            .unwrap();
        let incident = &report.incidents[0];
        assert_eq!(incident.kind, IncidentKind::WorkloadNotRunning);
        assert_eq!(incident.subject, "ingest");
        assert_eq!(incident.recommended_actions, vec![ActionKind::Restart]);
    }

    #[tokio::test]
    async fn crash_looping_workload_scales_up_before_config_change() {
        let report = probe(vec![workload("api-service", WorkloadPhase::Running, 9)])
            .check()
            .await
            .unwrap();
        let incident = &report.incidents[0];
        assert_eq!(incident.kind, IncidentKind::CrashLoop);
        assert_eq!(incident.severity, Severity::Critical);
        assert_eq!(
            incident.recommended_actions,
            vec![ActionKind::ScaleUp, ActionKind::UpdateConfig]
        );
    }

    #[test]
    fn probe_offers_no_actions_when_orchestrator_is_down() {
        let probe = probe(Vec::new());
        assert!(probe.unreachable_actions().is_empty());
    }
}
