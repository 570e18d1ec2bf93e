//! Health scanner
//!
//! Runs every enabled probe concurrently, each raced against its own
//! deadline. A probe that errors or misses its deadline yields a Critical
//! `unreachable` incident for its component instead of failing the scan.

use crate::faults::FaultPlane;
use crate::probe::{unreachable_incident, Probe, ProbeReport};
use crate::recovery::{ConditionChecker, ConditionStatus};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tiresense_common::config::{ProbeSettings, RecoveryConfig};
use tiresense_common::{Clock, IncidentKind, Result};
use tracing::{debug, warn};

struct ScanEntry {
    probe: Arc<dyn Probe>,
    deadline: Duration,
}

/// Concurrent, deadline-bounded probe runner
pub struct HealthScanner {
    entries: Vec<ScanEntry>,
    recovery: RecoveryConfig,
    faults: Arc<FaultPlane>,
    clock: Arc<dyn Clock>,
}

impl HealthScanner {
    pub fn new(clock: Arc<dyn Clock>, faults: Arc<FaultPlane>, recovery: RecoveryConfig) -> Self {
        HealthScanner { entries: Vec::new(), recovery, faults, clock }
    }

    /// Register a probe; disabled probes are skipped entirely
    pub fn register(&mut self, probe: Arc<dyn Probe>, settings: &ProbeSettings) {
        if !settings.enabled {
            debug!(component = probe.component(), "probe disabled, not registered");
            return;
        }
        self.entries.push(ScanEntry {
            probe,
            deadline: Duration::from_secs(settings.deadline_seconds.max(1)),
        });
    }

    /// Components covered by registered probes
    pub fn components(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.probe.component()).collect()
    }

    /// Run all probes concurrently and collect their reports
    pub async fn scan_all(&self) -> Vec<ProbeReport> {
        let runs = self.entries.iter().map(|entry| self.run_probe(entry));
        futures::future::join_all(runs).await
    }

    /// Re-run only the probe covering one component
    pub async fn scan_component(&self, component: &str) -> Option<ProbeReport> {
        let entry = self.entries.iter().find(|e| e.probe.component() == component)?;
        Some(self.run_probe(entry).await)
    }

    async fn run_probe(&self, entry: &ScanEntry) -> ProbeReport {
        let component = entry.probe.component();

        let check = async {
            // Chaos may be delaying probes; the delay eats into the deadline
            if let Some(delay) = self.faults.probe_delay() {
                self.clock.sleep(delay).await;
            }
            entry.probe.check().await
        };

        let outcome: Result<ProbeReport> = tokio::select! {
            result = check => result,
            _ = self.clock.sleep(entry.deadline) => {
                Err(tiresense_common::Error::Timeout(format!(
                    "probe deadline of {:?} elapsed", entry.deadline
                )))
            }
        };

        match outcome {
            Ok(report) => report,
            Err(e) => {
                warn!(component, error = %e, "probe failed");
                let incident = unreachable_incident(
                    component,
                    &e.to_string(),
                    entry.probe.unreachable_actions(),
                    &self.recovery,
                    self.clock.wall_now(),
                );
                ProbeReport {
                    component: component.to_string(),
                    metrics: HashMap::new(),
                    incidents: vec![incident],
                }
            }
        }
    }
}

#[async_trait]
impl ConditionChecker for HealthScanner {
    /// Re-probe to decide whether a condition still holds. Component
    /// subjects get a definitive answer; subjects no probe covers (device
    /// ids, workload names cleared from reports) come back `Unknown` and
    /// are left to scan-cycle resolution.
    async fn condition(&self, subject: &str, kind: IncidentKind) -> ConditionStatus {
        if let Some(report) = self.scan_component(subject).await {
            return if report.incidents.iter().any(|i| i.kind == kind) {
                ConditionStatus::Present
            } else {
                ConditionStatus::Absent
            };
        }

        // Not a probe component; look for the subject across a full scan
        let reports = self.scan_all().await;
        let seen = reports
            .iter()
            .flat_map(|r| r.incidents.iter())
            .any(|i| i.subject == subject && i.kind == kind);
        if seen {
            ConditionStatus::Present
        } else {
            ConditionStatus::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiresense_common::{ActionKind, Severity, VirtualClock};

    struct SlowProbe {
        clock: Arc<VirtualClock>,
        delay: Duration,
    }

    #[async_trait]
    impl Probe for SlowProbe {
        fn component(&self) -> &'static str {
            "orchestrator"
        }
        fn unreachable_actions(&self) -> Vec<ActionKind> {
            Vec::new()
        }
        async fn check(&self) -> Result<ProbeReport> {
            self.clock.sleep(self.delay).await;
            Ok(ProbeReport::healthy("orchestrator", HashMap::new()))
        }
    }

    struct InstantProbe;

    #[async_trait]
    impl Probe for InstantProbe {
        fn component(&self) -> &'static str {
            "cache"
        }
        async fn check(&self) -> Result<ProbeReport> {
            Ok(ProbeReport::healthy("cache", HashMap::new()))
        }
    }

    #[tokio::test]
    async fn probe_past_its_deadline_becomes_critical_unreachable() {
        let clock = Arc::new(VirtualClock::new());
        let faults = Arc::new(FaultPlane::new(clock.clone()));
        let mut scanner = HealthScanner::new(clock.clone(), faults, RecoveryConfig::default());
        scanner.register(
            Arc::new(SlowProbe { clock: clock.clone(), delay: Duration::from_secs(5) }),
            &ProbeSettings { enabled: true, deadline_seconds: 2 },
        );

        let scan = tokio::spawn({
            let scanner = Arc::new(scanner);
            async move { scanner.scan_all().await }
        });
        // The probe would answer at t+5s, but its deadline is t+2s
        tokio::task::yield_now().await;
        clock.advance(Duration::from_secs(2));
        let reports = scan.await.unwrap();

        assert_eq!(reports.len(), 1);
        let incident = &reports[0].incidents[0];
        assert_eq!(incident.kind, IncidentKind::Unreachable);
        assert_eq!(incident.severity, Severity::Critical);
        assert_eq!(incident.subject, "orchestrator");
        // No applicable action for an unreachable orchestrator
        assert!(incident.recommended_actions.is_empty());
        assert!(!incident.auto_recoverable);
    }

    #[tokio::test]
    async fn fast_probe_passes_within_deadline() {
        let clock = Arc::new(VirtualClock::new());
        let faults = Arc::new(FaultPlane::new(clock.clone()));
        let mut scanner = HealthScanner::new(clock, faults, RecoveryConfig::default());
        scanner.register(Arc::new(InstantProbe), &ProbeSettings::default());

        let reports = scanner.scan_all().await;
        assert_eq!(reports.len(), 1);
        assert!(reports[0].incidents.is_empty());
    }

    #[tokio::test]
    async fn disabled_probes_are_not_registered() {
        let clock = Arc::new(VirtualClock::new());
        let faults = Arc::new(FaultPlane::new(clock.clone()));
        let mut scanner = HealthScanner::new(clock, faults, RecoveryConfig::default());
        scanner.register(
            Arc::new(InstantProbe),
            &ProbeSettings { enabled: false, deadline_seconds: 5 },
        );
        assert!(scanner.components().is_empty());
    }

    #[tokio::test]
    async fn injected_delay_pushes_a_probe_past_its_deadline() {
        let clock = Arc::new(VirtualClock::new());
        let faults = Arc::new(FaultPlane::new(clock.clone()));
        faults.inject_probe_delay(Duration::from_secs(10), Duration::from_secs(60));
        let mut scanner = HealthScanner::new(clock.clone(), faults, RecoveryConfig::default());
        scanner.register(Arc::new(InstantProbe), &ProbeSettings { enabled: true, deadline_seconds: 3 });

        let scan = tokio::spawn({
            let scanner = Arc::new(scanner);
            async move { scanner.scan_all().await }
        });
        tokio::task::yield_now().await;
        clock.advance(Duration::from_secs(3));
        let reports = scan.await.unwrap();
        assert_eq!(reports[0].incidents[0].kind, IncidentKind::Unreachable);
    }
}
