//! Chaos injector
//!
//! Inside configured time windows the injector applies one weighted fault
//! (stop a workload, delay probes, simulate resource pressure), waits out
//! a recovery budget, then runs a full health scan to check that the
//! system healed itself. A failed verification raises an Emergency
//! incident and disables chaos for the rest of the day.

use crate::faults::FaultPlane;
use crate::incidents::IncidentRegistry;
use crate::notify::NotificationHub;
use crate::scan::HealthScanner;
use chrono::{NaiveDate, Timelike};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tiresense_common::capabilities::{HostSample, Orchestrator};
use tiresense_common::config::ChaosConfig;
use tiresense_common::{
    Clock, Evidence, Incident, IncidentKind, Result, Severity, WorkloadPhase,
};
use tracing::{info, warn};

/// One applied fault
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Injection {
    StopWorkload(String),
    DelayProbes(Duration),
    ResourcePressure,
}

/// Result of one chaos cycle
#[derive(Debug, Clone)]
pub struct ChaosOutcome {
    pub injection: Injection,
    pub healed: bool,
}

/// The chaos injector
pub struct ChaosInjector {
    cfg: ChaosConfig,
    namespace: String,
    clock: Arc<dyn Clock>,
    rng: Mutex<StdRng>,
    orchestrator: Arc<dyn Orchestrator>,
    faults: Arc<FaultPlane>,
    /// Day chaos was disabled by a failed verification
    disabled_on: Mutex<Option<NaiveDate>>,
    /// Last `(day, hour)` an injection ran; one injection per window
    last_window: Mutex<Option<(NaiveDate, u8)>>,
}

impl ChaosInjector {
    pub fn new(
        cfg: ChaosConfig,
        namespace: String,
        clock: Arc<dyn Clock>,
        orchestrator: Arc<dyn Orchestrator>,
        faults: Arc<FaultPlane>,
    ) -> Self {
        let seed = cfg.seed;
        ChaosInjector {
            cfg,
            namespace,
            clock,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            orchestrator,
            faults,
            disabled_on: Mutex::new(None),
            last_window: Mutex::new(None),
        }
    }

    /// Whether an injection may run right now
    pub fn window_open(&self) -> bool {
        if !self.cfg.enabled {
            return false;
        }
        let now = self.clock.wall_now();
        let today = now.date_naive();
        let hour = now.hour() as u8;

        if !self.cfg.window_hours.contains(&hour) {
            return false;
        }
        if *self.disabled_on.lock() == Some(today) {
            return false;
        }
        *self.last_window.lock() != Some((today, hour))
    }

    /// Run one chaos cycle if a window is open. Applies the fault, waits
    /// the recovery budget, scans, and records whether the system healed.
    pub async fn run_cycle(
        &self,
        scanner: &HealthScanner,
        registry: &IncidentRegistry,
        notifications: &NotificationHub,
    ) -> Result<Option<ChaosOutcome>> {
        if !self.window_open() {
            return Ok(None);
        }
        let now = self.clock.wall_now();
        *self.last_window.lock() = Some((now.date_naive(), now.hour() as u8));

        let injection = self.pick_injection().await?;
        info!(?injection, "chaos injection starting");
        self.apply(&injection).await?;

        self.clock
            .sleep(Duration::from_secs(self.cfg.recovery_budget_seconds))
            .await;

        // Full health scan after the budget; unhealed Critical-or-worse
        // conditions mean the self-healing loop failed the drill.
        let reports = scanner.scan_all().await;
        let healed = !reports
            .iter()
            .flat_map(|r| r.incidents.iter())
            .any(|i| i.severity >= Severity::Critical);

        if healed {
            info!(?injection, "chaos verification passed");
        } else {
            warn!(?injection, "system did not self-heal within the recovery budget");
            let incident = self.failure_incident(&injection);
            registry.upsert(&incident);
            notifications.incident(&incident);
            *self.disabled_on.lock() = Some(self.clock.wall_now().date_naive());
        }

        Ok(Some(ChaosOutcome { injection, healed }))
    }

    async fn pick_injection(&self) -> Result<Injection> {
        let total = self.cfg.stop_workload_weight
            + self.cfg.delay_probes_weight
            + self.cfg.resource_pressure_weight;
        let roll = {
            let mut rng = self.rng.lock();
            rng.gen_range(0.0..total.max(f64::MIN_POSITIVE))
        };

        if roll < self.cfg.stop_workload_weight {
            if let Some(target) = self.pick_workload().await? {
                return Ok(Injection::StopWorkload(target));
            }
            // No eligible workload: degrade to a harmless probe delay
            return Ok(Injection::DelayProbes(Duration::from_secs(self.cfg.probe_delay_seconds)));
        }
        if roll < self.cfg.stop_workload_weight + self.cfg.delay_probes_weight {
            return Ok(Injection::DelayProbes(Duration::from_secs(self.cfg.probe_delay_seconds)));
        }
        Ok(Injection::ResourcePressure)
    }

    /// Random running workload outside the critical-subject list
    async fn pick_workload(&self) -> Result<Option<String>> {
        let workloads = self.orchestrator.list_workloads(&self.namespace).await?;
        let candidates: Vec<String> = workloads
            .into_iter()
            .filter(|w| w.phase == WorkloadPhase::Running)
            .filter(|w| !self.cfg.critical_subjects.iter().any(|c| w.name.contains(c.as_str())))
            .map(|w| w.name)
            .collect();
        if candidates.is_empty() {
            return Ok(None);
        }
        let index = self.rng.lock().gen_range(0..candidates.len());
        Ok(Some(candidates[index].clone()))
    }

    async fn apply(&self, injection: &Injection) -> Result<()> {
        let budget = Duration::from_secs(self.cfg.recovery_budget_seconds);
        match injection {
            Injection::StopWorkload(target) => {
                self.orchestrator.delete_instance(target).await?;
            }
            Injection::DelayProbes(delay) => {
                self.faults.inject_probe_delay(*delay, budget);
            }
            Injection::ResourcePressure => {
                self.faults.inject_pressure(
                    HostSample { cpu_percent: 35.0, memory_percent: 25.0, disk_percent: 0.0 },
                    budget,
                );
            }
        }
        Ok(())
    }

    fn failure_incident(&self, injection: &Injection) -> Incident {
        let now = self.clock.wall_now();
        Incident {
            id: Incident::derive_id("chaos", IncidentKind::SelfHealFailure, now),
            subject: "chaos".to_string(),
            kind: IncidentKind::SelfHealFailure,
            severity: Severity::Emergency,
            confidence: 1.0,
            observed_at: now,
            description: format!(
                "self-healing verification failed after injection {injection:?}"
            ),
            evidence: Evidence::default(),
            auto_recoverable: false,
            recommended_actions: Vec::new(),
            cooldown_seconds: 86_400,
        }
    }

    /// Manually disable chaos for the rest of today
    pub fn disable_for_today(&self) {
        *self.disabled_on.lock() = Some(self.clock.wall_now().date_naive());
    }
}
