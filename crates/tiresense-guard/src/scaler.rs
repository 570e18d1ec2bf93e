//! Predictive scaler
//!
//! Keeps a short time-series of load metrics, asks a regression model for
//! predicted load in [0, 1], and proactively resizes managed deployments.
//! Scaling shares the cooldown ledger's per-deployment hold key with the
//! recovery engine, so predictive and reactive scaling cannot fight.

use chrono::Timelike;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tiresense_common::capabilities::{LoadPredictor, Orchestrator};
use tiresense_common::config::{RecoveryConfig, ScalerConfig};
use tiresense_common::{
    ActionKind, Clock, CooldownKey, CooldownLedger, RecoveryRecord, Result,
};
use tracing::{debug, info, warn};

/// One observation of system load
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadSample {
    pub response_time_ms: f64,
    pub request_rate: f64,
    pub error_rate: f64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

/// Direction decided for one deployment on one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScaleDirection {
    Up,
    Down,
    Hold,
}

/// The predictive scaler
pub struct PredictiveScaler {
    cfg: ScalerConfig,
    recovery: RecoveryConfig,
    namespace: String,
    clock: Arc<dyn Clock>,
    ledger: Arc<CooldownLedger>,
    orchestrator: Arc<dyn Orchestrator>,
    predictor: Arc<dyn LoadPredictor>,
    samples: Mutex<VecDeque<LoadSample>>,
}

impl PredictiveScaler {
    pub fn new(
        cfg: ScalerConfig,
        recovery: RecoveryConfig,
        namespace: String,
        clock: Arc<dyn Clock>,
        ledger: Arc<CooldownLedger>,
        orchestrator: Arc<dyn Orchestrator>,
        predictor: Arc<dyn LoadPredictor>,
    ) -> Self {
        PredictiveScaler {
            cfg,
            recovery,
            namespace,
            clock,
            ledger,
            orchestrator,
            predictor,
            samples: Mutex::new(VecDeque::new()),
        }
    }

    /// Feed one load observation
    pub fn record_sample(&self, sample: LoadSample) {
        let mut samples = self.samples.lock();
        samples.push_back(sample);
        while samples.len() > self.cfg.sample_window.max(1) {
            samples.pop_front();
        }
    }

    /// Feature vector over the retained window: mean of each load metric
    fn features(&self) -> Option<Vec<f64>> {
        let samples = self.samples.lock();
        if samples.is_empty() {
            return None;
        }
        let n = samples.len() as f64;
        let mut sums = [0.0f64; 5];
        for s in samples.iter() {
            sums[0] += s.response_time_ms;
            sums[1] += s.request_rate;
            sums[2] += s.error_rate;
            sums[3] += s.cpu_percent;
            sums[4] += s.memory_percent;
        }
        Some(sums.iter().map(|sum| sum / n).collect())
    }

    fn decide(&self, predicted: f64, peak_hour: bool) -> ScaleDirection {
        if predicted > self.cfg.scale_up_threshold || peak_hour {
            ScaleDirection::Up
        } else if predicted < self.cfg.scale_down_threshold && !peak_hour {
            ScaleDirection::Down
        } else {
            ScaleDirection::Hold
        }
    }

    /// One scaler tick: predict, then resize each managed deployment by at
    /// most one replica, bounded and hold-gated.
    pub async fn tick(&self) -> Result<Vec<RecoveryRecord>> {
        if !self.cfg.enabled {
            return Ok(Vec::new());
        }
        let Some(features) = self.features() else {
            debug!("no load samples yet, scaler idle");
            return Ok(Vec::new());
        };

        let predicted = self.predictor.predict(&features)?.clamp(0.0, 1.0);
        let hour = self.clock.wall_now().hour() as u8;
        let peak_hour = self.cfg.peak_hours.contains(&hour);
        let direction = self.decide(predicted, peak_hour);
        debug!(predicted, hour, peak_hour, ?direction, "scaler decision");

        if direction == ScaleDirection::Hold {
            return Ok(Vec::new());
        }

        let workloads = self.orchestrator.list_workloads(&self.namespace).await?;
        let mut records = Vec::new();

        for deployment in &self.cfg.managed_deployments {
            let Some(workload) = workloads.iter().find(|w| &w.name == deployment) else {
                warn!(deployment = %deployment, "managed deployment not found");
                continue;
            };
            let bounds = self.recovery.replica_bounds(deployment);
            let current = workload.current_replicas;
            let (action, desired) = match direction {
                ScaleDirection::Up => (ActionKind::ScaleUp, current.saturating_add(1)),
                ScaleDirection::Down => (ActionKind::ScaleDown, current.saturating_sub(1)),
                ScaleDirection::Hold => unreachable!(),
            };
            if desired < bounds.min_replicas || desired > bounds.max_replicas || desired == current {
                debug!(deployment = %deployment, current, "replica bound reached");
                continue;
            }

            // Same hold key the recovery engine claims for reactive scaling
            let hold_key = CooldownKey::new(deployment.clone(), "scale");
            let min_hold = Duration::from_secs(self.cfg.min_hold_seconds);
            if !self.ledger.check_and_claim(&hold_key, min_hold) {
                debug!(deployment = %deployment, "scale hold active, skipping");
                continue;
            }

            let started_at = self.clock.wall_now();
            let t0 = self.clock.now();
            let outcome = self.orchestrator.scale_workload(deployment, desired).await;
            let duration_ms = self.clock.now().saturating_sub(t0).as_millis() as u64;

            let record = match outcome {
                Ok(()) => {
                    info!(
                        deployment = %deployment,
                        predicted,
                        "proactive scale {} -> {}",
                        current,
                        desired
                    );
                    RecoveryRecord {
                        incident_id: None,
                        action,
                        target: deployment.clone(),
                        started_at,
                        duration_ms,
                        success: true,
                        message: format!(
                            "predicted load {predicted:.2}: scaled {deployment} from {current} to {desired}"
                        ),
                        side_effects: vec![format!("replicas {current} -> {desired}")],
                    }
                }
                Err(e) => {
                    warn!(deployment = %deployment, error = %e, "proactive scaling failed");
                    RecoveryRecord {
                        incident_id: None,
                        action,
                        target: deployment.clone(),
                        started_at,
                        duration_ms,
                        success: false,
                        message: e.to_string(),
                        side_effects: Vec::new(),
                    }
                }
            };
            records.push(record);
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tiresense_common::{VirtualClock, WorkloadInfo, WorkloadPhase};

    struct FakeOrchestrator {
        replicas: Mutex<u32>,
    }

    #[async_trait]
    impl Orchestrator for FakeOrchestrator {
        async fn list_workloads(&self, _namespace: &str) -> Result<Vec<WorkloadInfo>> {
            let current = *self.replicas.lock();
            Ok(vec![WorkloadInfo {
                name: "api-service".to_string(),
                phase: WorkloadPhase::Running,
                desired_replicas: current,
                current_replicas: current,
                restart_count: 0,
            }])
        }
        async fn restart_workload(&self, _name: &str) -> Result<()> {
            Ok(())
        }
        async fn scale_workload(&self, _name: &str, desired: u32) -> Result<()> {
            *self.replicas.lock() = desired;
            Ok(())
        }
        async fn delete_instance(&self, _name: &str) -> Result<()> {
            Ok(())
        }
    }

    struct FixedPredictor(f64);

    impl LoadPredictor for FixedPredictor {
        fn predict(&self, _features: &[f64]) -> Result<f64> {
            Ok(self.0)
        }
    }

    struct Rig {
        clock: Arc<VirtualClock>,
        orchestrator: Arc<FakeOrchestrator>,
        scaler: PredictiveScaler,
    }

    fn rig(predicted: f64, replicas: u32) -> Rig {
        let clock = Arc::new(VirtualClock::new());
        // 03:00 local: outside the default peak-hour set
        clock.set_wall(chrono::Utc.with_ymd_and_hms(2024, 6, 1, 3, 0, 0).unwrap());
        let ledger = Arc::new(CooldownLedger::new(clock.clone()));
        let orchestrator = Arc::new(FakeOrchestrator { replicas: Mutex::new(replicas) });
        let mut recovery = RecoveryConfig::default();
        recovery.deployments.insert(
            "api-service".to_string(),
            tiresense_common::config::ReplicaBounds { min_replicas: 2, max_replicas: 5 },
        );
        let cfg = ScalerConfig {
            managed_deployments: vec!["api-service".to_string()],
            ..ScalerConfig::default()
        };
        let scaler = PredictiveScaler::new(
            cfg,
            recovery,
            "tiresense".to_string(),
            clock.clone(),
            ledger,
            orchestrator.clone(),
            Arc::new(FixedPredictor(predicted)),
        );
        scaler.record_sample(LoadSample {
            response_time_ms: 120.0,
            request_rate: 300.0,
            error_rate: 0.01,
            cpu_percent: 60.0,
            memory_percent: 50.0,
        });
        Rig { clock, orchestrator, scaler }
    }

    use chrono::TimeZone;

    #[tokio::test]
    async fn high_prediction_scales_up_once_per_hold() {
        let rig = rig(0.85, 2);
        let records = rig.scaler.tick().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, ActionKind::ScaleUp);
        assert_eq!(*rig.orchestrator.replicas.lock(), 3);

        // Next tick within the hold: no further scaling
        let records = rig.scaler.tick().await.unwrap();
        assert!(records.is_empty());
        assert_eq!(*rig.orchestrator.replicas.lock(), 3);

        // Beyond the hold with the prediction persisting: one more step
        rig.clock.advance(Duration::from_secs(301));
        let records = rig.scaler.tick().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(*rig.orchestrator.replicas.lock(), 4);
    }

    #[tokio::test]
    async fn scale_up_respects_the_replica_ceiling() {
        let rig = rig(0.95, 5);
        let records = rig.scaler.tick().await.unwrap();
        assert!(records.is_empty());
        assert_eq!(*rig.orchestrator.replicas.lock(), 5);
    }

    #[tokio::test]
    async fn low_prediction_off_peak_scales_down_to_the_floor() {
        let rig = rig(0.1, 3);
        let records = rig.scaler.tick().await.unwrap();
        assert_eq!(records[0].action, ActionKind::ScaleDown);
        assert_eq!(*rig.orchestrator.replicas.lock(), 2);

        // At the floor: nothing further even after the hold
        rig.clock.advance(Duration::from_secs(301));
        assert!(rig.scaler.tick().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn peak_hours_block_scale_down_and_force_up() {
        let rig = rig(0.1, 3);
        // 09:00 is in the default peak-hour set
        rig.clock.set_wall(chrono::Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap());
        let records = rig.scaler.tick().await.unwrap();
        assert_eq!(records[0].action, ActionKind::ScaleUp);
        assert_eq!(*rig.orchestrator.replicas.lock(), 4);
    }

    #[tokio::test]
    async fn middling_prediction_holds() {
        let rig = rig(0.5, 3);
        assert!(rig.scaler.tick().await.unwrap().is_empty());
        assert_eq!(*rig.orchestrator.replicas.lock(), 3);
    }

    #[tokio::test]
    async fn no_samples_means_no_decision() {
        let clock = Arc::new(VirtualClock::new());
        let ledger = Arc::new(CooldownLedger::new(clock.clone()));
        let scaler = PredictiveScaler::new(
            ScalerConfig::default(),
            RecoveryConfig::default(),
            "tiresense".to_string(),
            clock,
            ledger,
            Arc::new(FakeOrchestrator { replicas: Mutex::new(2) }),
            Arc::new(FixedPredictor(0.99)),
        );
        assert!(scaler.tick().await.unwrap().is_empty());
    }
}
