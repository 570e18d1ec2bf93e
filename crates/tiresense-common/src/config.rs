//! Configuration for the TireSense control plane
//!
//! One explicit record enumerates every tunable. All sections reject
//! unknown keys at load, so a typo in an operator-supplied file fails fast
//! instead of silently running with defaults.

use crate::error::{Error, Result};
use crate::types::{ActionKind, IncidentKind, Severity};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Top-level configuration record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CoreConfig {
    pub runtime: RuntimeConfig,
    pub window: WindowConfig,
    pub pipeline: PipelineConfig,
    pub fusion: FusionConfig,
    pub probes: ProbesConfig,
    pub recovery: RecoveryConfig,
    pub scaler: ScalerConfig,
    pub chaos: ChaosConfig,
    pub retention: RetentionConfig,
    pub notify: NotifyConfig,
}

/// Worker cadence and shutdown behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RuntimeConfig {
    /// Scoring tick period for the inference worker
    pub tick_period_seconds: u64,
    /// Health scan interval
    pub health_scan_interval_seconds: u64,
    /// Maintenance worker interval
    pub maintenance_interval_seconds: u64,
    /// Grace period for workers to return after cancellation
    pub drain_deadline_seconds: u64,
    /// Consecutive panics before the supervisor escalates to shutdown
    pub max_consecutive_failures: u32,
    /// Orchestrator namespace holding managed workloads
    pub namespace: String,
    pub ingest_batch_size: usize,
    /// Readings tolerated above window capacity before ingest sheds load
    pub ingest_overflow_tolerance: usize,
    pub bus_health_capacity: usize,
    pub bus_incident_capacity: usize,
    pub bus_recovery_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            tick_period_seconds: 1,
            health_scan_interval_seconds: 30,
            maintenance_interval_seconds: 3600,
            drain_deadline_seconds: 5,
            max_consecutive_failures: 3,
            namespace: "tiresense".to_string(),
            ingest_batch_size: 64,
            ingest_overflow_tolerance: 128,
            bus_health_capacity: 64,
            bus_incident_capacity: 256,
            bus_recovery_capacity: 256,
        }
    }
}

/// Per-device sliding window sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct WindowConfig {
    /// Keep at least the last K readings
    pub k: usize,
    /// ... or the last T seconds, whichever covers more
    pub t_seconds: u64,
    /// Readings required before a frame may be emitted; below this the
    /// device is in cold start and model-based scoring is skipped
    pub min_window: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        WindowConfig { k: 60, t_seconds: 3600, min_window: 5 }
    }
}

/// Linear scaler parameters for one feature
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScalerParams {
    pub mean: f64,
    pub std_dev: f64,
}

/// Feature pipeline tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PipelineConfig {
    /// Quality deducted per missing required channel
    pub missing_channel_penalty: f64,
    /// Quality deducted per clipped channel
    pub clipped_channel_penalty: f64,
    /// Per-feature normalization parameters, keyed by feature name.
    /// Features not listed pass through unscaled until a refit runs.
    pub normalization: HashMap<String, ScalerParams>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let mut normalization = HashMap::new();
        normalization.insert("temperature".to_string(), ScalerParams { mean: 25.0, std_dev: 12.0 });
        normalization.insert("humidity".to_string(), ScalerParams { mean: 50.0, std_dev: 20.0 });
        normalization.insert("pressure".to_string(), ScalerParams { mean: 1013.0, std_dev: 60.0 });
        normalization.insert(
            "acceleration_magnitude".to_string(),
            ScalerParams { mean: 1.0, std_dev: 0.8 },
        );
        normalization.insert(
            "battery_voltage".to_string(),
            ScalerParams { mean: 3.7, std_dev: 0.25 },
        );
        normalization.insert(
            "signal_strength".to_string(),
            ScalerParams { mean: -70.0, std_dev: 15.0 },
        );
        normalization.insert("quality".to_string(), ScalerParams { mean: 0.9, std_dev: 0.15 });
        PipelineConfig {
            missing_channel_penalty: 0.25,
            clipped_channel_penalty: 0.1,
            normalization,
        }
    }
}

/// Anomaly fusion tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FusionConfig {
    /// Number of agreeing scorers required to lift severity one level.
    /// Below this, agreement lifts confidence only.
    pub min_agreement_for_lift: usize,
    /// Confidence multiplier step per additional agreeing scorer
    pub agreement_confidence_step: f64,
    /// Frames below this quality lift severity one level
    pub low_quality_threshold: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        FusionConfig {
            min_agreement_for_lift: 3,
            agreement_confidence_step: 0.2,
            low_quality_threshold: 0.5,
        }
    }
}

/// Enable flag and deadline for one probe
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ProbeSettings {
    pub enabled: bool,
    pub deadline_seconds: u64,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        ProbeSettings { enabled: true, deadline_seconds: 10 }
    }
}

/// Metric thresholds feeding the probe rule tables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ProbeThresholds {
    pub service_response_time_ms: f64,
    pub service_error_rate: f64,
    pub crash_loop_restarts: u32,
    pub store_max_connections: u32,
    pub store_deadlock_delta: u64,
    pub store_disk_percent: f64,
    pub store_slow_queries: u32,
    pub cache_memory_percent: f64,
    pub cache_max_clients: u32,
    pub bus_disconnect_rate: f64,
    pub host_cpu_percent: f64,
    pub host_memory_percent: f64,
    pub host_disk_percent: f64,
    pub fleet_offline_warning: f64,
    pub fleet_offline_critical: f64,
}

impl Default for ProbeThresholds {
    fn default() -> Self {
        ProbeThresholds {
            service_response_time_ms: 2000.0,
            service_error_rate: 0.05,
            crash_loop_restarts: 5,
            store_max_connections: 180,
            store_deadlock_delta: 5,
            store_disk_percent: 85.0,
            store_slow_queries: 10,
            cache_memory_percent: 90.0,
            cache_max_clients: 1000,
            bus_disconnect_rate: 50.0,
            host_cpu_percent: 80.0,
            host_memory_percent: 85.0,
            host_disk_percent: 95.0,
            fleet_offline_warning: 0.3,
            fleet_offline_critical: 0.5,
        }
    }
}

/// Health probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ProbesConfig {
    pub service: ProbeSettings,
    pub store: ProbeSettings,
    pub cache: ProbeSettings,
    pub bus: ProbeSettings,
    pub orchestrator: ProbeSettings,
    pub host: ProbeSettings,
    pub fleet: ProbeSettings,
    /// Metrics endpoint of the HTTP service under watch
    pub service_metrics_endpoint: String,
    pub thresholds: ProbeThresholds,
}

impl Default for ProbesConfig {
    fn default() -> Self {
        ProbesConfig {
            service: ProbeSettings::default(),
            store: ProbeSettings::default(),
            cache: ProbeSettings::default(),
            bus: ProbeSettings { enabled: true, deadline_seconds: 5 },
            orchestrator: ProbeSettings::default(),
            host: ProbeSettings { enabled: true, deadline_seconds: 5 },
            fleet: ProbeSettings::default(),
            service_metrics_endpoint: "http://api-service:8000/metrics".to_string(),
            thresholds: ProbeThresholds::default(),
        }
    }
}

/// Replica bounds for one managed deployment
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplicaBounds {
    pub min_replicas: u32,
    pub max_replicas: u32,
}

impl Default for ReplicaBounds {
    fn default() -> Self {
        ReplicaBounds { min_replicas: 1, max_replicas: 10 }
    }
}

/// Recovery engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RecoveryConfig {
    /// Auto-recovery master switch; incidents are still surfaced when off
    pub enabled: bool,
    /// Per-issue cooldowns; issues not listed use `default_cooldown_seconds`
    pub cooldown_seconds: HashMap<IncidentKind, u64>,
    pub default_cooldown_seconds: u64,
    /// Per-action dispatch deadlines; actions not listed use the default
    pub action_deadline_seconds: HashMap<ActionKind, u64>,
    pub default_action_deadline_seconds: u64,
    /// Delay before re-probing a subject to verify an action took effect
    pub verification_delay_seconds: u64,
    /// Replica bounds per deployment; unlisted deployments use the default
    pub deployments: HashMap<String, ReplicaBounds>,
    pub default_replica_bounds: ReplicaBounds,
    /// In-memory recovery history ring size
    pub history_limit: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        let mut cooldown_seconds = HashMap::new();
        cooldown_seconds.insert(IncidentKind::PressureAnomaly, 600);
        cooldown_seconds.insert(IncidentKind::TemperatureAnomaly, 600);
        cooldown_seconds.insert(IncidentKind::HighResponseTime, 300);
        cooldown_seconds.insert(IncidentKind::HighErrorRate, 180);
        cooldown_seconds.insert(IncidentKind::CrashLoop, 600);
        cooldown_seconds.insert(IncidentKind::HighConnections, 300);
        cooldown_seconds.insert(IncidentKind::DeadlockSurge, 600);
        cooldown_seconds.insert(IncidentKind::DiskPressure, 900);
        cooldown_seconds.insert(IncidentKind::MemoryPressure, 600);
        cooldown_seconds.insert(IncidentKind::CpuPressure, 600);
        cooldown_seconds.insert(IncidentKind::ClientSurge, 180);
        cooldown_seconds.insert(IncidentKind::DisconnectSurge, 300);
        cooldown_seconds.insert(IncidentKind::Unreachable, 300);

        RecoveryConfig {
            enabled: true,
            cooldown_seconds,
            default_cooldown_seconds: 300,
            action_deadline_seconds: HashMap::new(),
            default_action_deadline_seconds: 30,
            verification_delay_seconds: 30,
            deployments: HashMap::new(),
            default_replica_bounds: ReplicaBounds::default(),
            history_limit: 256,
        }
    }
}

impl RecoveryConfig {
    pub fn cooldown_for(&self, kind: IncidentKind) -> Duration {
        Duration::from_secs(
            self.cooldown_seconds.get(&kind).copied().unwrap_or(self.default_cooldown_seconds),
        )
    }

    pub fn action_deadline(&self, action: ActionKind) -> Duration {
        Duration::from_secs(
            self.action_deadline_seconds
                .get(&action)
                .copied()
                .unwrap_or(self.default_action_deadline_seconds),
        )
    }

    pub fn replica_bounds(&self, deployment: &str) -> ReplicaBounds {
        self.deployments.get(deployment).copied().unwrap_or(self.default_replica_bounds)
    }
}

/// Predictive scaler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ScalerConfig {
    pub enabled: bool,
    pub scale_up_threshold: f64,
    pub scale_down_threshold: f64,
    /// Local hours during which load is assumed high
    pub peak_hours: Vec<u8>,
    /// Minimum hold between scaling events on one deployment
    pub min_hold_seconds: u64,
    pub managed_deployments: Vec<String>,
    /// Load samples retained for feature computation
    pub sample_window: usize,
}

impl Default for ScalerConfig {
    fn default() -> Self {
        ScalerConfig {
            enabled: true,
            scale_up_threshold: 0.8,
            scale_down_threshold: 0.3,
            peak_hours: vec![9, 10, 11, 14, 15, 16, 19, 20, 21],
            min_hold_seconds: 300,
            managed_deployments: vec!["api-service".to_string(), "dashboard".to_string()],
            sample_window: 32,
        }
    }
}

/// Chaos injector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ChaosConfig {
    pub enabled: bool,
    /// Local hours during which one injection may run
    pub window_hours: Vec<u8>,
    /// Wait after an injection before verifying self-healing
    pub recovery_budget_seconds: u64,
    /// Subjects never targeted by injections
    pub critical_subjects: Vec<String>,
    pub stop_workload_weight: f64,
    pub delay_probes_weight: f64,
    pub resource_pressure_weight: f64,
    /// Injected probe delay duration
    pub probe_delay_seconds: u64,
    /// RNG seed; fixed for reproducible drills
    pub seed: u64,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        ChaosConfig {
            enabled: false,
            window_hours: vec![2, 14],
            recovery_budget_seconds: 300,
            critical_subjects: vec!["postgres".to_string(), "storage".to_string()],
            stop_workload_weight: 0.5,
            delay_probes_weight: 0.3,
            resource_pressure_weight: 0.2,
            probe_delay_seconds: 3,
            seed: 42,
        }
    }
}

/// Retention for persisted incidents, recoveries and readings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RetentionConfig {
    pub days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        RetentionConfig { days: 30 }
    }
}

/// Notification sink policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct NotifyConfig {
    /// Incidents at or above this severity are pushed; the rest persist
    /// and are surfaced via query only
    pub min_severity: Severity,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        NotifyConfig { min_severity: Severity::Critical }
    }
}

impl CoreConfig {
    /// Parse from TOML, rejecting unknown keys
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: CoreConfig = toml::from_str(text)
            .map_err(|e| Error::Configuration(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-field sanity checks
    pub fn validate(&self) -> Result<()> {
        for (name, bounds) in &self.recovery.deployments {
            if bounds.min_replicas > bounds.max_replicas {
                return Err(Error::Configuration(format!(
                    "deployment {name}: min_replicas {} exceeds max_replicas {}",
                    bounds.min_replicas, bounds.max_replicas
                )));
            }
        }
        if self.recovery.default_replica_bounds.min_replicas
            > self.recovery.default_replica_bounds.max_replicas
        {
            return Err(Error::Configuration(
                "default replica bounds: min exceeds max".to_string(),
            ));
        }
        if self.scaler.scale_down_threshold >= self.scaler.scale_up_threshold {
            return Err(Error::Configuration(
                "scaler: scale_down_threshold must be below scale_up_threshold".to_string(),
            ));
        }
        if self.scaler.enabled && self.scaler.managed_deployments.is_empty() {
            return Err(Error::Configuration(
                "scaler enabled with no managed deployments".to_string(),
            ));
        }
        if let Some(hour) = self.scaler.peak_hours.iter().find(|h| **h > 23) {
            return Err(Error::Configuration(format!("scaler: invalid peak hour {hour}")));
        }
        if let Some(hour) = self.chaos.window_hours.iter().find(|h| **h > 23) {
            return Err(Error::Configuration(format!("chaos: invalid window hour {hour}")));
        }
        let chaos_weight_sum = self.chaos.stop_workload_weight
            + self.chaos.delay_probes_weight
            + self.chaos.resource_pressure_weight;
        if self.chaos.enabled && chaos_weight_sum <= 0.0 {
            return Err(Error::Configuration("chaos: weights sum to zero".to_string()));
        }
        if self.window.min_window == 0 || self.window.k == 0 {
            return Err(Error::Configuration("window: k and min_window must be positive".to_string()));
        }
        if self.window.min_window > self.window.k {
            return Err(Error::Configuration(
                "window: min_window cannot exceed k".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.fusion.low_quality_threshold) {
            return Err(Error::Configuration(
                "fusion: low_quality_threshold outside [0, 1]".to_string(),
            ));
        }
        Ok(())
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_secs(self.runtime.tick_period_seconds.max(1))
    }

    pub fn health_scan_interval(&self) -> Duration {
        Duration::from_secs(self.runtime.health_scan_interval_seconds.max(1))
    }

    pub fn drain_deadline(&self) -> Duration {
        Duration::from_secs(self.runtime.drain_deadline_seconds.max(1))
    }

    pub fn window_duration(&self) -> Duration {
        Duration::from_secs(self.window.t_seconds)
    }

    pub fn retention_cutoff(&self, now: chrono::DateTime<chrono::Utc>) -> chrono::DateTime<chrono::Utc> {
        now - chrono::Duration::days(i64::from(self.retention.days))
    }
}
