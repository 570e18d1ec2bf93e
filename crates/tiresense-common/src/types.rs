//! Domain types shared across the TireSense control plane

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for field devices
pub type DeviceId = String;

/// Namespace for deterministic incident ids. With a virtual clock two runs
/// over identical inputs must produce byte-identical incident streams, so
/// ids are derived from content rather than drawn at random.
pub const INCIDENT_ID_NAMESPACE: Uuid = Uuid::from_u128(0x7f1e_55a4_9c1b_4c6e_a2d3_48f0_91b7_06c5_u128);

/// Sensor channels reported by field devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Temperature,
    Humidity,
    Pressure,
    AccelX,
    AccelY,
    AccelZ,
    BatteryVoltage,
    SignalStrength,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Temperature => "temperature",
            Channel::Humidity => "humidity",
            Channel::Pressure => "pressure",
            Channel::AccelX => "accel_x",
            Channel::AccelY => "accel_y",
            Channel::AccelZ => "accel_z",
            Channel::BatteryVoltage => "battery_voltage",
            Channel::SignalStrength => "signal_strength",
        }
    }
}

/// A single timestamped measurement from one device. Immutable once accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reading {
    pub device_id: DeviceId,
    pub timestamp: DateTime<Utc>,
    /// Monotonic arrival counter assigned at ingress; breaks timestamp ties.
    pub arrival_seq: u64,
    pub channels: HashMap<Channel, f64>,
    /// Device-reported quality in [0, 1]
    pub raw_quality: f64,
}

/// Fixed feature vector a frame row is projected onto, in column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    Temperature,
    Humidity,
    Pressure,
    AccelerationMagnitude,
    BatteryVoltage,
    SignalStrength,
    Quality,
}

pub const FEATURES: [Feature; 7] = [
    Feature::Temperature,
    Feature::Humidity,
    Feature::Pressure,
    Feature::AccelerationMagnitude,
    Feature::BatteryVoltage,
    Feature::SignalStrength,
    Feature::Quality,
];

pub const FEATURE_COUNT: usize = FEATURES.len();

impl Feature {
    pub fn index(&self) -> usize {
        match self {
            Feature::Temperature => 0,
            Feature::Humidity => 1,
            Feature::Pressure => 2,
            Feature::AccelerationMagnitude => 3,
            Feature::BatteryVoltage => 4,
            Feature::SignalStrength => 5,
            Feature::Quality => 6,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Temperature => "temperature",
            Feature::Humidity => "humidity",
            Feature::Pressure => "pressure",
            Feature::AccelerationMagnitude => "acceleration_magnitude",
            Feature::BatteryVoltage => "battery_voltage",
            Feature::SignalStrength => "signal_strength",
            Feature::Quality => "quality",
        }
    }
}

/// One normalized row of a feature frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameRow {
    pub timestamp: DateTime<Utc>,
    pub values: [f64; FEATURE_COUNT],
}

impl FrameRow {
    pub fn get(&self, feature: Feature) -> f64 {
        self.values[feature.index()]
    }
}

/// A normalized, per-device sliding window of recent readings.
///
/// Rows are chronological. `raw_latest` carries the newest reading's
/// measured (pre-clip) channel values so physical-threshold rules see what
/// the sensor actually reported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFrame {
    pub device_id: DeviceId,
    pub rows: Vec<FrameRow>,
    pub raw_latest: HashMap<Channel, f64>,
    /// Completeness score in [0, 1]
    pub quality: f64,
    /// Set when normalization could not be applied cleanly; model-based
    /// scorers may refuse a degraded frame.
    pub degraded: bool,
    pub emitted_at: DateTime<Utc>,
}

impl FeatureFrame {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn latest(&self) -> Option<&FrameRow> {
        self.rows.last()
    }

    /// Chronological column of one feature
    pub fn column(&self, feature: Feature) -> Vec<f64> {
        self.rows.iter().map(|r| r.get(feature)).collect()
    }
}

/// Kind of scorer that produced a score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreKind {
    Rule,
    Statistical,
    OutlierTree,
    SequencePrediction,
}

/// Output of one scorer for one frame.
///
/// For `OutlierTree` the value is a signed decision margin (lower means more
/// anomalous); for `SequencePrediction` it is the noise-normalized
/// prediction error on the chosen channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Score {
    pub kind: ScoreKind,
    pub value: f64,
    pub confidence: f64,
    pub severity_hint: Severity,
    /// Incident kind the scorer believes it observed; fusion falls back to
    /// `SensorMalfunction` when absent.
    pub flagged_kind: Option<IncidentKind>,
    pub diagnostics: BTreeMap<String, f64>,
}

/// Incident severity, ordered from least to most severe
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
    Emergency,
}

impl Severity {
    /// Lift one level, saturating at Emergency
    pub fn lifted(self) -> Self {
        match self {
            Severity::Info => Severity::Warning,
            Severity::Warning => Severity::Error,
            Severity::Error => Severity::Critical,
            Severity::Critical | Severity::Emergency => Severity::Emergency,
        }
    }

    /// Weight used in the health score formula
    pub fn weight(&self) -> f64 {
        match self {
            Severity::Info => 0.1,
            Severity::Warning => 0.3,
            Severity::Error => 0.6,
            Severity::Critical => 0.8,
            Severity::Emergency => 1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
            Severity::Emergency => "emergency",
        }
    }
}

/// Classified incident kinds: device anomalies from the fusion stage plus
/// subsystem issues raised by health probes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    // Device anomaly kinds
    SensorMalfunction,
    TemperatureAnomaly,
    PressureAnomaly,
    BatteryDegradation,
    CommunicationIssue,
    DataQualityDrop,
    PredictiveMaintenance,
    SecurityBreach,
    // Probe-derived subsystem issues
    Unreachable,
    HighResponseTime,
    HighErrorRate,
    CrashLoop,
    WorkloadNotRunning,
    HighConnections,
    DeadlockSurge,
    SlowQueries,
    DiskPressure,
    MemoryPressure,
    CpuPressure,
    ClientSurge,
    DisconnectSurge,
    FleetOffline,
    SelfHealFailure,
}

impl IncidentKind {
    /// True for kinds produced by the device anomaly pipeline; the rest
    /// come from subsystem probes or the chaos injector.
    pub fn is_device_anomaly(&self) -> bool {
        matches!(
            self,
            IncidentKind::SensorMalfunction
                | IncidentKind::TemperatureAnomaly
                | IncidentKind::PressureAnomaly
                | IncidentKind::BatteryDegradation
                | IncidentKind::CommunicationIssue
                | IncidentKind::DataQualityDrop
                | IncidentKind::PredictiveMaintenance
                | IncidentKind::SecurityBreach
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentKind::SensorMalfunction => "sensor_malfunction",
            IncidentKind::TemperatureAnomaly => "temperature_anomaly",
            IncidentKind::PressureAnomaly => "pressure_anomaly",
            IncidentKind::BatteryDegradation => "battery_degradation",
            IncidentKind::CommunicationIssue => "communication_issue",
            IncidentKind::DataQualityDrop => "data_quality_drop",
            IncidentKind::PredictiveMaintenance => "predictive_maintenance",
            IncidentKind::SecurityBreach => "security_breach",
            IncidentKind::Unreachable => "unreachable",
            IncidentKind::HighResponseTime => "high_response_time",
            IncidentKind::HighErrorRate => "high_error_rate",
            IncidentKind::CrashLoop => "crash_loop",
            IncidentKind::WorkloadNotRunning => "workload_not_running",
            IncidentKind::HighConnections => "high_connections",
            IncidentKind::DeadlockSurge => "deadlock_surge",
            IncidentKind::SlowQueries => "slow_queries",
            IncidentKind::DiskPressure => "disk_pressure",
            IncidentKind::MemoryPressure => "memory_pressure",
            IncidentKind::CpuPressure => "cpu_pressure",
            IncidentKind::ClientSurge => "client_surge",
            IncidentKind::DisconnectSurge => "disconnect_surge",
            IncidentKind::FleetOffline => "fleet_offline",
            IncidentKind::SelfHealFailure => "self_heal_failure",
        }
    }
}

/// Actions the recovery engine can dispatch against a target
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Restart,
    ScaleUp,
    ScaleDown,
    ClearCache,
    RotateLogs,
    UpdateConfig,
    Failover,
    CircuitBreak,
    CleanupResources,
    RebalanceLoad,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Restart => "restart",
            ActionKind::ScaleUp => "scale_up",
            ActionKind::ScaleDown => "scale_down",
            ActionKind::ClearCache => "clear_cache",
            ActionKind::RotateLogs => "rotate_logs",
            ActionKind::UpdateConfig => "update_config",
            ActionKind::Failover => "failover",
            ActionKind::CircuitBreak => "circuit_break",
            ActionKind::CleanupResources => "cleanup_resources",
            ActionKind::RebalanceLoad => "rebalance_load",
        }
    }
}

/// Evidence attached to an incident: the contributing scores and a metrics
/// snapshot taken when the finding was made.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Evidence {
    pub scores: Vec<Score>,
    pub metrics: BTreeMap<String, f64>,
    /// For predictive maintenance: estimated hours until the monitored
    /// value crosses its critical threshold.
    pub hours_to_threshold: Option<f64>,
}

/// A ranked, deduplicated finding. Immutable after creation; resolution is
/// recorded separately and linked by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    /// Device id or component name
    pub subject: String,
    pub kind: IncidentKind,
    pub severity: Severity,
    pub confidence: f64,
    pub observed_at: DateTime<Utc>,
    pub description: String,
    pub evidence: Evidence,
    pub auto_recoverable: bool,
    pub recommended_actions: Vec<ActionKind>,
    pub cooldown_seconds: u64,
}

impl Incident {
    /// Deterministic id derived from subject, kind and observation time
    pub fn derive_id(subject: &str, kind: IncidentKind, observed_at: DateTime<Utc>) -> Uuid {
        let key = format!("{}|{}|{}", subject, kind.as_str(), observed_at.timestamp_millis());
        Uuid::new_v5(&INCIDENT_ID_NAMESPACE, key.as_bytes())
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds)
    }
}

/// How an incident came to be resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPath {
    ActionVerified,
    ConditionCleared,
    Archived,
}

/// Resolution record linked to an incident by id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub incident_id: Uuid,
    pub resolved_at: DateTime<Utc>,
    pub path: ResolutionPath,
}

/// Outcome of one recovery action. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryRecord {
    /// Absent for proactive actions (predictive scaling)
    pub incident_id: Option<Uuid>,
    pub action: ActionKind,
    pub target: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    pub message: String,
    pub side_effects: Vec<String>,
}

/// Per-component status derived from the active incident set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Failed,
    Unknown,
}

/// Point-in-time system health published on the event bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub taken_at: DateTime<Utc>,
    /// System score in [0, 100]
    pub score: f64,
    pub components: BTreeMap<String, ComponentStatus>,
    pub active_incidents: usize,
}

/// Workload state as reported by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadPhase {
    Running,
    Pending,
    Failed,
    Succeeded,
    Unknown,
}

/// One managed workload in the configured namespace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadInfo {
    pub name: String,
    pub phase: WorkloadPhase,
    pub desired_replicas: u32,
    pub current_replicas: u32,
    /// Cumulative container restart count
    pub restart_count: u32,
}

/// Best-effort notification payload for the external sink
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub severity: Severity,
    pub subject: String,
    pub summary: String,
    pub details: String,
}
