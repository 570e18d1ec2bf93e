//! Statistical scorer: EWMA z-scores and short linear trends
//!
//! Maintains per-device exponentially weighted mean and variance on
//! selected features and flags observations past the 3-sigma band. On top
//! of that it fits a short least-squares trend on battery voltage and on
//! frame quality, raising predictive-maintenance findings when either
//! degrades with sufficient correlation.

use crate::scorer::Scorer;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tiresense_common::{
    Channel, DeviceId, Feature, FeatureFrame, IncidentKind, Result, Score, ScoreKind, Severity,
};
use tracing::trace;

const WATCHED: [(Feature, IncidentKind); 5] = [
    (Feature::Temperature, IncidentKind::TemperatureAnomaly),
    (Feature::Pressure, IncidentKind::PressureAnomaly),
    (Feature::BatteryVoltage, IncidentKind::BatteryDegradation),
    (Feature::SignalStrength, IncidentKind::CommunicationIssue),
    (Feature::Quality, IncidentKind::DataQualityDrop),
];

/// Battery voltage below this is considered depleted
const BATTERY_CRITICAL_VOLTS: f64 = 3.0;
/// Trend findings are raised only inside this horizon
const TREND_HORIZON_HOURS: f64 = 168.0;
/// Hours-to-threshold below this escalates the finding
const TREND_URGENT_HOURS: f64 = 12.0;

#[derive(Debug, Clone, Copy)]
struct Ewma {
    mean: f64,
    variance: f64,
    samples: u64,
}

impl Ewma {
    fn new(initial: f64) -> Self {
        Ewma { mean: initial, variance: 1.0, samples: 1 }
    }

    /// z-score of `value` against the current baseline, then fold it in
    fn observe(&mut self, value: f64, alpha: f64) -> f64 {
        let std_dev = self.variance.sqrt().max(1e-6);
        let z = (value - self.mean) / std_dev;
        let diff = value - self.mean;
        let incr = alpha * diff;
        self.mean += incr;
        self.variance = (1.0 - alpha) * (self.variance + diff * incr);
        self.samples += 1;
        z
    }
}

#[derive(Debug, Default)]
struct DeviceStats {
    ewma: HashMap<usize, Ewma>,
    battery_history: VecDeque<f64>,
    quality_history: VecDeque<f64>,
    last_seen: Option<chrono::DateTime<chrono::Utc>>,
}

/// Least-squares fit over sample index; returns `(slope, correlation)`
fn linear_trend(series: &[f64]) -> Option<(f64, f64)> {
    let n = series.len();
    if n < 3 {
        return None;
    }
    let nf = n as f64;
    let mean_x = (nf - 1.0) / 2.0;
    let mean_y = series.iter().sum::<f64>() / nf;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (i, y) in series.iter().enumerate() {
        let dx = i as f64 - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 {
        return None;
    }
    let slope = cov / var_x;
    let correlation = if var_y == 0.0 { 0.0 } else { cov / (var_x.sqrt() * var_y.sqrt()) };
    Some((slope, correlation))
}

/// Centered moving average used before quality-trend analysis
fn smooth(series: &[f64], window: usize) -> Vec<f64> {
    if series.len() < window || window < 2 {
        return series.to_vec();
    }
    series
        .windows(window)
        .map(|w| w.iter().sum::<f64>() / window as f64)
        .collect()
}

/// EWMA and trend-based anomaly scorer
pub struct StatisticalScorer {
    alpha: f64,
    min_samples: u64,
    history_limit: usize,
    state: Mutex<HashMap<DeviceId, DeviceStats>>,
}

impl StatisticalScorer {
    pub fn new() -> Self {
        StatisticalScorer {
            alpha: 0.3,
            min_samples: 5,
            history_limit: 64,
            state: Mutex::new(HashMap::new()),
        }
    }

    fn severity_for_z(z: f64) -> Option<Severity> {
        let z = z.abs();
        if z >= 6.0 {
            Some(Severity::Critical)
        } else if z >= 4.5 {
            Some(Severity::Error)
        } else if z >= 3.0 {
            Some(Severity::Warning)
        } else {
            None
        }
    }

    fn battery_trend_score(stats: &DeviceStats) -> Option<Score> {
        let series: Vec<f64> = stats.battery_history.iter().copied().collect();
        if series.len() < 10 {
            return None;
        }
        let (slope, correlation) = linear_trend(&series)?;
        if slope >= -1e-3 || correlation >= -0.5 {
            return None;
        }
        let current = *series.last()?;
        if current <= BATTERY_CRITICAL_VOLTS {
            return None; // already depleted; the rule table covers this
        }
        let hours_to_threshold = (current - BATTERY_CRITICAL_VOLTS) / slope.abs();
        if hours_to_threshold >= TREND_HORIZON_HOURS {
            return None;
        }
        let severity = if hours_to_threshold < TREND_URGENT_HOURS {
            Severity::Error
        } else {
            Severity::Warning
        };
        let mut diagnostics = BTreeMap::new();
        diagnostics.insert("battery.slope".to_string(), slope);
        diagnostics.insert("battery.correlation".to_string(), correlation);
        diagnostics.insert("hours_to_threshold".to_string(), hours_to_threshold);
        Some(Score {
            kind: ScoreKind::Statistical,
            value: hours_to_threshold,
            confidence: correlation.abs().min(1.0),
            severity_hint: severity,
            flagged_kind: Some(IncidentKind::PredictiveMaintenance),
            diagnostics,
        })
    }

    fn quality_trend_score(stats: &DeviceStats) -> Option<Score> {
        let series: Vec<f64> = stats.quality_history.iter().copied().collect();
        if series.len() < 20 {
            return None;
        }
        let smoothed = smooth(&series, 5);
        let tail = &smoothed[smoothed.len().saturating_sub(10)..];
        let (slope, correlation) = linear_trend(tail)?;
        // Quality is on a 0..1 scale; -0.005 per sample mirrors the
        // original detector's -0.5 on its percentage scale.
        if slope >= -0.005 {
            return None;
        }
        let mut diagnostics = BTreeMap::new();
        diagnostics.insert("quality.slope".to_string(), slope);
        diagnostics.insert("quality.correlation".to_string(), correlation);
        diagnostics.insert("maintenance_window_hours".to_string(), 48.0);
        Some(Score {
            kind: ScoreKind::Statistical,
            value: slope,
            confidence: 0.7,
            severity_hint: Severity::Warning,
            flagged_kind: Some(IncidentKind::PredictiveMaintenance),
            diagnostics,
        })
    }
}

impl Default for StatisticalScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl Scorer for StatisticalScorer {
    fn name(&self) -> &'static str {
        "statistical"
    }

    fn kind(&self) -> ScoreKind {
        ScoreKind::Statistical
    }

    fn score(&self, frame: &FeatureFrame) -> Result<Vec<Score>> {
        let Some(latest) = frame.latest() else {
            return Ok(Vec::new());
        };

        let mut state = self.state.lock();
        let stats = state.entry(frame.device_id.clone()).or_default();

        // One update per distinct newest reading; re-scoring the same
        // window must not double-count.
        let fresh = stats.last_seen != Some(latest.timestamp);
        if fresh {
            stats.last_seen = Some(latest.timestamp);
            if let Some(&volts) = frame.raw_latest.get(&Channel::BatteryVoltage) {
                stats.battery_history.push_back(volts);
                if stats.battery_history.len() > self.history_limit {
                    stats.battery_history.pop_front();
                }
            }
            stats.quality_history.push_back(frame.quality);
            if stats.quality_history.len() > self.history_limit {
                stats.quality_history.pop_front();
            }
        }

        let mut scores = Vec::new();
        for (feature, kind) in WATCHED {
            let value = latest.get(feature);
            let ewma = stats
                .ewma
                .entry(feature.index())
                .or_insert_with(|| Ewma::new(value));
            if !fresh {
                continue;
            }
            let warmed = ewma.samples >= self.min_samples;
            let z = ewma.observe(value, self.alpha);
            if !warmed {
                continue;
            }
            if let Some(severity) = Self::severity_for_z(z) {
                trace!(device = %frame.device_id, feature = feature.as_str(), z, "sigma band exceeded");
                let mut diagnostics = BTreeMap::new();
                diagnostics.insert(format!("z.{}", feature.as_str()), z);
                scores.push(Score {
                    kind: ScoreKind::Statistical,
                    value: z,
                    confidence: (z.abs() / 6.0).min(1.0),
                    severity_hint: severity,
                    flagged_kind: Some(kind),
                    diagnostics,
                });
            }
        }

        if let Some(score) = Self::battery_trend_score(stats) {
            scores.push(score);
        }
        if let Some(score) = Self::quality_trend_score(stats) {
            scores.push(score);
        }

        Ok(scores)
    }
}
