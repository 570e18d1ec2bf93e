//! Feature pipeline: validate, score quality, normalize, window, emit
//!
//! Readings enter through [`FeaturePipeline::ingest`] in arrival order and
//! leave as [`FeatureFrame`]s on demand. Per-device windows have a single
//! writer (the ingest worker); frame emission takes a short-lived snapshot
//! under the window lock so readers never observe a half-applied update.

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tiresense_common::config::{PipelineConfig, ScalerParams, WindowConfig};
use tiresense_common::{
    Channel, Clock, DeviceId, Error, Feature, FeatureFrame, FrameRow, Reading, Result,
    FEATURES, FEATURE_COUNT,
};
use tracing::{debug, trace, warn};

/// Physical bounds per channel; values outside are clipped and flagged
fn channel_bounds(channel: Channel) -> (f64, f64) {
    match channel {
        Channel::Temperature => (-40.0, 85.0),
        Channel::Humidity => (0.0, 100.0),
        Channel::Pressure => (800.0, 1200.0),
        Channel::AccelX | Channel::AccelY | Channel::AccelZ => (-5.0, 5.0),
        Channel::BatteryVoltage => (0.0, 5.0),
        Channel::SignalStrength => (-120.0, 0.0),
    }
}

/// Channels a reading must carry for full quality
const REQUIRED_CHANNELS: [Channel; 5] = [
    Channel::Temperature,
    Channel::Humidity,
    Channel::Pressure,
    Channel::BatteryVoltage,
    Channel::SignalStrength,
];

/// Result of ingesting one reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted,
    /// Same `(device_id, timestamp)` as an already accepted reading
    Duplicate,
    /// Window plus overflow tolerance exhausted; reading shed to protect memory
    Overflowed,
}

/// Monotonic pipeline counters
#[derive(Debug, Default)]
pub struct PipelineCounters {
    pub accepted: AtomicU64,
    pub validation_dropped: AtomicU64,
    pub duplicates: AtomicU64,
    pub overflow_dropped: AtomicU64,
    pub frames_emitted: AtomicU64,
}

/// Snapshot of [`PipelineCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub accepted: u64,
    pub validation_dropped: u64,
    pub duplicates: u64,
    pub overflow_dropped: u64,
    pub frames_emitted: u64,
}

impl PipelineCounters {
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            validation_dropped: self.validation_dropped.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            overflow_dropped: self.overflow_dropped.load(Ordering::Relaxed),
            frames_emitted: self.frames_emitted.load(Ordering::Relaxed),
        }
    }
}

/// Per-feature linear scaler, refittable in a background task
#[derive(Debug, Clone)]
pub struct Normalizer {
    params: [ScalerParams; FEATURE_COUNT],
}

const MIN_STD_DEV: f64 = 1e-9;

impl Normalizer {
    pub fn from_config(config: &PipelineConfig) -> Self {
        let mut params = [ScalerParams { mean: 0.0, std_dev: 1.0 }; FEATURE_COUNT];
        for feature in FEATURES {
            if let Some(p) = config.normalization.get(feature.as_str()) {
                params[feature.index()] = *p;
            }
        }
        Normalizer { params }
    }

    /// Refit mean and standard deviation from observed rows
    pub fn fit(samples: &[[f64; FEATURE_COUNT]]) -> Option<Self> {
        if samples.len() < 2 {
            return None;
        }
        let n = samples.len() as f64;
        let mut params = [ScalerParams { mean: 0.0, std_dev: 1.0 }; FEATURE_COUNT];
        for i in 0..FEATURE_COUNT {
            let mean = samples.iter().map(|s| s[i]).sum::<f64>() / n;
            let var = samples.iter().map(|s| (s[i] - mean).powi(2)).sum::<f64>() / (n - 1.0);
            params[i] = ScalerParams { mean, std_dev: var.sqrt().max(MIN_STD_DEV) };
        }
        Some(Normalizer { params })
    }

    fn apply(&self, raw: &[f64; FEATURE_COUNT]) -> ([f64; FEATURE_COUNT], bool) {
        let mut out = [0.0; FEATURE_COUNT];
        let mut degraded = false;
        for i in 0..FEATURE_COUNT {
            let p = self.params[i];
            if p.std_dev <= MIN_STD_DEV || !p.std_dev.is_finite() {
                out[i] = raw[i];
                degraded = true;
            } else {
                out[i] = (raw[i] - p.mean) / p.std_dev;
            }
        }
        (out, degraded)
    }

    fn mean_of(&self, feature: Feature) -> f64 {
        self.params[feature.index()].mean
    }
}

struct StoredReading {
    timestamp: chrono::DateTime<chrono::Utc>,
    features: [f64; FEATURE_COUNT],
    quality: f64,
}

struct DeviceWindow {
    rows: VecDeque<StoredReading>,
    /// Measured channel values of the newest reading, pre-clip
    latest_raw: HashMap<Channel, f64>,
    last_arrival_seq: u64,
}

impl DeviceWindow {
    fn new() -> Self {
        DeviceWindow { rows: VecDeque::new(), latest_raw: HashMap::new(), last_arrival_seq: 0 }
    }
}

/// The feature pipeline
pub struct FeaturePipeline {
    window_cfg: WindowConfig,
    pipeline_cfg: PipelineConfig,
    clock: Arc<dyn Clock>,
    normalizer: RwLock<Normalizer>,
    windows: RwLock<HashMap<DeviceId, Arc<Mutex<DeviceWindow>>>>,
    overflow_tolerance: usize,
    counters: PipelineCounters,
}

impl FeaturePipeline {
    pub fn new(
        window_cfg: WindowConfig,
        pipeline_cfg: PipelineConfig,
        overflow_tolerance: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let normalizer = Normalizer::from_config(&pipeline_cfg);
        FeaturePipeline {
            window_cfg,
            pipeline_cfg,
            clock,
            normalizer: RwLock::new(normalizer),
            windows: RwLock::new(HashMap::new()),
            overflow_tolerance,
            counters: PipelineCounters::default(),
        }
    }

    /// Validate, quality-score and window one reading
    pub fn ingest(&self, reading: Reading) -> Result<IngestOutcome> {
        let validated = match self.validate(&reading) {
            Ok(v) => v,
            Err(e) => {
                self.counters.validation_dropped.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        let window = self.window_for(&reading.device_id);
        let mut window = window.lock();

        // Drop duplicates with identical (device_id, timestamp); the first
        // accepted reading wins.
        if window.rows.iter().rev().any(|r| r.timestamp == reading.timestamp) {
            self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
            trace!(device = %reading.device_id, ts = %reading.timestamp, "duplicate reading dropped");
            return Ok(IngestOutcome::Duplicate);
        }

        let capacity = self.window_cfg.k + self.overflow_tolerance;
        if window.rows.len() >= capacity {
            self.evict_locked(&mut window);
            if window.rows.len() >= capacity {
                self.counters.overflow_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(device = %reading.device_id, "window overflow, reading shed");
                return Ok(IngestOutcome::Overflowed);
            }
        }

        let features = self.project(&validated, &window);
        window.rows.push_back(StoredReading {
            timestamp: reading.timestamp,
            features,
            quality: validated.quality,
        });
        window.latest_raw = reading.channels.clone();
        window.last_arrival_seq = reading.arrival_seq;
        self.evict_locked(&mut window);

        self.counters.accepted.fetch_add(1, Ordering::Relaxed);
        Ok(IngestOutcome::Accepted)
    }

    /// Emit the current frame for a device, or `None` while in cold start
    pub fn frame(&self, device_id: &str) -> Option<FeatureFrame> {
        let window = {
            let windows = self.windows.read();
            windows.get(device_id)?.clone()
        };
        let window = window.lock();

        let horizon = self.clock.wall_now()
            - chrono::Duration::from_std(self.window_duration()).unwrap_or_else(|_| chrono::Duration::hours(1));
        let in_window = window.rows.iter().filter(|r| r.timestamp >= horizon).count();
        if in_window < self.window_cfg.min_window {
            debug!(device = device_id, rows = in_window, "cold start, no frame");
            return None;
        }

        let normalizer = self.normalizer.read().clone();
        let mut degraded = false;
        let rows: Vec<FrameRow> = window
            .rows
            .iter()
            .map(|r| {
                let (values, row_degraded) = normalizer.apply(&r.features);
                degraded |= row_degraded;
                FrameRow { timestamp: r.timestamp, values }
            })
            .collect();

        let quality = if window.rows.is_empty() {
            0.0
        } else {
            window.rows.iter().map(|r| r.quality).sum::<f64>() / window.rows.len() as f64
        };

        self.counters.frames_emitted.fetch_add(1, Ordering::Relaxed);
        Some(FeatureFrame {
            device_id: device_id.to_string(),
            rows,
            raw_latest: window.latest_raw.clone(),
            quality,
            degraded,
            emitted_at: self.clock.wall_now(),
        })
    }

    /// Devices with at least one windowed reading, sorted for determinism
    pub fn devices(&self) -> Vec<DeviceId> {
        let mut devices: Vec<DeviceId> = self.windows.read().keys().cloned().collect();
        devices.sort();
        devices
    }

    /// Evict readings past both window bounds across all devices
    pub fn evict_stale(&self) {
        let windows: Vec<Arc<Mutex<DeviceWindow>>> =
            self.windows.read().values().cloned().collect();
        for window in windows {
            self.evict_locked(&mut window.lock());
        }
    }

    /// Refit the per-feature scalers from currently windowed rows
    pub fn refit_normalizer(&self) -> bool {
        let samples: Vec<[f64; FEATURE_COUNT]> = {
            let windows = self.windows.read();
            windows
                .values()
                .flat_map(|w| w.lock().rows.iter().map(|r| r.features).collect::<Vec<_>>())
                .collect()
        };
        match Normalizer::fit(&samples) {
            Some(fitted) => {
                *self.normalizer.write() = fitted;
                debug!(samples = samples.len(), "normalizer refit complete");
                true
            }
            None => false,
        }
    }

    pub fn counters(&self) -> CountersSnapshot {
        self.counters.snapshot()
    }

    fn window_duration(&self) -> Duration {
        Duration::from_secs(self.window_cfg.t_seconds)
    }

    fn window_for(&self, device_id: &str) -> Arc<Mutex<DeviceWindow>> {
        if let Some(w) = self.windows.read().get(device_id) {
            return w.clone();
        }
        let mut windows = self.windows.write();
        windows
            .entry(device_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(DeviceWindow::new())))
            .clone()
    }

    /// Keep the last K readings or the last T seconds, whichever covers
    /// more; a reading is evicted only when past both bounds.
    fn evict_locked(&self, window: &mut DeviceWindow) {
        let horizon = self.clock.wall_now()
            - chrono::Duration::from_std(self.window_duration()).unwrap_or_else(|_| chrono::Duration::hours(1));
        while window.rows.len() > self.window_cfg.k {
            match window.rows.front() {
                Some(front) if front.timestamp < horizon => {
                    window.rows.pop_front();
                }
                _ => break,
            }
        }
    }

    fn validate(&self, reading: &Reading) -> Result<ValidatedReading> {
        if reading.device_id.is_empty() {
            return Err(Error::Validation("reading without device id".to_string()));
        }
        if reading.channels.is_empty() {
            return Err(Error::Validation(format!(
                "reading from {} carries no channels",
                reading.device_id
            )));
        }
        if reading.channels.values().any(|v| !v.is_finite()) {
            return Err(Error::Validation(format!(
                "reading from {} carries non-finite values",
                reading.device_id
            )));
        }

        let mut clipped = Vec::new();
        let mut channels = HashMap::with_capacity(reading.channels.len());
        for (&channel, &value) in &reading.channels {
            let (min, max) = channel_bounds(channel);
            if value < min || value > max {
                clipped.push(channel);
                channels.insert(channel, value.clamp(min, max));
            } else {
                channels.insert(channel, value);
            }
        }

        let missing: Vec<Channel> = REQUIRED_CHANNELS
            .iter()
            .copied()
            .filter(|c| !channels.contains_key(c))
            .collect();

        let quality = (1.0
            - self.pipeline_cfg.missing_channel_penalty * missing.len() as f64
            - self.pipeline_cfg.clipped_channel_penalty * clipped.len() as f64)
            .max(0.0);

        if !clipped.is_empty() {
            debug!(
                device = %reading.device_id,
                clipped = clipped.len(),
                quality,
                "out-of-bound channels clipped"
            );
        }

        Ok(ValidatedReading { channels, quality })
    }

    /// Project a validated reading onto the fixed feature vector, imputing
    /// missing channels by last-known value or the configured center.
    fn project(&self, validated: &ValidatedReading, window: &DeviceWindow) -> [f64; FEATURE_COUNT] {
        let normalizer = self.normalizer.read();
        let last = window.rows.back();
        let mut features = [0.0; FEATURE_COUNT];

        let channel_value = |channel: Channel, feature: Feature| -> f64 {
            validated.channels.get(&channel).copied().unwrap_or_else(|| {
                last.map(|r| r.features[feature.index()])
                    .unwrap_or_else(|| normalizer.mean_of(feature))
            })
        };

        features[Feature::Temperature.index()] =
            channel_value(Channel::Temperature, Feature::Temperature);
        features[Feature::Humidity.index()] = channel_value(Channel::Humidity, Feature::Humidity);
        features[Feature::Pressure.index()] = channel_value(Channel::Pressure, Feature::Pressure);
        features[Feature::BatteryVoltage.index()] =
            channel_value(Channel::BatteryVoltage, Feature::BatteryVoltage);
        features[Feature::SignalStrength.index()] =
            channel_value(Channel::SignalStrength, Feature::SignalStrength);

        let magnitude = match (
            validated.channels.get(&Channel::AccelX),
            validated.channels.get(&Channel::AccelY),
            validated.channels.get(&Channel::AccelZ),
        ) {
            (Some(x), Some(y), Some(z)) => (x * x + y * y + z * z).sqrt(),
            _ => last
                .map(|r| r.features[Feature::AccelerationMagnitude.index()])
                .unwrap_or(0.0),
        };
        features[Feature::AccelerationMagnitude.index()] = magnitude;
        features[Feature::Quality.index()] = validated.quality;

        features
    }
}

struct ValidatedReading {
    channels: HashMap<Channel, f64>,
    quality: f64,
}
