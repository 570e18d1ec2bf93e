//! Sequence-prediction scorer
//!
//! Predicts the next value of a chosen channel from the frame's history
//! using autoregressive weights loaded from an opaque blob, then scores
//! the noise-normalized error between prediction and the observed value.
//! Without weights the scorer stays usable and simply reports nothing.

use crate::scorer::Scorer;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tiresense_common::{
    Error, Feature, FeatureFrame, IncidentKind, Result, Score, ScoreKind, Severity,
};
use tracing::{debug, warn};

/// Autoregressive weights for one channel, loaded from a serialized blob
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceWeights {
    /// Feature name the model predicts
    pub channel: String,
    /// AR coefficients, newest history first
    pub coefficients: Vec<f64>,
    pub bias: f64,
    /// Expected prediction noise in normalized units
    pub noise_floor: f64,
}

impl SequenceWeights {
    pub fn from_blob(blob: &[u8]) -> Result<Self> {
        let weights: SequenceWeights = serde_json::from_slice(blob)?;
        if weights.coefficients.is_empty() {
            return Err(Error::Validation("sequence weights carry no coefficients".to_string()));
        }
        if weights.noise_floor <= 0.0 || !weights.noise_floor.is_finite() {
            return Err(Error::Validation("sequence weights noise floor must be positive".to_string()));
        }
        Ok(weights)
    }
}

/// Prediction-error scorer over the frame's chosen channel
pub struct SequencePredictionScorer {
    weights: RwLock<Option<SequenceWeights>>,
    target: Feature,
    /// Errors past this many noise units start producing scores
    flag_threshold: f64,
}

impl SequencePredictionScorer {
    /// Scorer without weights; usable but silent until weights arrive
    pub fn unavailable() -> Self {
        SequencePredictionScorer {
            weights: RwLock::new(None),
            target: Feature::Temperature,
            flag_threshold: 1.0,
        }
    }

    pub fn with_weights(weights: SequenceWeights) -> Self {
        let target = feature_by_name(&weights.channel).unwrap_or(Feature::Temperature);
        SequencePredictionScorer {
            weights: RwLock::new(Some(weights)),
            target,
            flag_threshold: 1.0,
        }
    }

    /// Load weights from an opaque blob; a bad blob leaves the scorer
    /// in its previous state.
    pub fn load_blob(&self, blob: &[u8]) -> Result<()> {
        let weights = SequenceWeights::from_blob(blob)?;
        debug!(channel = %weights.channel, order = weights.coefficients.len(), "sequence weights loaded");
        *self.weights.write() = Some(weights);
        Ok(())
    }

    pub fn is_available(&self) -> bool {
        self.weights.read().is_some()
    }

    fn severity_for_error(error: f64) -> Severity {
        if error > 3.0 {
            Severity::Critical
        } else if error > 2.0 {
            Severity::Error
        } else if error > 1.5 {
            Severity::Warning
        } else {
            Severity::Info
        }
    }
}

fn feature_by_name(name: &str) -> Option<Feature> {
    tiresense_common::FEATURES.iter().copied().find(|f| f.as_str() == name)
}

impl Scorer for SequencePredictionScorer {
    fn name(&self) -> &'static str {
        "sequence_prediction"
    }

    fn kind(&self) -> ScoreKind {
        ScoreKind::SequencePrediction
    }

    fn score(&self, frame: &FeatureFrame) -> Result<Vec<Score>> {
        let guard = self.weights.read();
        let Some(weights) = guard.as_ref() else {
            return Ok(Vec::new());
        };
        if frame.degraded {
            return Ok(Vec::new());
        }

        let target = feature_by_name(&weights.channel).unwrap_or(self.target);
        let series = frame.column(target);
        let order = weights.coefficients.len();
        if series.len() < order + 1 {
            return Ok(Vec::new());
        }

        // Predict the newest value from the `order` values preceding it
        let actual = series[series.len() - 1];
        let history = &series[series.len() - 1 - order..series.len() - 1];
        let predicted = weights.bias
            + weights
                .coefficients
                .iter()
                .zip(history.iter().rev())
                .map(|(c, x)| c * x)
                .sum::<f64>();

        let error = (predicted - actual).abs() / weights.noise_floor;
        if !error.is_finite() {
            warn!(device = %frame.device_id, "non-finite prediction error discarded");
            return Ok(Vec::new());
        }
        if error <= self.flag_threshold {
            return Ok(Vec::new());
        }

        let mut diagnostics = BTreeMap::new();
        diagnostics.insert("predicted".to_string(), predicted);
        diagnostics.insert("actual".to_string(), actual);
        diagnostics.insert("normalized_error".to_string(), error);

        Ok(vec![Score {
            kind: ScoreKind::SequencePrediction,
            value: error,
            confidence: (error / 3.0).min(1.0),
            severity_hint: Self::severity_for_error(error),
            flagged_kind: Some(match target {
                Feature::Pressure => IncidentKind::PressureAnomaly,
                Feature::BatteryVoltage => IncidentKind::BatteryDegradation,
                Feature::SignalStrength => IncidentKind::CommunicationIssue,
                Feature::Quality => IncidentKind::DataQualityDrop,
                _ => IncidentKind::TemperatureAnomaly,
            }),
            diagnostics,
        }])
    }
}
