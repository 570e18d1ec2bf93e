//! Scorer adapter interface

use tiresense_common::{FeatureFrame, Result, Score, ScoreKind};

/// A scorer maps a feature frame to zero or more anomaly scores.
///
/// Scorers must be pure with respect to the supplied frame: any state they
/// maintain (running statistics, fitted models) is per-device and private.
/// A scorer with nothing to report returns an empty vector; a scorer whose
/// model is unavailable does the same rather than erroring.
pub trait Scorer: Send + Sync {
    fn name(&self) -> &'static str;

    fn kind(&self) -> ScoreKind;

    fn score(&self, frame: &FeatureFrame) -> Result<Vec<Score>>;
}
