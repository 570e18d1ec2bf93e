//! Online analytics for the TireSense control plane
//!
//! Raw readings flow through the feature pipeline into per-device sliding
//! windows; scorer adapters turn feature frames into anomaly scores; the
//! fusion stage merges scores into ranked, deduplicated incidents.

pub mod fusion;
pub mod outlier;
pub mod pipeline;
pub mod rules;
pub mod scorer;
pub mod seqpred;
pub mod statistical;

pub use fusion::{AnomalyFuser, RecommendationTable};
pub use outlier::{IsolationForest, OutlierModel, OutlierTreeScorer};
pub use pipeline::{FeaturePipeline, IngestOutcome, PipelineCounters};
pub use rules::RuleScorer;
pub use scorer::Scorer;
pub use seqpred::{SequencePredictionScorer, SequenceWeights};
pub use statistical::StatisticalScorer;
