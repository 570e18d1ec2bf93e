//! Outlier-tree scorer
//!
//! The scorer consumes a frame's newest row and returns a normalized signed
//! decision margin: positive for inliers, negative for outliers, lower
//! meaning more anomalous. The algorithm behind the margin is pluggable
//! through [`OutlierModel`]; the default is a seeded isolation forest
//! fitted from a reservoir of recently observed rows.

use crate::scorer::Scorer;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use tiresense_common::{
    Feature, FeatureFrame, IncidentKind, Result, Score, ScoreKind, Severity, FEATURE_COUNT,
};
use tracing::debug;

/// Pluggable outlier-detection algorithm
pub trait OutlierModel: Send + Sync {
    /// Signed decision margin for one point; `None` while unfitted
    fn margin(&self, point: &[f64; FEATURE_COUNT]) -> Option<f64>;

    /// Fit (or refit) from baseline samples
    fn fit(&mut self, samples: &[[f64; FEATURE_COUNT]]);

    fn is_fitted(&self) -> bool;
}

enum Node {
    Split { feature: usize, threshold: f64, left: usize, right: usize },
    Leaf { size: usize },
}

struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn build(rng: &mut StdRng, samples: &mut [[f64; FEATURE_COUNT]], max_depth: u32) -> Self {
        let mut nodes = Vec::new();
        Self::build_node(rng, samples, max_depth, &mut nodes);
        Tree { nodes }
    }

    fn build_node(
        rng: &mut StdRng,
        samples: &mut [[f64; FEATURE_COUNT]],
        depth_left: u32,
        nodes: &mut Vec<Node>,
    ) -> usize {
        if depth_left == 0 || samples.len() <= 1 {
            nodes.push(Node::Leaf { size: samples.len().max(1) });
            return nodes.len() - 1;
        }

        // Pick a feature with spread; give up after a few attempts on
        // degenerate data.
        let mut split = None;
        for _ in 0..4 {
            let feature = rng.gen_range(0..FEATURE_COUNT);
            let (min, max) = samples.iter().fold((f64::MAX, f64::MIN), |(lo, hi), s| {
                (lo.min(s[feature]), hi.max(s[feature]))
            });
            if max > min {
                let threshold = rng.gen_range(min..max);
                split = Some((feature, threshold));
                break;
            }
        }
        let Some((feature, threshold)) = split else {
            nodes.push(Node::Leaf { size: samples.len() });
            return nodes.len() - 1;
        };

        let mid = partition(samples, feature, threshold);
        if mid == 0 || mid == samples.len() {
            nodes.push(Node::Leaf { size: samples.len() });
            return nodes.len() - 1;
        }

        let index = nodes.len();
        nodes.push(Node::Leaf { size: 0 }); // placeholder
        let (left_samples, right_samples) = samples.split_at_mut(mid);
        let left = Self::build_node(rng, left_samples, depth_left - 1, nodes);
        let right = Self::build_node(rng, right_samples, depth_left - 1, nodes);
        nodes[index] = Node::Split { feature, threshold, left, right };
        index
    }

    fn path_length(&self, point: &[f64; FEATURE_COUNT]) -> f64 {
        let mut index = 0;
        let mut depth = 0.0;
        loop {
            match &self.nodes[index] {
                Node::Split { feature, threshold, left, right } => {
                    depth += 1.0;
                    index = if point[*feature] < *threshold { *left } else { *right };
                }
                Node::Leaf { size } => {
                    return depth + average_path_length(*size);
                }
            }
        }
    }
}

fn partition(samples: &mut [[f64; FEATURE_COUNT]], feature: usize, threshold: f64) -> usize {
    let mut mid = 0;
    for i in 0..samples.len() {
        if samples[i][feature] < threshold {
            samples.swap(i, mid);
            mid += 1;
        }
    }
    mid
}

/// Expected path length of an unsuccessful BST search over `n` items
fn average_path_length(n: usize) -> f64 {
    if n <= 1 {
        return 0.0;
    }
    let n = n as f64;
    2.0 * ((n - 1.0).ln() + 0.577_215_664_901_532_9) - 2.0 * (n - 1.0) / n
}

/// Seeded isolation forest over the fixed feature vector
pub struct IsolationForest {
    trees: Vec<Tree>,
    subsample: usize,
    normalization: f64,
    tree_count: usize,
    seed: u64,
}

impl IsolationForest {
    pub fn new(tree_count: usize, subsample: usize, seed: u64) -> Self {
        IsolationForest {
            trees: Vec::new(),
            subsample: subsample.max(8),
            normalization: 1.0,
            tree_count: tree_count.max(1),
            seed,
        }
    }
}

impl OutlierModel for IsolationForest {
    fn margin(&self, point: &[f64; FEATURE_COUNT]) -> Option<f64> {
        if self.trees.is_empty() {
            return None;
        }
        let mean_path = self.trees.iter().map(|t| t.path_length(point)).sum::<f64>()
            / self.trees.len() as f64;
        // Anomaly score in (0, 1]; 0.5 is the score of an average point.
        let anomaly = 2f64.powf(-mean_path / self.normalization);
        Some(0.5 - anomaly)
    }

    fn fit(&mut self, samples: &[[f64; FEATURE_COUNT]]) {
        if samples.len() < 8 {
            return;
        }
        let mut rng = StdRng::seed_from_u64(self.seed);
        let sample_size = self.subsample.min(samples.len());
        let max_depth = (sample_size as f64).log2().ceil() as u32 + 1;

        self.trees = (0..self.tree_count)
            .map(|_| {
                let mut subset: Vec<[f64; FEATURE_COUNT]> = (0..sample_size)
                    .map(|_| samples[rng.gen_range(0..samples.len())])
                    .collect();
                Tree::build(&mut rng, &mut subset, max_depth)
            })
            .collect();
        self.normalization = average_path_length(sample_size).max(1.0);
        debug!(trees = self.trees.len(), sample_size, "isolation forest fitted");
    }

    fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }
}

/// Scorer wrapping a pluggable outlier model plus a baseline reservoir
pub struct OutlierTreeScorer {
    model: RwLock<Box<dyn OutlierModel>>,
    reservoir: Mutex<Vec<[f64; FEATURE_COUNT]>>,
    reservoir_limit: usize,
    /// Margins above this are considered nominal and produce no score
    flag_margin: f64,
}

impl OutlierTreeScorer {
    pub fn new(model: Box<dyn OutlierModel>) -> Self {
        OutlierTreeScorer {
            model: RwLock::new(model),
            reservoir: Mutex::new(Vec::new()),
            reservoir_limit: 2048,
            flag_margin: -0.1,
        }
    }

    pub fn with_default_forest(seed: u64) -> Self {
        Self::new(Box::new(IsolationForest::new(100, 256, seed)))
    }

    /// Refit the model from the reservoir; triggered externally on demand
    pub fn refit(&self) -> bool {
        let samples = self.reservoir.lock().clone();
        if samples.len() < 8 {
            return false;
        }
        let mut model = self.model.write();
        model.fit(&samples);
        model.is_fitted()
    }

    pub fn is_fitted(&self) -> bool {
        self.model.read().is_fitted()
    }

    fn severity_for_margin(margin: f64) -> Severity {
        if margin < -0.5 {
            Severity::Critical
        } else if margin < -0.3 {
            Severity::Error
        } else if margin < -0.1 {
            Severity::Warning
        } else {
            Severity::Info
        }
    }

    /// Attribute the outlier to the most deviant feature, mirroring how
    /// the fused incident will be classified downstream.
    fn classify(row: &[f64; FEATURE_COUNT]) -> IncidentKind {
        if row[Feature::Temperature.index()].abs() > 2.0 {
            IncidentKind::TemperatureAnomaly
        } else if row[Feature::Pressure.index()].abs() > 2.0 {
            IncidentKind::PressureAnomaly
        } else if row[Feature::BatteryVoltage.index()] < -1.0 {
            IncidentKind::BatteryDegradation
        } else if row[Feature::SignalStrength.index()] < -1.0 {
            IncidentKind::CommunicationIssue
        } else if row[Feature::Quality.index()] < -1.0 {
            IncidentKind::DataQualityDrop
        } else {
            IncidentKind::SensorMalfunction
        }
    }
}

impl Scorer for OutlierTreeScorer {
    fn name(&self) -> &'static str {
        "outlier_tree"
    }

    fn kind(&self) -> ScoreKind {
        ScoreKind::OutlierTree
    }

    fn score(&self, frame: &FeatureFrame) -> Result<Vec<Score>> {
        if frame.degraded {
            // Model-based scoring refuses degraded frames
            return Ok(Vec::new());
        }
        let Some(latest) = frame.latest() else {
            return Ok(Vec::new());
        };

        {
            let mut reservoir = self.reservoir.lock();
            if reservoir.len() < self.reservoir_limit {
                reservoir.push(latest.values);
            }
        }

        let Some(margin) = self.model.read().margin(&latest.values) else {
            return Ok(Vec::new());
        };
        if margin >= self.flag_margin {
            return Ok(Vec::new());
        }

        let severity = Self::severity_for_margin(margin);
        let kind = Self::classify(&latest.values);
        let mut diagnostics = BTreeMap::new();
        diagnostics.insert("margin".to_string(), margin);
        for feature in tiresense_common::FEATURES {
            diagnostics.insert(
                format!("feature.{}", feature.as_str()),
                latest.values[feature.index()],
            );
        }

        Ok(vec![Score {
            kind: ScoreKind::OutlierTree,
            value: margin,
            confidence: (margin.abs() * 2.0).min(1.0),
            severity_hint: severity,
            flagged_kind: Some(kind),
            diagnostics,
        }])
    }
}
