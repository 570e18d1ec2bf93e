//! Anomaly fusion and ranking
//!
//! Takes the multiset of scores produced for one device in a tick and
//! merges them into classified, deduplicated, severity-ranked incidents
//! with recommended recovery actions attached.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use tiresense_common::config::{FusionConfig, RecoveryConfig};
use tiresense_common::{
    ActionKind, Evidence, FeatureFrame, Incident, IncidentKind, Score, ScoreKind, Severity,
};
use tracing::debug;

/// Candidate actions and recoverability per incident kind
#[derive(Debug, Clone)]
pub struct Recommendation {
    pub actions: Vec<ActionKind>,
    pub auto_recoverable: bool,
}

/// Static mapping from incident kind to ordered candidate actions
#[derive(Debug, Clone)]
pub struct RecommendationTable {
    map: HashMap<IncidentKind, Recommendation>,
}

impl RecommendationTable {
    pub fn with_defaults() -> Self {
        let mut map = HashMap::new();
        map.insert(
            IncidentKind::SensorMalfunction,
            Recommendation {
                actions: vec![ActionKind::Restart, ActionKind::UpdateConfig],
                auto_recoverable: true,
            },
        );
        map.insert(
            IncidentKind::TemperatureAnomaly,
            Recommendation { actions: vec![ActionKind::Restart], auto_recoverable: true },
        );
        map.insert(
            IncidentKind::PressureAnomaly,
            Recommendation {
                actions: vec![ActionKind::Restart, ActionKind::Failover],
                auto_recoverable: true,
            },
        );
        map.insert(
            IncidentKind::BatteryDegradation,
            // Battery swaps are field work; surface only
            Recommendation { actions: Vec::new(), auto_recoverable: false },
        );
        map.insert(
            IncidentKind::CommunicationIssue,
            Recommendation {
                actions: vec![ActionKind::Restart, ActionKind::Failover],
                auto_recoverable: true,
            },
        );
        map.insert(
            IncidentKind::DataQualityDrop,
            Recommendation {
                actions: vec![ActionKind::Restart, ActionKind::UpdateConfig],
                auto_recoverable: true,
            },
        );
        map.insert(
            IncidentKind::PredictiveMaintenance,
            Recommendation { actions: Vec::new(), auto_recoverable: false },
        );
        map.insert(
            IncidentKind::SecurityBreach,
            Recommendation { actions: vec![ActionKind::CircuitBreak], auto_recoverable: false },
        );
        RecommendationTable { map }
    }

    pub fn lookup(&self, kind: IncidentKind) -> Recommendation {
        self.map
            .get(&kind)
            .cloned()
            .unwrap_or(Recommendation { actions: Vec::new(), auto_recoverable: false })
    }
}

/// Fuses per-device scores into ranked incidents
pub struct AnomalyFuser {
    fusion: FusionConfig,
    recovery: RecoveryConfig,
    recommendations: RecommendationTable,
}

impl AnomalyFuser {
    pub fn new(fusion: FusionConfig, recovery: RecoveryConfig) -> Self {
        AnomalyFuser { fusion, recovery, recommendations: RecommendationTable::with_defaults() }
    }

    pub fn with_recommendations(mut self, table: RecommendationTable) -> Self {
        self.recommendations = table;
        self
    }

    /// Fuse one device's scores for one tick into incidents.
    ///
    /// Scores sharing a kind collapse into one incident whose severity is
    /// the maximum hint, lifted once when enough independent scorers agree
    /// and once more when frame quality is low. Deduplication on
    /// `(subject, kind)` is inherent in the grouping.
    pub fn fuse(&self, frame: &FeatureFrame, scores: Vec<Score>) -> Vec<Incident> {
        if scores.is_empty() {
            return Vec::new();
        }

        // BTreeMap keyed by kind keeps grouping order deterministic
        let mut groups: BTreeMap<IncidentKind, Vec<Score>> = BTreeMap::new();
        for score in scores {
            let kind = score.flagged_kind.unwrap_or(IncidentKind::SensorMalfunction);
            groups.entry(kind).or_default().push(score);
        }

        let mut incidents: Vec<Incident> = groups
            .into_iter()
            .map(|(kind, group)| self.build_incident(frame, kind, group))
            .collect();
        rank(&mut incidents);

        debug!(
            device = %frame.device_id,
            incidents = incidents.len(),
            "fusion tick complete"
        );
        incidents
    }

    fn build_incident(&self, frame: &FeatureFrame, kind: IncidentKind, group: Vec<Score>) -> Incident {
        let max_hint = group
            .iter()
            .map(|s| s.severity_hint)
            .max()
            .unwrap_or(Severity::Info);

        // Agreement is counted in independent scorers, not raw scores
        let agreeing: BTreeSet<ScoreKind> = group.iter().map(|s| s.kind).collect();
        let agreement = agreeing.len();

        let mut severity = max_hint;
        if agreement >= self.fusion.min_agreement_for_lift {
            severity = severity.lifted();
        }
        if frame.quality < self.fusion.low_quality_threshold {
            severity = severity.lifted();
        }

        let mean_confidence =
            group.iter().map(|s| s.confidence).sum::<f64>() / group.len() as f64;
        let agreement_factor =
            1.0 + self.fusion.agreement_confidence_step * (agreement.saturating_sub(1)) as f64;
        let confidence = (mean_confidence * agreement_factor).clamp(0.0, 1.0);

        let hours_to_threshold = group
            .iter()
            .find_map(|s| s.diagnostics.get("hours_to_threshold").copied());

        let mut metrics = BTreeMap::new();
        metrics.insert("frame.quality".to_string(), frame.quality);
        for (channel, value) in &frame.raw_latest {
            metrics.insert(format!("reading.{}", channel.as_str()), *value);
        }

        let recommendation = self.recommendations.lookup(kind);
        let observed_at = frame.emitted_at;
        let description = format!(
            "{} on {}: {} scorer(s) agree, max hint {}",
            kind.as_str(),
            frame.device_id,
            agreement,
            max_hint.as_str()
        );

        Incident {
            id: Incident::derive_id(&frame.device_id, kind, observed_at),
            subject: frame.device_id.clone(),
            kind,
            severity,
            confidence,
            observed_at,
            description,
            evidence: Evidence { scores: group, metrics, hours_to_threshold },
            auto_recoverable: recommendation.auto_recoverable,
            recommended_actions: recommendation.actions,
            cooldown_seconds: self.recovery.cooldown_for(kind).as_secs(),
        }
    }
}

/// Rank incidents by `(severity desc, confidence desc, observed_at asc)`,
/// breaking full ties by lexicographic subject id for determinism.
pub fn rank(incidents: &mut [Incident]) {
    incidents.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| a.observed_at.cmp(&b.observed_at))
            .then_with(|| a.subject.cmp(&b.subject))
            .then_with(|| a.kind.cmp(&b.kind))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap as StdHashMap;

    fn frame(quality: f64) -> FeatureFrame {
        FeatureFrame {
            device_id: "D2".to_string(),
            rows: Vec::new(),
            raw_latest: StdHashMap::new(),
            quality,
            degraded: false,
            emitted_at: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        }
    }

    fn score(kind: ScoreKind, severity: Severity, confidence: f64, flagged: IncidentKind) -> Score {
        Score {
            kind,
            value: 1.0,
            confidence,
            severity_hint: severity,
            flagged_kind: Some(flagged),
            diagnostics: BTreeMap::new(),
        }
    }

    fn fuser() -> AnomalyFuser {
        AnomalyFuser::new(FusionConfig::default(), RecoveryConfig::default())
    }

    #[test]
    fn agreeing_scorers_dedupe_to_one_incident_keeping_max_severity() {
        let incidents = fuser().fuse(
            &frame(1.0),
            vec![
                score(ScoreKind::Rule, Severity::Warning, 0.6, IncidentKind::TemperatureAnomaly),
                score(ScoreKind::OutlierTree, Severity::Error, 0.7, IncidentKind::TemperatureAnomaly),
            ],
        );
        assert_eq!(incidents.len(), 1);
        let incident = &incidents[0];
        assert_eq!(incident.kind, IncidentKind::TemperatureAnomaly);
        // Two agreeing scorers lift confidence, not severity
        assert_eq!(incident.severity, Severity::Error);
        let expected = (0.6 + 0.7) / 2.0 * 1.2;
        assert!((incident.confidence - expected).abs() < 1e-9);
        assert!(incident.confidence > 0.7, "agreement must raise confidence above either alone");
    }

    #[test]
    fn severity_never_drops_below_the_max_hint() {
        for hint in [Severity::Info, Severity::Warning, Severity::Error, Severity::Critical] {
            let incidents = fuser().fuse(
                &frame(1.0),
                vec![
                    score(ScoreKind::Rule, hint, 0.5, IncidentKind::PressureAnomaly),
                    score(ScoreKind::Statistical, Severity::Info, 0.2, IncidentKind::PressureAnomaly),
                ],
            );
            assert!(incidents[0].severity >= hint);
        }
    }

    #[test]
    fn broad_agreement_lifts_severity_one_level() {
        let incidents = fuser().fuse(
            &frame(1.0),
            vec![
                score(ScoreKind::Rule, Severity::Warning, 0.6, IncidentKind::PressureAnomaly),
                score(ScoreKind::Statistical, Severity::Warning, 0.6, IncidentKind::PressureAnomaly),
                score(ScoreKind::OutlierTree, Severity::Warning, 0.6, IncidentKind::PressureAnomaly),
            ],
        );
        assert_eq!(incidents[0].severity, Severity::Error);
    }

    #[test]
    fn low_quality_frames_lift_severity() {
        let incidents = fuser().fuse(
            &frame(0.3),
            vec![score(ScoreKind::Rule, Severity::Warning, 0.6, IncidentKind::DataQualityDrop)],
        );
        assert_eq!(incidents[0].severity, Severity::Error);
    }

    #[test]
    fn distinct_kinds_stay_separate_and_rank_by_severity() {
        let incidents = fuser().fuse(
            &frame(1.0),
            vec![
                score(ScoreKind::Rule, Severity::Warning, 0.9, IncidentKind::TemperatureAnomaly),
                score(ScoreKind::Rule, Severity::Critical, 0.9, IncidentKind::PressureAnomaly),
            ],
        );
        assert_eq!(incidents.len(), 2);
        assert_eq!(incidents[0].kind, IncidentKind::PressureAnomaly);
        assert_eq!(incidents[1].kind, IncidentKind::TemperatureAnomaly);
    }

    #[test]
    fn unclassified_scores_default_to_sensor_malfunction() {
        let mut s = score(ScoreKind::OutlierTree, Severity::Warning, 0.4, IncidentKind::SensorMalfunction);
        s.flagged_kind = None;
        let incidents = fuser().fuse(&frame(1.0), vec![s]);
        assert_eq!(incidents[0].kind, IncidentKind::SensorMalfunction);
    }

    #[test]
    fn non_recoverable_kinds_carry_the_flag() {
        let incidents = fuser().fuse(
            &frame(1.0),
            vec![score(ScoreKind::Statistical, Severity::Warning, 0.9, IncidentKind::PredictiveMaintenance)],
        );
        assert!(!incidents[0].auto_recoverable);
        assert!(incidents[0].recommended_actions.is_empty());
    }

    #[test]
    fn identical_inputs_produce_identical_incidents() {
        let scores = || {
            vec![
                score(ScoreKind::Rule, Severity::Critical, 0.9, IncidentKind::PressureAnomaly),
                score(ScoreKind::Statistical, Severity::Warning, 0.5, IncidentKind::TemperatureAnomaly),
            ]
        };
        let a = fuser().fuse(&frame(1.0), scores());
        let b = fuser().fuse(&frame(1.0), scores());
        let a_json = serde_json::to_string(&a).unwrap();
        let b_json = serde_json::to_string(&b).unwrap();
        assert_eq!(a_json, b_json);
    }

    #[test]
    fn full_ties_break_on_subject_id() {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let make = |subject: &str| Incident {
            id: Incident::derive_id(subject, IncidentKind::PressureAnomaly, at),
            subject: subject.to_string(),
            kind: IncidentKind::PressureAnomaly,
            severity: Severity::Critical,
            confidence: 0.9,
            observed_at: at,
            description: String::new(),
            evidence: Evidence::default(),
            auto_recoverable: true,
            recommended_actions: vec![ActionKind::Restart],
            cooldown_seconds: 600,
        };
        let mut incidents = vec![make("D9"), make("D1"), make("D5")];
        rank(&mut incidents);
        let subjects: Vec<_> = incidents.iter().map(|i| i.subject.as_str()).collect();
        assert_eq!(subjects, vec!["D1", "D5", "D9"]);
    }

    #[test]
    fn cooldown_comes_from_per_kind_configuration() {
        let incidents = fuser().fuse(
            &frame(1.0),
            vec![score(ScoreKind::Rule, Severity::Critical, 0.9, IncidentKind::PressureAnomaly)],
        );
        assert_eq!(incidents[0].cooldown_seconds, 600);
    }
}
