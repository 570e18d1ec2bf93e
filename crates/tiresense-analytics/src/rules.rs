//! Declarative rule scorer
//!
//! A static table maps predicates over the newest reading's measured
//! channel values to severity hints. Rules see pre-clip values: a tire
//! reporting 150 hPa must trip the low-pressure rule even though the
//! pipeline clips the stored value to the channel floor.

use crate::scorer::Scorer;
use std::collections::BTreeMap;
use tiresense_common::{
    Channel, FeatureFrame, IncidentKind, Result, Score, ScoreKind, Severity,
};

/// Predicate over one channel value
#[derive(Debug, Clone, Copy)]
pub enum RulePredicate {
    Below(f64),
    Above(f64),
}

impl RulePredicate {
    pub fn holds(&self, value: f64) -> bool {
        match self {
            RulePredicate::Below(limit) => value < *limit,
            RulePredicate::Above(limit) => value > *limit,
        }
    }
}

/// One row of the rule table
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub name: &'static str,
    pub channel: Channel,
    pub predicate: RulePredicate,
    pub severity: Severity,
    pub kind: IncidentKind,
}

/// Default rule table for tire telemetry
pub fn default_rules() -> Vec<Rule> {
    vec![
        Rule {
            name: "pressure_critical_low",
            channel: Channel::Pressure,
            predicate: RulePredicate::Below(200.0),
            severity: Severity::Critical,
            kind: IncidentKind::PressureAnomaly,
        },
        Rule {
            name: "pressure_low",
            channel: Channel::Pressure,
            predicate: RulePredicate::Below(850.0),
            severity: Severity::Warning,
            kind: IncidentKind::PressureAnomaly,
        },
        Rule {
            name: "pressure_high",
            channel: Channel::Pressure,
            predicate: RulePredicate::Above(1150.0),
            severity: Severity::Warning,
            kind: IncidentKind::PressureAnomaly,
        },
        Rule {
            name: "temperature_critical",
            channel: Channel::Temperature,
            predicate: RulePredicate::Above(95.0),
            severity: Severity::Critical,
            kind: IncidentKind::TemperatureAnomaly,
        },
        Rule {
            name: "temperature_high",
            channel: Channel::Temperature,
            predicate: RulePredicate::Above(80.0),
            severity: Severity::Warning,
            kind: IncidentKind::TemperatureAnomaly,
        },
        Rule {
            name: "temperature_freeze",
            channel: Channel::Temperature,
            predicate: RulePredicate::Below(-30.0),
            severity: Severity::Warning,
            kind: IncidentKind::TemperatureAnomaly,
        },
        Rule {
            name: "battery_critical",
            channel: Channel::BatteryVoltage,
            predicate: RulePredicate::Below(2.8),
            severity: Severity::Critical,
            kind: IncidentKind::BatteryDegradation,
        },
        Rule {
            name: "battery_low",
            channel: Channel::BatteryVoltage,
            predicate: RulePredicate::Below(3.0),
            severity: Severity::Error,
            kind: IncidentKind::BatteryDegradation,
        },
        Rule {
            name: "signal_weak",
            channel: Channel::SignalStrength,
            predicate: RulePredicate::Below(-100.0),
            severity: Severity::Warning,
            kind: IncidentKind::CommunicationIssue,
        },
    ]
}

/// Deterministic, side-effect-free rule evaluation
pub struct RuleScorer {
    rules: Vec<Rule>,
    confidence: f64,
}

impl RuleScorer {
    pub fn new(rules: Vec<Rule>) -> Self {
        RuleScorer { rules, confidence: 0.9 }
    }

    pub fn with_defaults() -> Self {
        Self::new(default_rules())
    }
}

impl Scorer for RuleScorer {
    fn name(&self) -> &'static str {
        "rule"
    }

    fn kind(&self) -> ScoreKind {
        ScoreKind::Rule
    }

    fn score(&self, frame: &FeatureFrame) -> Result<Vec<Score>> {
        // Highest-severity match per incident kind; a second weaker match
        // for the same kind adds nothing.
        let mut best: BTreeMap<IncidentKind, (&Rule, f64)> = BTreeMap::new();
        for rule in &self.rules {
            let Some(&value) = frame.raw_latest.get(&rule.channel) else {
                continue;
            };
            if !rule.predicate.holds(value) {
                continue;
            }
            match best.get(&rule.kind) {
                Some((current, _)) if current.severity >= rule.severity => {}
                _ => {
                    best.insert(rule.kind, (rule, value));
                }
            }
        }

        Ok(best
            .into_iter()
            .map(|(kind, (rule, value))| {
                let mut diagnostics = BTreeMap::new();
                diagnostics.insert(format!("rule.{}", rule.name), value);
                Score {
                    kind: ScoreKind::Rule,
                    value,
                    confidence: self.confidence,
                    severity_hint: rule.severity,
                    flagged_kind: Some(kind),
                    diagnostics,
                }
            })
            .collect())
    }
}
