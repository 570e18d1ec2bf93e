//! Probe interface and rule-table evaluation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tiresense_common::config::{ProbeThresholds, RecoveryConfig};
use tiresense_common::{
    ActionKind, Evidence, Incident, IncidentKind, Result, Severity,
};

/// Result of one probe check: a metrics snapshot plus any incidents the
/// probe's rule table raised.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub component: String,
    pub metrics: HashMap<String, f64>,
    pub incidents: Vec<Incident>,
}

impl ProbeReport {
    pub fn healthy(component: &str, metrics: HashMap<String, f64>) -> Self {
        ProbeReport { component: component.to_string(), metrics, incidents: Vec::new() }
    }
}

/// A subsystem-specific health check.
///
/// Probes are independently cancellable: the scanner races every check
/// against its configured deadline and converts a timeout or error into a
/// Critical `unreachable` incident for the component.
#[async_trait]
pub trait Probe: Send + Sync {
    fn component(&self) -> &'static str;

    async fn check(&self) -> Result<ProbeReport>;

    /// Candidate actions when this probe cannot reach its subsystem.
    /// Probes whose remediation path runs through the very system that is
    /// down override this to return nothing.
    fn unreachable_actions(&self) -> Vec<ActionKind> {
        vec![ActionKind::Restart, ActionKind::Failover]
    }
}

/// One row of a probe's rule table. Predicates are named functions over
/// the metrics snapshot so each can be unit tested in isolation.
pub struct ProbeRule {
    pub name: &'static str,
    pub kind: IncidentKind,
    pub severity: Severity,
    pub actions: &'static [ActionKind],
    pub auto_recoverable: bool,
    pub predicate: fn(&HashMap<String, f64>, &ProbeThresholds) -> bool,
}

/// Evaluate a rule table against a metrics snapshot, producing incidents
pub fn evaluate_rules(
    component: &str,
    metrics: &HashMap<String, f64>,
    rules: &[ProbeRule],
    thresholds: &ProbeThresholds,
    recovery: &RecoveryConfig,
    observed_at: DateTime<Utc>,
) -> Vec<Incident> {
    rules
        .iter()
        .filter(|rule| (rule.predicate)(metrics, thresholds))
        .map(|rule| {
            let mut snapshot = BTreeMap::new();
            for (name, value) in metrics {
                snapshot.insert(name.clone(), *value);
            }
            Incident {
                id: Incident::derive_id(component, rule.kind, observed_at),
                subject: component.to_string(),
                kind: rule.kind,
                severity: rule.severity,
                confidence: 0.9,
                observed_at,
                description: format!("{component}: {}", rule.name),
                evidence: Evidence { scores: Vec::new(), metrics: snapshot, hours_to_threshold: None },
                auto_recoverable: rule.auto_recoverable,
                recommended_actions: rule.actions.to_vec(),
                cooldown_seconds: recovery.cooldown_for(rule.kind).as_secs(),
            }
        })
        .collect()
}

/// Critical incident raised when a probe times out or errors
pub fn unreachable_incident(
    component: &str,
    detail: &str,
    actions: Vec<ActionKind>,
    recovery: &RecoveryConfig,
    observed_at: DateTime<Utc>,
) -> Incident {
    Incident {
        id: Incident::derive_id(component, IncidentKind::Unreachable, observed_at),
        subject: component.to_string(),
        kind: IncidentKind::Unreachable,
        severity: Severity::Critical,
        confidence: 1.0,
        observed_at,
        description: format!("{component} unreachable: {detail}"),
        evidence: Evidence::default(),
        auto_recoverable: !actions.is_empty(),
        recommended_actions: actions,
        cooldown_seconds: recovery.cooldown_for(IncidentKind::Unreachable).as_secs(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn high_cpu(metrics: &HashMap<String, f64>, t: &ProbeThresholds) -> bool {
        metrics.get("cpu_usage_percent").copied().unwrap_or(0.0) > t.host_cpu_percent
    }

    const RULES: [ProbeRule; 1] = [ProbeRule {
        name: "high_cpu_usage",
        kind: IncidentKind::CpuPressure,
        severity: Severity::Warning,
        actions: &[ActionKind::ScaleUp],
        auto_recoverable: true,
        predicate: high_cpu,
    }];

    #[test]
    fn rules_fire_only_past_their_threshold() {
        let thresholds = ProbeThresholds::default();
        let recovery = RecoveryConfig::default();
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();

        let mut metrics = HashMap::new();
        metrics.insert("cpu_usage_percent".to_string(), 50.0);
        assert!(evaluate_rules("host", &metrics, &RULES, &thresholds, &recovery, at).is_empty());

        metrics.insert("cpu_usage_percent".to_string(), 92.0);
        let incidents = evaluate_rules("host", &metrics, &RULES, &thresholds, &recovery, at);
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].kind, IncidentKind::CpuPressure);
        assert_eq!(incidents[0].recommended_actions, vec![ActionKind::ScaleUp]);
        assert_eq!(incidents[0].evidence.metrics["cpu_usage_percent"], 92.0);
    }

    #[test]
    fn unreachable_without_actions_is_not_auto_recoverable() {
        let recovery = RecoveryConfig::default();
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        let incident = unreachable_incident("orchestrator", "deadline elapsed", Vec::new(), &recovery, at);
        assert_eq!(incident.severity, Severity::Critical);
        assert!(!incident.auto_recoverable);
        assert!(incident.recommended_actions.is_empty());
    }
}
