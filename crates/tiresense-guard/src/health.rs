//! System health scoring
//!
//! The health score reflects the current active-incident set: 100 with no
//! incidents, each incident subtracting ten times its severity weight,
//! floored at 0. Any Emergency zeroes the score outright.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tiresense_common::{ComponentStatus, HealthSnapshot, Incident, Severity};

/// Compute a point-in-time health snapshot from the active incident set
pub fn health_snapshot(taken_at: DateTime<Utc>, active: &[Incident]) -> HealthSnapshot {
    let score = if active.is_empty() {
        100.0
    } else if active.iter().any(|i| i.severity == Severity::Emergency) {
        0.0
    } else {
        let impact: f64 = active.iter().map(|i| i.severity.weight()).sum();
        (100.0 - impact * 10.0).max(0.0)
    };

    let mut components: BTreeMap<String, ComponentStatus> = BTreeMap::new();
    for incident in active {
        let status = if incident.severity >= Severity::Critical {
            ComponentStatus::Failed
        } else if incident.severity >= Severity::Warning {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        };
        components
            .entry(incident.subject.clone())
            .and_modify(|current| {
                if status_rank(status) > status_rank(*current) {
                    *current = status;
                }
            })
            .or_insert(status);
    }

    HealthSnapshot { taken_at, score, components, active_incidents: active.len() }
}

fn status_rank(status: ComponentStatus) -> u8 {
    match status {
        ComponentStatus::Healthy => 0,
        ComponentStatus::Unknown => 1,
        ComponentStatus::Degraded => 2,
        ComponentStatus::Failed => 3,
    }
}
