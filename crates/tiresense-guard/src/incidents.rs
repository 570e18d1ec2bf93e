//! Active-incident registry
//!
//! Tracks the currently active incident per `(subject, kind)`. Incidents
//! themselves are immutable; the registry refreshes a last-seen mark when a
//! condition is re-observed and produces exactly one [`Resolution`] when a
//! condition goes away, no matter how many paths race to resolve it.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tiresense_common::{Clock, Incident, IncidentKind, Resolution, ResolutionPath};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct ActiveEntry {
    incident: Incident,
    last_seen: DateTime<Utc>,
}

/// Registry of active incidents keyed by `(subject, kind)`
pub struct IncidentRegistry {
    clock: Arc<dyn Clock>,
    active: RwLock<BTreeMap<(String, IncidentKind), ActiveEntry>>,
}

impl IncidentRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        IncidentRegistry { clock, active: RwLock::new(BTreeMap::new()) }
    }

    /// Record an observation. Returns true when this is a new finding; a
    /// re-observation of an active condition refreshes its last-seen mark
    /// and replaces the stored incident only when severity escalated.
    pub fn upsert(&self, incident: &Incident) -> bool {
        let key = (incident.subject.clone(), incident.kind);
        let now = self.clock.wall_now();
        let mut active = self.active.write();
        match active.get_mut(&key) {
            Some(entry) => {
                entry.last_seen = now;
                if incident.severity > entry.incident.severity {
                    debug!(
                        subject = %incident.subject,
                        kind = incident.kind.as_str(),
                        "active incident escalated to {}",
                        incident.severity.as_str()
                    );
                    entry.incident = incident.clone();
                }
                false
            }
            None => {
                info!(
                    subject = %incident.subject,
                    kind = incident.kind.as_str(),
                    severity = incident.severity.as_str(),
                    "incident opened"
                );
                active.insert(key, ActiveEntry { incident: incident.clone(), last_seen: now });
                true
            }
        }
    }

    /// Resolve one incident by id, exactly once
    pub fn resolve_by_id(&self, id: Uuid, path: ResolutionPath) -> Option<Resolution> {
        let mut active = self.active.write();
        let key = active
            .iter()
            .find(|(_, entry)| entry.incident.id == id)
            .map(|(key, _)| key.clone())?;
        active.remove(&key);
        info!(incident = %id, ?path, "incident resolved");
        Some(Resolution { incident_id: id, resolved_at: self.clock.wall_now(), path })
    }

    /// Resolve every in-scope incident whose condition was not re-observed.
    ///
    /// `in_scope` limits resolution to the `(subject, kind)` space the
    /// caller actually checked this cycle; `present` is the set of
    /// conditions the cycle found. Out-of-scope incidents are left
    /// untouched.
    pub fn resolve_missing(
        &self,
        in_scope: impl Fn(&str, IncidentKind) -> bool,
        present: &BTreeSet<(String, IncidentKind)>,
    ) -> Vec<Resolution> {
        let now = self.clock.wall_now();
        let mut active = self.active.write();
        let gone: Vec<(String, IncidentKind)> = active
            .keys()
            .filter(|key| in_scope(&key.0, key.1) && !present.contains(*key))
            .cloned()
            .collect();

        gone.into_iter()
            .filter_map(|key| {
                active.remove(&key).map(|entry| {
                    info!(
                        subject = %key.0,
                        kind = key.1.as_str(),
                        "condition cleared, incident resolved"
                    );
                    Resolution {
                        incident_id: entry.incident.id,
                        resolved_at: now,
                        path: ResolutionPath::ConditionCleared,
                    }
                })
            })
            .collect()
    }

    /// Archive unresolved incidents older than the retention window
    pub fn archive_stale(&self, retention: Duration) -> Vec<Resolution> {
        let now = self.clock.wall_now();
        let cutoff = now
            - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::days(30));
        let mut active = self.active.write();
        let stale: Vec<(String, IncidentKind)> = active
            .iter()
            .filter(|(_, entry)| entry.incident.observed_at < cutoff)
            .map(|(key, _)| key.clone())
            .collect();

        stale
            .into_iter()
            .filter_map(|key| {
                active.remove(&key).map(|entry| Resolution {
                    incident_id: entry.incident.id,
                    resolved_at: now,
                    path: ResolutionPath::Archived,
                })
            })
            .collect()
    }

    /// Snapshot of active incidents in stable key order
    pub fn active(&self) -> Vec<Incident> {
        self.active.read().values().map(|entry| entry.incident.clone()).collect()
    }

    pub fn contains(&self, subject: &str, kind: IncidentKind) -> bool {
        self.active.read().contains_key(&(subject.to_string(), kind))
    }

    pub fn len(&self) -> usize {
        self.active.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiresense_common::{ActionKind, Evidence, Severity, VirtualClock};

    fn incident_at(
        subject: &str,
        kind: IncidentKind,
        severity: Severity,
        at: DateTime<Utc>,
    ) -> Incident {
        Incident {
            id: Incident::derive_id(subject, kind, at),
            subject: subject.to_string(),
            kind,
            severity,
            confidence: 0.9,
            observed_at: at,
            description: String::new(),
            evidence: Evidence::default(),
            auto_recoverable: true,
            recommended_actions: vec![ActionKind::Restart],
            cooldown_seconds: 300,
        }
    }

    fn registry() -> (Arc<VirtualClock>, IncidentRegistry) {
        let clock = Arc::new(VirtualClock::new());
        let registry = IncidentRegistry::new(clock.clone());
        (clock, registry)
    }

    fn incident(
        clock: &VirtualClock,
        subject: &str,
        kind: IncidentKind,
        severity: Severity,
    ) -> Incident {
        incident_at(subject, kind, severity, clock.wall_now())
    }

    #[test]
    fn reobservation_is_not_a_new_finding() {
        let (clock, registry) = registry();
        let i = incident(&clock, "D1", IncidentKind::PressureAnomaly, Severity::Critical);
        assert!(registry.upsert(&i));
        assert!(!registry.upsert(&i));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn escalation_replaces_the_stored_incident() {
        let (clock, registry) = registry();
        registry.upsert(&incident(&clock, "D1", IncidentKind::TemperatureAnomaly, Severity::Warning));
        registry.upsert(&incident(&clock, "D1", IncidentKind::TemperatureAnomaly, Severity::Critical));
        assert_eq!(registry.active()[0].severity, Severity::Critical);
    }

    #[test]
    fn resolve_by_id_is_exactly_once() {
        let (clock, registry) = registry();
        let i = incident(&clock, "D1", IncidentKind::PressureAnomaly, Severity::Critical);
        registry.upsert(&i);
        assert!(registry.resolve_by_id(i.id, ResolutionPath::ActionVerified).is_some());
        assert!(registry.resolve_by_id(i.id, ResolutionPath::ActionVerified).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn resolve_missing_respects_scope() {
        let (clock, registry) = registry();
        registry.upsert(&incident(&clock, "database", IncidentKind::HighConnections, Severity::Warning));
        registry.upsert(&incident(&clock, "D1", IncidentKind::PressureAnomaly, Severity::Critical));

        // A health scan covered only components, found nothing wrong
        let resolutions = registry.resolve_missing(|s, _| s == "database", &BTreeSet::new());
        assert_eq!(resolutions.len(), 1);
        // The device incident is out of scope and stays active
        assert!(registry.contains("D1", IncidentKind::PressureAnomaly));
    }

    #[test]
    fn present_conditions_stay_active() {
        let (clock, registry) = registry();
        registry.upsert(&incident(&clock, "database", IncidentKind::HighConnections, Severity::Warning));
        let mut present = BTreeSet::new();
        present.insert(("database".to_string(), IncidentKind::HighConnections));
        let resolutions = registry.resolve_missing(|_, _| true, &present);
        assert!(resolutions.is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn stale_incidents_are_archived() {
        let (clock, registry) = registry();
        registry.upsert(&incident(&clock, "D1", IncidentKind::PressureAnomaly, Severity::Warning));
        clock.advance(Duration::from_secs(7200));
        let archived = registry.archive_stale(Duration::from_secs(3600));
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].path, ResolutionPath::Archived);
        assert!(registry.is_empty());
    }
}
