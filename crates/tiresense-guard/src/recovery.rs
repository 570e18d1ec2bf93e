//! Recovery engine
//!
//! Translates ranked incidents into cooldown-governed actions against the
//! orchestrator, cache and storage capabilities. The cooldown ledger is
//! the single serialization point: one claim per `(target, kind)` admits
//! one action, so dispatches for distinct keys run in parallel while a key
//! can never have two actions in flight.

use crate::incidents::IncidentRegistry;
use crate::notify::NotificationHub;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tiresense_common::bus::Topic;
use tiresense_common::capabilities::{CacheStore, Orchestrator, Storage, StorageTable};
use tiresense_common::config::{RecoveryConfig, RetentionConfig};
use tiresense_common::{
    ActionKind, Clock, CooldownKey, CooldownLedger, Error, Incident, IncidentKind,
    RecoveryRecord, ResolutionPath, Result,
};
use tracing::{debug, info, warn};

/// Whether a previously observed condition still holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionStatus {
    Present,
    Absent,
    /// The checker has no way to decide; leave resolution to the scan cycle
    Unknown,
}

/// Re-checks a condition during post-action verification
#[async_trait]
pub trait ConditionChecker: Send + Sync {
    async fn condition(&self, subject: &str, kind: IncidentKind) -> ConditionStatus;
}

/// A claimed, ready-to-dispatch action for one incident
#[derive(Debug, Clone)]
pub struct RecoveryPlan {
    pub incident: Incident,
    pub action: ActionKind,
}

/// Per-action success statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionStats {
    pub succeeded: u32,
    pub total: u32,
}

/// External dependencies of the recovery engine
pub struct RecoveryDeps {
    pub clock: Arc<dyn Clock>,
    pub ledger: Arc<CooldownLedger>,
    pub orchestrator: Arc<dyn Orchestrator>,
    pub cache: Arc<dyn CacheStore>,
    pub storage: Arc<dyn Storage>,
    pub notifications: Arc<NotificationHub>,
    pub registry: Arc<IncidentRegistry>,
    pub checker: Arc<dyn ConditionChecker>,
    pub recoveries: Topic<RecoveryRecord>,
}

/// The recovery engine
pub struct RecoveryEngine {
    cfg: RecoveryConfig,
    retention: RetentionConfig,
    namespace: String,
    /// Minimum hold between scaling events, shared with the predictive scaler
    scale_hold: Duration,
    deps: RecoveryDeps,
    history: Mutex<VecDeque<RecoveryRecord>>,
    stats: Mutex<HashMap<ActionKind, ActionStats>>,
}

impl RecoveryEngine {
    pub fn new(
        cfg: RecoveryConfig,
        retention: RetentionConfig,
        namespace: String,
        scale_hold: Duration,
        deps: RecoveryDeps,
    ) -> Self {
        RecoveryEngine {
            cfg,
            retention,
            namespace,
            scale_hold,
            deps,
            history: Mutex::new(VecDeque::new()),
            stats: Mutex::new(HashMap::new()),
        }
    }

    /// Plan and execute recovery for one tick's ranked incidents, spawning
    /// post-action verification for every successful dispatch.
    pub async fn run_cycle(self: Arc<Self>, incidents: &[Incident]) -> Vec<RecoveryRecord> {
        let plans = self.plan(incidents).await;
        if plans.is_empty() {
            return Vec::new();
        }
        let records = self.execute(&plans).await;

        for (plan, record) in plans.iter().zip(records.iter()) {
            if record.success {
                let engine = Arc::clone(&self);
                let plan = plan.clone();
                tokio::spawn(async move {
                    engine.verify(&plan).await;
                });
            }
        }
        records
    }

    /// Decision procedure, highest rank first: skip non-recoverable
    /// incidents, gate on the cooldown ledger, pick the first recommended
    /// action whose preconditions hold.
    pub async fn plan(&self, incidents: &[Incident]) -> Vec<RecoveryPlan> {
        if !self.cfg.enabled {
            return Vec::new();
        }

        let mut plans = Vec::new();
        for incident in incidents {
            if !incident.auto_recoverable {
                debug!(
                    subject = %incident.subject,
                    kind = incident.kind.as_str(),
                    "not auto-recoverable, surfaced only"
                );
                continue;
            }

            let Some(action) = self.select_action(incident).await else {
                debug!(
                    subject = %incident.subject,
                    kind = incident.kind.as_str(),
                    "no applicable action"
                );
                continue;
            };

            let key = CooldownKey::new(incident.subject.clone(), incident.kind.as_str());
            if !self.deps.ledger.check_and_claim(&key, incident.cooldown()) {
                debug!(key = %key, "cooldown active, dispatch skipped");
                continue;
            }

            plans.push(RecoveryPlan { incident: incident.clone(), action });
        }

        if !plans.is_empty() {
            info!(actions = plans.len(), "recovery plan assembled");
        }
        plans
    }

    /// Dispatch all plans concurrently; the ledger already guarantees the
    /// plans hold distinct keys.
    pub async fn execute(&self, plans: &[RecoveryPlan]) -> Vec<RecoveryRecord> {
        futures::future::join_all(plans.iter().map(|plan| self.execute_plan(plan))).await
    }

    /// Post-action verification: wait, re-check the condition, and mark
    /// the incident resolved when it is gone. A still-present condition is
    /// left alone; the cooldown prevents an immediate retry.
    pub async fn verify(&self, plan: &RecoveryPlan) {
        self.deps.clock.sleep(Duration::from_secs(self.cfg.verification_delay_seconds)).await;
        match self.deps.checker.condition(&plan.incident.subject, plan.incident.kind).await {
            ConditionStatus::Absent => {
                if let Some(resolution) =
                    self.deps.registry.resolve_by_id(plan.incident.id, ResolutionPath::ActionVerified)
                {
                    if let Err(e) = self.deps.storage.append_resolution(&resolution).await {
                        warn!(error = %e, "failed to persist resolution");
                    }
                    info!(
                        subject = %plan.incident.subject,
                        action = plan.action.as_str(),
                        "recovery verified, incident resolved"
                    );
                }
            }
            ConditionStatus::Present => {
                debug!(
                    subject = %plan.incident.subject,
                    "condition persists after recovery; cooldown holds further attempts"
                );
            }
            ConditionStatus::Unknown => {}
        }
    }

    /// First recommended action whose preconditions hold
    async fn select_action(&self, incident: &Incident) -> Option<ActionKind> {
        for &action in &incident.recommended_actions {
            match self.precondition(action, &incident.subject).await {
                Ok(true) => return Some(action),
                Ok(false) => {
                    info!(
                        action = action.as_str(),
                        target = %incident.subject,
                        "action declined by precondition"
                    );
                }
                Err(e) => {
                    debug!(action = action.as_str(), error = %e, "precondition check failed");
                }
            }
        }
        None
    }

    async fn precondition(&self, action: ActionKind, target: &str) -> Result<bool> {
        match action {
            ActionKind::ScaleUp => {
                if self.scale_hold_active(target) {
                    return Ok(false);
                }
                let current = self.current_replicas(target).await?;
                Ok(current < self.cfg.replica_bounds(target).max_replicas)
            }
            ActionKind::ScaleDown => {
                if self.scale_hold_active(target) {
                    return Ok(false);
                }
                let current = self.current_replicas(target).await?;
                Ok(current > self.cfg.replica_bounds(target).min_replicas)
            }
            _ => Ok(true),
        }
    }

    fn scale_hold_active(&self, target: &str) -> bool {
        self.deps
            .ledger
            .remaining(&CooldownKey::new(target.to_string(), "scale"))
            .is_some()
    }

    async fn current_replicas(&self, target: &str) -> Result<u32> {
        let workloads = self.deps.orchestrator.list_workloads(&self.namespace).await?;
        workloads
            .iter()
            .find(|w| w.name == target)
            .map(|w| w.current_replicas)
            .ok_or_else(|| Error::Precondition(format!("workload {target} not found")))
    }

    async fn execute_plan(&self, plan: &RecoveryPlan) -> RecoveryRecord {
        let started_at = self.deps.clock.wall_now();
        let t0 = self.deps.clock.now();
        let deadline = self.cfg.action_deadline(plan.action);

        let outcome: Result<(String, Vec<String>)> = tokio::select! {
            result = self.dispatch(plan.action, &plan.incident.subject) => result,
            _ = self.deps.clock.sleep(deadline) => Err(Error::Timeout(format!(
                "action {} exceeded its {:?} deadline", plan.action.as_str(), deadline
            ))),
        };

        let duration = self.deps.clock.now().saturating_sub(t0);
        let record = match outcome {
            Ok((message, side_effects)) => {
                info!(
                    action = plan.action.as_str(),
                    target = %plan.incident.subject,
                    duration_ms = duration.as_millis() as u64,
                    "recovery action succeeded"
                );
                RecoveryRecord {
                    incident_id: Some(plan.incident.id),
                    action: plan.action,
                    target: plan.incident.subject.clone(),
                    started_at,
                    duration_ms: duration.as_millis() as u64,
                    success: true,
                    message,
                    side_effects,
                }
            }
            Err(e) => {
                warn!(
                    action = plan.action.as_str(),
                    target = %plan.incident.subject,
                    error = %e,
                    "recovery action failed"
                );
                RecoveryRecord {
                    incident_id: Some(plan.incident.id),
                    action: plan.action,
                    target: plan.incident.subject.clone(),
                    started_at,
                    duration_ms: duration.as_millis() as u64,
                    success: false,
                    message: e.to_string(),
                    side_effects: Vec::new(),
                }
            }
        };

        self.record(&record).await;
        record
    }

    async fn record(&self, record: &RecoveryRecord) {
        {
            let mut stats = self.stats.lock();
            let entry = stats.entry(record.action).or_default();
            entry.total += 1;
            if record.success {
                entry.succeeded += 1;
            }
        }
        {
            let mut history = self.history.lock();
            history.push_back(record.clone());
            while history.len() > self.cfg.history_limit {
                history.pop_front();
            }
        }

        if let Err(e) = self.deps.storage.append_recovery(record).await {
            warn!(error = %e, "failed to persist recovery record");
        }
        self.deps.recoveries.publish(record.clone());
        if !record.success {
            self.deps.notifications.recovery_failed(record);
        }
    }

    async fn dispatch(&self, action: ActionKind, target: &str) -> Result<(String, Vec<String>)> {
        match action {
            ActionKind::Restart => {
                self.deps.orchestrator.restart_workload(target).await?;
                Ok((format!("rolling restart triggered for {target}"), Vec::new()))
            }
            ActionKind::ScaleUp => self.scale(target, 1).await,
            ActionKind::ScaleDown => self.scale(target, -1).await,
            ActionKind::ClearCache => {
                self.deps.cache.flush_all().await?;
                Ok(("cache flushed".to_string(), vec!["cached entries dropped".to_string()]))
            }
            ActionKind::RotateLogs => {
                let cutoff = self.retention_cutoff();
                let deleted =
                    self.deps.storage.prune_before(StorageTable::Readings, cutoff).await?;
                Ok((
                    format!("removed {deleted} aged records"),
                    vec![format!("{deleted} rows deleted")],
                ))
            }
            ActionKind::UpdateConfig => {
                // A rolling restart picks up the latest configuration
                self.deps.orchestrator.restart_workload(target).await?;
                Ok((
                    format!("configuration refresh requested for {target}"),
                    vec!["workload restart scheduled".to_string()],
                ))
            }
            ActionKind::Failover => {
                self.deps
                    .cache
                    .set(
                        &format!("tiresense:failover:{target}"),
                        "active",
                        Some(Duration::from_secs(600)),
                    )
                    .await?;
                Ok((
                    format!("traffic routed away from {target}"),
                    vec!["failover flag set".to_string()],
                ))
            }
            ActionKind::CircuitBreak => {
                self.deps
                    .cache
                    .set(
                        &format!("tiresense:circuit:{target}"),
                        "open",
                        Some(Duration::from_secs(300)),
                    )
                    .await?;
                Ok((
                    format!("circuit opened for {target}"),
                    vec!["requests short-circuit for 300s".to_string()],
                ))
            }
            ActionKind::CleanupResources => {
                let cutoff = self.retention_cutoff();
                let mut side_effects = Vec::new();
                let readings =
                    self.deps.storage.prune_before(StorageTable::Readings, cutoff).await?;
                if readings > 0 {
                    side_effects.push(format!("{readings} aged readings removed"));
                }
                let recoveries =
                    self.deps.storage.prune_before(StorageTable::Recoveries, cutoff).await?;
                if recoveries > 0 {
                    side_effects.push(format!("{recoveries} aged recovery records removed"));
                }
                self.deps.storage.run_maintenance(StorageTable::Readings).await?;
                Ok((format!("cleanup complete for {target}"), side_effects))
            }
            ActionKind::RebalanceLoad => {
                self.deps
                    .cache
                    .set(
                        &format!("tiresense:weights:{target}"),
                        "rebalanced",
                        Some(Duration::from_secs(600)),
                    )
                    .await?;
                Ok((
                    format!("routing weights rebalanced for {target}"),
                    vec!["weight table rewritten".to_string()],
                ))
            }
        }
    }

    async fn scale(&self, target: &str, delta: i64) -> Result<(String, Vec<String>)> {
        let bounds = self.cfg.replica_bounds(target);
        let current = self.current_replicas(target).await?;
        let desired = (i64::from(current) + delta)
            .clamp(i64::from(bounds.min_replicas), i64::from(bounds.max_replicas))
            as u32;
        if desired == current {
            return Err(Error::Precondition(format!(
                "{target} already at replica bound ({current})"
            )));
        }

        // Scaling shares a hold key with the predictive scaler so reactive
        // and proactive paths cannot fight over one deployment.
        let hold_key = CooldownKey::new(target.to_string(), "scale");
        if !self.deps.ledger.check_and_claim(&hold_key, self.scale_hold) {
            return Err(Error::Precondition(format!("scale hold active for {target}")));
        }

        self.deps.orchestrator.scale_workload(target, desired).await?;
        Ok((
            format!("scaled {target} from {current} to {desired}"),
            vec![format!("replicas {current} -> {desired}")],
        ))
    }

    fn retention_cutoff(&self) -> chrono::DateTime<chrono::Utc> {
        self.deps.clock.wall_now() - chrono::Duration::days(i64::from(self.retention.days))
    }

    /// Per-action success statistics over the engine's lifetime
    pub fn action_stats(&self) -> HashMap<ActionKind, ActionStats> {
        self.stats.lock().clone()
    }

    /// Recent recovery history, oldest first
    pub fn history(&self) -> Vec<RecoveryRecord> {
        self.history.lock().iter().cloned().collect()
    }
}
