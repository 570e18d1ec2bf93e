//! Inference worker
//!
//! One tick per scoring period: for every warm device, run the scorer
//! set over its feature frame, fuse the scores into incidents, and feed
//! new findings into the registry, storage, the event bus and the
//! notification hub. Conditions no longer flagged for a device resolve on
//! the same tick.

use crate::supervisor::{PanicPolicy, TaskPolicy, Worker};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tiresense_analytics::{AnomalyFuser, FeaturePipeline, Scorer};
use tiresense_common::bus::EventBus;
use tiresense_common::capabilities::Storage;
use tiresense_common::{CancelToken, IncidentKind, Result};
use tiresense_guard::{IncidentRegistry, NotificationHub};
use tracing::{debug, warn};

pub struct InferenceWorker {
    pipeline: Arc<FeaturePipeline>,
    scorers: Vec<Arc<dyn Scorer>>,
    fuser: Arc<AnomalyFuser>,
    registry: Arc<IncidentRegistry>,
    storage: Arc<dyn Storage>,
    bus: EventBus,
    notifications: Arc<NotificationHub>,
    period: Duration,
}

impl InferenceWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pipeline: Arc<FeaturePipeline>,
        scorers: Vec<Arc<dyn Scorer>>,
        fuser: Arc<AnomalyFuser>,
        registry: Arc<IncidentRegistry>,
        storage: Arc<dyn Storage>,
        bus: EventBus,
        notifications: Arc<NotificationHub>,
        period: Duration,
    ) -> Self {
        InferenceWorker { pipeline, scorers, fuser, registry, storage, bus, notifications, period }
    }
}

#[async_trait]
impl Worker for InferenceWorker {
    fn name(&self) -> &'static str {
        "inference"
    }

    fn dependencies(&self) -> Vec<&'static str> {
        vec!["ingest"]
    }

    fn policy(&self) -> TaskPolicy {
        TaskPolicy {
            period: self.period,
            jitter: Duration::from_millis(100),
            on_panic: PanicPolicy::Escalate,
            ..TaskPolicy::default()
        }
    }

    async fn tick(&self, cancel: &CancelToken) -> Result<()> {
        for device in self.pipeline.devices() {
            if cancel.is_cancelled() {
                break;
            }

            // Cold-start devices have no frame and are skipped entirely
            let Some(frame) = self.pipeline.frame(&device) else {
                continue;
            };

            let mut scores = Vec::new();
            for scorer in &self.scorers {
                match scorer.score(&frame) {
                    Ok(mut produced) => scores.append(&mut produced),
                    Err(e) => {
                        warn!(scorer = scorer.name(), device = %device, error = %e, "scorer failed");
                    }
                }
            }

            let incidents = self.fuser.fuse(&frame, scores);
            let present: BTreeSet<(String, IncidentKind)> =
                incidents.iter().map(|i| (i.subject.clone(), i.kind)).collect();

            for incident in &incidents {
                if self.registry.upsert(incident) {
                    if let Err(e) = self.storage.append_incident(incident).await {
                        warn!(error = %e, "incident not persisted");
                    }
                    self.bus.incidents.publish(incident.clone());
                    self.notifications.incident(incident);
                }
            }

            // Device conditions not re-flagged this tick are gone
            let resolutions = self
                .registry
                .resolve_missing(|subject, kind| subject == device && kind.is_device_anomaly(), &present);
            for resolution in &resolutions {
                if let Err(e) = self.storage.append_resolution(resolution).await {
                    warn!(error = %e, "resolution not persisted");
                }
            }
            if !incidents.is_empty() || !resolutions.is_empty() {
                debug!(
                    device = %device,
                    opened = incidents.len(),
                    resolved = resolutions.len(),
                    "inference tick"
                );
            }
        }
        Ok(())
    }
}
