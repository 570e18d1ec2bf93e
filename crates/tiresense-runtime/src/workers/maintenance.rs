//! Maintenance worker
//!
//! Periodic housekeeping against storage and the in-memory structures:
//! retention sweeps, vacuum/analyze per table, window eviction, cooldown
//! ledger cleanup, archival of stale incidents, and model refits.

use crate::supervisor::{PanicPolicy, TaskPolicy, Worker};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tiresense_analytics::{FeaturePipeline, OutlierTreeScorer};
use tiresense_common::capabilities::{Storage, StorageTable};
use tiresense_common::config::RetentionConfig;
use tiresense_common::{CancelToken, Clock, CooldownLedger, Result};
use tiresense_guard::IncidentRegistry;
use tracing::{debug, info, warn};

pub struct MaintenanceWorker {
    storage: Arc<dyn Storage>,
    registry: Arc<IncidentRegistry>,
    pipeline: Arc<FeaturePipeline>,
    ledger: Arc<CooldownLedger>,
    outlier: Arc<OutlierTreeScorer>,
    retention: RetentionConfig,
    clock: Arc<dyn Clock>,
    period: Duration,
}

impl MaintenanceWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: Arc<dyn Storage>,
        registry: Arc<IncidentRegistry>,
        pipeline: Arc<FeaturePipeline>,
        ledger: Arc<CooldownLedger>,
        outlier: Arc<OutlierTreeScorer>,
        retention: RetentionConfig,
        clock: Arc<dyn Clock>,
        period: Duration,
    ) -> Self {
        MaintenanceWorker { storage, registry, pipeline, ledger, outlier, retention, clock, period }
    }
}

#[async_trait]
impl Worker for MaintenanceWorker {
    fn name(&self) -> &'static str {
        "maintenance"
    }

    fn policy(&self) -> TaskPolicy {
        TaskPolicy {
            period: self.period,
            jitter: Duration::from_secs(5),
            on_panic: PanicPolicy::Restart,
            ..TaskPolicy::default()
        }
    }

    async fn tick(&self, cancel: &CancelToken) -> Result<()> {
        let cutoff =
            self.clock.wall_now() - chrono::Duration::days(i64::from(self.retention.days));

        let mut pruned_total = 0u64;
        for table in StorageTable::ALL {
            if cancel.is_cancelled() {
                return Ok(());
            }
            match self.storage.prune_before(table, cutoff).await {
                Ok(pruned) => pruned_total += pruned,
                Err(e) => warn!(table = table.as_str(), error = %e, "retention sweep failed"),
            }
            if let Err(e) = self.storage.run_maintenance(table).await {
                warn!(table = table.as_str(), error = %e, "table maintenance failed");
            }
        }

        let retention_window =
            Duration::from_secs(u64::from(self.retention.days) * 24 * 3600);
        let archived = self.registry.archive_stale(retention_window);
        for resolution in &archived {
            if let Err(e) = self.storage.append_resolution(resolution).await {
                warn!(error = %e, "archival resolution not persisted");
            }
        }

        self.pipeline.evict_stale();
        let purged_cooldowns = self.ledger.purge_expired();

        // Background refits keep the model-side scorers current
        let refit = self.outlier.refit();
        let renormalized = self.pipeline.refit_normalizer();

        if pruned_total > 0 || !archived.is_empty() {
            info!(
                pruned = pruned_total,
                archived = archived.len(),
                purged_cooldowns,
                "maintenance sweep complete"
            );
        } else {
            debug!(purged_cooldowns, refit, renormalized, "maintenance sweep complete");
        }
        Ok(())
    }
}
