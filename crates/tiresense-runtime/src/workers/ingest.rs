//! Ingest worker
//!
//! Pulls raw readings from the ingress capability, feeds the feature
//! pipeline, and persists accepted readings one transactional batch at a
//! time. On cancellation the current batch is finished and persisted, so
//! storage never sees half a batch.

use crate::supervisor::{PanicPolicy, TaskPolicy, Worker};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tiresense_analytics::{FeaturePipeline, IngestOutcome};
use tiresense_common::capabilities::{ReadingSource, Storage};
use tiresense_common::{with_retries, CancelToken, Clock, Result, RetryPolicy};
use tracing::{debug, warn};

pub struct IngestWorker {
    source: Arc<dyn ReadingSource>,
    pipeline: Arc<FeaturePipeline>,
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    batch_size: usize,
    period: Duration,
}

impl IngestWorker {
    pub fn new(
        source: Arc<dyn ReadingSource>,
        pipeline: Arc<FeaturePipeline>,
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        batch_size: usize,
        period: Duration,
    ) -> Self {
        IngestWorker {
            source,
            pipeline,
            storage,
            clock,
            retry: RetryPolicy::default(),
            batch_size,
            period,
        }
    }
}

#[async_trait]
impl Worker for IngestWorker {
    fn name(&self) -> &'static str {
        "ingest"
    }

    fn policy(&self) -> TaskPolicy {
        TaskPolicy {
            period: self.period,
            jitter: Duration::from_millis(50),
            on_panic: PanicPolicy::Escalate,
            ..TaskPolicy::default()
        }
    }

    async fn tick(&self, cancel: &CancelToken) -> Result<()> {
        // Transient ingress hiccups are retried within the tick; anything
        // else surfaces to the supervisor's failure counter
        let batch = with_retries(&self.clock, &self.retry, "ingest.pull", || {
            self.source.pull(self.batch_size)
        })
        .await?;
        if batch.is_empty() {
            return Ok(());
        }
        debug!(readings = batch.len(), "ingest batch pulled");

        let mut accepted = Vec::with_capacity(batch.len());
        for reading in batch {
            // The batch is the transactional unit: even when cancelled we
            // finish it rather than leave half of it unpersisted.
            match self.pipeline.ingest(reading.clone()) {
                Ok(IngestOutcome::Accepted) => accepted.push(reading),
                Ok(IngestOutcome::Duplicate) | Ok(IngestOutcome::Overflowed) => {}
                Err(e) => {
                    // Validation failures are counted by the pipeline and
                    // must never abort the worker
                    debug!(error = %e, "reading dropped");
                }
            }
        }

        if !accepted.is_empty() {
            if let Err(e) = self.storage.append_readings(&accepted).await {
                warn!(error = %e, rows = accepted.len(), "reading batch not persisted");
            }
        }

        if cancel.is_cancelled() {
            debug!("ingest cancelled after completing current batch");
        }
        Ok(())
    }
}
