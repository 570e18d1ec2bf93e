//! Scaler worker
//!
//! Collects one load sample per tick (service metrics plus host usage)
//! and lets the predictive scaler act on the accumulated window.

use crate::supervisor::{PanicPolicy, TaskPolicy, Worker};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tiresense_common::bus::EventBus;
use tiresense_common::capabilities::{HostMonitor, MetricsSource, Storage};
use tiresense_common::metrics::{metric_or, parse_metrics_text};
use tiresense_common::{CancelToken, Result};
use tiresense_guard::{LoadSample, PredictiveScaler};
use tracing::{debug, warn};

pub struct ScalerWorker {
    scaler: Arc<PredictiveScaler>,
    metrics_source: Arc<dyn MetricsSource>,
    metrics_endpoint: String,
    host: Arc<dyn HostMonitor>,
    storage: Arc<dyn Storage>,
    bus: EventBus,
    period: Duration,
}

impl ScalerWorker {
    pub fn new(
        scaler: Arc<PredictiveScaler>,
        metrics_source: Arc<dyn MetricsSource>,
        metrics_endpoint: String,
        host: Arc<dyn HostMonitor>,
        storage: Arc<dyn Storage>,
        bus: EventBus,
        period: Duration,
    ) -> Self {
        ScalerWorker { scaler, metrics_source, metrics_endpoint, host, storage, bus, period }
    }
}

#[async_trait]
impl Worker for ScalerWorker {
    fn name(&self) -> &'static str {
        "scaler"
    }

    fn dependencies(&self) -> Vec<&'static str> {
        vec!["health"]
    }

    fn policy(&self) -> TaskPolicy {
        TaskPolicy {
            period: self.period,
            jitter: Duration::from_millis(500),
            on_panic: PanicPolicy::Restart,
            ..TaskPolicy::default()
        }
    }

    async fn tick(&self, _cancel: &CancelToken) -> Result<()> {
        let mut sample = LoadSample::default();

        // Service-side load; a failed scrape leaves those fields at zero
        match self.metrics_source.fetch_metrics(&self.metrics_endpoint).await {
            Ok(body) => {
                let metrics = parse_metrics_text(&body);
                sample.response_time_ms = metric_or(&metrics, "avg_response_time", 0.0);
                sample.request_rate = metric_or(&metrics, "request_rate", 0.0);
                sample.error_rate = metric_or(&metrics, "error_rate", 0.0);
            }
            Err(e) => debug!(error = %e, "service metrics unavailable for scaler"),
        }

        match self.host.sample().await {
            Ok(host) => {
                sample.cpu_percent = host.cpu_percent;
                sample.memory_percent = host.memory_percent;
            }
            Err(e) => debug!(error = %e, "host sample unavailable for scaler"),
        }

        self.scaler.record_sample(sample);
        let records = self.scaler.tick().await?;
        for record in &records {
            if let Err(e) = self.storage.append_recovery(record).await {
                warn!(error = %e, "scaling record not persisted");
            }
            self.bus.recoveries.publish(record.clone());
        }
        Ok(())
    }
}
