//! HTTP service probe
//!
//! Scrapes the service's metrics endpoint and derives response time, error
//! rate and request rate. Issue thresholds follow the service rule table.

use crate::probe::{evaluate_rules, Probe, ProbeReport, ProbeRule};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tiresense_common::capabilities::MetricsSource;
use tiresense_common::config::{ProbeThresholds, RecoveryConfig};
use tiresense_common::metrics::parse_metrics_text;
use tiresense_common::{ActionKind, Clock, IncidentKind, Result, Severity};
use tracing::trace;

fn high_response_time(metrics: &HashMap<String, f64>, t: &ProbeThresholds) -> bool {
    metrics.get("avg_response_time").copied().unwrap_or(0.0) > t.service_response_time_ms
}

fn high_error_rate(metrics: &HashMap<String, f64>, t: &ProbeThresholds) -> bool {
    metrics.get("error_rate").copied().unwrap_or(0.0) > t.service_error_rate
}

const SERVICE_RULES: [ProbeRule; 2] = [
    ProbeRule {
        name: "api_high_response_time",
        kind: IncidentKind::HighResponseTime,
        severity: Severity::Warning,
        actions: &[ActionKind::ScaleUp, ActionKind::Restart],
        auto_recoverable: true,
        predicate: high_response_time,
    },
    ProbeRule {
        name: "api_high_error_rate",
        kind: IncidentKind::HighErrorRate,
        severity: Severity::Error,
        actions: &[ActionKind::Restart, ActionKind::ClearCache],
        auto_recoverable: true,
        predicate: high_error_rate,
    },
];

/// Probe over the platform's HTTP service
pub struct ServiceProbe {
    source: Arc<dyn MetricsSource>,
    endpoint: String,
    thresholds: ProbeThresholds,
    recovery: RecoveryConfig,
    clock: Arc<dyn Clock>,
}

impl ServiceProbe {
    pub fn new(
        source: Arc<dyn MetricsSource>,
        endpoint: String,
        thresholds: ProbeThresholds,
        recovery: RecoveryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        ServiceProbe { source, endpoint, thresholds, recovery, clock }
    }
}

#[async_trait]
impl Probe for ServiceProbe {
    fn component(&self) -> &'static str {
        "api-service"
    }

    async fn check(&self) -> Result<ProbeReport> {
        let body = self.source.fetch_metrics(&self.endpoint).await?;
        let metrics = parse_metrics_text(&body);
        trace!(component = self.component(), metrics = metrics.len(), "service metrics scraped");

        let incidents = evaluate_rules(
            self.component(),
            &metrics,
            &SERVICE_RULES,
            &self.thresholds,
            &self.recovery,
            self.clock.wall_now(),
        );
        Ok(ProbeReport { component: self.component().to_string(), metrics, incidents })
    }
}
