//! Message-bus probe
//!
//! A TCP connect test with a deadline, plus an optional metrics scrape
//! when the broker exposes one.

use crate::probe::{evaluate_rules, Probe, ProbeReport, ProbeRule};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tiresense_common::capabilities::{BusEndpoint, MetricsSource};
use tiresense_common::config::{ProbeThresholds, RecoveryConfig};
use tiresense_common::metrics::parse_metrics_text_with_prefix;
use tiresense_common::{ActionKind, Clock, IncidentKind, Result, Severity};
use tracing::debug;

fn disconnect_surge(metrics: &HashMap<String, f64>, t: &ProbeThresholds) -> bool {
    metrics.get("client_disconnect_rate").copied().unwrap_or(0.0) > t.bus_disconnect_rate
}

const BUS_RULES: [ProbeRule; 1] = [ProbeRule {
    name: "mqtt_connection_drop",
    kind: IncidentKind::DisconnectSurge,
    severity: Severity::Error,
    actions: &[ActionKind::Restart, ActionKind::Failover],
    auto_recoverable: true,
    predicate: disconnect_surge,
}];

/// Probe over the device message bus
pub struct BusProbe {
    endpoint: Arc<dyn BusEndpoint>,
    metrics_source: Arc<dyn MetricsSource>,
    connect_deadline: Duration,
    thresholds: ProbeThresholds,
    recovery: RecoveryConfig,
    clock: Arc<dyn Clock>,
}

impl BusProbe {
    pub fn new(
        endpoint: Arc<dyn BusEndpoint>,
        metrics_source: Arc<dyn MetricsSource>,
        connect_deadline: Duration,
        thresholds: ProbeThresholds,
        recovery: RecoveryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        BusProbe { endpoint, metrics_source, connect_deadline, thresholds, recovery, clock }
    }
}

#[async_trait]
impl Probe for BusProbe {
    fn component(&self) -> &'static str {
        "message-bus"
    }

    async fn check(&self) -> Result<ProbeReport> {
        let latency = self.endpoint.connect_check(self.connect_deadline).await?;

        let mut metrics = HashMap::new();
        metrics.insert("connect_latency_ms".to_string(), latency.as_secs_f64() * 1000.0);

        // Metrics scrape is optional; a broker without an exporter still
        // passes the reachability check.
        if let Some(endpoint) = self.endpoint.metrics_endpoint() {
            match self.metrics_source.fetch_metrics(&endpoint).await {
                Ok(body) => {
                    metrics.extend(parse_metrics_text_with_prefix(&body, "mosquitto_"));
                }
                Err(e) => debug!(error = %e, "bus metrics scrape failed, connect check passed"),
            }
        }

        let incidents = evaluate_rules(
            self.component(),
            &metrics,
            &BUS_RULES,
            &self.thresholds,
            &self.recovery,
            self.clock.wall_now(),
        );
        Ok(ProbeReport { component: self.component().to_string(), metrics, incidents })
    }
}
