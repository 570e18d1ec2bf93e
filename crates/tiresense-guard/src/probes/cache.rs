//! Cache probe
//!
//! Pings the key/value cache and reads memory and client statistics.

use crate::probe::{evaluate_rules, Probe, ProbeReport, ProbeRule};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tiresense_common::capabilities::CacheStore;
use tiresense_common::config::{ProbeThresholds, RecoveryConfig};
use tiresense_common::{ActionKind, Clock, IncidentKind, Result, Severity};

fn memory_pressure(metrics: &HashMap<String, f64>, t: &ProbeThresholds) -> bool {
    metrics.get("memory_usage_percent").copied().unwrap_or(0.0) > t.cache_memory_percent
}

fn client_surge(metrics: &HashMap<String, f64>, t: &ProbeThresholds) -> bool {
    metrics.get("connected_clients").copied().unwrap_or(0.0) > f64::from(t.cache_max_clients)
}

const CACHE_RULES: [ProbeRule; 2] = [
    ProbeRule {
        name: "redis_memory_high",
        kind: IncidentKind::MemoryPressure,
        severity: Severity::Warning,
        actions: &[ActionKind::ClearCache, ActionKind::Restart],
        auto_recoverable: true,
        predicate: memory_pressure,
    },
    ProbeRule {
        name: "redis_connection_spike",
        kind: IncidentKind::ClientSurge,
        severity: Severity::Error,
        actions: &[ActionKind::CircuitBreak, ActionKind::RebalanceLoad],
        auto_recoverable: true,
        predicate: client_surge,
    },
];

/// Probe over the key/value cache
pub struct CacheProbe {
    cache: Arc<dyn CacheStore>,
    thresholds: ProbeThresholds,
    recovery: RecoveryConfig,
    clock: Arc<dyn Clock>,
}

impl CacheProbe {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        thresholds: ProbeThresholds,
        recovery: RecoveryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        CacheProbe { cache, thresholds, recovery, clock }
    }
}

#[async_trait]
impl Probe for CacheProbe {
    fn component(&self) -> &'static str {
        "cache"
    }

    async fn check(&self) -> Result<ProbeReport> {
        let ping = self.cache.ping().await?;
        let stats = self.cache.stats().await?;

        // A cache with no configured limit reports max 0; treat used*2 as
        // the denominator the way the original monitor did.
        let max = if stats.max_memory_bytes == 0 {
            stats.used_memory_bytes.saturating_mul(2).max(1)
        } else {
            stats.max_memory_bytes
        };
        let memory_usage_percent = stats.used_memory_bytes as f64 / max as f64 * 100.0;

        let mut metrics = HashMap::new();
        metrics.insert("ping_ms".to_string(), ping.as_secs_f64() * 1000.0);
        metrics.insert("used_memory_bytes".to_string(), stats.used_memory_bytes as f64);
        metrics.insert("max_memory_bytes".to_string(), stats.max_memory_bytes as f64);
        metrics.insert("memory_usage_percent".to_string(), memory_usage_percent);
        metrics.insert("connected_clients".to_string(), f64::from(stats.connected_clients));

        let incidents = evaluate_rules(
            self.component(),
            &metrics,
            &CACHE_RULES,
            &self.thresholds,
            &self.recovery,
            self.clock.wall_now(),
        );
        Ok(ProbeReport { component: self.component().to_string(), metrics, incidents })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tiresense_common::capabilities::CacheStats;
    use tiresense_common::VirtualClock;

    struct FakeCache {
        stats: CacheStats,
    }

    #[async_trait]
    impl CacheStore for FakeCache {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            Ok(None)
        }
        async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> Result<()> {
            Ok(())
        }
        async fn del(&self, _key: &str) -> Result<()> {
            Ok(())
        }
        async fn flush_all(&self) -> Result<()> {
            Ok(())
        }
        async fn stats(&self) -> Result<CacheStats> {
            Ok(self.stats.clone())
        }
        async fn ping(&self) -> Result<Duration> {
            Ok(Duration::from_millis(2))
        }
    }

    fn probe_with(stats: CacheStats) -> CacheProbe {
        CacheProbe::new(
            Arc::new(FakeCache { stats }),
            ProbeThresholds::default(),
            RecoveryConfig::default(),
            Arc::new(VirtualClock::new()),
        )
    }

    #[tokio::test]
    async fn healthy_cache_reports_metrics_only() {
        let probe = probe_with(CacheStats {
            used_memory_bytes: 100 << 20,
            max_memory_bytes: 1 << 30,
            connected_clients: 12,
        });
        let report = probe.check().await.unwrap();
        assert!(report.incidents.is_empty());
        assert!(report.metrics["memory_usage_percent"] < 10.0);
    }

    #[tokio::test]
    async fn near_full_memory_suggests_clearing_first() {
        let probe = probe_with(CacheStats {
            used_memory_bytes: 950 << 20,
            max_memory_bytes: 1000 << 20,
            connected_clients: 12,
        });
        let report = probe.check().await.unwrap();
        let incident = &report.incidents[0];
        assert_eq!(incident.kind, IncidentKind::MemoryPressure);
        assert_eq!(incident.recommended_actions[0], ActionKind::ClearCache);
    }

    #[tokio::test]
    async fn client_spike_breaks_the_circuit() {
        let probe = probe_with(CacheStats {
            used_memory_bytes: 1,
            max_memory_bytes: 1 << 30,
            connected_clients: 1500,
        });
        let report = probe.check().await.unwrap();
        let incident = &report.incidents[0];
        assert_eq!(incident.kind, IncidentKind::ClientSurge);
        assert_eq!(incident.recommended_actions[0], ActionKind::CircuitBreak);
    }
}
