//! Chaos worker
//!
//! Thin cadence wrapper around the chaos injector; the injector itself
//! decides whether a window is open.

use crate::supervisor::{PanicPolicy, TaskPolicy, Worker};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tiresense_common::{CancelToken, Result};
use tiresense_guard::{ChaosInjector, HealthScanner, IncidentRegistry, NotificationHub};
use tracing::info;

pub struct ChaosWorker {
    injector: Arc<ChaosInjector>,
    scanner: Arc<HealthScanner>,
    registry: Arc<IncidentRegistry>,
    notifications: Arc<NotificationHub>,
    period: Duration,
}

impl ChaosWorker {
    pub fn new(
        injector: Arc<ChaosInjector>,
        scanner: Arc<HealthScanner>,
        registry: Arc<IncidentRegistry>,
        notifications: Arc<NotificationHub>,
        period: Duration,
    ) -> Self {
        ChaosWorker { injector, scanner, registry, notifications, period }
    }
}

#[async_trait]
impl Worker for ChaosWorker {
    fn name(&self) -> &'static str {
        "chaos"
    }

    fn dependencies(&self) -> Vec<&'static str> {
        vec!["health"]
    }

    fn policy(&self) -> TaskPolicy {
        TaskPolicy {
            period: self.period,
            jitter: Duration::from_secs(1),
            on_panic: PanicPolicy::Restart,
            ..TaskPolicy::default()
        }
    }

    async fn tick(&self, _cancel: &CancelToken) -> Result<()> {
        if let Some(outcome) = self
            .injector
            .run_cycle(&self.scanner, &self.registry, &self.notifications)
            .await?
        {
            info!(healed = outcome.healed, injection = ?outcome.injection, "chaos drill finished");
        }
        Ok(())
    }
}
