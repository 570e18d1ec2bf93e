//! Application assembly
//!
//! Wires configuration and injected capabilities into the full control
//! plane: pipeline, scorers, fusion, probes, recovery, scaling, chaos and
//! the supervisor that runs them.

use crate::supervisor::Supervisor;
use crate::workers::{
    ChaosWorker, HealthWorker, IngestWorker, InferenceWorker, MaintenanceWorker, ScalerWorker,
};
use std::sync::Arc;
use std::time::Duration;
use tiresense_analytics::{
    AnomalyFuser, FeaturePipeline, OutlierTreeScorer, RuleScorer, Scorer,
    SequencePredictionScorer, StatisticalScorer,
};
use tiresense_common::bus::EventBus;
use tiresense_common::capabilities::{
    BusEndpoint, CacheStore, DeviceRegistry, HostMonitor, LoadPredictor, MetricsSource, Notifier,
    Orchestrator, ReadingSource, Storage,
};
use tiresense_common::config::CoreConfig;
use tiresense_common::{CancelToken, Clock, CooldownLedger, Result};
use tiresense_guard::probes::{
    BusProbe, CacheProbe, FleetProbe, HostProbe, OrchestratorProbe, ServiceProbe, StoreProbe,
};
use tiresense_guard::recovery::{RecoveryDeps, RecoveryEngine};
use tiresense_guard::{
    ChaosInjector, FaultPlane, HealthScanner, IncidentRegistry, NotificationHub, PredictiveScaler,
};
use tracing::info;

/// Seed for the outlier forest; fixed so two runs over identical input
/// produce identical margins.
const OUTLIER_FOREST_SEED: u64 = 17;

/// Every external dependency of the core, injected at assembly time
pub struct Capabilities {
    pub clock: Arc<dyn Clock>,
    pub orchestrator: Arc<dyn Orchestrator>,
    pub storage: Arc<dyn Storage>,
    pub cache: Arc<dyn CacheStore>,
    pub metrics: Arc<dyn MetricsSource>,
    pub notifier: Arc<dyn Notifier>,
    pub host: Arc<dyn HostMonitor>,
    pub devices: Arc<dyn DeviceRegistry>,
    pub readings: Arc<dyn ReadingSource>,
    pub bus_endpoint: Arc<dyn BusEndpoint>,
    pub load_predictor: Arc<dyn LoadPredictor>,
    /// Opaque weights blob for the sequence-prediction scorer; absent
    /// leaves that scorer silent
    pub sequence_weights: Option<Vec<u8>>,
}

/// Assembled core, exposed for embedding and tests
pub struct CoreHandles {
    pub supervisor: Supervisor,
    pub bus: EventBus,
    pub pipeline: Arc<FeaturePipeline>,
    pub registry: Arc<IncidentRegistry>,
    pub engine: Arc<RecoveryEngine>,
    pub scanner: Arc<HealthScanner>,
    pub faults: Arc<FaultPlane>,
    pub ledger: Arc<CooldownLedger>,
}

/// Build the whole control plane from configuration and capabilities
pub fn build_core(config: &CoreConfig, caps: Capabilities) -> Result<CoreHandles> {
    config.validate()?;
    let clock = caps.clock.clone();

    let bus = EventBus::new(
        config.runtime.bus_health_capacity,
        config.runtime.bus_incident_capacity,
        config.runtime.bus_recovery_capacity,
    );
    let ledger = Arc::new(CooldownLedger::new(clock.clone()));
    let faults = Arc::new(FaultPlane::new(clock.clone()));
    let registry = Arc::new(IncidentRegistry::new(clock.clone()));
    let notifications =
        Arc::new(NotificationHub::new(caps.notifier.clone(), config.notify.min_severity));

    let pipeline = Arc::new(FeaturePipeline::new(
        config.window.clone(),
        config.pipeline.clone(),
        config.runtime.ingest_overflow_tolerance,
        clock.clone(),
    ));

    let outlier = Arc::new(OutlierTreeScorer::with_default_forest(OUTLIER_FOREST_SEED));
    let seqpred = match &caps.sequence_weights {
        Some(blob) => {
            let scorer = SequencePredictionScorer::unavailable();
            scorer.load_blob(blob)?;
            Arc::new(scorer)
        }
        None => Arc::new(SequencePredictionScorer::unavailable()),
    };
    let scorers: Vec<Arc<dyn Scorer>> = vec![
        Arc::new(RuleScorer::with_defaults()),
        Arc::new(StatisticalScorer::new()),
        outlier.clone(),
        seqpred,
    ];
    let fuser = Arc::new(AnomalyFuser::new(config.fusion.clone(), config.recovery.clone()));

    // Probes behind the scanner
    let mut scanner = HealthScanner::new(clock.clone(), faults.clone(), config.recovery.clone());
    let thresholds = config.probes.thresholds.clone();
    scanner.register(
        Arc::new(ServiceProbe::new(
            caps.metrics.clone(),
            config.probes.service_metrics_endpoint.clone(),
            thresholds.clone(),
            config.recovery.clone(),
            clock.clone(),
        )),
        &config.probes.service,
    );
    scanner.register(
        Arc::new(StoreProbe::new(
            caps.storage.clone(),
            thresholds.clone(),
            config.recovery.clone(),
            clock.clone(),
        )),
        &config.probes.store,
    );
    scanner.register(
        Arc::new(CacheProbe::new(
            caps.cache.clone(),
            thresholds.clone(),
            config.recovery.clone(),
            clock.clone(),
        )),
        &config.probes.cache,
    );
    scanner.register(
        Arc::new(BusProbe::new(
            caps.bus_endpoint.clone(),
            caps.metrics.clone(),
            Duration::from_secs(config.probes.bus.deadline_seconds.max(1)),
            thresholds.clone(),
            config.recovery.clone(),
            clock.clone(),
        )),
        &config.probes.bus,
    );
    scanner.register(
        Arc::new(OrchestratorProbe::new(
            caps.orchestrator.clone(),
            config.runtime.namespace.clone(),
            thresholds.clone(),
            config.recovery.clone(),
            clock.clone(),
        )),
        &config.probes.orchestrator,
    );
    scanner.register(
        Arc::new(HostProbe::new(
            caps.host.clone(),
            faults.clone(),
            thresholds.clone(),
            config.recovery.clone(),
            clock.clone(),
        )),
        &config.probes.host,
    );
    scanner.register(
        Arc::new(FleetProbe::new(
            caps.devices.clone(),
            thresholds,
            config.recovery.clone(),
            clock.clone(),
        )),
        &config.probes.fleet,
    );
    let scanner = Arc::new(scanner);

    let engine = Arc::new(RecoveryEngine::new(
        config.recovery.clone(),
        config.retention.clone(),
        config.runtime.namespace.clone(),
        Duration::from_secs(config.scaler.min_hold_seconds),
        RecoveryDeps {
            clock: clock.clone(),
            ledger: ledger.clone(),
            orchestrator: caps.orchestrator.clone(),
            cache: caps.cache.clone(),
            storage: caps.storage.clone(),
            notifications: notifications.clone(),
            registry: registry.clone(),
            checker: scanner.clone(),
            recoveries: bus.recoveries.clone(),
        },
    ));

    let scaler = Arc::new(PredictiveScaler::new(
        config.scaler.clone(),
        config.recovery.clone(),
        config.runtime.namespace.clone(),
        clock.clone(),
        ledger.clone(),
        caps.orchestrator.clone(),
        caps.load_predictor.clone(),
    ));

    let injector = Arc::new(ChaosInjector::new(
        config.chaos.clone(),
        config.runtime.namespace.clone(),
        clock.clone(),
        caps.orchestrator.clone(),
        faults.clone(),
    ));

    // Workers, dependency-ordered by their declarations
    let mut supervisor = Supervisor::new(clock.clone(), config.drain_deadline());
    supervisor.register(Arc::new(IngestWorker::new(
        caps.readings.clone(),
        pipeline.clone(),
        caps.storage.clone(),
        clock.clone(),
        config.runtime.ingest_batch_size,
        config.tick_period(),
    )));
    supervisor.register(Arc::new(InferenceWorker::new(
        pipeline.clone(),
        scorers,
        fuser,
        registry.clone(),
        caps.storage.clone(),
        bus.clone(),
        notifications.clone(),
        config.tick_period(),
    )));
    supervisor.register(Arc::new(HealthWorker::new(
        scanner.clone(),
        registry.clone(),
        engine.clone(),
        caps.storage.clone(),
        caps.cache.clone(),
        bus.clone(),
        notifications.clone(),
        clock.clone(),
        config.health_scan_interval(),
    )));
    if config.scaler.enabled {
        supervisor.register(Arc::new(ScalerWorker::new(
            scaler,
            caps.metrics.clone(),
            config.probes.service_metrics_endpoint.clone(),
            caps.host.clone(),
            caps.storage.clone(),
            bus.clone(),
            config.health_scan_interval(),
        )));
    }
    supervisor.register(Arc::new(MaintenanceWorker::new(
        caps.storage.clone(),
        registry.clone(),
        pipeline.clone(),
        ledger.clone(),
        outlier,
        config.retention.clone(),
        clock.clone(),
        Duration::from_secs(config.runtime.maintenance_interval_seconds.max(1)),
    )));
    if config.chaos.enabled {
        supervisor.register(Arc::new(ChaosWorker::new(
            injector,
            scanner.clone(),
            registry.clone(),
            notifications.clone(),
            Duration::from_secs(60),
        )));
    }

    info!(workers = ?supervisor.worker_names(), "control plane assembled");

    Ok(CoreHandles { supervisor, bus, pipeline, registry, engine, scanner, faults, ledger })
}

/// Assemble and run until `shutdown` fires. Returns the process exit code:
/// 0 for normal shutdown, non-zero for unrecoverable startup failure or
/// supervisor escalation.
pub async fn run(config: &CoreConfig, caps: Capabilities, shutdown: CancelToken) -> i32 {
    match build_core(config, caps) {
        Ok(core) => core.supervisor.run(shutdown).await,
        Err(e) => {
            tracing::error!(error = %e, "control plane failed to start");
            crate::supervisor::EXIT_STARTUP_FAILURE
        }
    }
}
