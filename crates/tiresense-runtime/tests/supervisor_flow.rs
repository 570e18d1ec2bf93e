//! Supervisor lifecycle: graceful shutdown, drain bounds and escalation

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tiresense_common::{
    CancelSource, CancelToken, Clock, Error, Result, VirtualClock,
};
use tiresense_runtime::{
    PanicPolicy, Supervisor, TaskPolicy, Worker, EXIT_OK, EXIT_SUPERVISOR_ESCALATION,
};

/// Drive a spawned supervisor by alternating yields and clock advances
async fn drive(
    clock: &VirtualClock,
    handle: &mut tokio::task::JoinHandle<i32>,
    step: Duration,
    max_steps: u32,
) -> i32 {
    for _ in 0..max_steps {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        if handle.is_finished() {
            return handle.await.unwrap();
        }
        clock.advance(step);
    }
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
    assert!(handle.is_finished(), "supervisor did not finish in time");
    handle.await.unwrap()
}

struct WellBehaved {
    name: &'static str,
    clock: Arc<VirtualClock>,
    ticks: Arc<AtomicU32>,
    finished_cleanly: Arc<AtomicBool>,
}

#[async_trait]
impl Worker for WellBehaved {
    fn name(&self) -> &'static str {
        self.name
    }
    fn policy(&self) -> TaskPolicy {
        TaskPolicy { period: Duration::from_secs(1), ..TaskPolicy::default() }
    }
    async fn tick(&self, cancel: &CancelToken) -> Result<()> {
        self.ticks.fetch_add(1, Ordering::SeqCst);
        // A short unit of work with a suspension point observing cancel
        tokio::select! {
            _ = self.clock.sleep(Duration::from_millis(100)) => {}
            _ = cancel.cancelled() => {}
        }
        self.finished_cleanly.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct StuckInTick {
    clock: Arc<VirtualClock>,
}

#[async_trait]
impl Worker for StuckInTick {
    fn name(&self) -> &'static str {
        "stuck"
    }
    fn policy(&self) -> TaskPolicy {
        TaskPolicy { period: Duration::from_secs(1), ..TaskPolicy::default() }
    }
    async fn tick(&self, _cancel: &CancelToken) -> Result<()> {
        // Ignores cancellation entirely; only the drain deadline stops it
        self.clock.sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

struct AlwaysFailing;

#[async_trait]
impl Worker for AlwaysFailing {
    fn name(&self) -> &'static str {
        "failing"
    }
    fn policy(&self) -> TaskPolicy {
        TaskPolicy {
            period: Duration::from_secs(1),
            max_consecutive_failures: 3,
            on_panic: PanicPolicy::Escalate,
            ..TaskPolicy::default()
        }
    }
    async fn tick(&self, _cancel: &CancelToken) -> Result<()> {
        Err(Error::Unavailable("dependency down".to_string()))
    }
}

struct Panicking;

#[async_trait]
impl Worker for Panicking {
    fn name(&self) -> &'static str {
        "panicking"
    }
    fn policy(&self) -> TaskPolicy {
        TaskPolicy {
            period: Duration::from_secs(1),
            max_consecutive_failures: 3,
            on_panic: PanicPolicy::Shutdown,
            ..TaskPolicy::default()
        }
    }
    async fn tick(&self, _cancel: &CancelToken) -> Result<()> {
        panic!("worker bug");
    }
}

#[tokio::test]
async fn graceful_shutdown_returns_zero_within_the_drain_deadline() {
    let clock = Arc::new(VirtualClock::new());
    let shared: Arc<dyn Clock> = clock.clone();
    let ticks = Arc::new(AtomicU32::new(0));
    let finished = Arc::new(AtomicBool::new(false));

    let mut supervisor = Supervisor::new(shared, Duration::from_secs(5));
    supervisor.register(Arc::new(WellBehaved {
        name: "ingest",
        clock: clock.clone(),
        ticks: ticks.clone(),
        finished_cleanly: finished.clone(),
    }));

    let shutdown = CancelSource::new();
    let token = shutdown.token();
    let supervisor = Arc::new(supervisor);
    let mut run = tokio::spawn({
        let supervisor = supervisor.clone();
        async move { supervisor.run(token).await }
    });

    // Let a few ticks happen, then request shutdown mid-flight
    for _ in 0..3 {
        tokio::task::yield_now().await;
        clock.advance(Duration::from_secs(1));
    }
    shutdown.cancel();

    let exit = drive(&clock, &mut run, Duration::from_secs(1), 10).await;
    assert_eq!(exit, EXIT_OK);
    assert!(ticks.load(Ordering::SeqCst) >= 1);
    // The in-flight tick reached its safe point rather than being killed
    assert!(finished.load(Ordering::SeqCst));
}

#[tokio::test]
async fn worker_ignoring_cancellation_is_aborted_at_the_drain_deadline() {
    let clock = Arc::new(VirtualClock::new());
    let shared: Arc<dyn Clock> = clock.clone();

    let mut supervisor = Supervisor::new(shared, Duration::from_secs(5));
    supervisor.register(Arc::new(StuckInTick { clock: clock.clone() }));

    let shutdown = CancelSource::new();
    let token = shutdown.token();
    let supervisor = Arc::new(supervisor);
    let mut run = tokio::spawn({
        let supervisor = supervisor.clone();
        async move { supervisor.run(token).await }
    });

    tokio::task::yield_now().await;
    shutdown.cancel();

    // Within drain + a step the supervisor must be done despite the
    // worker sleeping for an hour
    let exit = drive(&clock, &mut run, Duration::from_secs(1), 10).await;
    assert_eq!(exit, EXIT_OK);
}

#[tokio::test]
async fn repeated_failures_exhaust_the_budget_and_escalate() {
    let clock = Arc::new(VirtualClock::new());
    let shared: Arc<dyn Clock> = clock.clone();

    let mut supervisor = Supervisor::new(shared, Duration::from_secs(5));
    supervisor.register(Arc::new(AlwaysFailing));

    let supervisor = Arc::new(supervisor);
    let mut run = tokio::spawn({
        let supervisor = supervisor.clone();
        async move { supervisor.run(CancelToken::detached()).await }
    });

    let exit = drive(&clock, &mut run, Duration::from_secs(2), 30).await;
    assert_eq!(exit, EXIT_SUPERVISOR_ESCALATION);
}

#[tokio::test]
async fn panic_with_shutdown_policy_escalates_immediately() {
    let clock = Arc::new(VirtualClock::new());
    let shared: Arc<dyn Clock> = clock.clone();

    let mut supervisor = Supervisor::new(shared, Duration::from_secs(5));
    supervisor.register(Arc::new(Panicking));

    let supervisor = Arc::new(supervisor);
    let mut run = tokio::spawn({
        let supervisor = supervisor.clone();
        async move { supervisor.run(CancelToken::detached()).await }
    });

    let exit = drive(&clock, &mut run, Duration::from_secs(1), 10).await;
    assert_eq!(exit, EXIT_SUPERVISOR_ESCALATION);
}

#[tokio::test]
async fn bad_dependency_graph_exits_nonzero_at_startup() {
    let clock = Arc::new(VirtualClock::new());
    let shared: Arc<dyn Clock> = clock.clone();

    struct NeedsGhost;
    #[async_trait]
    impl Worker for NeedsGhost {
        fn name(&self) -> &'static str {
            "dependent"
        }
        fn dependencies(&self) -> Vec<&'static str> {
            vec!["ghost"]
        }
        fn policy(&self) -> TaskPolicy {
            TaskPolicy::default()
        }
        async fn tick(&self, _cancel: &CancelToken) -> Result<()> {
            Ok(())
        }
    }

    let mut supervisor = Supervisor::new(shared, Duration::from_secs(5));
    supervisor.register(Arc::new(NeedsGhost));
    let exit = supervisor.run(CancelToken::detached()).await;
    assert_eq!(exit, tiresense_runtime::EXIT_STARTUP_FAILURE);
}
