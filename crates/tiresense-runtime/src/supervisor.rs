//! Worker supervisor
//!
//! Workers are tick-driven: the supervisor runs each worker's `tick` in
//! its own task (containing panics), then sleeps out the worker's period
//! plus jitter, racing the sleep against cancellation. Startup follows the
//! declared dependency DAG; shutdown broadcasts cancellation, waits up to
//! the drain deadline, then aborts whatever is left.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tiresense_common::clock::ClockExt;
use tiresense_common::{CancelSource, CancelToken, Clock, Error, Result};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Normal shutdown
pub const EXIT_OK: i32 = 0;
/// The supervisor could not start (bad dependency declaration)
pub const EXIT_STARTUP_FAILURE: i32 = 1;
/// A worker exceeded its failure budget and forced shutdown
pub const EXIT_SUPERVISOR_ESCALATION: i32 = 2;

/// What to do when a worker tick panics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanicPolicy {
    /// Restart with backoff; escalate only past the failure budget
    Restart,
    /// Escalate once the failure budget is exhausted
    Escalate,
    /// Shut the whole process down on the first panic
    Shutdown,
}

/// Exponential backoff applied between failed ticks
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub multiplier: f64,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy {
            base: Duration::from_secs(1),
            multiplier: 2.0,
            max: Duration::from_secs(60),
        }
    }
}

impl BackoffPolicy {
    fn delay_for(&self, consecutive_failures: u32) -> Duration {
        let factor = self.multiplier.powi(consecutive_failures.saturating_sub(1).min(16) as i32);
        self.base.mul_f64(factor.max(1.0)).min(self.max)
    }
}

/// Cadence and failure policy for one worker
#[derive(Debug, Clone)]
pub struct TaskPolicy {
    pub period: Duration,
    pub jitter: Duration,
    pub max_consecutive_failures: u32,
    pub backoff: BackoffPolicy,
    pub on_panic: PanicPolicy,
}

impl Default for TaskPolicy {
    fn default() -> Self {
        TaskPolicy {
            period: Duration::from_secs(1),
            jitter: Duration::ZERO,
            max_consecutive_failures: 3,
            backoff: BackoffPolicy::default(),
            on_panic: PanicPolicy::Escalate,
        }
    }
}

/// A long-running, tick-driven task
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Workers this one must start after
    fn dependencies(&self) -> Vec<&'static str> {
        Vec::new()
    }

    fn policy(&self) -> TaskPolicy;

    /// One unit of work. Errors are counted, never propagated beyond the
    /// supervisor; the worker must observe `cancel` at suspension points.
    async fn tick(&self, cancel: &CancelToken) -> Result<()>;
}

/// The worker supervisor
pub struct Supervisor {
    clock: Arc<dyn Clock>,
    drain_deadline: Duration,
    workers: Vec<Arc<dyn Worker>>,
}

impl Supervisor {
    pub fn new(clock: Arc<dyn Clock>, drain_deadline: Duration) -> Self {
        Supervisor { clock, drain_deadline, workers: Vec::new() }
    }

    pub fn register(&mut self, worker: Arc<dyn Worker>) {
        debug!(worker = worker.name(), "worker registered");
        self.workers.push(worker);
    }

    pub fn worker_names(&self) -> Vec<&'static str> {
        self.workers.iter().map(|w| w.name()).collect()
    }

    /// Topological startup order over the declared dependency DAG
    pub fn startup_order(&self) -> Result<Vec<Arc<dyn Worker>>> {
        let by_name: HashMap<&'static str, Arc<dyn Worker>> =
            self.workers.iter().map(|w| (w.name(), w.clone())).collect();

        for worker in &self.workers {
            for dep in worker.dependencies() {
                if !by_name.contains_key(dep) {
                    return Err(Error::Configuration(format!(
                        "worker {} depends on unregistered worker {dep}",
                        worker.name()
                    )));
                }
            }
        }

        // Stable Kahn sweep: take the first ready worker in registration
        // order until none remain; a pass with no progress is a cycle.
        let mut ordered: Vec<Arc<dyn Worker>> = Vec::with_capacity(self.workers.len());
        let mut placed: HashSet<&'static str> = HashSet::new();
        let mut remaining: Vec<Arc<dyn Worker>> = self.workers.clone();

        while !remaining.is_empty() {
            let ready = remaining
                .iter()
                .position(|w| w.dependencies().iter().all(|d| placed.contains(d)));
            match ready {
                Some(index) => {
                    let worker = remaining.remove(index);
                    placed.insert(worker.name());
                    ordered.push(worker);
                }
                None => {
                    let stuck: Vec<&str> = remaining.iter().map(|w| w.name()).collect();
                    return Err(Error::Configuration(format!(
                        "dependency cycle among workers: {stuck:?}"
                    )));
                }
            }
        }

        Ok(ordered)
    }

    /// Run all workers until `shutdown` fires or a worker escalates.
    /// Returns the process exit code.
    pub async fn run(&self, shutdown: CancelToken) -> i32 {
        let ordered = match self.startup_order() {
            Ok(ordered) => ordered,
            Err(e) => {
                error!(error = %e, "supervisor startup failed");
                return EXIT_STARTUP_FAILURE;
            }
        };

        info!(
            workers = ?ordered.iter().map(|w| w.name()).collect::<Vec<_>>(),
            "supervisor starting workers"
        );

        let internal = CancelSource::new();
        let (escalate_tx, mut escalate_rx) = mpsc::channel::<&'static str>(8);

        let mut handles = Vec::new();
        for worker in ordered {
            let token = internal.token();
            let clock = self.clock.clone();
            let escalate = escalate_tx.clone();
            let drain = self.drain_deadline;
            handles.push(tokio::spawn(async move {
                run_worker(worker, token, clock, escalate, drain).await;
            }));
        }
        drop(escalate_tx);

        let exit_code = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("shutdown requested");
                EXIT_OK
            }
            escalated = escalate_rx.recv() => {
                match escalated {
                    Some(name) => {
                        error!(worker = name, "worker escalated, shutting down");
                        EXIT_SUPERVISOR_ESCALATION
                    }
                    None => EXIT_OK,
                }
            }
        };

        // Graceful drain: broadcast cancellation, give every worker until
        // the drain deadline, then abort stragglers.
        internal.cancel();
        let deadline = self.clock.now() + self.drain_deadline;
        for mut handle in handles {
            tokio::select! {
                _ = &mut handle => {}
                _ = self.clock.until(deadline) => {
                    warn!("worker missed drain deadline, aborting");
                    handle.abort();
                }
            }
        }

        info!(exit_code, "supervisor stopped");
        exit_code
    }
}

async fn run_worker(
    worker: Arc<dyn Worker>,
    token: CancelToken,
    clock: Arc<dyn Clock>,
    escalate: mpsc::Sender<&'static str>,
    drain_deadline: Duration,
) {
    let name = worker.name();
    let policy = worker.policy();
    let mut rng = StdRng::seed_from_u64(name.bytes().map(u64::from).sum());
    let mut consecutive_failures: u32 = 0;

    info!(worker = name, "worker started");

    loop {
        if token.is_cancelled() {
            break;
        }

        // Run the tick in its own task so a panic is contained
        let mut tick = {
            let worker = worker.clone();
            let token = token.clone();
            tokio::spawn(async move { worker.tick(&token).await })
        };

        let outcome = tokio::select! {
            outcome = &mut tick => outcome,
            _ = token.cancelled() => {
                // Give the in-flight tick until the drain deadline to
                // reach a safe point, then abort it
                tokio::select! {
                    _ = &mut tick => {}
                    _ = clock.sleep(drain_deadline) => {
                        warn!(worker = name, "in-flight tick aborted at drain deadline");
                        tick.abort();
                    }
                }
                break;
            }
        };

        match outcome {
            Ok(Ok(())) => {
                consecutive_failures = 0;
            }
            Ok(Err(e)) => {
                consecutive_failures += 1;
                warn!(
                    worker = name,
                    error = %e,
                    consecutive_failures,
                    "worker tick failed"
                );
                if consecutive_failures >= policy.max_consecutive_failures {
                    let _ = escalate.send(name).await;
                    break;
                }
            }
            Err(join_error) if join_error.is_panic() => {
                consecutive_failures += 1;
                error!(worker = name, consecutive_failures, "worker tick panicked");
                match policy.on_panic {
                    PanicPolicy::Shutdown => {
                        let _ = escalate.send(name).await;
                        break;
                    }
                    PanicPolicy::Escalate | PanicPolicy::Restart => {
                        if consecutive_failures >= policy.max_consecutive_failures {
                            let _ = escalate.send(name).await;
                            break;
                        }
                    }
                }
            }
            Err(_) => {
                // Tick task cancelled from outside; treat as shutdown
                break;
            }
        }

        let delay = if consecutive_failures > 0 {
            policy.backoff.delay_for(consecutive_failures)
        } else if policy.jitter.is_zero() {
            policy.period
        } else {
            policy.period + policy.jitter.mul_f64(rng.gen::<f64>())
        };

        tokio::select! {
            _ = clock.sleep(delay) => {}
            _ = token.cancelled() => break,
        }
    }

    info!(worker = name, "worker stopped");
}
