//! Injectable time source with a virtual implementation for tests
//!
//! Every component that needs time holds an `Arc<dyn Clock>`. Monotonic
//! time is expressed as the `Duration` elapsed since the clock was created,
//! which a virtual clock can fabricate freely.

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Boxed future returned by [`Clock::sleep`]
pub type SleepFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Injectable time source
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Monotonic time elapsed since the clock's epoch
    fn now(&self) -> Duration;

    /// Wall-clock time
    fn wall_now(&self) -> DateTime<Utc>;

    /// Timer that completes after `duration`
    fn sleep(&self, duration: Duration) -> SleepFuture;
}

/// Extension helpers shared by every clock implementation
pub trait ClockExt: Clock {
    /// Timer that completes at the given monotonic deadline
    fn until(&self, deadline: Duration) -> SleepFuture {
        let remaining = deadline.saturating_sub(self.now());
        self.sleep(remaining)
    }
}

impl<T: Clock + ?Sized> ClockExt for T {}

/// Real clock backed by `std::time::Instant` and `tokio::time`
#[derive(Debug)]
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock { epoch: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    fn wall_now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> SleepFuture {
        Box::pin(tokio::time::sleep(duration))
    }
}

struct Sleeper {
    deadline: Duration,
    notify: oneshot::Sender<()>,
}

struct VirtualState {
    now: Duration,
    wall: DateTime<Utc>,
    sleepers: Vec<Sleeper>,
}

/// Manually advanced clock for deterministic tests.
///
/// `advance` moves monotonic and wall time together and wakes every timer
/// whose deadline has been reached. Timers never fire between `advance`
/// calls, so a test observes exactly the interleavings it scripts.
#[derive(Clone, Debug)]
pub struct VirtualClock {
    state: Arc<Mutex<VirtualState>>,
}

impl std::fmt::Debug for VirtualState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualState")
            .field("now", &self.now)
            .field("wall", &self.wall)
            .field("sleepers", &self.sleepers.len())
            .finish()
    }
}

impl VirtualClock {
    /// Virtual clock starting at a fixed, well-known wall time
    pub fn new() -> Self {
        let wall = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Self::starting_at(wall)
    }

    pub fn starting_at(wall: DateTime<Utc>) -> Self {
        VirtualClock {
            state: Arc::new(Mutex::new(VirtualState {
                now: Duration::ZERO,
                wall,
                sleepers: Vec::new(),
            })),
        }
    }

    /// Advance time, waking any timers whose deadline is reached
    pub fn advance(&self, by: Duration) {
        let woken: Vec<oneshot::Sender<()>> = {
            let mut state = self.state.lock();
            state.now += by;
            state.wall += chrono::Duration::from_std(by).expect("advance fits chrono range");
            let now = state.now;
            let mut due = Vec::new();
            state.sleepers.retain_mut(|s| {
                if s.deadline <= now {
                    let (tx, _) = oneshot::channel();
                    due.push(std::mem::replace(&mut s.notify, tx));
                    false
                } else {
                    true
                }
            });
            due
        };
        for tx in woken {
            let _ = tx.send(());
        }
    }

    /// Set the wall clock without touching monotonic time (e.g. to place a
    /// test inside a peak-hour or chaos window)
    pub fn set_wall(&self, wall: DateTime<Utc>) {
        self.state.lock().wall = wall;
    }

    /// Number of timers currently waiting
    pub fn pending_sleepers(&self) -> usize {
        self.state.lock().sleepers.len()
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Duration {
        self.state.lock().now
    }

    fn wall_now(&self) -> DateTime<Utc> {
        self.state.lock().wall
    }

    fn sleep(&self, duration: Duration) -> SleepFuture {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock();
            if duration.is_zero() {
                let _ = tx.send(());
            } else {
                let deadline = state.now + duration;
                state.sleepers.push(Sleeper {
                    deadline,
                    notify: tx,
                });
            }
        }
        Box::pin(async move {
            let _ = rx.await;
        })
    }
}
