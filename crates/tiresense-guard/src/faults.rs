//! Shared fault plane for chaos injections
//!
//! The chaos injector writes time-bounded faults here; the probe scanner
//! and host probe consult it on every cycle. Faults expire on their own,
//! so a crashed injector can never leave the system degraded.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tiresense_common::capabilities::HostSample;
use tiresense_common::Clock;

#[derive(Debug, Clone, Copy)]
struct TimedFault<T> {
    value: T,
    expires_at: Duration,
}

/// Active fault overlays, all time-bounded
#[derive(Debug)]
pub struct FaultPlane {
    clock: Arc<dyn Clock>,
    probe_delay: Mutex<Option<TimedFault<Duration>>>,
    pressure: Mutex<Option<TimedFault<HostSample>>>,
}

impl FaultPlane {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        FaultPlane { clock, probe_delay: Mutex::new(None), pressure: Mutex::new(None) }
    }

    /// Delay every probe by `delay` for the next `window`
    pub fn inject_probe_delay(&self, delay: Duration, window: Duration) {
        let expires_at = self.clock.now() + window;
        *self.probe_delay.lock() = Some(TimedFault { value: delay, expires_at });
    }

    /// Overlay simulated resource pressure onto host samples for `window`
    pub fn inject_pressure(&self, extra: HostSample, window: Duration) {
        let expires_at = self.clock.now() + window;
        *self.pressure.lock() = Some(TimedFault { value: extra, expires_at });
    }

    /// Currently active probe delay, if any
    pub fn probe_delay(&self) -> Option<Duration> {
        let mut guard = self.probe_delay.lock();
        match *guard {
            Some(fault) if fault.expires_at > self.clock.now() => Some(fault.value),
            Some(_) => {
                *guard = None;
                None
            }
            None => None,
        }
    }

    /// Apply any active pressure overlay to a host sample
    pub fn overlay_host(&self, sample: HostSample) -> HostSample {
        let mut guard = self.pressure.lock();
        match *guard {
            Some(fault) if fault.expires_at > self.clock.now() => HostSample {
                cpu_percent: (sample.cpu_percent + fault.value.cpu_percent).min(100.0),
                memory_percent: (sample.memory_percent + fault.value.memory_percent).min(100.0),
                disk_percent: (sample.disk_percent + fault.value.disk_percent).min(100.0),
            },
            Some(_) => {
                *guard = None;
                sample
            }
            None => sample,
        }
    }

    /// Drop all active faults
    pub fn clear(&self) {
        *self.probe_delay.lock() = None;
        *self.pressure.lock() = None;
    }
}
