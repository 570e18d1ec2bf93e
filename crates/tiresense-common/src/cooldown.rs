//! Cooldown ledger gating recovery and scaling dispatch
//!
//! Maps `(target, issue kind)` to the earliest monotonic time a matching
//! action may run again. `check_and_claim` is the only mutating operation
//! and is atomic under a single short-lived lock, which also makes it the
//! serialization point guaranteeing at-most-one in-flight action per key.

use crate::clock::Clock;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Ledger key: remediation target plus the issue being remediated
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CooldownKey {
    pub target: String,
    pub kind: String,
}

impl CooldownKey {
    pub fn new(target: impl Into<String>, kind: impl Into<String>) -> Self {
        CooldownKey { target: target.into(), kind: kind.into() }
    }
}

impl std::fmt::Display for CooldownKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.target, self.kind)
    }
}

/// Atomic cooldown bookkeeping shared by the recovery engine and the
/// predictive scaler
#[derive(Debug)]
pub struct CooldownLedger {
    clock: Arc<dyn Clock>,
    deadlines: Mutex<HashMap<CooldownKey, Duration>>,
}

impl CooldownLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        CooldownLedger { clock, deadlines: Mutex::new(HashMap::new()) }
    }

    /// Atomically returns true iff no deadline exists for `key` or it has
    /// passed, installing `now + cooldown` as the new deadline.
    pub fn check_and_claim(&self, key: &CooldownKey, cooldown: Duration) -> bool {
        let now = self.clock.now();
        let mut deadlines = self.deadlines.lock();
        match deadlines.get(key) {
            Some(deadline) if *deadline > now => false,
            _ => {
                deadlines.insert(key.clone(), now + cooldown);
                true
            }
        }
    }

    /// Remaining cooldown for a key, if any
    pub fn remaining(&self, key: &CooldownKey) -> Option<Duration> {
        let now = self.clock.now();
        self.deadlines
            .lock()
            .get(key)
            .and_then(|deadline| deadline.checked_sub(now))
            .filter(|d| !d.is_zero())
    }

    /// Drop entries whose deadline has passed; called by maintenance
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut deadlines = self.deadlines.lock();
        let before = deadlines.len();
        deadlines.retain(|_, deadline| *deadline > now);
        before - deadlines.len()
    }

    pub fn len(&self) -> usize {
        self.deadlines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;

    fn ledger() -> (Arc<VirtualClock>, CooldownLedger) {
        let clock = Arc::new(VirtualClock::new());
        let ledger = CooldownLedger::new(clock.clone());
        (clock, ledger)
    }

    #[test]
    fn first_claim_wins_and_installs_deadline() {
        let (_, ledger) = ledger();
        let key = CooldownKey::new("D1", "pressure_anomaly");
        assert!(ledger.check_and_claim(&key, Duration::from_secs(600)));
        assert!(!ledger.check_and_claim(&key, Duration::from_secs(600)));
        assert!(ledger.remaining(&key).is_some());
    }

    #[test]
    fn claim_allowed_again_after_cooldown_elapses() {
        let (clock, ledger) = ledger();
        let key = CooldownKey::new("D1", "pressure_anomaly");
        assert!(ledger.check_and_claim(&key, Duration::from_secs(600)));

        clock.advance(Duration::from_secs(599));
        assert!(!ledger.check_and_claim(&key, Duration::from_secs(600)));

        clock.advance(Duration::from_secs(1));
        assert!(ledger.check_and_claim(&key, Duration::from_secs(600)));
    }

    #[test]
    fn distinct_keys_do_not_interfere() {
        let (_, ledger) = ledger();
        let a = CooldownKey::new("D1", "pressure_anomaly");
        let b = CooldownKey::new("D1", "temperature_anomaly");
        let c = CooldownKey::new("D2", "pressure_anomaly");
        assert!(ledger.check_and_claim(&a, Duration::from_secs(60)));
        assert!(ledger.check_and_claim(&b, Duration::from_secs(60)));
        assert!(ledger.check_and_claim(&c, Duration::from_secs(60)));
    }

    #[test]
    fn purge_removes_only_expired_entries() {
        let (clock, ledger) = ledger();
        let short = CooldownKey::new("a", "x");
        let long = CooldownKey::new("b", "y");
        ledger.check_and_claim(&short, Duration::from_secs(10));
        ledger.check_and_claim(&long, Duration::from_secs(100));

        clock.advance(Duration::from_secs(20));
        assert_eq!(ledger.purge_expired(), 1);
        assert_eq!(ledger.len(), 1);
        assert!(ledger.remaining(&long).is_some());
    }

    #[test]
    fn concurrent_claims_admit_exactly_one() {
        let (_, ledger) = ledger();
        let ledger = Arc::new(ledger);
        let key = CooldownKey::new("D1", "pressure_anomaly");

        let admitted: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| {
                    let ledger = ledger.clone();
                    let key = key.clone();
                    scope.spawn(move || ledger.check_and_claim(&key, Duration::from_secs(600)))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|admitted| *admitted)
                .count()
        });

        assert_eq!(admitted, 1);
    }
}
