//! Named relays: actuator abstraction with spinlocked multi-target
//! dispatch, cycle/on-time accounting, and exclusive ownership via
//! grab/thaw.
//!
//! Accounting counters are lock-free relaxed atomics so the logging
//! thread can read them without blocking the control thread; the only
//! thing the spinlock serializes is the write path itself.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use hc_error::{Error, Result};
use hc_proto::{DispatchOp, RelayMissingPolicy};

use crate::backend::RelayBackend;
use crate::ids::RelayId;
use crate::time::Tick;

/// One backend-specific actuator target a [`Relay`] dispatches to.
#[derive(Debug, Clone)]
pub struct RelayTarget {
    pub kind: String,
    pub target_id: u32,
}

/// A named output relay, possibly backed by more than one physical
/// target (e.g. a "first + ignore-missing" failover pair).
pub struct Relay {
    pub name: String,
    pub dispatch: DispatchOp,
    pub missing: RelayMissingPolicy,
    pub targets: Vec<RelayTarget>,
    spin: AtomicBool,
    state: AtomicBool,
    state_since: AtomicI64,
    cycles: AtomicU64,
    on_seconds: AtomicU64,
    off_seconds: AtomicU64,
    grabbed: AtomicBool,
}

impl Relay {
    pub fn new(name: impl Into<String>, dispatch: DispatchOp, missing: RelayMissingPolicy) -> Self {
        Relay {
            name: name.into(),
            dispatch,
            missing,
            targets: Vec::new(),
            spin: AtomicBool::new(false),
            state: AtomicBool::new(false),
            state_since: AtomicI64::new(0),
            cycles: AtomicU64::new(0),
            on_seconds: AtomicU64::new(0),
            off_seconds: AtomicU64::new(0),
            grabbed: AtomicBool::new(false),
        }
    }

    pub fn with_target(mut self, kind: impl Into<String>, target_id: u32) -> Self {
        self.targets.push(RelayTarget { kind: kind.into(), target_id });
        self
    }

    fn spin_acquire(&self) {
        while self
            .spin
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
    }

    fn spin_release(&self) {
        self.spin.store(false, Ordering::Release);
    }

    /// Request a new relay state, serialized against concurrent setters
    /// by the spinlock.
    pub fn state_set(&self, backend: &dyn RelayBackend, on: bool, now: Tick) -> Result<()> {
        self.spin_acquire();
        let result = self.state_set_locked(backend, on, now);
        self.spin_release();
        result
    }

    fn state_set_locked(&self, backend: &dyn RelayBackend, on: bool, now: Tick) -> Result<()> {
        let prev = self.state.load(Ordering::Relaxed);
        if prev == on {
            return Ok(());
        }

        let mut any_success = false;
        let mut first_err: Option<Error> = None;

        for target in &self.targets {
            match backend.output_state_set(target.target_id, &target.kind, on) {
                Ok(()) => {
                    any_success = true;
                    if self.dispatch == DispatchOp::First {
                        break;
                    }
                }
                Err(e) => {
                    if self.missing == RelayMissingPolicy::Fail {
                        return Err(e);
                    }
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }

        if !any_success {
            return Err(first_err.unwrap_or_else(|| Error::Offline(self.name.clone())));
        }

        let since = Tick(self.state_since.load(Ordering::Relaxed));
        let elapsed = now.saturating_sub(since).max(0) as u64;
        if prev {
            self.on_seconds.fetch_add(elapsed, Ordering::Relaxed);
        } else {
            self.off_seconds.fetch_add(elapsed, Ordering::Relaxed);
        }
        self.state.store(on, Ordering::Relaxed);
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.state_since.store(now.0, Ordering::Relaxed);
        Ok(())
    }

    pub fn state_get(&self) -> bool {
        self.state.load(Ordering::Relaxed)
    }

    /// Take exclusive ownership. Fails if already grabbed.
    pub fn grab(&self) -> Result<()> {
        if self.grabbed.swap(true, Ordering::AcqRel) {
            Err(Error::Exists(format!("relay {} already grabbed", self.name)))
        } else {
            Ok(())
        }
    }

    pub fn thaw(&self) {
        self.grabbed.store(false, Ordering::Release);
    }

    pub fn acct_cycles_get(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn acct_on_seconds_get(&self) -> u64 {
        self.on_seconds.load(Ordering::Relaxed)
    }

    pub fn acct_off_seconds_get(&self) -> u64 {
        self.off_seconds.load(Ordering::Relaxed)
    }
}

/// Owning registry of configured relays, indexed by [`RelayId`].
#[derive(Default)]
pub struct RelayRegistry {
    relays: Vec<Relay>,
}

impl RelayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, relay: Relay) -> RelayId {
        self.relays.push(relay);
        RelayId::from_index(self.relays.len() - 1)
    }

    pub fn get(&self, id: RelayId) -> &Relay {
        &self.relays[id.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Relay> {
        self.relays.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeRelayBackend {
        fail: Vec<u32>,
        states: Mutex<HashMap<u32, bool>>,
    }

    impl RelayBackend for FakeRelayBackend {
        fn output_name(&self, _kind: &str, _target_id: u32) -> Option<String> {
            None
        }
        fn output_state_set(&self, target_id: u32, _kind: &str, on: bool) -> Result<()> {
            if self.fail.contains(&target_id) {
                return Err(Error::Offline("simulated failure".into()));
            }
            self.states.lock().unwrap().insert(target_id, on);
            Ok(())
        }
        fn output_state_get(&self, target_id: u32) -> Result<bool> {
            Ok(*self.states.lock().unwrap().get(&target_id).unwrap_or(&false))
        }
    }

    #[test]
    fn cycles_are_monotonic_and_time_is_accounted() {
        let backend = FakeRelayBackend { fail: vec![], states: Mutex::new(HashMap::new()) };
        let relay = Relay::new("burner", DispatchOp::First, RelayMissingPolicy::Fail).with_target("gpio", 1);
        relay.state_set(&backend, true, Tick(0)).unwrap();
        assert_eq!(relay.acct_cycles_get(), 1);
        relay.state_set(&backend, false, Tick(10)).unwrap();
        assert_eq!(relay.acct_cycles_get(), 2);
        assert_eq!(relay.acct_on_seconds_get(), 10);
        // Setting the same state again must not bump the cycle counter.
        relay.state_set(&backend, false, Tick(20)).unwrap();
        assert_eq!(relay.acct_cycles_get(), 2);
    }

    #[test]
    fn first_plus_ignore_missing_is_a_failover_pair() {
        let backend = FakeRelayBackend { fail: vec![1], states: Mutex::new(HashMap::new()) };
        let relay = Relay::new("pair", DispatchOp::First, RelayMissingPolicy::Ignore)
            .with_target("gpio", 1)
            .with_target("gpio", 2);
        relay.state_set(&backend, true, Tick(0)).unwrap();
        assert!(relay.state_get());
    }

    #[test]
    fn grab_is_exclusive() {
        let relay = Relay::new("shared", DispatchOp::First, RelayMissingPolicy::Fail);
        relay.grab().unwrap();
        assert!(relay.grab().is_err());
        relay.thaw();
        relay.grab().unwrap();
    }
}
