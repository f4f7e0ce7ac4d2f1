//! Pumps.
//!
//! A pump drives one relay. Consumers (circuits, DHWTs) request the pump
//! on or off each tick; a *shared* pump OR-merges every request issued
//! since the last `apply` and only drops to off once nobody asked for it,
//! while an *exclusive* pump is meant to be driven by a single consumer
//! and simply mirrors the last request. Both respect a configured minimum
//! run time once started, so short overlapping demands don't chatter the
//! relay (mirrors the debounce behaviour of [`crate::valve`]'s driver).

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use hc_error::Result;

use crate::backend::RelayBackend;
use crate::ids::{PumpId, RelayId};
use crate::output::RelayRegistry;
use crate::time::Tick;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpSharing {
    /// Several consumers OR-merge their requests onto the same relay.
    Shared,
    /// A single consumer owns the pump outright.
    Exclusive,
}

pub struct Pump {
    pub name: String,
    pub relay: RelayId,
    pub sharing: PumpSharing,
    pub min_runtime: i64,
    requested: AtomicBool,
    running: AtomicBool,
    started_at: AtomicI64,
}

impl Pump {
    pub fn new(name: impl Into<String>, relay: RelayId, sharing: PumpSharing) -> Self {
        Pump {
            name: name.into(),
            relay,
            sharing,
            min_runtime: 0,
            requested: AtomicBool::new(false),
            running: AtomicBool::new(false),
            started_at: AtomicI64::new(i64::MIN),
        }
    }

    pub fn with_min_runtime(mut self, seconds: i64) -> Self {
        self.min_runtime = seconds.max(0);
        self
    }

    /// Called by a consumer during its tick to cast a vote for this
    /// pump's state. Under [`PumpSharing::Shared`], votes accumulate
    /// (OR) until the next [`Pump::apply`]; under
    /// [`PumpSharing::Exclusive`] the latest vote wins outright.
    pub fn request(&self, on: bool) {
        match self.sharing {
            PumpSharing::Shared => {
                if on {
                    self.requested.store(true, Ordering::Relaxed);
                }
            }
            PumpSharing::Exclusive => {
                self.requested.store(on, Ordering::Relaxed);
            }
        }
    }

    /// Drive the relay from the accumulated request and reset the vote
    /// for the next tick. Honors `min_runtime`: a running pump with an
    /// off request pending is kept on until its minimum runtime expires.
    pub fn apply(&self, relays: &RelayRegistry, backend: &dyn RelayBackend, now: Tick) -> Result<()> {
        let wants_on = self.requested.swap(false, Ordering::Relaxed);
        let running = self.running.load(Ordering::Relaxed);

        let effective_on = if running && !wants_on {
            let started = Tick(self.started_at.load(Ordering::Relaxed));
            now.saturating_sub(started) < self.min_runtime
        } else {
            wants_on
        };

        if effective_on != running {
            relays.get(self.relay).state_set(backend, effective_on, now)?;
            self.running.store(effective_on, Ordering::Relaxed);
            if effective_on {
                self.started_at.store(now.0, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
pub struct PumpRegistry {
    pumps: Vec<Pump>,
}

impl PumpRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pump: Pump) -> PumpId {
        self.pumps.push(pump);
        PumpId::from_index(self.pumps.len() - 1)
    }

    pub fn get(&self, id: PumpId) -> &Pump {
        &self.pumps[id.index()]
    }

    pub fn iter_with_id(&self) -> impl Iterator<Item = (PumpId, &Pump)> {
        self.pumps.iter().enumerate().map(|(i, p)| (PumpId::from_index(i), p))
    }

    pub fn apply_all(&self, relays: &RelayRegistry, backend: &dyn RelayBackend, now: Tick) {
        for p in &self.pumps {
            if let Err(e) = p.apply(relays, backend, now) {
                tracing::debug!(pump = %p.name, error = %e, "pump apply failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hc_error::Error;
    use hc_proto::{DispatchOp, RelayMissingPolicy};

    struct FakeRelayBackend;
    impl RelayBackend for FakeRelayBackend {
        fn output_name(&self, _kind: &str, _target_id: u32) -> Option<String> {
            None
        }
        fn output_state_set(&self, _target_id: u32, _kind: &str, _on: bool) -> Result<()> {
            Ok(())
        }
        fn output_state_get(&self, _target_id: u32) -> Result<bool> {
            Err(Error::NotImplemented("stub".into()))
        }
    }

    fn make_pump(sharing: PumpSharing, min_runtime: i64) -> (RelayRegistry, Pump) {
        let mut relays = RelayRegistry::new();
        let relay_id = relays.insert(crate::output::Relay::new("p", DispatchOp::First, RelayMissingPolicy::Fail).with_target("gpio", 1));
        let pump = Pump::new("circuit-pump", relay_id, sharing).with_min_runtime(min_runtime);
        (relays, pump)
    }

    #[test]
    fn shared_pump_ors_requests_within_a_tick() {
        let (relays, pump) = make_pump(PumpSharing::Shared, 0);
        let backend = FakeRelayBackend;
        pump.request(false);
        pump.request(true);
        pump.apply(&relays, &backend, Tick(0)).unwrap();
        assert!(pump.is_running());
    }

    #[test]
    fn min_runtime_holds_pump_on_past_an_off_request() {
        let (relays, pump) = make_pump(PumpSharing::Exclusive, 30);
        let backend = FakeRelayBackend;
        pump.request(true);
        pump.apply(&relays, &backend, Tick(0)).unwrap();
        assert!(pump.is_running());

        pump.request(false);
        pump.apply(&relays, &backend, Tick(10)).unwrap();
        assert!(pump.is_running(), "must stay on until min_runtime elapses");

        pump.request(false);
        pump.apply(&relays, &backend, Tick(40)).unwrap();
        assert!(!pump.is_running());
    }

    #[test]
    fn no_vote_defaults_to_off() {
        let (relays, pump) = make_pump(PumpSharing::Shared, 0);
        let backend = FakeRelayBackend;
        pump.apply(&relays, &backend, Tick(0)).unwrap();
        assert!(!pump.is_running());
    }
}
