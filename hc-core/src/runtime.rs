//! System-wide runtime: systemmode/runmode/dhwmode defaults, startup
//! restore and the plant online/run/offline lifecycle.
//!
//! `Systemmode` is the global policy; it feeds a default [`Runmode`] and
//! `dhwmode` that apply to any circuit or DHWT with no weekly schedule of
//! its own. A circuit/DHWT with a configured schedule is driven by
//! [`crate::plant::Plant::apply_schedules`]
//! instead; the runtime default only covers the unscheduled case. Mode
//! changes take effect at the next tick boundary -- the three modes are
//! relaxed atomics read once per tick, same as every other runmode in
//! this crate.

use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};

use serde::{Deserialize, Serialize};

use hc_error::Result;
use hc_proto::{persist, Runmode, Systemmode};

use crate::backend::{RelayBackend, SensorBackend, StorageBackend};
use crate::plant::{Plant, TickReport};
use crate::scheduler::WallTime;
use crate::time::Tick;

const PERSIST_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Persisted {
    systemmode: Systemmode,
    runmode: Runmode,
    dhwmode: Runmode,
}

fn systemmode_to_i32(m: Systemmode) -> i32 {
    match m {
        Systemmode::Off => 0,
        Systemmode::Auto => 1,
        Systemmode::Manual => 2,
        Systemmode::Comfort => 3,
        Systemmode::Eco => 4,
        Systemmode::Frostfree => 5,
        Systemmode::Dhwonly => 6,
        Systemmode::Test => 7,
        Systemmode::Summaint => 8,
        Systemmode::None => 9,
        Systemmode::Unknown => 10,
    }
}

fn i32_to_systemmode(v: i32) -> Systemmode {
    match v {
        0 => Systemmode::Off,
        1 => Systemmode::Auto,
        2 => Systemmode::Manual,
        3 => Systemmode::Comfort,
        4 => Systemmode::Eco,
        5 => Systemmode::Frostfree,
        6 => Systemmode::Dhwonly,
        7 => Systemmode::Test,
        8 => Systemmode::Summaint,
        9 => Systemmode::None,
        _ => Systemmode::Unknown,
    }
}

fn runmode_to_i32(m: Runmode) -> i32 {
    match m {
        Runmode::Off => 0,
        Runmode::Auto => 1,
        Runmode::Comfort => 2,
        Runmode::Eco => 3,
        Runmode::Frostfree => 4,
        Runmode::Dhwonly => 5,
        Runmode::Test => 6,
        Runmode::Summaint => 7,
        Runmode::Unknown => 8,
    }
}

fn i32_to_runmode(v: i32) -> Runmode {
    match v {
        0 => Runmode::Off,
        1 => Runmode::Auto,
        2 => Runmode::Comfort,
        3 => Runmode::Eco,
        4 => Runmode::Frostfree,
        5 => Runmode::Dhwonly,
        6 => Runmode::Test,
        7 => Runmode::Summaint,
        _ => Runmode::Unknown,
    }
}

/// The default runmode/dhwmode a [`Systemmode`] implies for any consumer
/// without a schedule of its own. `Manual` implies nothing; the caller is
/// expected to set `runmode`/`dhwmode` directly.
fn systemmode_defaults(mode: Systemmode) -> Option<(Runmode, Runmode)> {
    match mode {
        Systemmode::Off => Some((Runmode::Off, Runmode::Off)),
        Systemmode::Auto => Some((Runmode::Auto, Runmode::Auto)),
        Systemmode::Comfort => Some((Runmode::Comfort, Runmode::Comfort)),
        Systemmode::Eco => Some((Runmode::Eco, Runmode::Eco)),
        Systemmode::Frostfree => Some((Runmode::Frostfree, Runmode::Frostfree)),
        Systemmode::Dhwonly => Some((Runmode::Off, Runmode::Comfort)),
        Systemmode::Test => Some((Runmode::Test, Runmode::Test)),
        Systemmode::Summaint => Some((Runmode::Summaint, Runmode::Off)),
        Systemmode::Manual | Systemmode::None | Systemmode::Unknown => None,
    }
}

/// System-wide mode plus the owned [`Plant`].
pub struct Runtime {
    pub plant: Plant,
    systemmode: AtomicI32,
    runmode: AtomicI32,
    dhwmode: AtomicI32,
    start_time: AtomicI64,
}

impl Runtime {
    pub fn new(plant: Plant) -> Self {
        Runtime {
            plant,
            systemmode: AtomicI32::new(systemmode_to_i32(Systemmode::Auto)),
            runmode: AtomicI32::new(runmode_to_i32(Runmode::Auto)),
            dhwmode: AtomicI32::new(runmode_to_i32(Runmode::Auto)),
            start_time: AtomicI64::new(i64::MIN),
        }
    }

    pub fn systemmode(&self) -> Systemmode {
        i32_to_systemmode(self.systemmode.load(Ordering::Relaxed))
    }

    /// Set the global policy. Unless `mode` is [`Systemmode::Manual`] (or
    /// one of the two non-committal placeholders), this also recomputes
    /// the default runmode/dhwmode every unscheduled consumer follows.
    pub fn set_systemmode(&self, mode: Systemmode) {
        self.systemmode.store(systemmode_to_i32(mode), Ordering::Relaxed);
        if let Some((runmode, dhwmode)) = systemmode_defaults(mode) {
            self.runmode.store(runmode_to_i32(runmode), Ordering::Relaxed);
            self.dhwmode.store(runmode_to_i32(dhwmode), Ordering::Relaxed);
        }
    }

    pub fn runmode(&self) -> Runmode {
        i32_to_runmode(self.runmode.load(Ordering::Relaxed))
    }

    /// Set the default runmode directly. Only meaningful under
    /// [`Systemmode::Manual`]; otherwise the next [`Runtime::set_systemmode`]
    /// call overwrites it.
    pub fn set_runmode(&self, mode: Runmode) {
        self.runmode.store(runmode_to_i32(mode), Ordering::Relaxed);
    }

    pub fn dhwmode(&self) -> Runmode {
        i32_to_runmode(self.dhwmode.load(Ordering::Relaxed))
    }

    pub fn set_dhwmode(&self, mode: Runmode) {
        self.dhwmode.store(runmode_to_i32(mode), Ordering::Relaxed);
    }

    pub fn start_time(&self) -> Option<Tick> {
        let v = self.start_time.load(Ordering::Relaxed);
        if v == i64::MIN {
            None
        } else {
            Some(Tick(v))
        }
    }

    /// Push the runtime default onto every circuit/DHWT that has no
    /// schedule of its own. Scheduled consumers are instead driven by
    /// [`Plant::apply_schedules`], called separately from [`Runtime::tick`].
    fn apply_defaults(&self) {
        let runmode = self.runmode();
        let dhwmode = self.dhwmode();
        for circuit in self.plant.circuits.iter() {
            if circuit.schedule.is_none() {
                circuit.set_runmode(runmode);
            }
        }
        for dhwt in self.plant.dhwts.iter() {
            if dhwt.schedule.is_none() {
                dhwt.set_runmode(dhwmode);
            }
        }
    }

    /// Startup: restore the persisted runtime blob (if any) and every
    /// building model's persisted averages, then record `now` as the
    /// start time. A missing or version-mismatched blob is not an error;
    /// the runtime simply keeps its compiled-in defaults.
    pub fn online(&self, storage: Option<&dyn StorageBackend>, now: Tick) -> Result<()> {
        if let Some(storage) = storage {
            if let Ok((_version, bytes)) = storage.fetch(persist::KEY_RUNTIME) {
                if let Ok(p) = persist::decode_versioned::<Persisted>(PERSIST_VERSION, &bytes) {
                    self.systemmode.store(systemmode_to_i32(p.systemmode), Ordering::Relaxed);
                    self.runmode.store(runmode_to_i32(p.runmode), Ordering::Relaxed);
                    self.dhwmode.store(runmode_to_i32(p.dhwmode), Ordering::Relaxed);
                }
            }
            for bmodel in self.plant.bmodels.iter() {
                if let Err(e) = bmodel.restore(storage) {
                    tracing::debug!(bmodel = %bmodel.name, error = %e, "no persisted building-model state");
                }
            }
        }
        self.start_time.store(now.0, Ordering::Relaxed);
        Ok(())
    }

    /// Run one control-thread tick: push runtime defaults to unscheduled
    /// consumers, resolve schedules, then run the plant pipeline.
    pub fn tick(
        &self,
        sensor_backend: &dyn SensorBackend,
        relay_backend: &dyn RelayBackend,
        storage: Option<&dyn StorageBackend>,
        wall_time: Option<WallTime>,
        now: Tick,
    ) -> TickReport {
        self.apply_defaults();
        self.plant.tick(sensor_backend, relay_backend, storage, wall_time, now)
    }

    /// Shutdown: persist the runtime blob. The in-flight tick has
    /// already completed by the time this is called; leaf objects
    /// (building models) persist their own state from within their own
    /// tick, not here.
    pub fn offline(&self, storage: &dyn StorageBackend) -> Result<()> {
        let p = Persisted { systemmode: self.systemmode(), runmode: self.runmode(), dhwmode: self.dhwmode() };
        let bytes = persist::encode_versioned(PERSIST_VERSION, &p)?;
        storage.dump(persist::KEY_RUNTIME, PERSIST_VERSION, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plant::PlantConfig;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    struct MemStorage {
        blobs: StdMutex<HashMap<String, (u32, Vec<u8>)>>,
    }
    impl StorageBackend for MemStorage {
        fn dump(&self, key: &str, version: u32, bytes: &[u8]) -> Result<()> {
            self.blobs.lock().unwrap().insert(key.to_string(), (version, bytes.to_vec()));
            Ok(())
        }
        fn fetch(&self, key: &str) -> Result<(u32, Vec<u8>)> {
            self.blobs
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| hc_error::Error::NotFound(key.to_string()))
        }
    }

    #[test]
    fn systemmode_comfort_pushes_default_runmode_to_unscheduled_consumers() {
        let runtime = Runtime::new(Plant::new(PlantConfig::default()));
        runtime.set_systemmode(Systemmode::Comfort);
        assert_eq!(runtime.runmode(), Runmode::Comfort);
        assert_eq!(runtime.dhwmode(), Runmode::Comfort);
    }

    #[test]
    fn manual_systemmode_leaves_runmode_alone() {
        let runtime = Runtime::new(Plant::new(PlantConfig::default()));
        runtime.set_runmode(Runmode::Eco);
        runtime.set_systemmode(Systemmode::Manual);
        assert_eq!(runtime.runmode(), Runmode::Eco);
    }

    #[test]
    fn offline_then_online_restores_modes() {
        let storage = MemStorage { blobs: StdMutex::new(HashMap::new()) };
        let runtime = Runtime::new(Plant::new(PlantConfig::default()));
        runtime.set_systemmode(Systemmode::Eco);
        runtime.offline(&storage).unwrap();

        let restored = Runtime::new(Plant::new(PlantConfig::default()));
        restored.online(Some(&storage), Tick(0)).unwrap();
        assert_eq!(restored.systemmode(), Systemmode::Eco);
        assert_eq!(restored.runmode(), Runmode::Eco);
        assert_eq!(restored.start_time(), Some(Tick(0)));
    }
}
