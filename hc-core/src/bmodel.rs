//! Building model: smooths the outdoor sensor into three
//! increasingly sluggish views (instant, filtered, attenuated) and
//! derives the summer/frost flags every other module consults.
//!
//! Run-side fields are read by the logging thread every tick, so they
//! are plain relaxed atomics rather than anything lock-guarded -- there
//! is exactly one writer (the control thread) and any number of
//! readers, and a torn read is never possible since each field fits in
//! a single atomic word.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};

use serde::{Deserialize, Serialize};

use hc_error::Result;
use hc_proto::persist;

use crate::backend::StorageBackend;
use crate::ids::BModelId;
use crate::input::SensorRegistry;
use crate::ids::SensorId;
use crate::numeric::{expw_mavg, CENTI_PER_DEGREE};
use crate::numeric::Temp;
use crate::time::Tick;

/// Outdoor temperature is refiltered into `t_out_filt`/`t_out_att` at
/// this cadence, not every tick.
pub const OUTDOOR_AVG_UPDATE_DT: i64 = 600;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Persisted {
    t_out_filt: i32,
    t_out_att: i32,
}

const PERSIST_VERSION: u32 = 1;

pub struct BModel {
    pub name: String,
    pub outdoor: SensorId,
    pub limit_tfrost: Temp,
    pub limit_tsummer: Temp,
    /// Time constant for the filtered/attenuated averages, seconds.
    pub tau_s: f64,

    t_out: AtomicI32,
    t_out_filt: AtomicI32,
    t_out_att: AtomicI32,
    t_out_mix: AtomicI32,
    summer: AtomicBool,
    frost: AtomicBool,
    last_tick: AtomicI64,
    last_filt_tick: AtomicI64,
}

impl BModel {
    pub fn new(name: impl Into<String>, outdoor: SensorId, limit_tfrost: Temp, limit_tsummer: Temp, tau_s: f64) -> Self {
        BModel {
            name: name.into(),
            outdoor,
            limit_tfrost,
            limit_tsummer,
            tau_s,
            t_out: AtomicI32::new(0),
            t_out_filt: AtomicI32::new(0),
            t_out_att: AtomicI32::new(0),
            t_out_mix: AtomicI32::new(0),
            summer: AtomicBool::new(false),
            frost: AtomicBool::new(false),
            last_tick: AtomicI64::new(i64::MIN),
            last_filt_tick: AtomicI64::new(i64::MIN),
        }
    }

    pub fn restore(&self, storage: &dyn StorageBackend) -> Result<()> {
        let key = persist::bmodel_key(&self.name);
        let (_version, bytes) = storage.fetch(&key)?;
        let p: Persisted = persist::decode_versioned(PERSIST_VERSION, &bytes)?;
        self.t_out_filt.store(p.t_out_filt, Ordering::Relaxed);
        self.t_out_att.store(p.t_out_att, Ordering::Relaxed);
        Ok(())
    }

    fn persist(&self, storage: &dyn StorageBackend) -> Result<()> {
        let p = Persisted {
            t_out_filt: self.t_out_filt.load(Ordering::Relaxed),
            t_out_att: self.t_out_att.load(Ordering::Relaxed),
        };
        let bytes = persist::encode_versioned(PERSIST_VERSION, &p)?;
        storage.dump(&persist::bmodel_key(&self.name), PERSIST_VERSION, &bytes)
    }

    /// Advance the model by one tick. `storage` is optional
    /// so tests can drive the model without a persistence backend; a
    /// running daemon should always supply one.
    pub fn tick(&self, sensors: &SensorRegistry, storage: Option<&dyn StorageBackend>, now: Tick) -> Result<()> {
        let sample = match sensors.temperature_get(self.outdoor) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(bmodel = %self.name, error = %e, "outdoor sensor failed, forcing frost-active substitute");
                Temp::from_raw(self.limit_tfrost.raw() - CENTI_PER_DEGREE)
            }
        };

        let last = self.last_tick.swap(now.0, Ordering::Relaxed);
        let t_out = if last == i64::MIN {
            sample.raw()
        } else {
            let dt_sensor = (now.0 - last).max(0) as f64;
            let t_out_prev = self.t_out.load(Ordering::Relaxed);
            expw_mavg(t_out_prev as f64, sample.raw() as f64, 60.0, dt_sensor).round() as i32
        };
        self.t_out.store(t_out, Ordering::Relaxed);

        let last_filt = self.last_filt_tick.load(Ordering::Relaxed);
        let first_filt = last_filt == i64::MIN;
        let due = first_filt || now.0 - last_filt >= OUTDOOR_AVG_UPDATE_DT;
        if due {
            // Seed both averages with the instant value on the very first
            // update instead of averaging against the unset (zero) marker,
            // which would otherwise take days to converge at typical tau.
            let filt = if first_filt {
                t_out
            } else {
                let dt_filter = (now.0 - last_filt) as f64;
                let filt_prev = self.t_out_filt.load(Ordering::Relaxed);
                expw_mavg(filt_prev as f64, t_out as f64, self.tau_s, dt_filter).round() as i32
            };
            self.t_out_filt.store(filt, Ordering::Relaxed);

            let att = if first_filt {
                filt
            } else {
                let dt_filter = (now.0 - last_filt) as f64;
                let att_prev = self.t_out_att.load(Ordering::Relaxed);
                expw_mavg(att_prev as f64, filt as f64, self.tau_s, dt_filter).round() as i32
            };
            self.t_out_att.store(att, Ordering::Relaxed);

            self.last_filt_tick.store(now.0, Ordering::Relaxed);

            if let Some(storage) = storage {
                self.persist(storage)?;
            }
        }

        let filt = self.t_out_filt.load(Ordering::Relaxed);
        let att = self.t_out_att.load(Ordering::Relaxed);
        let mix = (t_out + filt) / 2;
        self.t_out_mix.store(mix, Ordering::Relaxed);

        let tsummer = self.limit_tsummer.raw();
        let all_above = t_out > tsummer && mix > tsummer && att > tsummer;
        let all_below = t_out < tsummer && mix < tsummer && att < tsummer;
        if all_above {
            self.summer.store(true, Ordering::Relaxed);
        } else if all_below {
            self.summer.store(false, Ordering::Relaxed);
        }

        let tfrost = self.limit_tfrost.raw();
        if t_out < tfrost {
            self.frost.store(true, Ordering::Relaxed);
        } else if t_out > tfrost + CENTI_PER_DEGREE {
            self.frost.store(false, Ordering::Relaxed);
        }
        if self.frost.load(Ordering::Relaxed) {
            self.summer.store(false, Ordering::Relaxed);
        }

        Ok(())
    }

    pub fn t_out(&self) -> Temp {
        Temp::from_raw(self.t_out.load(Ordering::Relaxed))
    }

    pub fn t_out_filt(&self) -> Temp {
        Temp::from_raw(self.t_out_filt.load(Ordering::Relaxed))
    }

    pub fn t_out_att(&self) -> Temp {
        Temp::from_raw(self.t_out_att.load(Ordering::Relaxed))
    }

    pub fn t_out_mix(&self) -> Temp {
        Temp::from_raw(self.t_out_mix.load(Ordering::Relaxed))
    }

    pub fn is_summer(&self) -> bool {
        self.summer.load(Ordering::Relaxed)
    }

    pub fn is_frost(&self) -> bool {
        self.frost.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
pub struct BModelRegistry {
    models: Vec<BModel>,
}

impl BModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, model: BModel) -> BModelId {
        self.models.push(model);
        BModelId::from_index(self.models.len() - 1)
    }

    pub fn get(&self, id: BModelId) -> &BModel {
        &self.models[id.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &BModel> {
        self.models.iter()
    }

    pub fn tick_all(&self, sensors: &SensorRegistry, storage: Option<&dyn StorageBackend>, now: Tick) {
        for m in &self.models {
            if let Err(e) = m.tick(sensors, storage, now) {
                tracing::debug!(bmodel = %m.name, error = %e, "building model tick failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SensorBackend;
    use crate::numeric::celsius_to_temp;
    use hc_proto::{AggOp, MissingPolicy};
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    struct FakeBackend {
        readings: StdMutex<HashMap<u32, Result<(Temp, Tick)>>>,
    }
    impl SensorBackend for FakeBackend {
        fn input_name(&self, _kind: &str, _source_id: u32) -> Option<String> {
            None
        }
        fn clone_temp(&self, source_id: u32) -> Result<(Temp, Tick)> {
            self.readings.lock().unwrap().get(&source_id).cloned().unwrap()
        }
    }

    fn setup(outdoor_c: f64) -> (SensorRegistry, SensorId, BModel) {
        let mut readings = HashMap::new();
        readings.insert(1u32, Ok((celsius_to_temp(outdoor_c), Tick(0))));
        let backend = FakeBackend { readings: StdMutex::new(readings) };
        let mut sensors = SensorRegistry::new();
        let id = sensors.insert(crate::input::Sensor::new("outdoor", AggOp::First, MissingPolicy::Fail).with_source("mock", 1));
        sensors.sample_all(&backend, Tick(0));
        let model = BModel::new("main", id, celsius_to_temp(-5.0), celsius_to_temp(18.0), 86400.0);
        (sensors, id, model)
    }

    #[test]
    fn frost_engages_below_limit_and_forces_summer_off() {
        let (sensors, _id, model) = setup(-10.0);
        model.tick(&sensors, None, Tick(0)).unwrap();
        model.tick(&sensors, None, Tick(600)).unwrap();
        assert!(model.is_frost());
        assert!(!model.is_summer());
    }

    #[test]
    fn summer_requires_all_three_views_above_limit() {
        let (sensors, _id, model) = setup(25.0);
        for i in 0..20 {
            model.tick(&sensors, None, Tick(i * 600)).unwrap();
        }
        assert!(model.is_summer());
    }
}
