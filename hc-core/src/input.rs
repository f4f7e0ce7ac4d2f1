//! Named temperature sensors.
//!
//! A sensor samples one or more backend sources at most every `period`
//! ticks, aggregates them with `op`, and applies the configured
//! missing-source policy to backend failures, invalid readings, and
//! readings outside the configured ignore-temperature window.

use parking_lot::Mutex;

use hc_error::{Error, Result};
use hc_proto::{AggOp, MissingPolicy};

use crate::backend::SensorBackend;
use crate::ids::SensorId;
use crate::numeric::{validate_temp, Temp};
use crate::time::Tick;

/// One backend-specific source a [`Sensor`] reads from, in priority order.
#[derive(Debug, Clone)]
pub struct SensorSource {
    pub kind: String,
    pub source_id: u32,
}

#[derive(Debug, Clone, Default)]
struct Cached {
    value: Temp,
    time: Tick,
}

/// A named temperature input.
#[derive(Debug)]
pub struct Sensor {
    pub name: String,
    pub period: i64,
    pub op: AggOp,
    pub missing: MissingPolicy,
    /// Window around the last accepted value a new reading must fall
    /// within; `None` disables the check.
    pub igntemp_window: Option<i32>,
    pub default_value: Option<Temp>,
    pub sources: Vec<SensorSource>,
    cached: Mutex<Cached>,
}

impl Sensor {
    pub fn new(name: impl Into<String>, op: AggOp, missing: MissingPolicy) -> Self {
        Sensor {
            name: name.into(),
            period: 1,
            op,
            missing,
            igntemp_window: None,
            default_value: None,
            sources: Vec::new(),
            cached: Mutex::new(Cached::default()),
        }
    }

    pub fn with_source(mut self, kind: impl Into<String>, source_id: u32) -> Self {
        self.sources.push(SensorSource { kind: kind.into(), source_id });
        self
    }

    pub fn with_period(mut self, period: i64) -> Self {
        self.period = period.max(1);
        self
    }

    pub fn with_igntemp_window(mut self, window: i32) -> Self {
        self.igntemp_window = Some(window);
        self
    }

    pub fn with_default(mut self, default: Temp) -> Self {
        self.default_value = Some(default);
        self
    }

    fn read_one(&self, backend: &dyn SensorBackend, src: &SensorSource, last_good: Temp) -> Result<(Temp, Tick)> {
        let (t, tm) = backend.clone_temp(src.source_id)?;
        validate_temp(t)?;
        if let (Some(window), true) = (self.igntemp_window, last_good.is_set()) {
            if (t.raw() - last_good.raw()).abs() > window {
                return Err(Error::SensorInvalid(format!(
                    "{}: reading outside ignore-temperature window",
                    self.name
                )));
            }
        }
        Ok((t, tm))
    }

    /// Sample backend sources if `period` ticks have elapsed since the
    /// last sample, updating the cached value.
    pub fn sample(&self, backend: &dyn SensorBackend, now: Tick) -> Result<()> {
        {
            let cached = self.cached.lock();
            if cached.time != Tick::ZERO && now.saturating_sub(cached.time) < self.period {
                return Ok(());
            }
        }
        let last_good = self.cached.lock().value;

        let mut values: Vec<Temp> = Vec::new();
        let mut latest_time = last_good_time(&self.cached);

        for src in &self.sources {
            match self.read_one(backend, src, last_good) {
                Ok((t, tm)) => {
                    values.push(t);
                    if tm > latest_time {
                        latest_time = tm;
                    }
                    if self.op == AggOp::First {
                        break;
                    }
                }
                Err(e) => match self.missing {
                    MissingPolicy::Fail => return Err(e),
                    MissingPolicy::Ignore => continue,
                    MissingPolicy::Ignoredef => {
                        if let Some(def) = self.default_value {
                            values.push(def);
                            latest_time = now;
                            if self.op == AggOp::First {
                                break;
                            }
                        }
                    }
                },
            }
        }

        if values.is_empty() {
            return Err(Error::SensorDiscon(format!("{}: no valid source", self.name)));
        }

        let agg = match self.op {
            AggOp::First => values[0],
            AggOp::Min => values.iter().copied().min().unwrap(),
            AggOp::Max => values.iter().copied().max().unwrap(),
        };

        *self.cached.lock() = Cached { value: agg, time: latest_time };
        Ok(())
    }

    pub fn temperature_get(&self) -> Result<Temp> {
        let c = self.cached.lock();
        if !c.value.is_set() {
            return Err(Error::SensorDiscon(format!("{}: never sampled", self.name)));
        }
        Ok(c.value)
    }

    pub fn temperature_time(&self) -> Tick {
        self.cached.lock().time
    }
}

fn last_good_time(cached: &Mutex<Cached>) -> Tick {
    cached.lock().time
}

/// Owning registry of configured sensors, indexed by [`SensorId`].
#[derive(Default)]
pub struct SensorRegistry {
    sensors: Vec<Sensor>,
}

impl SensorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, sensor: Sensor) -> SensorId {
        self.sensors.push(sensor);
        SensorId::from_index(self.sensors.len() - 1)
    }

    pub fn get(&self, id: SensorId) -> &Sensor {
        &self.sensors[id.index()]
    }

    pub fn sample_all(&self, backend: &dyn SensorBackend, now: Tick) {
        for s in &self.sensors {
            if let Err(e) = s.sample(backend, now) {
                tracing::debug!(sensor = %s.name, error = %e, "sensor sample failed");
            }
        }
    }

    pub fn temperature_get(&self, id: SensorId) -> Result<Temp> {
        self.get(id).temperature_get()
    }

    pub fn temperature_time(&self, id: SensorId) -> Tick {
        self.get(id).temperature_time()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numeric::celsius_to_temp;
    use std::sync::Mutex as StdMutex;

    struct FakeSensorBackend {
        readings: StdMutex<std::collections::HashMap<u32, Result<(Temp, Tick)>>>,
    }

    impl SensorBackend for FakeSensorBackend {
        fn input_name(&self, _kind: &str, _source_id: u32) -> Option<String> {
            None
        }
        fn clone_temp(&self, source_id: u32) -> Result<(Temp, Tick)> {
            self.readings
                .lock()
                .unwrap()
                .get(&source_id)
                .cloned()
                .unwrap_or_else(|| Err(Error::SensorDiscon("no such source".into())))
        }
    }

    #[test]
    fn first_policy_stops_at_first_success() {
        let mut readings = std::collections::HashMap::new();
        readings.insert(1u32, Ok((celsius_to_temp(20.0), Tick(5))));
        readings.insert(2u32, Ok((celsius_to_temp(99.0), Tick(5))));
        let backend = FakeSensorBackend { readings: StdMutex::new(readings) };
        let sensor = Sensor::new("test", AggOp::First, MissingPolicy::Fail)
            .with_source("mock", 1)
            .with_source("mock", 2);
        sensor.sample(&backend, Tick(5)).unwrap();
        assert_eq!(sensor.temperature_get().unwrap(), celsius_to_temp(20.0));
    }

    #[test]
    fn min_policy_aggregates_across_all_sources() {
        let mut readings = std::collections::HashMap::new();
        readings.insert(1u32, Ok((celsius_to_temp(20.0), Tick(5))));
        readings.insert(2u32, Ok((celsius_to_temp(5.0), Tick(5))));
        let backend = FakeSensorBackend { readings: StdMutex::new(readings) };
        let sensor = Sensor::new("test", AggOp::Min, MissingPolicy::Fail)
            .with_source("mock", 1)
            .with_source("mock", 2);
        sensor.sample(&backend, Tick(5)).unwrap();
        assert_eq!(sensor.temperature_get().unwrap(), celsius_to_temp(5.0));
    }

    #[test]
    fn fail_policy_short_circuits() {
        let readings = std::collections::HashMap::new();
        let backend = FakeSensorBackend { readings: StdMutex::new(readings) };
        let sensor = Sensor::new("test", AggOp::First, MissingPolicy::Fail).with_source("mock", 1);
        assert!(sensor.sample(&backend, Tick(5)).is_err());
    }

    #[test]
    fn ignoredef_substitutes_configured_default() {
        let readings = std::collections::HashMap::new();
        let backend = FakeSensorBackend { readings: StdMutex::new(readings) };
        let sensor = Sensor::new("test", AggOp::First, MissingPolicy::Ignoredef)
            .with_source("mock", 1)
            .with_default(celsius_to_temp(-1.0));
        sensor.sample(&backend, Tick(5)).unwrap();
        assert_eq!(sensor.temperature_get().unwrap(), celsius_to_temp(-1.0));
    }
}
