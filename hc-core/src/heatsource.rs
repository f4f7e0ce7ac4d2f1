//! Boiler heatsource: logic phase (checklist, antifreeze, target
//! selection, cold-start/return-temperature protection) and run phase
//! (adaptive hysteresis with anticipation, burner control).
//!
//! `rid_burner_2` is wired into the type but never driven: a second
//! burner stage is reserved without any staging logic defined for it, so
//! it stays permanently off (see DESIGN.md).

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};

use hc_error::{Error, Result};
use hc_proto::{BoilerIdleMode, Runmode};

use crate::backend::RelayBackend;
use crate::ids::{HeatsourceId, PumpId, RelayId, SensorId};
use crate::input::SensorRegistry;
use crate::numeric::{ks_to_centiks, LinDeriv, ThrsIntg, Temp};
use crate::output::RelayRegistry;
use crate::pump::PumpRegistry;
use crate::time::Tick;

/// Magic "no demand" marker distinct from [`Temp::UNSET`]'s "never
/// sampled" meaning: a consumer that is online but currently wants no
/// heat reports `NO_REQUEST`, not silence.
pub const NO_REQUEST: Temp = Temp::UNSET;

pub const CSHIFT_MAX_INHIBIT: f64 = -100.0;

struct Integrators {
    below_tmin: ThrsIntg,
    return_below_min: ThrsIntg,
}

impl Default for Integrators {
    fn default() -> Self {
        Integrators { below_tmin: ThrsIntg::new(), return_below_min: ThrsIntg::new() }
    }
}

struct Anticipation {
    turnon_negderiv: bool,
    negderiv_starttime: Tick,
    turnon_curr_adj: f64,
    turnon_next_adj: f64,
}

impl Default for Anticipation {
    fn default() -> Self {
        Anticipation { turnon_negderiv: false, negderiv_starttime: Tick::ZERO, turnon_curr_adj: 0.0, turnon_next_adj: 0.0 }
    }
}

pub struct Boiler {
    pub name: String,
    pub boiler_sensor: SensorId,
    pub return_sensor: Option<SensorId>,
    pub burner_1: RelayId,
    pub burner_2: Option<RelayId>,
    pub load_pump: Option<PumpId>,
    pub return_valve: Option<crate::ids::ValveId>,
    pub idle_mode: BoilerIdleMode,
    /// Full-band hysteresis, centi-Kelvin.
    pub hysteresis: i32,
    pub limit_tmin: Temp,
    pub limit_tmax: Temp,
    pub limit_thardmax: Temp,
    pub limit_treturnmin: Option<Temp>,
    pub t_freeze: Temp,
    pub burner_min_time: i64,
    pub priority: i32,
    pub consumer_sdelay: i64,

    runmode: AtomicI32,
    could_sleep: AtomicBool,
    overtemp: AtomicBool,
    failed: AtomicBool,
    temp_request: AtomicI32,
    cshift_crit_x100: AtomicI32,
    target_consumer_sdelay: AtomicI64,
    online: AtomicBool,

    active: AtomicBool,
    antifreeze: AtomicBool,
    target_temp: AtomicI32,
    actual_temp: AtomicI32,
    actual_temp_time: AtomicI64,
    burner_1_last_switch: AtomicI64,

    integrators: parking_lot::Mutex<Integrators>,
    deriv: parking_lot::Mutex<LinDeriv>,
    anticipation: parking_lot::Mutex<Anticipation>,
    anticipation_no_rise_since: AtomicI64,
}

fn runmode_to_i32(m: Runmode) -> i32 {
    match m {
        Runmode::Off => 0,
        Runmode::Comfort => 1,
        Runmode::Eco => 2,
        Runmode::Dhwonly => 3,
        Runmode::Frostfree => 4,
        Runmode::Test => 5,
        _ => 6,
    }
}

fn i32_to_runmode(v: i32) -> Runmode {
    match v {
        0 => Runmode::Off,
        1 => Runmode::Comfort,
        2 => Runmode::Eco,
        3 => Runmode::Dhwonly,
        4 => Runmode::Frostfree,
        5 => Runmode::Test,
        _ => Runmode::Unknown,
    }
}

impl Boiler {
    pub fn new(name: impl Into<String>, boiler_sensor: SensorId, burner_1: RelayId) -> Self {
        Boiler {
            name: name.into(),
            boiler_sensor,
            return_sensor: None,
            burner_1,
            burner_2: None,
            load_pump: None,
            return_valve: None,
            idle_mode: BoilerIdleMode::Never,
            hysteresis: 600,
            limit_tmin: crate::numeric::celsius_to_temp(40.0),
            limit_tmax: crate::numeric::celsius_to_temp(80.0),
            limit_thardmax: crate::numeric::celsius_to_temp(90.0),
            limit_treturnmin: None,
            t_freeze: crate::numeric::celsius_to_temp(5.0),
            burner_min_time: 300,
            priority: 0,
            consumer_sdelay: 0,
            runmode: AtomicI32::new(runmode_to_i32(Runmode::Comfort)),
            could_sleep: AtomicBool::new(false),
            overtemp: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            temp_request: AtomicI32::new(0),
            cshift_crit_x100: AtomicI32::new(0),
            target_consumer_sdelay: AtomicI64::new(0),
            online: AtomicBool::new(true),
            active: AtomicBool::new(false),
            antifreeze: AtomicBool::new(false),
            target_temp: AtomicI32::new(0),
            actual_temp: AtomicI32::new(0),
            actual_temp_time: AtomicI64::new(i64::MIN),
            burner_1_last_switch: AtomicI64::new(i64::MIN),
            integrators: parking_lot::Mutex::new(Integrators::default()),
            deriv: parking_lot::Mutex::new(LinDeriv::new()),
            anticipation: parking_lot::Mutex::new(Anticipation::default()),
            anticipation_no_rise_since: AtomicI64::new(i64::MIN),
        }
    }

    pub fn with_limits(mut self, tmin: Temp, tmax: Temp, thardmax: Temp) -> Self {
        self.limit_tmin = tmin;
        self.limit_tmax = tmax;
        self.limit_thardmax = thardmax;
        self
    }

    pub fn with_return_protection(mut self, return_sensor: SensorId, limit_treturnmin: Temp) -> Self {
        self.return_sensor = Some(return_sensor);
        self.limit_treturnmin = Some(limit_treturnmin);
        self
    }

    pub fn with_return_valve(mut self, valve: crate::ids::ValveId) -> Self {
        self.return_valve = Some(valve);
        self
    }

    pub fn with_load_pump(mut self, pump: PumpId) -> Self {
        self.load_pump = Some(pump);
        self
    }

    pub fn with_idle_mode(mut self, idle_mode: BoilerIdleMode) -> Self {
        self.idle_mode = idle_mode;
        self
    }

    pub fn with_burner_min_time(mut self, ticks: i64) -> Self {
        self.burner_min_time = ticks.max(0);
        self
    }

    pub fn with_consumer_sdelay(mut self, ticks: i64) -> Self {
        self.consumer_sdelay = ticks.max(0);
        self
    }

    pub fn set_runmode(&self, mode: Runmode) {
        self.runmode.store(runmode_to_i32(mode), Ordering::Relaxed);
    }

    pub fn runmode(&self) -> Runmode {
        i32_to_runmode(self.runmode.load(Ordering::Relaxed))
    }

    /// Heat request from a single consumer (circuit/DHWT): the
    /// orchestrator calls this once per consumer before [`Boiler::logic`].
    pub fn request(&self, wanted: Temp) {
        let cur = self.temp_request.load(Ordering::Relaxed);
        if cur == NO_REQUEST.raw() || wanted.raw() > cur {
            self.temp_request.store(wanted.raw(), Ordering::Relaxed);
        }
    }

    pub fn could_sleep(&self) -> bool {
        self.could_sleep.load(Ordering::Relaxed)
    }

    pub fn cshift_crit(&self) -> f64 {
        self.cshift_crit_x100.load(Ordering::Relaxed) as f64 / 100.0
    }

    pub fn target_consumer_sdelay(&self) -> i64 {
        self.target_consumer_sdelay.load(Ordering::Relaxed)
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn is_overtemp(&self) -> bool {
        self.overtemp.load(Ordering::Relaxed)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    /// Target boiler body temperature selected by [`Boiler::logic`]'s most
    /// recent run, if any consumer is currently asking for heat.
    pub fn target_temp(&self) -> Option<Temp> {
        let raw = self.target_temp.load(Ordering::Relaxed);
        if raw == NO_REQUEST.raw() {
            None
        } else {
            Some(Temp::from_raw(raw))
        }
    }

    /// Body temperature as of the last successful sensor read.
    pub fn actual_temp(&self) -> Option<Temp> {
        if self.actual_temp_time.load(Ordering::Relaxed) == i64::MIN {
            None
        } else {
            Some(Temp::from_raw(self.actual_temp.load(Ordering::Relaxed)))
        }
    }

    fn failsafe(&self, relays: &RelayRegistry, backend: &dyn RelayBackend, valves: &crate::valve::ValveRegistry, pumps: &PumpRegistry, now: Tick) {
        let _ = relays.get(self.burner_1).state_set(backend, false, now);
        if let Some(b2) = self.burner_2 {
            let _ = relays.get(b2).state_set(backend, false, now);
        }
        if let Some(valve) = self.return_valve {
            valves.get(valve).driver.drive(1000);
        }
        if let Some(pump) = self.load_pump {
            pumps.get(pump).request(true);
        }
        self.failed.store(true, Ordering::Relaxed);
    }

    /// Logic phase. Must run before [`Boiler::run`] in the same tick.
    pub fn logic(
        &self,
        sensors: &SensorRegistry,
        relays: &RelayRegistry,
        backend: &dyn RelayBackend,
        valves: &crate::valve::ValveRegistry,
        pumps: &PumpRegistry,
        now: Tick,
    ) -> Result<()> {
        let mode = self.runmode();
        if mode == Runmode::Off {
            self.online.store(false, Ordering::Relaxed);
            self.active.store(false, Ordering::Relaxed);
            self.target_temp.store(NO_REQUEST.raw(), Ordering::Relaxed);
            relays.get(self.burner_1).state_set(backend, false, now)?;
            return Ok(());
        }
        self.online.store(true, Ordering::Relaxed);
        self.failed.store(false, Ordering::Relaxed);

        let body = match sensors.temperature_get(self.boiler_sensor) {
            Ok(t) => t,
            Err(e) => {
                self.failsafe(relays, backend, valves, pumps, now);
                tracing::error!(heatsource = %self.name, error = %e, "boiler checklist failed, entering failsafe");
                return Err(Error::SafetyTripped(format!("{}: mandatory sensor failure", self.name)));
            }
        };

        let hyst_half = self.hysteresis / 2;
        if body.raw() < self.t_freeze.raw() {
            self.antifreeze.store(true, Ordering::Relaxed);
        } else if body.raw() > self.limit_tmin.raw() + hyst_half {
            self.antifreeze.store(false, Ordering::Relaxed);
        }

        let request = self.temp_request.swap(NO_REQUEST.raw(), Ordering::Relaxed);
        let mut target = match mode {
            Runmode::Test => self.limit_tmax,
            Runmode::Off => NO_REQUEST,
            _ => Temp::from_raw(request),
        };
        if self.antifreeze.load(Ordering::Relaxed) {
            target = Temp::from_raw(target.raw().max(self.limit_tmin.raw()));
        }

        let no_request = target == NO_REQUEST;
        self.could_sleep.store(no_request, Ordering::Relaxed);

        if no_request {
            match self.idle_mode {
                BoilerIdleMode::Never => {}
                BoilerIdleMode::Always => target = self.limit_tmin,
                BoilerIdleMode::Frostonly => {
                    if self.antifreeze.load(Ordering::Relaxed) {
                        target = self.limit_tmin;
                    }
                }
            }
        }
        if target.is_set() {
            target = Temp::from_raw(target.raw().clamp(self.limit_tmin.raw(), self.limit_tmax.raw()));
        }
        self.target_temp.store(target.raw(), Ordering::Relaxed);

        self.actual_temp.store(body.raw(), Ordering::Relaxed);
        self.actual_temp_time.store(now.0, Ordering::Relaxed);

        if body.raw() > self.limit_thardmax.raw() {
            self.failsafe(relays, backend, valves, pumps, now);
            self.overtemp.store(true, Ordering::Relaxed);
            self.cshift_crit_x100.store((CSHIFT_MAX_INHIBIT * 100.0) as i32, Ordering::Relaxed);
            tracing::error!(heatsource = %self.name, actual = ?body, "boiler hard max exceeded");
            return Err(Error::SafetyTripped(format!("{}: actual temperature above hardmax", self.name)));
        }

        {
            let burner_on = relays.get(self.burner_1).state_get();
            let mut deriv = self.deriv.lock();
            let tau = if burner_on { 10.0 } else { 60.0 };
            deriv.update(body, now.as_seconds(), tau);
        }

        let mut cshift_boil = 0.0;
        if self.limit_tmin.is_set() {
            let mut integ = self.integrators.lock();
            let v = integ.below_tmin.update(self.limit_tmin, body, now.as_seconds(), ks_to_centiks(-100.0), 0);
            let ks = crate::numeric::centiks_to_ks(v);
            cshift_boil = (2.0 * ks).round();
        }

        let mut cshift_ret = 0.0;
        if let (Some(limit_treturnmin), Some(return_sensor)) = (self.limit_treturnmin, self.return_sensor) {
            if let Ok(ret_temp) = sensors.temperature_get(return_sensor) {
                if let Some(valve) = self.return_valve {
                    valves.get(valve).control(limit_treturnmin, ret_temp, Some(body), None, now).ok();
                } else {
                    let mut integ = self.integrators.lock();
                    let v = integ.return_below_min.update(limit_treturnmin, ret_temp, now.as_seconds(), ks_to_centiks(-500.0), 0);
                    let ks = crate::numeric::centiks_to_ks(v);
                    cshift_ret = (ks / 10.0).round();
                }
            }
        }

        let cshift_crit = cshift_boil.min(cshift_ret);
        self.cshift_crit_x100.store((cshift_crit * 100.0) as i32, Ordering::Relaxed);

        Ok(())
    }

    /// Run phase. Must run after [`Boiler::logic`] in the same tick.
    pub fn run(&self, relays: &RelayRegistry, backend: &dyn RelayBackend, now: Tick) -> Result<()> {
        let target_raw = self.target_temp.load(Ordering::Relaxed);
        if target_raw == NO_REQUEST.raw() {
            // could_sleep mirrors this exactly: idle_mode::Never with no
            // request is the only way to reach here with an unset
            // target, and that always permits sleep.
            self.active.store(false, Ordering::Relaxed);
            return relays.get(self.burner_1).state_set(backend, false, now);
        }
        let target = Temp::from_raw(target_raw);
        let actual = Temp::from_raw(self.actual_temp.load(Ordering::Relaxed));

        let deriv_k_per_s = self.deriv.lock().value_k_per_s();
        let turnon_curr_adj = self.anticipation.lock().turnon_curr_adj;

        let mut trip = target.raw() - self.hysteresis / 2;
        if deriv_k_per_s < 0.0 {
            let anticipation = (deriv_k_per_s * deriv_k_per_s * turnon_curr_adj * 100.0 * 100.0) as i32;
            trip = (trip + anticipation.min(self.hysteresis)).min(trip + self.hysteresis);
        }
        trip = trip.max(self.limit_tmin.raw()).min(self.limit_tmax.raw() - self.hysteresis / 2);

        let mut untrip = trip + self.hysteresis;
        if target.raw() < trip {
            let shift = trip - target.raw();
            untrip = (untrip - shift).max(trip + self.hysteresis / 2);
        }
        untrip = untrip.min(self.limit_tmax.raw());

        let last_switch = self.burner_1_last_switch.load(Ordering::Relaxed);
        let elapsed_since_switch = if last_switch == i64::MIN { self.burner_min_time } else { now.0 - last_switch };
        let burner_on = relays.get(self.burner_1).state_get();

        if actual.raw() < trip && !burner_on && elapsed_since_switch >= self.burner_min_time {
            relays.get(self.burner_1).state_set(backend, true, now)?;
            self.burner_1_last_switch.store(now.0, Ordering::Relaxed);
            self.active.store(true, Ordering::Relaxed);
            let mut a = self.anticipation.lock();
            a.turnon_negderiv = false;
            self.anticipation_no_rise_since.store(now.0, Ordering::Relaxed);
        } else if burner_on && actual.raw() > untrip && (elapsed_since_switch >= self.burner_min_time || actual.raw() > self.limit_tmax.raw()) {
            relays.get(self.burner_1).state_set(backend, false, now)?;
            self.burner_1_last_switch.store(now.0, Ordering::Relaxed);
            self.active.store(false, Ordering::Relaxed);
            let mut a = self.anticipation.lock();
            a.turnon_curr_adj = a.turnon_next_adj;
            a.turnon_next_adj = 0.0;
            a.turnon_negderiv = false;
        }

        if self.overtemp.load(Ordering::Relaxed) && actual.raw() < self.limit_thardmax.raw() - 200 {
            self.overtemp.store(false, Ordering::Relaxed);
        }

        self.run_anticipation_learning(actual, deriv_k_per_s, now);

        Ok(())
    }

    fn run_anticipation_learning(&self, actual: Temp, deriv_k_per_s: f64, now: Tick) {
        let burner_on = self.active.load(Ordering::Relaxed);
        if burner_on && actual.raw() > self.limit_tmin.raw() {
            self.target_consumer_sdelay.store(self.consumer_sdelay, Ordering::Relaxed);
        }

        if !burner_on {
            return;
        }

        let mut a = self.anticipation.lock();
        if deriv_k_per_s < 0.0 && !a.turnon_negderiv {
            a.turnon_negderiv = true;
            a.negderiv_starttime = now;
        } else if deriv_k_per_s >= 0.0 && a.turnon_negderiv {
            let elapsed = now.saturating_sub(a.negderiv_starttime).max(0) as f64;
            a.turnon_next_adj = elapsed / (-deriv_k_per_s).max(1e-9);
            a.turnon_negderiv = false;
        }

        let no_rise_since = self.anticipation_no_rise_since.load(Ordering::Relaxed);
        if no_rise_since != i64::MIN && now.0 - no_rise_since > 6 * 3600 {
            tracing::error!(heatsource = %self.name, "burner on but no temperature rise for 6 hours");
        }
    }
}

#[derive(Default)]
pub struct HeatsourceRegistry {
    boilers: Vec<Boiler>,
}

impl HeatsourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, boiler: Boiler) -> HeatsourceId {
        self.boilers.push(boiler);
        HeatsourceId::from_index(self.boilers.len() - 1)
    }

    pub fn get(&self, id: HeatsourceId) -> &Boiler {
        &self.boilers[id.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Boiler> {
        self.boilers.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numeric::celsius_to_temp;
    use hc_proto::{AggOp, DispatchOp, MissingPolicy, RelayMissingPolicy};
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    struct FakeSensorBackend {
        readings: StdMutex<HashMap<u32, Result<(Temp, Tick)>>>,
    }
    impl crate::backend::SensorBackend for FakeSensorBackend {
        fn input_name(&self, _kind: &str, _source_id: u32) -> Option<String> {
            None
        }
        fn clone_temp(&self, source_id: u32) -> Result<(Temp, Tick)> {
            self.readings.lock().unwrap().get(&source_id).cloned().unwrap()
        }
    }

    struct NullRelayBackend;
    impl RelayBackend for NullRelayBackend {
        fn output_name(&self, _kind: &str, _target_id: u32) -> Option<String> {
            None
        }
        fn output_state_set(&self, _target_id: u32, _kind: &str, _on: bool) -> Result<()> {
            Ok(())
        }
        fn output_state_get(&self, _target_id: u32) -> Result<bool> {
            Ok(false)
        }
    }

    fn setup(body_c: f64) -> (SensorRegistry, SensorId, RelayRegistry, RelayId) {
        let mut readings = HashMap::new();
        readings.insert(1u32, Ok((celsius_to_temp(body_c), Tick(0))));
        let backend = FakeSensorBackend { readings: StdMutex::new(readings) };
        let mut sensors = SensorRegistry::new();
        let sensor_id = sensors.insert(crate::input::Sensor::new("boiler", AggOp::First, MissingPolicy::Fail).with_source("mock", 1));
        sensors.sample_all(&backend, Tick(0));
        let mut relays = RelayRegistry::new();
        let burner = relays.insert(crate::output::Relay::new("burner", DispatchOp::First, RelayMissingPolicy::Fail).with_target("gpio", 1));
        (sensors, sensor_id, relays, burner)
    }

    #[test]
    fn hardmax_trips_safety_and_inhibits_consumers() {
        let (sensors, sensor_id, relays, burner) = setup(95.0);
        let boiler = Boiler::new("b1", sensor_id, burner);
        let backend = NullRelayBackend;
        let valves = crate::valve::ValveRegistry::new();
        let pumps = PumpRegistry::new();
        boiler.request(celsius_to_temp(70.0));
        let result = boiler.logic(&sensors, &relays, &backend, &valves, &pumps, Tick(0));
        assert!(result.is_err());
        assert!(boiler.is_overtemp());
        assert_eq!(boiler.cshift_crit(), CSHIFT_MAX_INHIBIT);
    }

    #[test]
    fn burner_switches_on_below_trip_and_off_above_untrip() {
        let (sensors, sensor_id, relays, burner) = setup(50.0);
        let boiler = Boiler::new("b1", sensor_id, burner).with_limits(celsius_to_temp(40.0), celsius_to_temp(80.0), celsius_to_temp(95.0));
        let backend = NullRelayBackend;
        let valves = crate::valve::ValveRegistry::new();
        let pumps = PumpRegistry::new();

        boiler.request(celsius_to_temp(70.0));
        boiler.logic(&sensors, &relays, &backend, &valves, &pumps, Tick(0)).unwrap();
        boiler.run(&relays, &backend, Tick(0)).unwrap();
        assert!(relays.get(burner).state_get(), "actual below trip should ignite burner");
    }

    #[test]
    fn no_request_with_could_sleep_shuts_burner_down() {
        let (sensors, sensor_id, relays, burner) = setup(50.0);
        let boiler = Boiler::new("b1", sensor_id, burner);
        let backend = NullRelayBackend;
        let valves = crate::valve::ValveRegistry::new();
        let pumps = PumpRegistry::new();

        boiler.logic(&sensors, &relays, &backend, &valves, &pumps, Tick(0)).unwrap();
        assert!(boiler.could_sleep());
        boiler.run(&relays, &backend, Tick(0)).unwrap();
        assert!(!relays.get(burner).state_get());
    }
}
