//! Heating circuit: water-law target computation, failsafe handling,
//! rate-of-rise limiting and interference (floor/shift), then valve
//! drive.
//!
//! The bilinear water law's inflection point and per-segment slopes are
//! derived once from the two configured (outdoor, water) reference
//! points and the `nh100` emitter exponent, rather than hand-tuning a
//! lookup table per installation.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};

use hc_error::{Error, Result};
use hc_proto::Runmode;

use crate::backend::RelayBackend;
use crate::bmodel::BModel;
use crate::ids::{BModelId, CircuitId, PumpId, ScheduleId, ValveId};
use crate::input::SensorRegistry;
use crate::ids::SensorId;
use crate::numeric::{celsius_to_temp, expw_mavg, temp_to_celsius, DeltaK, Temp};
use crate::output::RelayRegistry;
use crate::pump::PumpRegistry;
use crate::time::Tick;
use crate::valve::ValveRegistry;

/// Two-point calibration for the bilinear water law plus the derived
/// inflection point and per-segment slopes.
#[derive(Debug, Clone, Copy)]
pub struct BilinearLaw {
    pub tout1_c: f64,
    pub twater1_c: f64,
    pub tout2_c: f64,
    pub twater2_c: f64,
    /// Emitter non-linearity exponent, in percent of the straight-line
    /// design slope (100 = perfectly linear emitter).
    pub nh100: f64,

    toutinfl_c: f64,
    twaterinfl_c: f64,
    /// Full-range design slope between the two calibration points; used
    /// (not the per-segment slope) for the ambient-shift term.
    base_slope: f64,
    slope_cold: f64,
    slope_warm: f64,
}

impl BilinearLaw {
    pub fn new(tout1_c: f64, twater1_c: f64, tout2_c: f64, twater2_c: f64, nh100: f64) -> Self {
        let base_slope = (twater1_c - twater2_c) / (tout1_c - tout2_c);
        let toutinfl_c = (tout1_c + tout2_c) / 2.0;
        let twater_linear_infl = twater1_c + base_slope * (toutinfl_c - tout1_c);
        let twaterinfl_c = 20.0 + (twater_linear_infl - 20.0) * (nh100 / 100.0);
        let slope_cold = (twaterinfl_c - twater1_c) / (toutinfl_c - tout1_c);
        let slope_warm = (twater2_c - twaterinfl_c) / (tout2_c - toutinfl_c);

        BilinearLaw { tout1_c, twater1_c, tout2_c, twater2_c, nh100, toutinfl_c, twaterinfl_c, base_slope, slope_cold, slope_warm }
    }

    /// Water target at `target_ambient_c` for outdoor temperature
    /// `tout_c`.
    pub fn water_target_c(&self, tout_c: f64, target_ambient_c: f64) -> f64 {
        let (slope, pivot_out, pivot_water) = if tout_c <= self.toutinfl_c {
            (self.slope_cold, self.tout1_c, self.twater1_c)
        } else {
            (self.slope_warm, self.toutinfl_c, self.twaterinfl_c)
        };
        let twater_20 = pivot_water + slope * (tout_c - pivot_out);
        twater_20 + (target_ambient_c - 20.0) * (1.0 - self.base_slope)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitModeSetpoints {
    pub comfort_c: f64,
    pub eco_c: f64,
    pub frostfree_c: f64,
    pub frost_offset_k: f64,
}

/// Heating circuit.
pub struct Circuit {
    pub name: String,
    pub outgoing: SensorId,
    pub bmodel: BModelId,
    pub valve: Option<ValveId>,
    pub pump: Option<PumpId>,
    /// Weekly schedule driving this circuit's runmode.
    pub schedule: Option<ScheduleId>,
    pub law: BilinearLaw,
    pub setpoints: CircuitModeSetpoints,
    pub limit_wtmin: Temp,
    pub limit_wtmax: Temp,
    pub temp_inoffset: DeltaK,
    /// Maximum rise rate once rate-of-rise limiting engages, Kelvin/hour.
    pub wtemp_rorh: Option<f64>,

    runmode: AtomicI32,
    target_ambient_c_x100: AtomicI32,
    actual_wtemp: AtomicI32,
    target_wtemp: AtomicI32,
    heat_request: AtomicI32,
    rorh_last_target: AtomicI32,
    rorh_update_time: AtomicI64,
    floor_output: AtomicBool,
    online: AtomicBool,
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

impl Circuit {
    pub fn new(name: impl Into<String>, bmodel: BModelId, outgoing: SensorId, law: BilinearLaw, setpoints: CircuitModeSetpoints) -> Self {
        Circuit {
            name: name.into(),
            outgoing,
            bmodel,
            valve: None,
            pump: None,
            schedule: None,
            law,
            setpoints,
            limit_wtmin: celsius_to_temp(15.0),
            limit_wtmax: celsius_to_temp(90.0),
            temp_inoffset: 0,
            wtemp_rorh: None,
            runmode: AtomicI32::new(runmode_to_i32(Runmode::Auto)),
            target_ambient_c_x100: AtomicI32::new(2000),
            actual_wtemp: AtomicI32::new(0),
            target_wtemp: AtomicI32::new(0),
            heat_request: AtomicI32::new(0),
            rorh_last_target: AtomicI32::new(0),
            rorh_update_time: AtomicI64::new(i64::MIN),
            floor_output: AtomicBool::new(false),
            online: AtomicBool::new(true),
        }
    }

    pub fn with_valve(mut self, valve: ValveId) -> Self {
        self.valve = Some(valve);
        self
    }

    pub fn with_pump(mut self, pump: PumpId) -> Self {
        self.pump = Some(pump);
        self
    }

    pub fn with_schedule(mut self, schedule: ScheduleId) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn with_limits(mut self, wtmin: Temp, wtmax: Temp) -> Self {
        self.limit_wtmin = wtmin;
        self.limit_wtmax = wtmax;
        self
    }

    pub fn with_rorh(mut self, kelvin_per_hour: f64) -> Self {
        self.wtemp_rorh = Some(kelvin_per_hour);
        self
    }

    pub fn with_inoffset(mut self, offset: DeltaK) -> Self {
        self.temp_inoffset = offset;
        self
    }

    pub fn set_runmode(&self, mode: Runmode) {
        self.runmode.store(runmode_to_i32(mode), Ordering::Relaxed);
    }

    pub fn runmode(&self) -> Runmode {
        i32_to_runmode(self.runmode.load(Ordering::Relaxed))
    }

    /// Apply a matched [`crate::scheduler::ScheduleEntry`].
    pub fn apply_schedule(&self, entry: &crate::scheduler::ScheduleEntry) {
        self.set_runmode(entry.runmode);
    }

    pub fn set_floor_output(&self, on: bool) {
        self.floor_output.store(on, Ordering::Relaxed);
    }

    pub fn heat_request(&self) -> Option<Temp> {
        let raw = self.heat_request.load(Ordering::Relaxed);
        if raw == 0 {
            None
        } else {
            Some(Temp::from_raw(raw))
        }
    }

    pub fn target_wtemp(&self) -> Option<Temp> {
        let raw = self.target_wtemp.load(Ordering::Relaxed);
        if raw == 0 {
            None
        } else {
            Some(Temp::from_raw(raw))
        }
    }

    /// Outgoing water temperature as of the last tick that read the
    /// sensor successfully.
    pub fn actual_wtemp(&self) -> Option<Temp> {
        let raw = self.actual_wtemp.load(Ordering::Relaxed);
        if raw == 0 {
            None
        } else {
            Some(Temp::from_raw(raw))
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    fn ambient_setpoint_c(&self, mode: Runmode) -> f64 {
        match mode {
            Runmode::Comfort => self.setpoints.comfort_c,
            Runmode::Eco => self.setpoints.eco_c,
            Runmode::Frostfree => self.setpoints.frostfree_c,
            _ => self.setpoints.comfort_c,
        }
    }

    /// Run one tick. `consumer_sdelay` is the
    /// plant-wide cooldown window (seconds remaining); `consumer_shift`
    /// is the plant-wide signed shift percentage applied to every
    /// circuit's target this tick.
    #[allow(clippy::too_many_arguments)]
    pub fn tick(
        &self,
        sensors: &SensorRegistry,
        bmodel: &BModel,
        valves: &ValveRegistry,
        pumps: &PumpRegistry,
        relays: &RelayRegistry,
        backend: &dyn RelayBackend,
        consumer_sdelay: i64,
        consumer_shift: f64,
        now: Tick,
    ) -> Result<()> {
        let mode = self.runmode();

        if mode == Runmode::Off {
            let had_target = self.target_wtemp.load(Ordering::Relaxed) != 0;
            if had_target && consumer_sdelay > 0 {
                self.heat_request.store(0, Ordering::Relaxed);
                return self.drive_valve(sensors, valves, now);
            }
            self.online.store(false, Ordering::Relaxed);
            self.heat_request.store(0, Ordering::Relaxed);
            self.target_wtemp.store(0, Ordering::Relaxed);
            if let Some(pump) = self.pump {
                pumps.get(pump).request(false);
            }
            return Ok(());
        }
        self.online.store(true, Ordering::Relaxed);

        let outgoing = match sensors.temperature_get(self.outgoing) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(circuit = %self.name, error = %e, "outgoing sensor failed, engaging failsafe");
                if let Some(valve) = self.valve {
                    valves.get(valve).driver.drive(-1000);
                }
                if let Some(pump) = self.pump {
                    pumps.get(pump).request(true);
                }
                return Err(e);
            }
        };
        self.actual_wtemp.store(outgoing.raw(), Ordering::Relaxed);

        let target_ambient_c = self.ambient_setpoint_c(mode);
        self.target_ambient_c_x100.store((target_ambient_c * 100.0).round() as i32, Ordering::Relaxed);

        let tout_c = temp_to_celsius(bmodel.t_out_mix());
        let mut water_target_c = self.law.water_target_c(tout_c, target_ambient_c);

        if let Some(rorh) = self.wtemp_rorh {
            water_target_c = self.apply_rate_of_rise(water_target_c, temp_to_celsius(outgoing), rorh, now);
        }

        let mut water_target = celsius_to_temp(water_target_c);
        water_target = Temp::from_raw(water_target.raw().clamp(self.limit_wtmin.raw(), self.limit_wtmax.raw()));

        let non_interfered = water_target;

        if self.floor_output.load(Ordering::Relaxed) {
            let prev = self.target_wtemp.load(Ordering::Relaxed);
            if prev != 0 {
                water_target = Temp::from_raw(water_target.raw().max(prev));
            }
        }
        if consumer_shift != 0.0 {
            let shift = water_target.raw() as f64 * (consumer_shift / 100.0);
            water_target = Temp::from_raw(water_target.raw() + shift.round() as i32);
        }
        water_target = Temp::from_raw(water_target.raw().clamp(i32::MIN, self.limit_wtmax.raw()));

        self.target_wtemp.store(non_interfered.raw(), Ordering::Relaxed);
        let heat_request = Temp::from_raw(non_interfered.raw() + self.temp_inoffset);
        self.heat_request.store(heat_request.raw(), Ordering::Relaxed);

        if let Some(pump) = self.pump {
            pumps.get(pump).request(true);
        }

        self.drive_valve_to(water_target, sensors, valves, now)
    }

    fn apply_rate_of_rise(&self, new_target_c: f64, current_out_c: f64, rorh: f64, now: Tick) -> f64 {
        if new_target_c <= current_out_c {
            self.rorh_last_target.store(celsius_to_temp(new_target_c).raw(), Ordering::Relaxed);
            self.rorh_update_time.store(now.0, Ordering::Relaxed);
            return new_target_c;
        }
        let last_time = self.rorh_update_time.load(Ordering::Relaxed);
        if last_time != i64::MIN && now.0 - last_time < 60 {
            return temp_to_celsius(Temp::from_raw(self.rorh_last_target.load(Ordering::Relaxed)));
        }
        let last_c = temp_to_celsius(Temp::from_raw(self.rorh_last_target.load(Ordering::Relaxed)));
        let dt = if last_time == i64::MIN { 0.0 } else { (now.0 - last_time) as f64 };
        let capped = last_c + rorh; // ceiling for this step: one hour's worth of rise
        let approached = expw_mavg(last_c, capped.min(new_target_c), 3600.0, dt);
        self.rorh_last_target.store(celsius_to_temp(approached).raw(), Ordering::Relaxed);
        self.rorh_update_time.store(now.0, Ordering::Relaxed);
        approached
    }

    fn drive_valve(&self, sensors: &SensorRegistry, valves: &ValveRegistry, now: Tick) -> Result<()> {
        let target = self.target_wtemp().unwrap_or(self.limit_wtmin);
        self.drive_valve_to(target, sensors, valves, now)
    }

    fn drive_valve_to(&self, target: Temp, sensors: &SensorRegistry, valves: &ValveRegistry, now: Tick) -> Result<()> {
        let Some(valve_id) = self.valve else { return Ok(()) };
        let valve = valves.get(valve_id);
        let outgoing = sensors.temperature_get(self.outgoing)?;
        match valve.control(target, outgoing, None, None, now) {
            Ok(()) => Ok(()),
            Err(Error::Deadzone) | Err(Error::Deadband) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[derive(Default)]
pub struct CircuitRegistry {
    circuits: Vec<Circuit>,
}

impl CircuitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, circuit: Circuit) -> CircuitId {
        self.circuits.push(circuit);
        CircuitId::from_index(self.circuits.len() - 1)
    }

    pub fn get(&self, id: CircuitId) -> &Circuit {
        &self.circuits[id.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Circuit> {
        self.circuits.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bilinear_law_respects_calibration_points_direction() {
        let law = BilinearLaw::new(-10.0, 75.0, 20.0, 25.0, 115.0);
        let cold = law.water_target_c(0.0, 20.0);
        let warm = law.water_target_c(10.0, 20.0);
        assert!(cold > warm, "colder outdoor must demand hotter water");
    }

    #[test]
    fn ambient_shift_raises_target_when_requesting_more_comfort() {
        let law = BilinearLaw::new(-10.0, 75.0, 20.0, 25.0, 100.0);
        let baseline = law.water_target_c(0.0, 20.0);
        let boosted = law.water_target_c(0.0, 22.0);
        assert!(boosted > baseline);
    }

    #[test]
    fn off_mode_with_no_prior_target_goes_offline_immediately() {
        let law = BilinearLaw::new(-10.0, 75.0, 20.0, 25.0, 100.0);
        let setpoints = CircuitModeSetpoints { comfort_c: 20.0, eco_c: 18.0, frostfree_c: 8.0, frost_offset_k: 2.0 };
        let sensors = SensorRegistry::new();
        let outgoing_id = crate::ids::SensorId::from_index(0);
        let circuit = Circuit::new("c1", BModelId::from_index(0), outgoing_id, law, setpoints);
        circuit.set_runmode(Runmode::Off);
        let bmodel_outdoor = crate::ids::SensorId::from_index(1);
        let bmodel = BModel::new("b", bmodel_outdoor, celsius_to_temp(-5.0), celsius_to_temp(18.0), 86400.0);
        let valves = ValveRegistry::new();
        let pumps = PumpRegistry::new();
        let relays = RelayRegistry::new();
        struct NullBackend;
        impl RelayBackend for NullBackend {
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
        circuit.tick(&sensors, &bmodel, &valves, &pumps, &relays, &NullBackend, 0, 0.0, Tick(0)).unwrap();
        assert!(!circuit.is_online());
    }
}
