//! Domestic hot water tank: charge state machine, electric vs.
//! heatsource mode selection, feedpump discharge protection and
//! charge-priority classification.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};

use hc_error::{Error, Result};
use hc_proto::{DhwtPriority, ForceMode, Runmode};

use crate::ids::{DhwtId, PumpId, RelayId, ScheduleId, ValveId};
use crate::input::SensorRegistry;
use crate::ids::SensorId;
use crate::numeric::{DeltaK, Temp};
use crate::output::RelayRegistry;
use crate::pump::PumpRegistry;
use crate::time::Tick;

#[derive(Debug, Clone, Copy)]
pub struct DhwtModeSetpoints {
    pub comfort_c: f64,
    pub eco_c: f64,
    pub frostfree_c: f64,
}

/// Outcome of a tick, consumed by [`crate::plant`] to classify
/// circuit interference.
#[derive(Debug, Clone, Copy)]
pub struct DhwtStatus {
    pub charging: bool,
    pub priority: DhwtPriority,
}

pub struct Dhwt {
    pub name: String,
    pub top: Option<SensorId>,
    pub bottom: Option<SensorId>,
    pub feed_inlet: Option<SensorId>,
    pub self_heater: Option<RelayId>,
    pub feedpump: Option<PumpId>,
    pub recycle_pump: Option<PumpId>,
    /// Isolation valves on this tank's own plumbing; not individually
    /// driven by the charge state machine, but excluded from summer
    /// maintenance exercise while the tank is charging.
    pub isolation_valves: Vec<ValveId>,
    /// Weekly schedule driving this tank's dhwmode.
    pub schedule: Option<ScheduleId>,
    pub priority: DhwtPriority,
    pub force_mode: ForceMode,
    pub setpoints: DhwtModeSetpoints,
    pub hysteresis: DeltaK,
    pub wintmax: Temp,
    pub limit_tmin: Temp,
    pub limit_tmax: Temp,
    pub inoffset: DeltaK,
    pub limit_chargetime: i64,
    /// Target temperature for an anti-legionella charge, when enabled.
    pub legionella_temp: Option<Temp>,

    runmode: AtomicI32,
    charge_on: AtomicBool,
    electric_mode: AtomicBool,
    force_on: AtomicBool,
    charge_overtime: AtomicBool,
    mode_since: AtomicI64,
    heat_request: AtomicI32,
    actual_temp: AtomicI32,
    online: AtomicBool,
    legionella_pending: AtomicBool,
    recycle_on: AtomicBool,
}

fn runmode_to_i32(m: Runmode) -> i32 {
    match m {
        Runmode::Off => 0,
        Runmode::Comfort => 1,
        Runmode::Eco => 2,
        Runmode::Frostfree => 3,
        Runmode::Test => 4,
        _ => 5,
    }
}

fn i32_to_runmode(v: i32) -> Runmode {
    match v {
        0 => Runmode::Off,
        1 => Runmode::Comfort,
        2 => Runmode::Eco,
        3 => Runmode::Frostfree,
        4 => Runmode::Test,
        _ => Runmode::Unknown,
    }
}

impl Dhwt {
    pub fn new(name: impl Into<String>, priority: DhwtPriority, force_mode: ForceMode, setpoints: DhwtModeSetpoints) -> Self {
        Dhwt {
            name: name.into(),
            top: None,
            bottom: None,
            feed_inlet: None,
            self_heater: None,
            feedpump: None,
            recycle_pump: None,
            isolation_valves: Vec::new(),
            schedule: None,
            priority,
            force_mode,
            setpoints,
            hysteresis: 500,
            wintmax: Temp::UNSET,
            limit_tmin: crate::numeric::celsius_to_temp(5.0),
            limit_tmax: crate::numeric::celsius_to_temp(65.0),
            inoffset: 0,
            limit_chargetime: 3 * 3600,
            legionella_temp: None,
            runmode: AtomicI32::new(runmode_to_i32(Runmode::Comfort)),
            charge_on: AtomicBool::new(false),
            electric_mode: AtomicBool::new(false),
            force_on: AtomicBool::new(false),
            charge_overtime: AtomicBool::new(false),
            mode_since: AtomicI64::new(i64::MIN),
            heat_request: AtomicI32::new(0),
            actual_temp: AtomicI32::new(0),
            online: AtomicBool::new(true),
            legionella_pending: AtomicBool::new(false),
            recycle_on: AtomicBool::new(false),
        }
    }

    pub fn with_sensors(mut self, top: Option<SensorId>, bottom: Option<SensorId>, feed_inlet: Option<SensorId>) -> Self {
        self.top = top;
        self.bottom = bottom;
        self.feed_inlet = feed_inlet;
        self
    }

    pub fn with_self_heater(mut self, relay: RelayId) -> Self {
        self.self_heater = Some(relay);
        self
    }

    pub fn with_feedpump(mut self, pump: PumpId) -> Self {
        self.feedpump = Some(pump);
        self
    }

    pub fn with_limits(mut self, tmin: Temp, tmax: Temp, wintmax: Temp) -> Self {
        self.limit_tmin = tmin;
        self.limit_tmax = tmax;
        self.wintmax = wintmax;
        self
    }

    pub fn with_recycle_pump(mut self, pump: PumpId) -> Self {
        self.recycle_pump = Some(pump);
        self
    }

    pub fn with_isolation_valves(mut self, valves: Vec<ValveId>) -> Self {
        self.isolation_valves = valves;
        self
    }

    pub fn with_schedule(mut self, schedule: ScheduleId) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn with_legionella(mut self, temp: Temp) -> Self {
        self.legionella_temp = Some(temp);
        self
    }

    pub fn set_runmode(&self, mode: Runmode) {
        self.runmode.store(runmode_to_i32(mode), Ordering::Relaxed);
    }

    pub fn runmode(&self) -> Runmode {
        i32_to_runmode(self.runmode.load(Ordering::Relaxed))
    }

    /// Apply a matched [`crate::scheduler::ScheduleEntry`]: sets the
    /// runmode, latches an anti-legionella charge request if the entry
    /// calls for one, and drives the recycle pump.
    pub fn apply_schedule(&self, entry: &crate::scheduler::ScheduleEntry) {
        self.set_runmode(entry.dhwmode);
        if entry.legionella && self.legionella_temp.is_some() {
            self.legionella_pending.store(true, Ordering::Relaxed);
        }
        self.recycle_on.store(entry.recycle, Ordering::Relaxed);
    }

    pub fn is_recycling(&self) -> bool {
        self.recycle_on.load(Ordering::Relaxed)
    }

    pub fn heat_request(&self) -> Option<Temp> {
        let raw = self.heat_request.load(Ordering::Relaxed);
        if raw == 0 {
            None
        } else {
            Some(Temp::from_raw(raw))
        }
    }

    pub fn is_charging(&self) -> bool {
        self.charge_on.load(Ordering::Relaxed)
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    /// Tank temperature used for the most recent charge decision (top
    /// sensor while charging, bottom sensor otherwise).
    pub fn actual_temp(&self) -> Option<Temp> {
        let raw = self.actual_temp.load(Ordering::Relaxed);
        if raw == 0 {
            None
        } else {
            Some(Temp::from_raw(raw))
        }
    }

    fn target_setpoint(&self, mode: Runmode) -> Temp {
        if self.legionella_pending.load(Ordering::Relaxed) {
            if let Some(t) = self.legionella_temp {
                return t;
            }
        }
        let c = match mode {
            Runmode::Eco => self.setpoints.eco_c,
            Runmode::Frostfree => self.setpoints.frostfree_c,
            _ => self.setpoints.comfort_c,
        };
        crate::numeric::celsius_to_temp(c)
    }

    fn failsafe(&self, relays: &RelayRegistry, backend: &dyn crate::backend::RelayBackend, pumps: &PumpRegistry, now: Tick) {
        if let Some(heater) = self.self_heater {
            let _ = relays.get(heater).state_set(backend, false, now);
        }
        if let Some(pump) = self.feedpump {
            pumps.get(pump).request(false);
        }
    }

    /// Run one tick. Returns the charge status consumed by the plant's
    /// priority aggregation.
    pub fn tick(
        &self,
        sensors: &SensorRegistry,
        relays: &RelayRegistry,
        backend: &dyn crate::backend::RelayBackend,
        pumps: &PumpRegistry,
        could_sleep: bool,
        now: Tick,
    ) -> Result<DhwtStatus> {
        let mode = self.runmode();

        if mode == Runmode::Off {
            self.online.store(false, Ordering::Relaxed);
            self.charge_on.store(false, Ordering::Relaxed);
            self.heat_request.store(0, Ordering::Relaxed);
            self.recycle_on.store(false, Ordering::Relaxed);
            self.failsafe(relays, backend, pumps, now);
            if let Some(pump) = self.recycle_pump {
                pumps.get(pump).request(false);
            }
            return Ok(DhwtStatus { charging: false, priority: self.priority });
        }
        self.online.store(true, Ordering::Relaxed);

        if mode == Runmode::Test {
            if let Some(heater) = self.self_heater {
                relays.get(heater).state_set(backend, true, now)?;
            }
            if let Some(pump) = self.feedpump {
                pumps.get(pump).request(true);
            }
            return Ok(DhwtStatus { charging: true, priority: self.priority });
        }

        let top = self.top.and_then(|id| sensors.temperature_get(id).ok());
        let bottom = self.bottom.and_then(|id| sensors.temperature_get(id).ok());
        if top.is_none() && bottom.is_none() {
            self.failsafe(relays, backend, pumps, now);
            return Err(Error::SensorDiscon(format!("{}: no valid top or bottom sensor", self.name)));
        }

        let target = self.target_setpoint(mode);
        let charging = self.charge_on.load(Ordering::Relaxed);
        let electric_mode = self.electric_mode.load(Ordering::Relaxed);

        let tank_current = if charging {
            top.or(bottom).unwrap()
        } else {
            bottom.or(top).unwrap()
        };
        self.actual_temp.store(tank_current.raw(), Ordering::Relaxed);

        if !charging {
            let force_on = self.force_mode == ForceMode::Always || self.force_on.load(Ordering::Relaxed);
            let hysteresis = if force_on { 100 } else { self.hysteresis };
            let trip = Temp::from_raw(target.raw() - hysteresis);
            if tank_current.raw() < trip.raw() {
                if could_sleep && self.self_heater.is_some() {
                    self.electric_mode.store(true, Ordering::Relaxed);
                    if let Some(heater) = self.self_heater {
                        relays.get(heater).state_set(backend, true, now)?;
                    }
                } else {
                    self.electric_mode.store(false, Ordering::Relaxed);
                    let requested = target.raw() + self.inoffset;
                    let clamped = if self.wintmax.is_set() { requested.min(self.wintmax.raw()) } else { requested };
                    self.heat_request.store(clamped, Ordering::Relaxed);
                }
                self.charge_on.store(true, Ordering::Relaxed);
                self.mode_since.store(now.0, Ordering::Relaxed);
            }
        } else {
            let since = self.mode_since.load(Ordering::Relaxed);
            let elapsed = if since == i64::MIN { 0 } else { now.0 - since };
            let overtime = !electric_mode && self.limit_chargetime > 0 && elapsed > self.limit_chargetime;
            if tank_current.raw() >= target.raw() || overtime {
                if overtime {
                    self.charge_overtime.store(true, Ordering::Relaxed);
                } else {
                    self.charge_overtime.store(false, Ordering::Relaxed);
                }
                self.charge_on.store(false, Ordering::Relaxed);
                self.electric_mode.store(false, Ordering::Relaxed);
                self.force_on.store(false, Ordering::Relaxed);
                self.legionella_pending.store(false, Ordering::Relaxed);
                self.heat_request.store(0, Ordering::Relaxed);
                self.mode_since.store(now.0, Ordering::Relaxed);
                if let Some(heater) = self.self_heater {
                    relays.get(heater).state_set(backend, false, now)?;
                }
            }
        }

        if let Some(pump) = self.recycle_pump {
            pumps.get(pump).request(self.recycle_on.load(Ordering::Relaxed));
        }

        self.run_feedpump(sensors, pumps, tank_current, now);

        Ok(DhwtStatus { charging: self.charge_on.load(Ordering::Relaxed), priority: self.priority })
    }

    fn run_feedpump(&self, sensors: &SensorRegistry, pumps: &PumpRegistry, tank_current: Temp, _now: Tick) {
        let (Some(pump), Some(feed_id)) = (self.feedpump, self.feed_inlet) else { return };
        let Ok(feed) = sensors.temperature_get(feed_id) else { return };

        let charging = self.charge_on.load(Ordering::Relaxed);
        let electric = self.electric_mode.load(Ordering::Relaxed);

        let want_on = if charging && !electric {
            feed.raw() >= tank_current.raw() - 100
        } else {
            feed.raw() < tank_current.raw()
        };
        pumps.get(pump).request(want_on);
    }
}

#[derive(Default)]
pub struct DhwtRegistry {
    dhwts: Vec<Dhwt>,
}

impl DhwtRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, dhwt: Dhwt) -> DhwtId {
        self.dhwts.push(dhwt);
        DhwtId::from_index(self.dhwts.len() - 1)
    }

    pub fn get(&self, id: DhwtId) -> &Dhwt {
        &self.dhwts[id.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dhwt> {
        self.dhwts.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{RelayBackend, SensorBackend};
    use crate::numeric::celsius_to_temp;
    use hc_proto::{AggOp, MissingPolicy};
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

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

    struct FakeSensorBackend {
        readings: StdMutex<HashMap<u32, Result<(Temp, Tick)>>>,
    }
    impl SensorBackend for FakeSensorBackend {
        fn input_name(&self, _kind: &str, _source_id: u32) -> Option<String> {
            None
        }
        fn clone_temp(&self, source_id: u32) -> Result<(Temp, Tick)> {
            self.readings.lock().unwrap().get(&source_id).cloned().unwrap()
        }
    }

    fn setup_sensors(bottom_c: f64, top_c: f64) -> (SensorRegistry, SensorId, SensorId) {
        let mut readings = HashMap::new();
        readings.insert(1u32, Ok((celsius_to_temp(bottom_c), Tick(0))));
        readings.insert(2u32, Ok((celsius_to_temp(top_c), Tick(0))));
        let backend = FakeSensorBackend { readings: StdMutex::new(readings) };
        let mut sensors = SensorRegistry::new();
        let bottom_id = sensors.insert(crate::input::Sensor::new("bottom", AggOp::First, MissingPolicy::Fail).with_source("mock", 1));
        let top_id = sensors.insert(crate::input::Sensor::new("top", AggOp::First, MissingPolicy::Fail).with_source("mock", 2));
        sensors.sample_all(&backend, Tick(0));
        (sensors, bottom_id, top_id)
    }

    #[test]
    fn cold_tank_without_self_heater_requests_heatsource() {
        let (sensors, bottom, top) = setup_sensors(30.0, 30.0);
        let setpoints = DhwtModeSetpoints { comfort_c: 55.0, eco_c: 45.0, frostfree_c: 10.0 };
        let dhwt = Dhwt::new("dhw1", DhwtPriority::Paralmax, ForceMode::Never, setpoints)
            .with_sensors(Some(top), Some(bottom), None)
            .with_limits(celsius_to_temp(5.0), celsius_to_temp(65.0), celsius_to_temp(60.0));
        let relays = RelayRegistry::new();
        let pumps = PumpRegistry::new();
        let status = dhwt.tick(&sensors, &relays, &NullRelayBackend, &pumps, false, Tick(0)).unwrap();
        assert!(status.charging);
        assert!(dhwt.heat_request().is_some());
    }

    #[test]
    fn charge_untrips_once_top_reaches_target() {
        let (sensors, bottom, top) = setup_sensors(30.0, 60.0);
        let setpoints = DhwtModeSetpoints { comfort_c: 55.0, eco_c: 45.0, frostfree_c: 10.0 };
        let dhwt = Dhwt::new("dhw1", DhwtPriority::Absolute, ForceMode::Never, setpoints).with_sensors(Some(top), Some(bottom), None);
        let relays = RelayRegistry::new();
        let pumps = PumpRegistry::new();
        dhwt.charge_on.store(true, Ordering::Relaxed);
        dhwt.mode_since.store(0, Ordering::Relaxed);
        let status = dhwt.tick(&sensors, &relays, &NullRelayBackend, &pumps, false, Tick(60)).unwrap();
        assert!(!status.charging);
        assert!(dhwt.heat_request().is_none());
    }

    #[test]
    fn off_mode_goes_offline() {
        let (sensors, bottom, top) = setup_sensors(30.0, 30.0);
        let setpoints = DhwtModeSetpoints { comfort_c: 55.0, eco_c: 45.0, frostfree_c: 10.0 };
        let dhwt = Dhwt::new("dhw1", DhwtPriority::Paralmax, ForceMode::Never, setpoints).with_sensors(Some(top), Some(bottom), None);
        dhwt.set_runmode(Runmode::Off);
        let relays = RelayRegistry::new();
        let pumps = PumpRegistry::new();
        dhwt.tick(&sensors, &relays, &NullRelayBackend, &pumps, false, Tick(0)).unwrap();
        assert!(!dhwt.is_online());
    }
}
