//! Valves: the physical motor driver shared by every algorithm, plus
//! the three selectable temperature-control algorithms (bang-bang,
//! successive-approximation, velocity-form PI).
//!
//! `Deadzone`/`Deadband` are not failures: an algorithm returning one of
//! those [`hc_error::Error`] variants means "no relay change this tick",
//! which the caller (the owning [`crate::circuit`]) treats the same as
//! `Ok(())`.

use parking_lot::Mutex;

use hc_error::{Error, Result};
use hc_proto::ValveAlgo;

use crate::backend::RelayBackend;
use crate::ids::{RelayId, ValveId};
use crate::numeric::{temp_to_deltak, DeltaK, Temp};
use crate::output::RelayRegistry;
use crate::time::Tick;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Motion {
    Stop,
    Open,
    Close,
}

/// How the driver's two directions map onto backend relays.
#[derive(Debug, Clone)]
pub enum Wiring {
    ThreeWay { relay_open: RelayId, relay_close: RelayId },
    TwoWay { relay_trigger: RelayId, trigger_opens: bool },
}

#[derive(Debug, Clone, Copy)]
struct DriverState {
    last_run: Tick,
    motion: Motion,
    target_course: i64,
    actual_position: i64,
    open_accum: i64,
    close_accum: i64,
    true_position: bool,
}

impl Default for DriverState {
    fn default() -> Self {
        DriverState {
            last_run: Tick::ZERO,
            motion: Motion::Stop,
            target_course: 0,
            actual_position: 0,
            open_accum: 0,
            close_accum: 0,
            true_position: false,
        }
    }
}

/// The physical motor driver, shared by every control algorithm.
pub struct ValveDriver {
    pub name: String,
    pub wiring: Wiring,
    /// Full travel time from one end-stop to the other, in ticks.
    pub ete_time: i64,
    state: Mutex<DriverState>,
}

impl ValveDriver {
    pub fn new(name: impl Into<String>, wiring: Wiring, ete_time: i64) -> Self {
        ValveDriver { name: name.into(), wiring, ete_time: ete_time.max(1), state: Mutex::new(DriverState::default()) }
    }

    /// Request a move: positive `course_permille` opens, negative closes,
    /// zero stops. Clamped to a single end-to-end traversal.
    pub fn drive(&self, course_permille: i64) {
        let mut s = self.state.lock();
        if s.true_position {
            return;
        }
        if course_permille > 0 {
            s.motion = Motion::Open;
            s.target_course = course_permille.min(1000);
        } else if course_permille < 0 {
            s.motion = Motion::Close;
            s.target_course = (-course_permille).min(1000);
        } else {
            s.motion = Motion::Stop;
            s.target_course = 0;
        }
    }

    pub fn actual_position(&self) -> i64 {
        self.state.lock().actual_position
    }

    pub fn is_true_position(&self) -> bool {
        self.state.lock().true_position
    }

    /// Clear the true-position fault (e.g. after a manual re-reference).
    pub fn clear_true_position(&self) {
        let mut s = self.state.lock();
        s.true_position = false;
        s.open_accum = 0;
        s.close_accum = 0;
    }

    /// Advance the driver's internal state and drive the relays. Must be
    /// called every tick regardless of whether [`ValveDriver::drive`] was
    /// called this tick.
    pub fn run(&self, relays: &RelayRegistry, backend: &dyn RelayBackend, now: Tick) -> Result<()> {
        let motion = {
            let mut s = self.state.lock();
            let dt = now.saturating_sub(s.last_run).max(0);
            s.last_run = now;
            if dt == 0 {
                s.motion
            } else {
                let course = ((dt * 1000) as f64 / self.ete_time as f64).round() as i64;
                match s.motion {
                    Motion::Open => {
                        s.actual_position = (s.actual_position + course).min(1000);
                        s.open_accum += dt;
                        s.close_accum = 0;
                    }
                    Motion::Close => {
                        s.actual_position = (s.actual_position - course).max(0);
                        s.close_accum += dt;
                        s.open_accum = 0;
                    }
                    Motion::Stop => {
                        s.open_accum = 0;
                        s.close_accum = 0;
                    }
                }
                if s.motion != Motion::Stop {
                    s.target_course = (s.target_course - course.abs()).max(0);
                    if s.target_course <= course / 2 {
                        s.motion = Motion::Stop;
                    }
                }
                let cap = self.ete_time.saturating_mul(3);
                if s.open_accum > cap || s.close_accum > cap {
                    s.true_position = true;
                    s.motion = Motion::Stop;
                }
                s.motion
            }
        };
        self.apply(relays, backend, motion)
    }

    fn apply(&self, relays: &RelayRegistry, backend: &dyn RelayBackend, motion: Motion) -> Result<()> {
        match &self.wiring {
            Wiring::ThreeWay { relay_open, relay_close } => match motion {
                Motion::Open => {
                    relays.get(*relay_close).state_set(backend, false, Tick::ZERO)?;
                    relays.get(*relay_open).state_set(backend, true, Tick::ZERO)
                }
                Motion::Close => {
                    relays.get(*relay_open).state_set(backend, false, Tick::ZERO)?;
                    relays.get(*relay_close).state_set(backend, true, Tick::ZERO)
                }
                Motion::Stop => {
                    relays.get(*relay_open).state_set(backend, false, Tick::ZERO)?;
                    relays.get(*relay_close).state_set(backend, false, Tick::ZERO)
                }
            },
            Wiring::TwoWay { relay_trigger, trigger_opens } => {
                let on = match motion {
                    Motion::Open => *trigger_opens,
                    Motion::Close => !*trigger_opens,
                    Motion::Stop => false,
                };
                relays.get(*relay_trigger).state_set(backend, on, Tick::ZERO)
            }
        }
    }
}

/// PI tuning aggressiveness, scaling the closed-loop time constant
/// relative to the identified process ultimate period/delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuningFactor {
    Aggressive,
    Moderate,
    Conservative,
}

impl TuningFactor {
    fn scale(self) -> f64 {
        match self {
            TuningFactor::Aggressive => 1.0 / 10.0,
            TuningFactor::Moderate => 10.0 / 10.0,
            TuningFactor::Conservative => 100.0 / 10.0,
        }
    }
}

/// Parameters for the velocity-form PI algorithm, identified from a
/// relay-feedback or step-response process test.
#[derive(Debug, Clone, Copy)]
pub struct PiTuning {
    /// Process ultimate period, seconds.
    pub tu_s: f64,
    /// Process dead time, seconds.
    pub td_s: f64,
    /// Tuning aggressiveness.
    pub factor: TuningFactor,
}

#[derive(Debug, Clone, Copy, Default)]
struct PiState {
    prev_out: Temp,
    db_acc: f64,
    ctrl_reset: bool,
    initialized: bool,
}

/// Per-valve control-algorithm configuration and state.
pub struct Valve {
    pub name: String,
    pub driver: ValveDriver,
    pub algo: ValveAlgo,
    /// Deadzone around the target, in centi-Kelvin (full width).
    pub deadzone: DeltaK,
    pub sample_intvl: i64,
    /// Step size for successive-approximation, in ‰.
    pub sapprox_amount: i64,
    /// Minimum request magnitude to act on immediately, in ‰, for PI.
    pub deadband_permille: i64,
    pub pi: Option<PiTuning>,
    /// `tempin_h - tempin_l` fallback when the cold input is absent.
    pub ksmax: DeltaK,
    last_sample: Mutex<Tick>,
    pi_state: Mutex<PiState>,
}

impl Valve {
    pub fn new(name: impl Into<String>, driver: ValveDriver, algo: ValveAlgo) -> Self {
        Valve {
            name: name.into(),
            driver,
            algo,
            deadzone: 100,
            sample_intvl: 30,
            sapprox_amount: 20,
            deadband_permille: 0,
            pi: None,
            ksmax: 3000,
            last_sample: Mutex::new(Tick::ZERO),
            pi_state: Mutex::new(PiState::default()),
        }
    }

    pub fn with_deadzone(mut self, deadzone: DeltaK) -> Self {
        self.deadzone = deadzone;
        self
    }

    pub fn with_sample_intvl(mut self, ticks: i64) -> Self {
        self.sample_intvl = ticks.max(1);
        self
    }

    pub fn with_sapprox_amount(mut self, permille: i64) -> Self {
        self.sapprox_amount = permille;
        self
    }

    pub fn with_pi(mut self, tuning: PiTuning, deadband_permille: i64, ksmax: DeltaK) -> Self {
        self.pi = Some(tuning);
        self.deadband_permille = deadband_permille;
        self.ksmax = ksmax;
        self
    }

    fn due(&self, now: Tick) -> bool {
        let last = *self.last_sample.lock();
        last == Tick::ZERO || now.saturating_sub(last) >= self.sample_intvl
    }

    /// Evaluate the configured algorithm and issue a new drive request if
    /// one is due. `target`/`tempout` are always required; `tempin_h`/
    /// `tempin_l` are only consulted by the PI algorithm.
    pub fn control(&self, target: Temp, tempout: Temp, tempin_h: Option<Temp>, tempin_l: Option<Temp>, now: Tick) -> Result<()> {
        if !self.due(now) {
            return Ok(());
        }
        *self.last_sample.lock() = now;

        let course = match self.algo {
            ValveAlgo::Bangbang => bangbang(target, tempout, self.deadzone)?,
            ValveAlgo::Sapprox => sapprox(target, tempout, self.deadzone, self.sapprox_amount)?,
            ValveAlgo::Pi => {
                let tuning = self.pi.ok_or_else(|| Error::NotConfigured(format!("{}: PI tuning", self.name)))?;
                let dt_s = self.sample_intvl as f64;
                self.pi_step(tuning, target, tempout, tempin_h, tempin_l, dt_s)?
            }
        };
        self.driver.drive(course);
        Ok(())
    }

    fn pi_step(&self, tuning: PiTuning, target: Temp, tempout: Temp, tempin_h: Option<Temp>, tempin_l: Option<Temp>, dt_s: f64) -> Result<i64> {
        let tempin_h = tempin_h.ok_or_else(|| Error::NotConfigured(format!("{}: tempin_h", self.name)))?;
        let tempin_l = tempin_l.unwrap_or_else(|| Temp::from_raw(tempin_h.raw() - self.ksmax));

        let mut s = self.pi_state.lock();

        let err_k = temp_to_deltak(target.raw() - tempout.raw());
        let deadzone_k = temp_to_deltak(self.deadzone);
        if err_k.abs() <= deadzone_k / 2.0 {
            s.ctrl_reset = true;
            return Err(Error::Deadzone);
        }

        if target.raw() <= tempin_l.raw() {
            s.ctrl_reset = true;
            return Ok(-1000);
        }
        if target.raw() >= tempin_h.raw() {
            s.ctrl_reset = true;
            return Ok(1000);
        }

        if s.ctrl_reset || !s.initialized {
            s.prev_out = tempout;
            s.db_acc = 0.0;
            s.ctrl_reset = false;
            s.initialized = true;
            return Err(Error::Deadzone);
        }

        let k = temp_to_deltak(tempin_h.raw() - tempin_l.raw()).abs() / 1000.0;
        if k <= 0.0 {
            return Err(Error::Misconfigured(format!("{}: zero process gain", self.name)));
        }
        let tc = (tuning.tu_s.max(8.0 * tuning.td_s)) * tuning.factor.scale();
        let kp_t = tuning.tu_s / (tuning.td_s + tc);
        let kp = kp_t / k;
        let ki = kp / tuning.tu_s;

        let e = err_k;
        let iterm = ki * e * dt_s;
        let pterm = kp * temp_to_deltak(s.prev_out.raw() - tempout.raw());

        let output = iterm + pterm + s.db_acc;
        let request = output.trunc() as i64;

        if request.unsigned_abs() < self.deadband_permille as u64 {
            s.db_acc += iterm;
            Ok(0)
        } else {
            s.prev_out = tempout;
            s.db_acc = 0.0;
            Ok(request.clamp(-1000, 1000))
        }
    }
}

fn bangbang(target: Temp, tempout: Temp, deadzone: DeltaK) -> Result<i64> {
    let half = deadzone / 2;
    if tempout.raw() < target.raw() - half {
        Ok(1000)
    } else if tempout.raw() > target.raw() + half {
        Ok(-1000)
    } else {
        Err(Error::Deadzone)
    }
}

fn sapprox(target: Temp, tempout: Temp, deadzone: DeltaK, amount: i64) -> Result<i64> {
    let half = deadzone / 2;
    let err = target.raw() - tempout.raw();
    if err.abs() <= half {
        Ok(0)
    } else if err > 0 {
        Ok(amount)
    } else {
        Ok(-amount)
    }
}

#[derive(Default)]
pub struct ValveRegistry {
    valves: Vec<Valve>,
}

impl ValveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, valve: Valve) -> ValveId {
        self.valves.push(valve);
        ValveId::from_index(self.valves.len() - 1)
    }

    pub fn get(&self, id: ValveId) -> &Valve {
        &self.valves[id.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Valve> {
        self.valves.iter()
    }

    pub fn iter_with_id(&self) -> impl Iterator<Item = (ValveId, &Valve)> {
        self.valves.iter().enumerate().map(|(i, v)| (ValveId::from_index(i), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numeric::celsius_to_temp;
    use hc_proto::{DispatchOp, RelayMissingPolicy};

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

    fn three_way_relays() -> (RelayRegistry, RelayId, RelayId) {
        let mut r = RelayRegistry::new();
        let open = r.insert(crate::output::Relay::new("v_open", DispatchOp::First, RelayMissingPolicy::Fail).with_target("gpio", 1));
        let close = r.insert(crate::output::Relay::new("v_close", DispatchOp::First, RelayMissingPolicy::Fail).with_target("gpio", 2));
        (r, open, close)
    }

    #[test]
    fn driver_travels_and_stops_near_target_course() {
        let (relays, open, close) = three_way_relays();
        let backend = NullBackend;
        let driver = ValveDriver::new("v", Wiring::ThreeWay { relay_open: open, relay_close: close }, 100);
        driver.drive(1000);
        driver.run(&relays, &backend, Tick(0)).unwrap();
        // Half the travel time elapses: position should sit near 500.
        driver.run(&relays, &backend, Tick(50)).unwrap();
        let pos = driver.actual_position();
        assert!((400..=600).contains(&pos), "pos={pos}");
        // Full travel plus margin: motion should have self-stopped.
        driver.run(&relays, &backend, Tick(200)).unwrap();
        assert_eq!(driver.actual_position(), 1000);
    }

    #[test]
    fn true_position_trips_after_excessive_continuous_travel() {
        let (relays, open, close) = three_way_relays();
        let backend = NullBackend;
        let driver = ValveDriver::new("v", Wiring::ThreeWay { relay_open: open, relay_close: close }, 10);
        driver.drive(1000);
        for t in (0..500).step_by(5) {
            driver.run(&relays, &backend, Tick(t)).unwrap();
        }
        assert!(driver.is_true_position());
    }

    #[test]
    fn bangbang_returns_deadzone_inside_band() {
        let target = celsius_to_temp(45.0);
        assert!(bangbang(target, celsius_to_temp(45.0), 100).is_err());
        assert_eq!(bangbang(target, celsius_to_temp(40.0), 100).unwrap(), 1000);
        assert_eq!(bangbang(target, celsius_to_temp(50.0), 100).unwrap(), -1000);
    }

    #[test]
    fn pi_steady_state_produces_no_sustained_request() {
        let (relays, open, close) = three_way_relays();
        let driver = ValveDriver::new("v", Wiring::ThreeWay { relay_open: open, relay_close: close }, 600);
        let tuning = PiTuning { tu_s: 600.0, td_s: 60.0, factor: TuningFactor::Moderate };
        let valve = Valve::new("mix", driver, ValveAlgo::Pi)
            .with_deadzone(100)
            .with_sample_intvl(60)
            .with_pi(tuning, 30, 3000);

        let target = celsius_to_temp(45.0);
        let tempin_h = celsius_to_temp(70.0);
        let tempin_l = celsius_to_temp(30.0);
        for i in 0..5 {
            valve
                .control(target, celsius_to_temp(45.0), Some(tempin_h), Some(tempin_l), Tick(i * 60))
                .ok();
        }
        let _ = relays;
        assert_eq!(valve.driver.actual_position(), 0);
    }
}
