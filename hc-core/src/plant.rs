//! Plant orchestrator: runs the fixed-order pipeline over every
//! configured object once per tick, aggregates the shift/stop-delay
//! signals heatsources feed back to consumers, and performs summer
//! maintenance.
//!
//! Ordering within a tick is strict: bmodel, then DHWT (logic+run), then
//! circuit (logic+run), then heatsource (logic+run), then valve, then
//! pump. The heatsource-derived aggregate (`cshift_crit`,
//! `target_consumer_sdelay`, `could_sleep`) is computed at the heatsource
//! step and consumed by DHWT/circuit on the *next* tick, not the one
//! that produced it -- a deliberate one-tick lag so a heatsource's own
//! run phase never observes its own aggregate.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};

use hc_error::Error;
use hc_proto::DhwtPriority;

use crate::backend::{RelayBackend, SensorBackend, StorageBackend};
use crate::bmodel::BModelRegistry;
use crate::circuit::CircuitRegistry;
use crate::dhwt::DhwtRegistry;
use crate::heatsource::HeatsourceRegistry;
use crate::input::SensorRegistry;
use crate::output::RelayRegistry;
use crate::pump::PumpRegistry;
use crate::scheduler::{ScheduleRegistry, WallTime};
use crate::time::Tick;
use crate::valve::ValveRegistry;

/// Summer-maintenance timing configuration.
#[derive(Debug, Clone, Copy)]
pub struct SummerMaintenanceConfig {
    pub enabled: bool,
    /// How long `summer && could_sleep` must hold continuously before a
    /// maintenance window opens, in ticks.
    pub interval: i64,
    /// Length of the maintenance window, in ticks.
    pub duration: i64,
}

impl Default for SummerMaintenanceConfig {
    fn default() -> Self {
        SummerMaintenanceConfig { enabled: false, interval: 7 * 86400, duration: 300 }
    }
}

/// Plant-wide configuration that isn't owned by any single registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlantConfig {
    pub summer_maintenance: SummerMaintenanceConfig,
    /// Shift applied to consumers when no heatsource is critically
    /// shifting them, percent.
    pub cshift_noncrit: f64,
}

/// Non-fatal per-object error recorded during a tick, for an alarm
/// subsystem (out of scope here) to deduplicate by `(kind, descriptor)`.
#[derive(Debug, Clone)]
pub struct TickFault {
    pub object: String,
    pub error: Error,
}

/// Outcome of one [`Plant::tick`] call.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub faults: Vec<TickFault>,
}

impl TickReport {
    fn record(&mut self, object: &str, result: Result<(), Error>) {
        if let Err(e) = result {
            if !e.is_non_error() {
                self.faults.push(TickFault { object: object.to_string(), error: e });
            }
        }
    }
}

/// The plant orchestrator: owns every registry and the cross-tick
/// aggregate state.
pub struct Plant {
    pub sensors: SensorRegistry,
    pub relays: RelayRegistry,
    pub pumps: PumpRegistry,
    pub valves: ValveRegistry,
    pub bmodels: BModelRegistry,
    pub circuits: CircuitRegistry,
    pub dhwts: DhwtRegistry,
    pub heatsources: HeatsourceRegistry,
    pub schedules: ScheduleRegistry,
    pub config: PlantConfig,

    consumer_shift_x100: AtomicI32,
    consumer_sdelay: AtomicI64,
    could_sleep: AtomicBool,
    dhwc_absolute: AtomicBool,

    summer_continuous_since: AtomicI64,
    summer_window_start: AtomicI64,
    summer_window_active: AtomicBool,
}

impl Plant {
    pub fn new(config: PlantConfig) -> Self {
        Plant {
            sensors: SensorRegistry::new(),
            relays: RelayRegistry::new(),
            pumps: PumpRegistry::new(),
            valves: ValveRegistry::new(),
            bmodels: BModelRegistry::new(),
            circuits: CircuitRegistry::new(),
            dhwts: DhwtRegistry::new(),
            heatsources: HeatsourceRegistry::new(),
            schedules: ScheduleRegistry::new(),
            config,
            consumer_shift_x100: AtomicI32::new(0),
            consumer_sdelay: AtomicI64::new(0),
            could_sleep: AtomicBool::new(true),
            dhwc_absolute: AtomicBool::new(false),
            summer_continuous_since: AtomicI64::new(i64::MIN),
            summer_window_start: AtomicI64::new(i64::MIN),
            summer_window_active: AtomicBool::new(false),
        }
    }

    pub fn could_sleep(&self) -> bool {
        self.could_sleep.load(Ordering::Relaxed)
    }

    pub fn consumer_shift(&self) -> f64 {
        self.consumer_shift_x100.load(Ordering::Relaxed) as f64 / 100.0
    }

    pub fn consumer_sdelay(&self) -> i64 {
        self.consumer_sdelay.load(Ordering::Relaxed)
    }

    pub fn dhwc_absolute(&self) -> bool {
        self.dhwc_absolute.load(Ordering::Relaxed)
    }

    pub fn is_summer_maintenance_active(&self) -> bool {
        self.summer_window_active.load(Ordering::Relaxed)
    }

    /// Resolve each scheduled circuit/DHWT's runmode from its weekly
    /// schedule at the given wall-clock point. Mode changes take effect
    /// at the next tick boundary.
    pub fn apply_schedules(&self, wall_time: WallTime) {
        for circuit in self.circuits.iter() {
            if let Some(sched_id) = circuit.schedule {
                if let Some(entry) = self.schedules.get(sched_id).lookup(wall_time) {
                    circuit.apply_schedule(entry);
                }
            }
        }
        for dhwt in self.dhwts.iter() {
            if let Some(sched_id) = dhwt.schedule {
                if let Some(entry) = self.schedules.get(sched_id).lookup(wall_time) {
                    dhwt.apply_schedule(entry);
                }
            }
        }
    }

    /// Run one full tick: the fixed-order pipeline described above.
    /// `wall_time`, when supplied, is resolved against each scheduled
    /// circuit/DHWT's schedule before the pipeline runs.
    pub fn tick(
        &self,
        sensor_backend: &dyn SensorBackend,
        relay_backend: &dyn RelayBackend,
        storage: Option<&dyn StorageBackend>,
        wall_time: Option<WallTime>,
        now: Tick,
    ) -> TickReport {
        let mut report = TickReport::default();

        if let Some(wall_time) = wall_time {
            self.apply_schedules(wall_time);
        }

        self.sensors.sample_all(sensor_backend, now);
        self.bmodels.tick_all(&self.sensors, storage, now);

        // Aggregates computed at the *previous* tick's heatsource step,
        // consumed this tick by DHWT/circuit.
        let could_sleep_prev = self.could_sleep();
        let consumer_sdelay_prev = self.consumer_sdelay();
        let consumer_shift_prev = self.consumer_shift();
        let dhwc_absolute_prev = self.dhwc_absolute();

        let mut any_absolute_charging = false;
        let mut charging_pumps: HashSet<crate::ids::PumpId> = HashSet::new();
        let mut charging_valves: HashSet<crate::ids::ValveId> = HashSet::new();

        for dhwt in self.dhwts.iter() {
            let result = dhwt.tick(&self.sensors, &self.relays, relay_backend, &self.pumps, could_sleep_prev, now);
            match result {
                Ok(status) => {
                    if status.charging && status.priority == DhwtPriority::Absolute {
                        any_absolute_charging = true;
                    }
                    if status.charging {
                        if let Some(p) = dhwt.feedpump {
                            charging_pumps.insert(p);
                        }
                        if let Some(p) = dhwt.recycle_pump {
                            charging_pumps.insert(p);
                        }
                        charging_valves.extend(dhwt.isolation_valves.iter().copied());
                    }
                }
                Err(e) => report.record(&dhwt.name, Err(e)),
            }
        }
        self.dhwc_absolute.store(any_absolute_charging, Ordering::Relaxed);

        for circuit in self.circuits.iter() {
            circuit.set_floor_output(dhwc_absolute_prev);
            let bmodel = self.bmodels.get(circuit.bmodel);
            let result = circuit.tick(
                &self.sensors,
                bmodel,
                &self.valves,
                &self.pumps,
                &self.relays,
                relay_backend,
                consumer_sdelay_prev,
                consumer_shift_prev,
                now,
            );
            report.record(&circuit.name, result);
        }

        for heatsource in self.heatsources.iter() {
            for circuit in self.circuits.iter() {
                if let Some(t) = circuit.heat_request() {
                    heatsource.request(t);
                }
            }
            for dhwt in self.dhwts.iter() {
                if let Some(t) = dhwt.heat_request() {
                    heatsource.request(t);
                }
            }
            let logic_result = heatsource.logic(&self.sensors, &self.relays, relay_backend, &self.valves, &self.pumps, now);
            report.record(&heatsource.name, logic_result);
            let run_result = heatsource.run(&self.relays, relay_backend, now);
            report.record(&heatsource.name, run_result);
        }

        self.aggregate_heatsource_signals();

        if self.config.summer_maintenance.enabled {
            self.run_summer_maintenance(&charging_pumps, &charging_valves, now);
        } else {
            self.summer_window_active.store(false, Ordering::Relaxed);
        }

        for valve in self.valves.iter() {
            let result = valve.driver.run(&self.relays, relay_backend, now);
            report.record(&valve.name, result);
        }

        self.pumps.apply_all(&self.relays, relay_backend, now);

        report
    }

    fn aggregate_heatsource_signals(&self) {
        let mut cshift_crit = 0.0_f64;
        let mut any_crit = false;
        let mut max_sdelay = 0_i64;
        let mut all_could_sleep = true;
        let mut any_heatsource = false;

        for hs in self.heatsources.iter() {
            any_heatsource = true;
            let c = hs.cshift_crit();
            if c != 0.0 {
                any_crit = true;
                cshift_crit = cshift_crit.min(c);
            }
            max_sdelay = max_sdelay.max(hs.target_consumer_sdelay());
            all_could_sleep = all_could_sleep && hs.could_sleep();
        }

        let shift = if any_crit { cshift_crit } else { self.config.cshift_noncrit };
        self.consumer_shift_x100.store((shift * 100.0) as i32, Ordering::Relaxed);
        self.consumer_sdelay.store(max_sdelay, Ordering::Relaxed);
        self.could_sleep.store(!any_heatsource || all_could_sleep, Ordering::Relaxed);
    }

    fn run_summer_maintenance(
        &self,
        charging_pumps: &HashSet<crate::ids::PumpId>,
        charging_valves: &HashSet<crate::ids::ValveId>,
        now: Tick,
    ) {
        let cfg = self.config.summer_maintenance;
        let summer = self.bmodels_all_summer();
        let eligible = summer && self.could_sleep();

        if self.summer_window_active.load(Ordering::Relaxed) {
            let start = Tick(self.summer_window_start.load(Ordering::Relaxed));
            if now.saturating_sub(start) >= cfg.duration {
                self.summer_window_active.store(false, Ordering::Relaxed);
                self.summer_continuous_since.store(now.0, Ordering::Relaxed);
            } else {
                self.force_exercise(charging_pumps, charging_valves);
                return;
            }
        }

        if !eligible {
            self.summer_continuous_since.store(i64::MIN, Ordering::Relaxed);
            return;
        }

        let since = self.summer_continuous_since.load(Ordering::Relaxed);
        if since == i64::MIN {
            self.summer_continuous_since.store(now.0, Ordering::Relaxed);
            return;
        }
        if now.saturating_sub(Tick(since)) >= cfg.interval {
            self.summer_window_active.store(true, Ordering::Relaxed);
            self.summer_window_start.store(now.0, Ordering::Relaxed);
            self.force_exercise(charging_pumps, charging_valves);
        }
    }

    fn bmodels_all_summer(&self) -> bool {
        let mut any = false;
        for b in self.bmodels.iter() {
            any = true;
            if !b.is_summer() {
                return false;
            }
        }
        any
    }

    fn force_exercise(&self, charging_pumps: &HashSet<crate::ids::PumpId>, charging_valves: &HashSet<crate::ids::ValveId>) {
        for (id, pump) in self.pumps.iter_with_id() {
            if !charging_pumps.contains(&id) {
                pump.request(true);
            }
        }
        for (id, valve) in self.valves.iter_with_id() {
            if !charging_valves.contains(&id) {
                valve.driver.drive(1000);
            }
        }
    }
}
