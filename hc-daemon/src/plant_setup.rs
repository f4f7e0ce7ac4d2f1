//! Builds a small but complete demo installation: one building model, one
//! mixed heating circuit behind a three-way valve, one DHWT and one
//! boiler. Resolving a textual config into this call sequence is out of
//! scope; a real install would replace this module with calls driven by
//! `hc_proto::config`.

use hc_core::bmodel::{BModel, BModelRegistry};
use hc_core::circuit::{BilinearLaw, Circuit, CircuitModeSetpoints, CircuitRegistry};
use hc_core::dhwt::{Dhwt, DhwtModeSetpoints, DhwtRegistry};
use hc_core::heatsource::{Boiler, HeatsourceRegistry};
use hc_core::ids::{CircuitId, DhwtId, HeatsourceId, RelayId};
use hc_core::input::{Sensor, SensorRegistry};
use hc_core::numeric::celsius_to_temp;
use hc_core::output::{Relay, RelayRegistry};
use hc_core::plant::{Plant, PlantConfig, SummerMaintenanceConfig};
use hc_core::pump::{Pump, PumpRegistry, PumpSharing};
use hc_core::scheduler::ScheduleRegistry;
use hc_core::valve::{Valve, ValveDriver, ValveRegistry, Wiring};
use hc_proto::{AggOp, DhwtPriority, ForceMode, MissingPolicy, RelayMissingPolicy, ValveAlgo};

use crate::backends::{DemoRelayBackend, DemoSensorBackend};

/// Ids of the handful of demo objects the logging thread wires up
/// [`crate::logging_sources`] against.
pub struct DemoPlantIds {
    pub circuit: CircuitId,
    pub dhwt: DhwtId,
    pub heatsource: HeatsourceId,
    pub burner: RelayId,
}

pub const SENSOR_OUTDOOR: u32 = 1;
pub const SENSOR_CIRCUIT_WATER: u32 = 2;
pub const SENSOR_DHWT_TOP: u32 = 3;
pub const SENSOR_BOILER: u32 = 4;

pub const RELAY_VALVE_OPEN: u32 = 1;
pub const RELAY_VALVE_CLOSE: u32 = 2;
pub const RELAY_CIRCUIT_PUMP: u32 = 3;
pub const RELAY_DHWT_PUMP: u32 = 4;
pub const RELAY_BURNER: u32 = 5;

/// Wires up the demo plant and the demo backends it reads/writes through.
pub fn build() -> (Plant, DemoSensorBackend, DemoRelayBackend, DemoPlantIds) {
    let mut sensors = SensorRegistry::new();
    let outdoor = sensors.insert(Sensor::new("outdoor", AggOp::First, MissingPolicy::Ignoredef).with_source("demo", SENSOR_OUTDOOR).with_default(celsius_to_temp(5.0)));
    let circuit_water = sensors.insert(Sensor::new("circuit_water", AggOp::First, MissingPolicy::Fail).with_source("demo", SENSOR_CIRCUIT_WATER));
    let dhwt_top = sensors.insert(Sensor::new("dhwt_top", AggOp::First, MissingPolicy::Fail).with_source("demo", SENSOR_DHWT_TOP));
    let boiler_sensor = sensors.insert(Sensor::new("boiler", AggOp::First, MissingPolicy::Fail).with_source("demo", SENSOR_BOILER));

    let mut relays = RelayRegistry::new();
    let valve_open = relays.insert(Relay::new("valve_open", hc_proto::DispatchOp::First, RelayMissingPolicy::Fail).with_target("demo", RELAY_VALVE_OPEN));
    let valve_close = relays.insert(Relay::new("valve_close", hc_proto::DispatchOp::First, RelayMissingPolicy::Fail).with_target("demo", RELAY_VALVE_CLOSE));
    let circuit_pump_relay = relays.insert(Relay::new("circuit_pump", hc_proto::DispatchOp::First, RelayMissingPolicy::Fail).with_target("demo", RELAY_CIRCUIT_PUMP));
    let dhwt_pump_relay = relays.insert(Relay::new("dhwt_pump", hc_proto::DispatchOp::First, RelayMissingPolicy::Fail).with_target("demo", RELAY_DHWT_PUMP));
    let burner = relays.insert(Relay::new("burner", hc_proto::DispatchOp::First, RelayMissingPolicy::Fail).with_target("demo", RELAY_BURNER));

    let mut pumps = PumpRegistry::new();
    let circuit_pump = pumps.insert(Pump::new("circuit_pump", circuit_pump_relay, PumpSharing::Exclusive).with_min_runtime(60));
    let dhwt_pump = pumps.insert(Pump::new("dhwt_pump", dhwt_pump_relay, PumpSharing::Exclusive).with_min_runtime(60));

    let mut valves = ValveRegistry::new();
    let valve_id = valves.insert(Valve::new(
        "circuit_valve",
        ValveDriver::new("circuit_valve", Wiring::ThreeWay { relay_open: valve_open, relay_close: valve_close }, 120),
        ValveAlgo::Pi,
    ));

    let mut bmodels = BModelRegistry::new();
    let bmodel_id = bmodels.insert(BModel::new("main", outdoor, celsius_to_temp(-5.0), celsius_to_temp(18.0), 86_400.0));

    let mut circuits = CircuitRegistry::new();
    let law = BilinearLaw::new(-10.0, 70.0, 15.0, 30.0, 130.0);
    let setpoints = CircuitModeSetpoints { comfort_c: 20.0, eco_c: 18.0, frostfree_c: 8.0, frost_offset_k: 2.0 };
    let circuit_id = circuits.insert(
        Circuit::new("living_room", bmodel_id, circuit_water, law, setpoints)
            .with_valve(valve_id)
            .with_pump(circuit_pump)
            .with_limits(celsius_to_temp(20.0), celsius_to_temp(75.0))
            .with_rorh(40.0),
    );

    let mut dhwts = DhwtRegistry::new();
    let dhwt_setpoints = DhwtModeSetpoints { comfort_c: 55.0, eco_c: 48.0, frostfree_c: 10.0 };
    let dhwt_id = dhwts.insert(
        Dhwt::new("main_tank", DhwtPriority::Paralmax, ForceMode::First, dhwt_setpoints)
            .with_sensors(Some(dhwt_top), None, None)
            .with_feedpump(dhwt_pump)
            .with_limits(celsius_to_temp(10.0), celsius_to_temp(65.0), celsius_to_temp(70.0))
            .with_legionella(celsius_to_temp(65.0)),
    );

    let mut heatsources = HeatsourceRegistry::new();
    let heatsource_id = heatsources.insert(
        Boiler::new("main_boiler", boiler_sensor, burner)
            .with_limits(celsius_to_temp(35.0), celsius_to_temp(80.0), celsius_to_temp(95.0))
            .with_load_pump(circuit_pump)
            .with_burner_min_time(180)
            .with_consumer_sdelay(60),
    );

    let config = PlantConfig {
        summer_maintenance: SummerMaintenanceConfig { enabled: true, interval: 7 * 86_400, duration: 300 },
        cshift_noncrit: 0.0,
    };

    let mut plant = Plant::new(config);
    plant.sensors = sensors;
    plant.relays = relays;
    plant.pumps = pumps;
    plant.valves = valves;
    plant.bmodels = bmodels;
    plant.circuits = circuits;
    plant.dhwts = dhwts;
    plant.heatsources = heatsources;
    plant.schedules = ScheduleRegistry::new();

    let sensor_backend = DemoSensorBackend::new()
        .with_source(SENSOR_OUTDOOR, 5.0, -0.001)
        .with_source(SENSOR_CIRCUIT_WATER, 40.0, 0.0)
        .with_source(SENSOR_DHWT_TOP, 45.0, 0.0)
        .with_source(SENSOR_BOILER, 50.0, 0.0);
    let relay_backend = DemoRelayBackend::new();

    let ids = DemoPlantIds { circuit: circuit_id, dhwt: dhwt_id, heatsource: heatsource_id, burner };

    (plant, sensor_backend, relay_backend, ids)
}
