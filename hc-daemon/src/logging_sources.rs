//! [`LogSource`] implementations wrapping live plant telemetry. Each
//! source holds the daemon-wide `Arc<Runtime>` plus the id
//! of the object it samples, so a pull is just a handful of relaxed-atomic
//! reads through the existing registries -- there is no separate copy of
//! state to keep in sync with the control thread.

use std::sync::Arc;

use hc_core::backend::{LogData, LogSchema, LogValue};
use hc_core::logging::LogSource;
use hc_core::ids::{CircuitId, DhwtId, HeatsourceId, RelayId};
use hc_core::numeric::temp_to_celsius;
use hc_core::runtime::Runtime;
use hc_core::time::Tick;

pub struct BoilerLogSource {
    runtime: Arc<Runtime>,
    id: HeatsourceId,
    name: String,
}

impl BoilerLogSource {
    pub fn new(runtime: Arc<Runtime>, id: HeatsourceId) -> Self {
        let name = runtime.plant.heatsources.get(id).name.clone();
        BoilerLogSource { runtime, id, name }
    }
}

impl LogSource for BoilerLogSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> LogSchema {
        LogSchema { keys: vec!["target_c".into(), "actual_c".into(), "active".into()] }
    }

    fn sample(&self, _now: Tick) -> LogData {
        let boiler = self.runtime.plant.heatsources.get(self.id);
        let target = boiler.target_temp().map(temp_to_celsius).unwrap_or(f64::NAN);
        let actual = boiler.actual_temp().map(temp_to_celsius).unwrap_or(f64::NAN);
        LogData {
            keys: vec!["target_c".into(), "actual_c".into(), "active".into()],
            values: vec![LogValue::Float(target), LogValue::Float(actual), LogValue::Int(boiler.is_active() as i64)],
            nvalues: 3,
            interval: 60,
        }
    }
}

pub struct CircuitLogSource {
    runtime: Arc<Runtime>,
    id: CircuitId,
    name: String,
}

impl CircuitLogSource {
    pub fn new(runtime: Arc<Runtime>, id: CircuitId) -> Self {
        let name = runtime.plant.circuits.get(id).name.clone();
        CircuitLogSource { runtime, id, name }
    }
}

impl LogSource for CircuitLogSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> LogSchema {
        LogSchema { keys: vec!["target_wtemp_c".into(), "actual_wtemp_c".into(), "online".into()] }
    }

    fn sample(&self, _now: Tick) -> LogData {
        let circuit = self.runtime.plant.circuits.get(self.id);
        let target = circuit.target_wtemp().map(temp_to_celsius).unwrap_or(f64::NAN);
        let actual = circuit.actual_wtemp().map(temp_to_celsius).unwrap_or(f64::NAN);
        LogData {
            keys: vec!["target_wtemp_c".into(), "actual_wtemp_c".into(), "online".into()],
            values: vec![LogValue::Float(target), LogValue::Float(actual), LogValue::Int(circuit.is_online() as i64)],
            nvalues: 3,
            interval: 60,
        }
    }
}

pub struct DhwtLogSource {
    runtime: Arc<Runtime>,
    id: DhwtId,
    name: String,
}

impl DhwtLogSource {
    pub fn new(runtime: Arc<Runtime>, id: DhwtId) -> Self {
        let name = runtime.plant.dhwts.get(id).name.clone();
        DhwtLogSource { runtime, id, name }
    }
}

impl LogSource for DhwtLogSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> LogSchema {
        LogSchema { keys: vec!["actual_c".into(), "charging".into(), "recycling".into()] }
    }

    fn sample(&self, _now: Tick) -> LogData {
        let dhwt = self.runtime.plant.dhwts.get(self.id);
        let actual = dhwt.actual_temp().map(temp_to_celsius).unwrap_or(f64::NAN);
        LogData {
            keys: vec!["actual_c".into(), "charging".into(), "recycling".into()],
            values: vec![LogValue::Float(actual), LogValue::Int(dhwt.is_charging() as i64), LogValue::Int(dhwt.is_recycling() as i64)],
            nvalues: 3,
            interval: 60,
        }
    }
}

/// Wraps a relay's cycle/on-time/off-time accounting counters.
pub struct RelayLogSource {
    runtime: Arc<Runtime>,
    id: RelayId,
    name: String,
}

impl RelayLogSource {
    pub fn new(runtime: Arc<Runtime>, id: RelayId) -> Self {
        let name = runtime.plant.relays.get(id).name.clone();
        RelayLogSource { runtime, id, name }
    }
}

impl LogSource for RelayLogSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> LogSchema {
        LogSchema { keys: vec!["cycles".into(), "on_seconds".into(), "off_seconds".into()] }
    }

    fn sample(&self, _now: Tick) -> LogData {
        let relay = self.runtime.plant.relays.get(self.id);
        LogData {
            keys: vec!["cycles".into(), "on_seconds".into(), "off_seconds".into()],
            values: vec![
                LogValue::Int(relay.acct_cycles_get() as i64),
                LogValue::Int(relay.acct_on_seconds_get() as i64),
                LogValue::Int(relay.acct_off_seconds_get() as i64),
            ],
            nvalues: 3,
            interval: 60,
        }
    }
}
