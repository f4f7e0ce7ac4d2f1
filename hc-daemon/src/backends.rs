//! Demo [`SensorBackend`]/[`RelayBackend`]/[`LoggingBackend`] implementations.
//! A hardware backend plug-in registry and real bus drivers are out of
//! scope; the daemon ships only the minimal ones needed to run the binary.
//!
//! `DemoSensorBackend` reports fixed or slowly-drifting readings instead of
//! talking to real hardware; `DemoRelayBackend` keeps actuator state in
//! memory and logs every transition. Both use `parking_lot::Mutex` for
//! their in-process shared state.

use std::collections::HashMap;

use parking_lot::Mutex;

use hc_core::backend::{LogData, LogSchema, LoggingBackend, RelayBackend, SensorBackend};
use hc_core::numeric::{celsius_to_temp, Temp};
use hc_core::time::Tick;
use hc_error::{Error, Result};

/// A single demo temperature source: a base reading plus a per-tick drift,
/// so a running daemon shows some movement without real hardware attached.
#[derive(Debug, Clone, Copy)]
struct DemoSource {
    base_c: f64,
    drift_c_per_tick: f64,
    ticks_elapsed: i64,
}

pub struct DemoSensorBackend {
    sources: Mutex<HashMap<u32, DemoSource>>,
}

impl DemoSensorBackend {
    pub fn new() -> Self {
        DemoSensorBackend { sources: Mutex::new(HashMap::new()) }
    }

    pub fn with_source(self, source_id: u32, base_c: f64, drift_c_per_tick: f64) -> Self {
        self.sources.lock().insert(source_id, DemoSource { base_c, drift_c_per_tick, ticks_elapsed: 0 });
        self
    }
}

impl Default for DemoSensorBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorBackend for DemoSensorBackend {
    fn input_name(&self, kind: &str, source_id: u32) -> Option<String> {
        Some(format!("demo:{kind}:{source_id}"))
    }

    fn clone_temp(&self, source_id: u32) -> Result<(Temp, Tick)> {
        let mut sources = self.sources.lock();
        let source = sources
            .get_mut(&source_id)
            .ok_or_else(|| Error::SensorDiscon(format!("no demo source {source_id}")))?;
        source.ticks_elapsed += 1;
        let c = source.base_c + source.drift_c_per_tick * source.ticks_elapsed as f64;
        Ok((celsius_to_temp(c), Tick(source.ticks_elapsed)))
    }
}

pub struct DemoRelayBackend {
    state: Mutex<HashMap<u32, bool>>,
}

impl DemoRelayBackend {
    pub fn new() -> Self {
        DemoRelayBackend { state: Mutex::new(HashMap::new()) }
    }
}

impl Default for DemoRelayBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayBackend for DemoRelayBackend {
    fn output_name(&self, kind: &str, target_id: u32) -> Option<String> {
        Some(format!("demo:{kind}:{target_id}"))
    }

    fn output_state_set(&self, target_id: u32, kind: &str, on: bool) -> Result<()> {
        self.state.lock().insert(target_id, on);
        tracing::debug!(kind, target_id, on, "demo relay state set");
        Ok(())
    }

    fn output_state_get(&self, target_id: u32) -> Result<bool> {
        Ok(*self.state.lock().get(&target_id).unwrap_or(&false))
    }
}

/// Logging sink that appends one JSON line per pull to a file. A real
/// install would instead target RRD/MQTT, which is out of scope here.
pub struct FileLoggingBackend {
    path: std::path::PathBuf,
}

impl FileLoggingBackend {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        FileLoggingBackend { path: path.into() }
    }
}

impl LoggingBackend for FileLoggingBackend {
    fn create(&self, name: &str, schema: &LogSchema) -> Result<()> {
        tracing::info!(name, keys = ?schema.keys, "logging source registered");
        Ok(())
    }

    fn update(&self, name: &str, data: &LogData) -> Result<()> {
        use std::io::Write;
        let mut line = format!("{{\"source\":\"{name}\",\"interval\":{},\"values\":{{", data.interval);
        for (i, key) in data.keys.iter().enumerate() {
            if i > 0 {
                line.push(',');
            }
            let value = match &data.values[i] {
                hc_core::backend::LogValue::Int(v) => v.to_string(),
                hc_core::backend::LogValue::Float(v) => v.to_string(),
            };
            line.push_str(&format!("\"{key}\":{value}"));
        }
        line.push_str("}}\n");

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::StoreIo(e.to_string()))?;
        file.write_all(line.as_bytes()).map_err(|e| Error::StoreIo(e.to_string()))
    }

    fn online(&self) -> Result<()> {
        tracing::info!(path = %self.path.display(), "logging backend online");
        Ok(())
    }

    fn offline(&self) -> Result<()> {
        tracing::info!("logging backend offline");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensor_backend_drifts_with_each_read() {
        let backend = DemoSensorBackend::new().with_source(1, 10.0, 0.5);
        let (t0, _) = backend.clone_temp(1).unwrap();
        let (t1, _) = backend.clone_temp(1).unwrap();
        assert!(t1.raw() > t0.raw());
    }

    #[test]
    fn unknown_sensor_source_is_disconnected() {
        let backend = DemoSensorBackend::new();
        assert!(matches!(backend.clone_temp(99), Err(Error::SensorDiscon(_))));
    }

    #[test]
    fn relay_backend_reads_back_what_was_set() {
        let backend = DemoRelayBackend::new();
        assert!(!backend.output_state_get(1).unwrap());
        backend.output_state_set(1, "burner", true).unwrap();
        assert!(backend.output_state_get(1).unwrap());
    }
}
