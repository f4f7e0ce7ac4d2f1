//! External-interface traits.
//!
//! The hardware backend plug-in registry, the bus drivers, the storage
//! engine and the logging backends are all collaborators out of scope for
//! this crate; what *is* in scope is the stable interface the control core
//! programs against. Concrete implementations (sysfs, 1-wire, a key/value
//! store, RRD/MQTT sinks, ...) live outside this crate -- `hc-daemon`
//! supplies the minimal ones needed to run the binary.

use crate::numeric::Temp;
use crate::time::Tick;
use hc_error::Result;

/// A named source of temperature readings.
pub trait SensorBackend: Send + Sync {
    /// Resolve a human-readable name for a backend-specific source id, if
    /// the backend can provide one (used for diagnostics only).
    fn input_name(&self, kind: &str, source_id: u32) -> Option<String>;

    /// Read the current value and timestamp of a backend-specific source.
    fn clone_temp(&self, source_id: u32) -> Result<(Temp, Tick)>;
}

/// A named actuator target.
pub trait RelayBackend: Send + Sync {
    fn output_name(&self, kind: &str, target_id: u32) -> Option<String>;
    fn output_state_set(&self, target_id: u32, kind: &str, on: bool) -> Result<()>;
    fn output_state_get(&self, target_id: u32) -> Result<bool>;
}

/// Blob key/value persistence.
pub trait StorageBackend: Send + Sync {
    fn dump(&self, key: &str, version: u32, bytes: &[u8]) -> Result<()>;
    fn fetch(&self, key: &str) -> Result<(u32, Vec<u8>)>;
}

/// A single data point handed to a logging backend: either an integer or
/// floating-point sample.
#[derive(Debug, Clone, PartialEq)]
pub enum LogValue {
    Int(i64),
    Float(f64),
}

/// Schema describing the fields a named log source will emit.
#[derive(Debug, Clone)]
pub struct LogSchema {
    pub keys: Vec<String>,
}

/// One sampled snapshot handed to [`LoggingBackend::update`].
#[derive(Debug, Clone)]
pub struct LogData {
    pub keys: Vec<String>,
    pub values: Vec<LogValue>,
    pub nvalues: usize,
    pub interval: i64,
}

/// A pluggable logging sink (file, RRD, StatsD, MQTT, ...).
pub trait LoggingBackend: Send + Sync {
    fn create(&self, name: &str, schema: &LogSchema) -> Result<()>;
    fn update(&self, name: &str, data: &LogData) -> Result<()>;
    fn online(&self) -> Result<()>;
    fn offline(&self) -> Result<()>;
}
