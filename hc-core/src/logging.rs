//! Logging registry: periodic pull from plant-owned telemetry sources,
//! routed to a pluggable [`crate::backend::LoggingBackend`].
//!
//! This is unrelated to the daemon's own `tracing` diagnostics. A
//! [`LogSource`] is a thin read-only view over a plant object's atomics
//! -- the registry itself never touches control-thread state beyond
//! those relaxed loads, so it is safe to drive from a dedicated logging
//! thread.

use parking_lot::Mutex;

use hc_error::Result;

use crate::backend::{LogData, LogSchema, LoggingBackend};
use crate::time::Tick;

/// A single telemetry source the registry can pull from: a building
/// model, a boiler, a circuit, a DHWT, or a relay's accounting counters.
pub trait LogSource: Send + Sync {
    fn name(&self) -> &str;
    fn schema(&self) -> LogSchema;
    /// Sample the source's current state. Called at most once per
    /// `interval` ticks.
    fn sample(&self, now: Tick) -> LogData;
    /// Pull cadence, in ticks.
    fn interval(&self) -> i64 {
        60
    }
}

struct Registered {
    source: Box<dyn LogSource>,
    last_pull: Mutex<i64>,
    created: Mutex<bool>,
}

/// Owns the registered log sources and drives the periodic pull against
/// one backend.
pub struct LoggingRegistry {
    sources: Vec<Registered>,
}

impl Default for LoggingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingRegistry {
    pub fn new() -> Self {
        LoggingRegistry { sources: Vec::new() }
    }

    pub fn register(&mut self, source: Box<dyn LogSource>) {
        self.sources.push(Registered { source, last_pull: Mutex::new(i64::MIN), created: Mutex::new(false) });
    }

    pub fn online(&self, backend: &dyn LoggingBackend) -> Result<()> {
        backend.online()?;
        for r in &self.sources {
            backend.create(r.source.name(), &r.source.schema())?;
            *r.created.lock() = true;
        }
        Ok(())
    }

    pub fn offline(&self, backend: &dyn LoggingBackend) -> Result<()> {
        backend.offline()
    }

    /// Pull every source whose interval has elapsed and hand the
    /// snapshot to `backend`. Per-source failures are logged and do not
    /// stop the sweep (mirrors the orchestrator's no-abort policy).
    pub fn pull(&self, backend: &dyn LoggingBackend, now: Tick) {
        for r in &self.sources {
            let mut last = r.last_pull.lock();
            let due = *last == i64::MIN || now.saturating_sub(Tick(*last)) >= r.source.interval();
            if !due {
                continue;
            }
            *last = now.0;
            drop(last);

            if !*r.created.lock() {
                if let Err(e) = backend.create(r.source.name(), &r.source.schema()) {
                    tracing::warn!(source = r.source.name(), error = %e, "log source create failed");
                    continue;
                }
                *r.created.lock() = true;
            }

            let data = r.source.sample(now);
            if let Err(e) = backend.update(r.source.name(), &data) {
                tracing::warn!(source = r.source.name(), error = %e, "log source update failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LogValue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct CountingSource {
        calls: AtomicUsize,
    }
    impl LogSource for CountingSource {
        fn name(&self) -> &str {
            "demo"
        }
        fn schema(&self) -> LogSchema {
            LogSchema { keys: vec!["x".into()] }
        }
        fn sample(&self, _now: Tick) -> LogData {
            self.calls.fetch_add(1, Ordering::Relaxed);
            LogData { keys: vec!["x".into()], values: vec![LogValue::Int(1)], nvalues: 1, interval: 10 }
        }
        fn interval(&self) -> i64 {
            10
        }
    }

    struct VecSink {
        updates: StdMutex<Vec<(String, LogData)>>,
    }
    impl LoggingBackend for VecSink {
        fn create(&self, _name: &str, _schema: &LogSchema) -> Result<()> {
            Ok(())
        }
        fn update(&self, name: &str, data: &LogData) -> Result<()> {
            self.updates.lock().unwrap().push((name.to_string(), data.clone()));
            Ok(())
        }
        fn online(&self) -> Result<()> {
            Ok(())
        }
        fn offline(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn pull_respects_per_source_interval() {
        let mut registry = LoggingRegistry::new();
        registry.register(Box::new(CountingSource { calls: AtomicUsize::new(0) }));
        let sink = VecSink { updates: StdMutex::new(Vec::new()) };

        registry.pull(&sink, Tick(0));
        registry.pull(&sink, Tick(5));
        registry.pull(&sink, Tick(10));

        assert_eq!(sink.updates.lock().unwrap().len(), 2);
    }
}
