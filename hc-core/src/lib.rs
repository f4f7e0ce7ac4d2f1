//! Control core for a residential hydronic heating plant.
//!
//! This crate implements the pure control-logic layer: temperature/relay
//! abstractions, pumps, mixing valves, the building thermal model,
//! heating circuits, DHWTs, the
//! boiler heatsource state machine, the plant orchestrator, the
//! system-wide runtime, the weekday/hour schedule lookup and the
//! telemetry logging registry. Hardware backends, the config-text
//! parser, the storage engine and the logging sinks are collaborators
//! supplied by `hc-daemon` (or a test harness) through the traits in
//! [`backend`].

pub mod backend;
pub mod bmodel;
pub mod circuit;
pub mod dhwt;
pub mod heatsource;
pub mod ids;
pub mod input;
pub mod logging;
pub mod numeric;
pub mod output;
pub mod plant;
pub mod pump;
pub mod runtime;
pub mod scheduler;
pub mod time;
pub mod valve;

pub use hc_error::{Error, Result};
