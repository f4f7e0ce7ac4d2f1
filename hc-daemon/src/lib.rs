//! Daemon wiring for the hearthctl control core, split out as a library
//! so `tests/` can exercise it without depending on `main.rs` internals.

pub mod backends;
pub mod logging_sources;
pub mod plant_setup;
pub mod storage;
