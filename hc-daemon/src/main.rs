//! Daemon entry point: signal handling, thread spawn, demo plant wiring.
//!
//! The control pipeline is a synchronous, non-blocking single thread
//! plus a second logging thread -- there is nothing here for an async
//! executor to schedule concurrently, so this binary spawns two plain
//! `std::thread`s and drives their cadence with `crossbeam_channel::tick`
//! instead of pulling in an async runtime (see DESIGN.md).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Timelike};
use tracing::{error, info, warn};

use hc_core::backend::StorageBackend;
use hc_core::logging::LoggingRegistry;
use hc_core::runtime::Runtime;
use hc_core::scheduler::WallTime;
use hc_core::time::Tick;

use hc_daemon::backends::FileLoggingBackend;
use hc_daemon::logging_sources::{BoilerLogSource, CircuitLogSource, DhwtLogSource, RelayLogSource};
use hc_daemon::storage::{self, FileStorage};
use hc_daemon::plant_setup;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

const CONTROL_PERIOD: Duration = Duration::from_secs(1);
const LOGGING_PERIOD: Duration = Duration::from_secs(60);

fn now_wall_time() -> WallTime {
    let local = chrono::Local::now();
    // chrono's Monday = 0 already matches the weekly schedule's convention.
    WallTime::new(local.weekday().num_days_from_monday() as u8, local.hour() as u8, local.minute() as u8)
}

fn print_help() {
    println!("hearthctld - hearthctl control core daemon");
    println!();
    println!("USAGE:");
    println!("    hearthctld [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --state-dir <PATH>    Directory for persisted state (default: $HEARTHCTL_STATE_DIR or /var/lib/hearthctl)");
    println!("    -h, --help            Print this help message");
}

fn main() {
    let log_level = std::env::var("HEARTHCTL_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_target(false).with_env_filter(log_level.as_str()).init();

    let mut state_dir = storage::default_root();
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--state-dir" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("Error: --state-dir requires a path argument");
                    std::process::exit(1);
                }
                state_dir = args[i].clone().into();
            }
            "-h" | "--help" => {
                print_help();
                return;
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    info!(state_dir = %state_dir.display(), "hearthctld starting");

    let storage = match FileStorage::new(state_dir.clone()) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, "failed to open state directory");
            std::process::exit(1);
        }
    };

    let (plant, sensor_backend, relay_backend, ids) = plant_setup::build();
    let runtime = Arc::new(Runtime::new(plant));

    if let Err(e) = runtime.online(Some(storage.as_ref() as &dyn StorageBackend), Tick(0)) {
        error!(error = %e, "runtime startup failed");
        std::process::exit(1);
    }

    let mut logging_registry = LoggingRegistry::new();
    logging_registry.register(Box::new(BoilerLogSource::new(runtime.clone(), ids.heatsource)));
    logging_registry.register(Box::new(CircuitLogSource::new(runtime.clone(), ids.circuit)));
    logging_registry.register(Box::new(DhwtLogSource::new(runtime.clone(), ids.dhwt)));
    logging_registry.register(Box::new(RelayLogSource::new(runtime.clone(), ids.burner)));
    let logging_backend = FileLoggingBackend::new(state_dir.join("telemetry.log"));
    if let Err(e) = logging_registry.online(&logging_backend) {
        warn!(error = %e, "logging backend online failed, continuing without telemetry");
    }

    if let Err(e) = ctrlc::set_handler(|| {
        info!("received interrupt, shutting down");
        SHUTDOWN.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "failed to install signal handler; shutdown via SIGKILL only");
    }

    let control_runtime = runtime.clone();
    let control_storage = storage.clone();
    let control_handle = std::thread::spawn(move || {
        let ticker = crossbeam_channel::tick(CONTROL_PERIOD);
        let mut tick_count: i64 = 0;
        loop {
            if SHUTDOWN.load(Ordering::SeqCst) {
                break;
            }
            ticker.recv().ok();
            tick_count += 1;
            let report = control_runtime.tick(
                &sensor_backend,
                &relay_backend,
                Some(control_storage.as_ref() as &dyn StorageBackend),
                Some(now_wall_time()),
                Tick(tick_count),
            );
            for fault in &report.faults {
                warn!(object = %fault.object, error = %fault.error, "tick fault");
            }
        }
    });

    let logging_handle = std::thread::spawn(move || {
        let ticker = crossbeam_channel::tick(LOGGING_PERIOD);
        let mut tick_count: i64 = 0;
        loop {
            if SHUTDOWN.load(Ordering::SeqCst) {
                break;
            }
            ticker.recv().ok();
            tick_count += 60;
            logging_registry.pull(&logging_backend, Tick(tick_count));
        }
        let _ = logging_registry.offline(&logging_backend);
    });

    let _ = control_handle.join();
    let _ = logging_handle.join();

    if let Err(e) = runtime.offline(storage.as_ref() as &dyn StorageBackend) {
        error!(error = %e, "runtime shutdown persistence failed");
    }

    info!("hearthctld stopped");
}
