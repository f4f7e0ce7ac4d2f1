//! Exercises the daemon's online/tick/offline lifecycle against a real
//! file-backed store, the way `hf-core`'s persistence tests lean on
//! `tempfile` instead of mocking the filesystem.

use std::sync::Arc;

use hc_core::backend::StorageBackend;
use hc_core::runtime::Runtime;
use hc_core::time::Tick;
use hc_daemon::plant_setup;
use hc_daemon::storage::FileStorage;

#[test]
fn runs_several_ticks_and_persists_across_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(FileStorage::new(dir.path()).unwrap());

    let (plant, sensor_backend, relay_backend, ids) = plant_setup::build();
    let runtime = Runtime::new(plant);
    runtime.online(Some(storage.as_ref() as &dyn StorageBackend), Tick(0)).unwrap();

    for t in 1..=5 {
        let report = runtime.tick(&sensor_backend, &relay_backend, Some(storage.as_ref() as &dyn StorageBackend), None, Tick(t));
        assert!(report.faults.is_empty(), "unexpected tick faults: {:?}", report.faults);
    }

    let boiler = runtime.plant.heatsources.get(ids.heatsource);
    assert!(boiler.actual_temp().is_some());
    let circuit = runtime.plant.circuits.get(ids.circuit);
    assert!(circuit.actual_wtemp().is_some());
    let dhwt = runtime.plant.dhwts.get(ids.dhwt);
    assert!(dhwt.actual_temp().is_some());

    runtime.offline(storage.as_ref() as &dyn StorageBackend).unwrap();

    // A fresh runtime over the same plant shape restores from the same store.
    let (plant2, sensor_backend2, relay_backend2, _ids2) = plant_setup::build();
    let runtime2 = Runtime::new(plant2);
    runtime2.online(Some(storage.as_ref() as &dyn StorageBackend), Tick(6)).unwrap();
    let report = runtime2.tick(&sensor_backend2, &relay_backend2, Some(storage.as_ref() as &dyn StorageBackend), None, Tick(7));
    assert!(report.faults.is_empty(), "unexpected tick faults after restore: {:?}", report.faults);
}

#[test]
fn offline_without_prior_online_still_persists_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileStorage::new(dir.path()).unwrap();

    let (plant, _sensor_backend, _relay_backend, _ids) = plant_setup::build();
    let runtime = Runtime::new(plant);
    runtime.online(Some(&storage as &dyn StorageBackend), Tick(0)).unwrap();
    runtime.offline(&storage as &dyn StorageBackend).unwrap();
}
