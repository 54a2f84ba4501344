// Shared test helpers

#![allow(dead_code)]

use vicare_monitor::history_repo::{FlatFile, HistoryRepo, SqliteStore};
use vicare_monitor::models::Snapshot;

/// Fully populated snapshot; `temp_heating` is the anchor reading.
pub fn full_snapshot(timestamp: i64, temp_heating: f64) -> Snapshot {
    Snapshot {
        timestamp,
        active: Some(true),
        modulation: Some(50.0),
        hours: Some(1000.0),
        starts: Some(200),
        temp_out: Some(5.0),
        temp_boiler: Some(60.0),
        temp_hotwater: Some(48.0),
        temp_hotwater_target: Some(50.0),
        temp_heating: Some(temp_heating),
        temp_solcollector: Some(20.0),
        temp_solstorage: Some(30.0),
        solar_production: Some(1.5),
        solar_pump: Some(false),
        circulation_pump: Some(true),
        dhw_pump: Some(false),
    }
}

/// Snapshot carrying only the readings the series tests care about.
pub fn snapshot_with(timestamp: i64, hours: f64, starts: i64, temp_heating: Option<f64>) -> Snapshot {
    Snapshot {
        hours: Some(hours),
        starts: Some(starts),
        temp_heating,
        ..Snapshot::empty(timestamp)
    }
}

pub async fn sqlite_store(dir: &tempfile::TempDir) -> SqliteStore {
    let path = dir.path().join("heating.db");
    let store = SqliteStore::connect(path.to_str().unwrap(), 2).await.unwrap();
    store.init().await.unwrap();
    store
}

/// SQLite primary plus flat fallback, both inside `dir`.
pub async fn dual_repo(dir: &tempfile::TempDir) -> HistoryRepo {
    let flat = FlatFile::new(dir.path().join("burner_data.csv"));
    HistoryRepo::new(Some(sqlite_store(dir).await), Some(flat))
}

pub fn flat_only_repo(dir: &tempfile::TempDir) -> HistoryRepo {
    HistoryRepo::new(None, Some(FlatFile::new(dir.path().join("burner_data.csv"))))
}
