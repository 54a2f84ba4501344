// HistoryRepo tests: append, query, fallback, import, migration, export

mod common;

use common::{dual_repo, flat_only_repo, full_snapshot, sqlite_store};
use vicare_monitor::error::StorageError;
use vicare_monitor::history_repo::{FlatFile, HistoryRepo, QuerySource, SqliteStore};
use vicare_monitor::models::{Snapshot, Window};
use tempfile::TempDir;

#[tokio::test]
async fn history_repo_open_creates_tables() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("heating.db");
    let repo = HistoryRepo::open(path.to_str().unwrap(), 2, None).await.unwrap();
    let store = repo.primary().expect("sqlite store");
    assert_eq!(store.schema_version().await.unwrap(), Some(2));
    let info = repo.info().await.unwrap();
    assert_eq!(info.heating_records, 0);
    assert_eq!(info.first_timestamp, None);
}

#[tokio::test]
async fn history_repo_append_then_query_returns_snapshot() {
    let dir = TempDir::new().unwrap();
    let repo = dual_repo(&dir).await;
    let s = full_snapshot(1_700_000_000, 42.5);
    repo.append(&s).await.unwrap();

    let got = repo.query(1_700_000_000, 1_700_000_000).await.unwrap();
    assert_eq!(got, vec![s]);

    // Primary took the write; the flat fallback stays untouched.
    assert!(!dir.path().join("burner_data.csv").exists());
}

#[tokio::test]
async fn history_repo_inverted_window_is_empty() {
    let dir = TempDir::new().unwrap();
    let repo = dual_repo(&dir).await;
    repo.append(&full_snapshot(700, 40.0)).await.unwrap();
    let got = repo.query(1000, 500).await.unwrap();
    assert!(got.is_empty());
}

#[tokio::test]
async fn history_repo_query_orders_and_keeps_duplicates() {
    let dir = TempDir::new().unwrap();
    let repo = dual_repo(&dir).await;
    for (ts, temp) in [(300, 3.0), (100, 1.0), (200, 2.0), (100, 1.5)] {
        repo.append(&full_snapshot(ts, temp)).await.unwrap();
    }
    let got = repo.query(0, 1000).await.unwrap();
    let order: Vec<(i64, Option<f64>)> = got.iter().map(|s| (s.timestamp, s.temp_heating)).collect();
    assert_eq!(
        order,
        vec![(100, Some(1.0)), (100, Some(1.5)), (200, Some(2.0)), (300, Some(3.0))]
    );
}

#[tokio::test]
async fn history_repo_query_bounds_are_inclusive() {
    let dir = TempDir::new().unwrap();
    let repo = dual_repo(&dir).await;
    for ts in [99, 100, 150, 200, 201] {
        repo.append(&full_snapshot(ts, 40.0)).await.unwrap();
    }
    let got: Vec<i64> = repo
        .query(100, 200)
        .await
        .unwrap()
        .iter()
        .map(|s| s.timestamp)
        .collect();
    assert_eq!(got, vec![100, 150, 200]);
}

#[tokio::test]
async fn history_repo_partial_snapshot_is_stored_with_unknowns() {
    let dir = TempDir::new().unwrap();
    let repo = dual_repo(&dir).await;
    let partial = Snapshot {
        temp_out: Some(-3.5),
        ..Snapshot::empty(1_700_000_100)
    };
    repo.append(&partial).await.unwrap();
    repo.append(&Snapshot::empty(1_700_000_200)).await.unwrap();

    let got = repo.query(1_700_000_000, 1_700_001_000).await.unwrap();
    assert_eq!(got.len(), 2);
    assert_eq!(got[0], partial);
    assert_eq!(got[0].active, None);
    assert!(got[1].is_partial_empty());
}

#[tokio::test]
async fn history_repo_flat_only_round_trip() {
    let dir = TempDir::new().unwrap();
    let repo = flat_only_repo(&dir);
    let a = full_snapshot(1_700_000_000, 41.0);
    let b = Snapshot {
        temp_heating: Some(39.5),
        ..Snapshot::empty(1_700_000_060)
    };
    repo.append(&b).await.unwrap();
    repo.append(&a).await.unwrap();

    let report = repo
        .query_report(Window::new(1_699_999_999, 1_700_000_100))
        .await
        .unwrap();
    assert_eq!(report.source, QuerySource::Flat);
    assert_eq!(report.malformed, 0);
    assert_eq!(report.records, vec![a, b]);
}

#[tokio::test]
async fn history_repo_reads_flat_while_sqlite_is_empty() {
    let dir = TempDir::new().unwrap();
    let flat_path = dir.path().join("burner_data.csv");
    std::fs::write(
        &flat_path,
        "1700000000,1,40.0,1000.5,200,5.0,60.0,48.0,50.0,42.0,20.0,30.0,1.5,0\n",
    )
    .unwrap();
    let repo = dual_repo(&dir).await;

    let report = repo.query_report(Window::new(0, i64::MAX)).await.unwrap();
    assert_eq!(report.source, QuerySource::Flat);
    assert_eq!(report.records.len(), 1);

    // Once SQLite holds data it is authoritative.
    repo.append(&full_snapshot(1_700_000_500, 44.0)).await.unwrap();
    let report = repo.query_report(Window::new(0, i64::MAX)).await.unwrap();
    assert_eq!(report.source, QuerySource::Primary);
    assert_eq!(report.records.len(), 1);
    assert_eq!(report.records[0].timestamp, 1_700_000_500);
}

#[tokio::test]
async fn history_repo_legacy_lines_have_unknown_new_pumps() {
    let dir = TempDir::new().unwrap();
    let flat_path = dir.path().join("burner_data.csv");
    std::fs::write(
        &flat_path,
        "1700000000,1,40.0,1000.5,200,5.0,60.0,48.0,50.0,42.0,20.0,30.0,1.5,0\n\
         1700000060,0,0.0,1000.5,200,5.0,60.0,48.0,50.0,None,20.0,30.0,nan,1\n",
    )
    .unwrap();
    let repo = flat_only_repo(&dir);

    let got = repo.query(0, i64::MAX).await.unwrap();
    assert_eq!(got.len(), 2);
    assert_eq!(got[0].active, Some(true));
    assert_eq!(got[0].solar_pump, Some(false));
    assert_eq!(got[0].circulation_pump, None);
    assert_eq!(got[0].dhw_pump, None);
    assert_eq!(got[1].temp_heating, None);
    assert_eq!(got[1].solar_production, None);
    assert_eq!(got[1].solar_pump, Some(true));
}

#[tokio::test]
async fn history_repo_append_without_any_store_is_unavailable() {
    let repo = HistoryRepo::new(None, None);
    let err = repo.append(&full_snapshot(1, 1.0)).await.unwrap_err();
    assert!(matches!(err, StorageError::Unavailable(_)));
    assert!(repo.query(0, 10).await.unwrap().is_empty());
    assert_eq!(repo.latest().await.unwrap(), None);
}

#[tokio::test]
async fn history_repo_latest_prefers_newest_timestamp() {
    let dir = TempDir::new().unwrap();
    let repo = dual_repo(&dir).await;
    assert_eq!(repo.latest().await.unwrap(), None);
    repo.append(&full_snapshot(200, 2.0)).await.unwrap();
    repo.append(&full_snapshot(100, 1.0)).await.unwrap();
    let latest = repo.latest().await.unwrap().unwrap();
    assert_eq!(latest.timestamp, 200);
}

#[tokio::test]
async fn history_repo_import_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let csv = dir.path().join("legacy.csv");
    std::fs::write(
        &csv,
        "1700000000,1,40.0,1000.5,200,5.0,60.0,48.0,50.0,42.0,20.0,30.0,1.5,0\n\
         1700000060,1,41.0,1000.6,201,5.0,60.0,48.0,50.0,43.0,20.0,30.0,1.5,0\n\
         not,a,record\n\
         1700000060,1,41.0,1000.6,201,5.0,60.0,48.0,50.0,43.0,20.0,30.0,1.5,0\n",
    )
    .unwrap();
    let store = sqlite_store(&dir).await;
    let repo = HistoryRepo::new(Some(store), None);

    let first = repo.import_batch(&csv).await.unwrap();
    assert_eq!(first.total, 4);
    assert_eq!(first.malformed, 1);
    assert_eq!(first.imported, 2);

    let second = repo.import_batch(&csv).await.unwrap();
    assert_eq!(second.total, 4);
    assert_eq!(second.imported, 0);

    let info = repo.info().await.unwrap();
    assert_eq!(info.heating_records, 2);
    assert_eq!(info.first_timestamp, Some(1_700_000_000));
    assert_eq!(info.last_timestamp, Some(1_700_000_060));
}

#[tokio::test]
async fn history_repo_import_requires_sqlite() {
    let dir = TempDir::new().unwrap();
    let repo = flat_only_repo(&dir);
    let err = repo
        .import_batch(&dir.path().join("missing.csv"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Unavailable(_)));
}

#[tokio::test]
async fn history_repo_import_commits_large_sources() {
    let dir = TempDir::new().unwrap();
    let csv = dir.path().join("big.csv");
    let flat = FlatFile::new(&csv);
    for i in 0..250 {
        flat.append(&full_snapshot(1_700_000_000 + i * 60, 40.0)).await.unwrap();
    }
    let repo = HistoryRepo::new(Some(sqlite_store(&dir).await), None);
    let report = repo.import_batch(&csv).await.unwrap();
    assert_eq!(report.imported, 250);
    assert_eq!(report.malformed, 0);
    assert_eq!(repo.info().await.unwrap().heating_records, 250);
}

#[tokio::test]
async fn history_repo_migrates_legacy_table() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("legacy.db");
    let path_str = path.to_str().unwrap();

    // Table as the first collector created it: 13 readings, NOT NULL burner state.
    {
        let opts = sqlx::sqlite::SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true);
        let pool = sqlx::SqlitePool::connect_with(opts).await.unwrap();
        sqlx::query(
            "CREATE TABLE heating_data (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                datetime TEXT NOT NULL,
                active BOOLEAN NOT NULL,
                modulation FLOAT, hours FLOAT, starts INTEGER,
                temp_out FLOAT, temp_boiler FLOAT, temp_hotwater FLOAT,
                temp_hotwater_target FLOAT, temp_heating FLOAT,
                temp_solcollector FLOAT, temp_solstorage FLOAT,
                solar_production FLOAT, solar_pump BOOLEAN
            )",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO heating_data (timestamp, datetime, active, modulation, temp_heating)
             VALUES (1700000000, '2023-11-14 22:13:20', 1, 35.0, 44.0)",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool.close().await;
    }

    let store = SqliteStore::connect(path_str, 2).await.unwrap();
    store.init().await.unwrap();
    // A second init is a no-op.
    store.init().await.unwrap();
    assert_eq!(store.schema_version().await.unwrap(), Some(2));

    let repo = HistoryRepo::new(Some(store), None);
    let old = repo.query(0, i64::MAX).await.unwrap();
    assert_eq!(old.len(), 1);
    assert_eq!(old[0].active, Some(true));
    assert_eq!(old[0].modulation, Some(35.0));
    assert_eq!(old[0].dhw_pump, None);

    // Unknown burner state is now storable.
    repo.append(&Snapshot::empty(1_700_000_060)).await.unwrap();
    let all = repo.query(0, i64::MAX).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[1].active, None);
}

#[tokio::test]
async fn history_repo_raw_payloads_round_trip() {
    let dir = TempDir::new().unwrap();
    let repo = dual_repo(&dir).await;
    let payload = serde_json::json!({ "temp_heating": 42.0, "extra": [1, 2] });
    assert!(repo.append_raw(100, &payload).await.unwrap());
    assert!(repo.append_raw(200, &serde_json::json!({})).await.unwrap());

    let raw = repo.primary().unwrap().recent_raw(10).await.unwrap();
    assert_eq!(raw.len(), 2);
    assert_eq!(raw[0].timestamp, 100);
    assert_eq!(raw[0].data, payload);
    assert_eq!(repo.info().await.unwrap().raw_records, 2);

    let flat_only = flat_only_repo(&dir);
    assert!(!flat_only.append_raw(300, &payload).await.unwrap());
}

#[tokio::test]
async fn history_repo_export_writes_header_and_rows() {
    let dir = TempDir::new().unwrap();
    let repo = dual_repo(&dir).await;
    repo.append(&full_snapshot(200, 2.0)).await.unwrap();
    repo.append(&Snapshot::empty(100)).await.unwrap();

    let out = dir.path().join("export.csv");
    let n = repo.export_csv(&out).await.unwrap();
    assert_eq!(n, 2);

    let text = std::fs::read_to_string(&out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("timestamp,datetime,active,modulation,hours,starts"));
    assert!(lines[0].ends_with("solar_pump,circulation_pump,dhw_pump"));
    assert!(lines[1].starts_with("100,"));
    assert!(lines[1].ends_with(",,,,,,,,,,,,,,"));
    assert!(lines[2].starts_with("200,"));
    assert!(lines[2].ends_with(",1.5,0,1,0"));
}

#[tokio::test]
async fn history_repo_export_to_unwritable_path_fails() {
    let dir = TempDir::new().unwrap();
    let repo = dual_repo(&dir).await;
    repo.append(&full_snapshot(100, 1.0)).await.unwrap();
    repo.append(&full_snapshot(200, 2.0)).await.unwrap();

    let out = dir.path().join("missing").join("export.csv");
    let err = repo.export_csv(&out).await.unwrap_err();
    assert!(matches!(err, StorageError::Csv(_) | StorageError::Io(_)), "{err:?}");
    assert!(!out.exists());
}

#[tokio::test]
async fn history_repo_latest_passes_over_unreadable_newest_row() {
    let dir = TempDir::new().unwrap();
    let repo = dual_repo(&dir).await;
    repo.append(&full_snapshot(100, 40.0)).await.unwrap();

    let opts = sqlx::sqlite::SqliteConnectOptions::new().filename(dir.path().join("heating.db"));
    let pool = sqlx::SqlitePool::connect_with(opts).await.unwrap();
    sqlx::query(
        "INSERT INTO heating_data (timestamp, datetime, starts)
         VALUES (200, '1970-01-01 00:03:20', 'lots')",
    )
    .execute(&pool)
    .await
    .unwrap();
    pool.close().await;

    let latest = repo.latest().await.unwrap().expect("a readable row remains");
    assert_eq!(latest.timestamp, 100);
    assert_eq!(latest.temp_heating, Some(40.0));
}
