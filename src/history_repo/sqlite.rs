// SQLite store: one row per snapshot in heating_data, raw device JSON in raw_device_data.
// Uses sqlx for async + connection pooling, WAL so readers never see a half-written row.
// Table and column names match databases created by earlier collector releases, so an
// existing history file can be opened in place; init() migrates it forward.

use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

use futures_util::TryStreamExt;
use sqlx::Row;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use tracing::instrument;

use super::blob;
use crate::error::{MalformedRecord, StorageResult};
use crate::models::{Field, FieldKind, Snapshot, Window};

/// Bumped whenever heating_data gains columns.
pub const HEATING_SCHEMA_VERSION: i64 = 2;

const IMPORT_COMMIT_EVERY: usize = 100;

fn sql_type(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Flag => "BOOLEAN",
        FieldKind::Counter => "INTEGER",
        FieldKind::Float => "FLOAT",
    }
}

fn reading_columns() -> String {
    Field::ALL
        .iter()
        .map(|f| f.name())
        .collect::<Vec<_>>()
        .join(", ")
}

fn create_heating_table_sql(table: &str) -> String {
    let columns: Vec<String> = Field::ALL
        .iter()
        .map(|f| format!("{} {}", f.name(), sql_type(f.kind())))
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp INTEGER NOT NULL,
            datetime TEXT NOT NULL,
            {}
        )",
        columns.join(",\n            ")
    )
}

/// Local wall-clock rendering stored next to the epoch timestamp (display only).
pub fn format_datetime(timestamp: i64) -> String {
    match chrono::DateTime::from_timestamp(timestamp, 0) {
        Some(utc) => utc
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        None => String::new(),
    }
}

type SqliteQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>>;

fn bind_readings<'q>(mut query: SqliteQuery<'q>, s: &Snapshot) -> SqliteQuery<'q> {
    for field in Field::ALL {
        let value = s.value(field);
        query = match field.kind() {
            FieldKind::Flag => query.bind(value.map(|v| v != 0.0)),
            FieldKind::Counter => query.bind(value.map(|v| v as i64)),
            FieldKind::Float => query.bind(value),
        };
    }
    query
}

fn parse_snapshot_row(row: &SqliteRow) -> Result<Snapshot, MalformedRecord> {
    let id: i64 = row.try_get("id").unwrap_or_default();
    let bad = |e: sqlx::Error| MalformedRecord::new(id.max(0) as u64, e.to_string());

    let mut snapshot = Snapshot::empty(row.try_get::<i64, _>("timestamp").map_err(bad)?);
    for field in Field::ALL {
        let value = match field.kind() {
            FieldKind::Flag => row
                .try_get::<Option<bool>, _>(field.name())
                .map_err(bad)?
                .map(|b| if b { 1.0 } else { 0.0 }),
            FieldKind::Counter => row
                .try_get::<Option<i64>, _>(field.name())
                .map_err(bad)?
                .map(|v| v as f64),
            FieldKind::Float => row.try_get::<Option<f64>, _>(field.name()).map_err(bad)?,
        };
        snapshot.set_value(field, value);
    }
    Ok(snapshot)
}

/// Record counts and covered time range.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct StoreInfo {
    pub heating_records: i64,
    pub raw_records: i64,
    pub first_timestamp: Option<i64>,
    pub last_timestamp: Option<i64>,
}

/// One raw device payload kept for forensic replay.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RawPayload {
    pub timestamp: i64,
    pub data: serde_json::Value,
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to SQLite at `path`, create parent dir and DB if missing, enable WAL + pragmas.
    pub async fn connect(path: &str, max_pool_size: u32) -> StorageResult<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_pool_size)
            .connect_with(opts)
            .await?;
        Ok(Self { pool })
    }

    /// Create tables if missing and migrate older heating_data layouts. Idempotent.
    #[instrument(skip(self), fields(repo = "sqlite", operation = "init"))]
    pub async fn init(&self) -> StorageResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_version (key TEXT PRIMARY KEY, value INTEGER NOT NULL)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(&create_heating_table_sql("heating_data"))
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS raw_device_data (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                datetime TEXT NOT NULL,
                data BLOB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        self.migrate_heating_table().await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_heating_data_timestamp ON heating_data(timestamp)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_raw_device_data_timestamp ON raw_device_data(timestamp)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("INSERT OR REPLACE INTO schema_version (key, value) VALUES ('heating_data', $1)")
            .bind(HEATING_SCHEMA_VERSION)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Adds reading columns missing from older tables and drops the legacy NOT NULL on
    /// `active` (an unknown burner state must stay unknown).
    async fn migrate_heating_table(&self) -> StorageResult<()> {
        let columns = sqlx::query("PRAGMA table_info(heating_data)")
            .fetch_all(&self.pool)
            .await?;
        let mut present = HashSet::new();
        let mut active_not_null = false;
        for col in &columns {
            let name: String = col.try_get("name")?;
            let not_null: i64 = col.try_get("notnull")?;
            if name == Field::Active.name() && not_null != 0 {
                active_not_null = true;
            }
            present.insert(name);
        }

        let mut tx = self.pool.begin().await?;
        for field in Field::ALL {
            if !present.contains(field.name()) {
                tracing::info!(column = field.name(), "adding heating_data column");
                sqlx::query(&format!(
                    "ALTER TABLE heating_data ADD COLUMN {} {}",
                    field.name(),
                    sql_type(field.kind())
                ))
                .execute(&mut *tx)
                .await?;
            }
        }

        if active_not_null {
            tracing::info!("rebuilding heating_data to make legacy columns nullable");
            let cols = reading_columns();
            sqlx::query("DROP TABLE IF EXISTS heating_data_migrate")
                .execute(&mut *tx)
                .await?;
            sqlx::query(&create_heating_table_sql("heating_data_migrate"))
                .execute(&mut *tx)
                .await?;
            sqlx::query(&format!(
                "INSERT INTO heating_data_migrate (id, timestamp, datetime, {cols})
                 SELECT id, timestamp, datetime, {cols} FROM heating_data"
            ))
            .execute(&mut *tx)
            .await?;
            sqlx::query("DROP TABLE heating_data")
                .execute(&mut *tx)
                .await?;
            sqlx::query("ALTER TABLE heating_data_migrate RENAME TO heating_data")
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn schema_version(&self) -> StorageResult<Option<i64>> {
        let v = sqlx::query_scalar::<_, i64>(
            "SELECT value FROM schema_version WHERE key = 'heating_data'",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(v)
    }

    fn insert_sql() -> String {
        let placeholders: Vec<String> = (3..3 + Field::ALL.len()).map(|i| format!("${i}")).collect();
        format!(
            "INSERT INTO heating_data (timestamp, datetime, {}) VALUES ($1, $2, {})",
            reading_columns(),
            placeholders.join(", ")
        )
    }

    #[instrument(skip(self, snapshot), fields(repo = "sqlite", operation = "append", timestamp = snapshot.timestamp))]
    pub async fn append(&self, snapshot: &Snapshot) -> StorageResult<()> {
        let sql = Self::insert_sql();
        let query = sqlx::query(&sql)
            .bind(snapshot.timestamp)
            .bind(format_datetime(snapshot.timestamp));
        bind_readings(query, snapshot).execute(&self.pool).await?;
        Ok(())
    }

    /// Insert in transactions of [`IMPORT_COMMIT_EVERY`] rows. Returns rows inserted.
    #[instrument(skip(self, snapshots), fields(repo = "sqlite", operation = "insert_batch", snapshots_count = snapshots.len()))]
    pub async fn insert_batch(&self, snapshots: &[Snapshot]) -> StorageResult<u64> {
        let sql = Self::insert_sql();
        let mut inserted = 0u64;
        for chunk in snapshots.chunks(IMPORT_COMMIT_EVERY) {
            let mut tx = self.pool.begin().await?;
            for s in chunk {
                let query = sqlx::query(&sql)
                    .bind(s.timestamp)
                    .bind(format_datetime(s.timestamp));
                bind_readings(query, s).execute(&mut *tx).await?;
            }
            tx.commit().await?;
            inserted += chunk.len() as u64;
        }
        Ok(inserted)
    }

    #[instrument(skip(self, payload), fields(repo = "sqlite", operation = "append_raw"))]
    pub async fn append_raw(&self, timestamp: i64, payload: &serde_json::Value) -> StorageResult<()> {
        let data = blob::with_version_prefix(blob::BLOB_VERSION_JSON, &serde_json::to_vec(payload)?);
        sqlx::query("INSERT INTO raw_device_data (timestamp, datetime, data) VALUES ($1, $2, $3)")
            .bind(timestamp)
            .bind(format_datetime(timestamp))
            .bind(&data)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Most recent raw payloads, oldest first. Undecodable blobs are skipped.
    pub async fn recent_raw(&self, limit: u32) -> StorageResult<Vec<RawPayload>> {
        let rows = sqlx::query(
            "SELECT timestamp, data FROM raw_device_data ORDER BY timestamp DESC, id DESC LIMIT $1",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let timestamp: i64 = row.try_get("timestamp")?;
            let bytes: Vec<u8> = match row.try_get::<Vec<u8>, _>("data") {
                Ok(b) => b,
                Err(_) => row.try_get::<String, _>("data")?.into_bytes(),
            };
            match serde_json::from_slice(blob::blob_payload(&bytes, blob::BLOB_VERSION_JSON)) {
                Ok(data) => out.push(RawPayload { timestamp, data }),
                Err(e) => tracing::debug!(error = %e, timestamp, "raw payload not JSON, skipping"),
            }
        }
        out.reverse();
        Ok(out)
    }

    pub async fn is_populated(&self) -> StorageResult<bool> {
        let exists =
            sqlx::query_scalar::<_, i64>("SELECT EXISTS(SELECT 1 FROM heating_data)")
                .fetch_one(&self.pool)
                .await?;
        Ok(exists != 0)
    }

    /// Rows in `window`, ascending by timestamp then insertion order.
    #[instrument(skip(self), fields(repo = "sqlite", operation = "query"))]
    pub async fn query(
        &self,
        window: Window,
    ) -> StorageResult<(Vec<Snapshot>, Vec<MalformedRecord>)> {
        let rows = sqlx::query(&format!(
            "SELECT id, timestamp, {} FROM heating_data
             WHERE timestamp >= $1 AND timestamp <= $2
             ORDER BY timestamp ASC, id ASC",
            reading_columns()
        ))
        .bind(window.since)
        .bind(window.until)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        let mut malformed = Vec::new();
        for row in &rows {
            match parse_snapshot_row(row) {
                Ok(s) => records.push(s),
                Err(m) => malformed.push(m),
            }
        }
        Ok((records, malformed))
    }

    /// Newest readable row. Unreadable rows above it are logged and passed over.
    pub async fn latest(&self) -> StorageResult<Option<Snapshot>> {
        let sql = format!(
            "SELECT id, timestamp, {} FROM heating_data ORDER BY timestamp DESC, id DESC",
            reading_columns()
        );
        let mut rows = sqlx::query(&sql).fetch(&self.pool);
        while let Some(row) = rows.try_next().await? {
            match parse_snapshot_row(&row) {
                Ok(s) => return Ok(Some(s)),
                Err(m) => tracing::warn!(%m, "skipping unreadable row for latest"),
            }
        }
        Ok(None)
    }

    /// Every distinct timestamp already stored (for insert-if-absent import).
    pub async fn existing_timestamps(&self) -> StorageResult<HashSet<i64>> {
        let set = sqlx::query_scalar::<_, i64>("SELECT DISTINCT timestamp FROM heating_data")
            .fetch(&self.pool)
            .try_collect::<HashSet<i64>>()
            .await?;
        Ok(set)
    }

    pub async fn info(&self) -> StorageResult<StoreInfo> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n, MIN(timestamp) AS first_ts, MAX(timestamp) AS last_ts FROM heating_data",
        )
        .fetch_one(&self.pool)
        .await?;
        let raw_records = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM raw_device_data")
            .fetch_one(&self.pool)
            .await?;
        Ok(StoreInfo {
            heating_records: row.try_get("n")?,
            raw_records,
            first_timestamp: row.try_get("first_ts")?,
            last_timestamp: row.try_get("last_ts")?,
        })
    }

    /// Stream every row in timestamp order into `sink`. Returns rows visited.
    pub async fn for_each_snapshot<F>(&self, mut sink: F) -> StorageResult<u64>
    where
        F: FnMut(Snapshot) -> StorageResult<()>,
    {
        let sql = format!(
            "SELECT id, timestamp, {} FROM heating_data ORDER BY timestamp ASC, id ASC",
            reading_columns()
        );
        let mut rows = sqlx::query(&sql).fetch(&self.pool);
        let mut n = 0u64;
        while let Some(row) = rows.try_next().await? {
            match parse_snapshot_row(&row) {
                Ok(s) => {
                    sink(s)?;
                    n += 1;
                }
                Err(m) => tracing::warn!(%m, "skipping unreadable row during export"),
            }
        }
        Ok(n)
    }
}
