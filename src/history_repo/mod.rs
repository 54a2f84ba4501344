// Snapshot history: one contract over two representations.
// SQLite is primary and authoritative once it holds any row. The flat log is the
// fallback: written when SQLite is unavailable or fails, read when SQLite is
// unavailable, failing, or still empty. The two are never kept in sync; import()
// folds a flat log into SQLite, inserting only timestamps it does not have yet.

mod blob;
pub mod flat;
pub mod sqlite;

use std::collections::HashSet;
use std::path::Path;

use tracing::instrument;

use crate::error::{StorageError, StorageResult};
use crate::models::{Field, Snapshot, Window};
pub use flat::{FlatFile, FlatScan, FlatSchema};
pub use sqlite::{RawPayload, SqliteStore, StoreInfo};

/// Where a query was answered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuerySource {
    Primary,
    Flat,
    /// Nothing configured holds data.
    Nothing,
}

#[derive(Debug)]
pub struct QueryReport {
    pub records: Vec<Snapshot>,
    /// Stored records skipped because they could not be parsed.
    pub malformed: usize,
    pub source: QuerySource,
}

/// Counts from one import run. `total` includes malformed lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub total: u64,
    pub imported: u64,
    pub malformed: u64,
}

pub struct HistoryRepo {
    primary: Option<SqliteStore>,
    flat: Option<FlatFile>,
}

impl HistoryRepo {
    pub fn new(primary: Option<SqliteStore>, flat: Option<FlatFile>) -> Self {
        Self { primary, flat }
    }

    /// Open both representations. A primary that cannot be opened degrades to flat-only
    /// when a flat path is configured.
    pub async fn open(
        db_path: &str,
        max_pool_size: u32,
        flat_path: Option<&Path>,
    ) -> StorageResult<Self> {
        let flat = flat_path.map(FlatFile::new);
        let primary = match SqliteStore::connect(db_path, max_pool_size).await {
            Ok(store) => match store.init().await {
                Ok(()) => Some(store),
                Err(e) if flat.is_some() => {
                    tracing::warn!(error = %e, path = db_path, "sqlite init failed; using flat file only");
                    None
                }
                Err(e) => return Err(e),
            },
            Err(e) if flat.is_some() => {
                tracing::warn!(error = %e, path = db_path, "sqlite unavailable; using flat file only");
                None
            }
            Err(e) => return Err(e),
        };
        Ok(Self { primary, flat })
    }

    pub fn primary(&self) -> Option<&SqliteStore> {
        self.primary.as_ref()
    }

    /// Durably record one snapshot. Partial snapshots are stored as-is.
    #[instrument(skip(self, snapshot), fields(repo = "history", operation = "append", timestamp = snapshot.timestamp))]
    pub async fn append(&self, snapshot: &Snapshot) -> StorageResult<()> {
        if let Some(primary) = &self.primary {
            match primary.append(snapshot).await {
                Ok(()) => return Ok(()),
                Err(e) if self.flat.is_some() => {
                    tracing::warn!(error = %e, "sqlite append failed; writing to flat file");
                }
                Err(e) => return Err(e),
            }
        }
        match &self.flat {
            Some(flat) => flat.append(snapshot).await,
            None => Err(StorageError::Unavailable("no snapshot store configured")),
        }
    }

    /// Keep the device's raw payload for forensic replay. Returns false when there is
    /// nowhere to keep it (flat-only mode).
    pub async fn append_raw(
        &self,
        timestamp: i64,
        payload: &serde_json::Value,
    ) -> StorageResult<bool> {
        match &self.primary {
            Some(primary) => {
                primary.append_raw(timestamp, payload).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// All snapshots with `since <= timestamp <= until`, ascending. Duplicates kept.
    pub async fn query(&self, since: i64, until: i64) -> StorageResult<Vec<Snapshot>> {
        Ok(self.query_report(Window::new(since, until)).await?.records)
    }

    #[instrument(skip(self), fields(repo = "history", operation = "query"))]
    pub async fn query_report(&self, window: Window) -> StorageResult<QueryReport> {
        if window.is_empty() {
            return Ok(QueryReport {
                records: Vec::new(),
                malformed: 0,
                source: QuerySource::Nothing,
            });
        }

        let mut primary_err = None;
        if let Some(primary) = &self.primary {
            match primary.is_populated().await {
                Ok(true) => match primary.query(window).await {
                    Ok((records, malformed)) => {
                        for m in &malformed {
                            tracing::warn!(%m, "skipping unreadable sqlite row");
                        }
                        return Ok(QueryReport {
                            records,
                            malformed: malformed.len(),
                            source: QuerySource::Primary,
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "sqlite query failed; consulting flat file");
                        primary_err = Some(e);
                    }
                },
                Ok(false) => tracing::debug!("sqlite store empty; consulting flat file"),
                Err(e) => {
                    tracing::warn!(error = %e, "sqlite unavailable; consulting flat file");
                    primary_err = Some(e);
                }
            }
        }

        match (&self.flat, primary_err) {
            (Some(flat), _) => {
                let scan = flat.query(window).await?;
                if !scan.malformed.is_empty() {
                    tracing::warn!(
                        malformed = scan.malformed.len(),
                        path = %flat.path().display(),
                        "skipped unreadable flat-file lines"
                    );
                }
                let source = if scan.records.is_empty() {
                    QuerySource::Nothing
                } else {
                    QuerySource::Flat
                };
                Ok(QueryReport {
                    records: scan.records,
                    malformed: scan.malformed.len(),
                    source,
                })
            }
            (None, Some(e)) => Err(e),
            (None, None) => Ok(QueryReport {
                records: Vec::new(),
                malformed: 0,
                source: QuerySource::Nothing,
            }),
        }
    }

    /// Fold a flat log into SQLite, skipping timestamps already present (including
    /// repeats inside `source`). Running it twice imports nothing the second time.
    #[instrument(skip(self, source), fields(repo = "history", operation = "import", source = %source.display()))]
    pub async fn import_batch(&self, source: &Path) -> StorageResult<ImportReport> {
        let Some(primary) = &self.primary else {
            return Err(StorageError::Unavailable("import requires the sqlite store"));
        };

        let scan = FlatFile::new(source).read_all().await?;
        for m in &scan.malformed {
            tracing::debug!(%m, "skipping unreadable line");
        }
        let mut seen: HashSet<i64> = primary.existing_timestamps().await?;
        let fresh: Vec<Snapshot> = scan
            .records
            .iter()
            .filter(|s| seen.insert(s.timestamp))
            .cloned()
            .collect();

        let imported = primary.insert_batch(&fresh).await?;
        let report = ImportReport {
            total: (scan.records.len() + scan.malformed.len()) as u64,
            imported,
            malformed: scan.malformed.len() as u64,
        };
        tracing::info!(
            total = report.total,
            imported = report.imported,
            malformed = report.malformed,
            "flat file import complete"
        );
        if report.imported == 0 {
            tracing::info!("no new rows; every timestamp was already stored");
        }
        Ok(report)
    }

    /// Most recent snapshot by timestamp, from whichever representation is authoritative.
    pub async fn latest(&self) -> StorageResult<Option<Snapshot>> {
        if let Some(primary) = &self.primary {
            match primary.is_populated().await {
                Ok(true) => return primary.latest().await,
                Ok(false) => {}
                Err(e) if self.flat.is_some() => {
                    tracing::warn!(error = %e, "sqlite unavailable; reading flat file");
                }
                Err(e) => return Err(e),
            }
        }
        let Some(flat) = &self.flat else {
            return Ok(None);
        };
        let scan = flat.read_all().await?;
        // Last in file order among equal maxima, i.e. the newest write.
        Ok(scan
            .records
            .into_iter()
            .fold(None, |best: Option<Snapshot>, s| match best {
                Some(b) if b.timestamp > s.timestamp => Some(b),
                _ => Some(s),
            }))
    }

    pub async fn info(&self) -> StorageResult<StoreInfo> {
        match &self.primary {
            Some(primary) => primary.info().await,
            None => Err(StorageError::Unavailable("info requires the sqlite store")),
        }
    }

    /// Write every stored snapshot as CSV with a header row and a local `datetime` column.
    #[instrument(skip(self, output), fields(repo = "history", operation = "export", output = %output.display()))]
    pub async fn export_csv(&self, output: &Path) -> StorageResult<u64> {
        let Some(primary) = &self.primary else {
            return Err(StorageError::Unavailable("export requires the sqlite store"));
        };
        // Rows stream from the pool; the file is written on a blocking thread.
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Snapshot>();
        let path = output.to_path_buf();
        let writer_task = tokio::task::spawn_blocking(move || -> StorageResult<()> {
            let mut writer = csv::Writer::from_path(&path)?;
            let mut header = vec!["timestamp", "datetime"];
            header.extend(Field::ALL.iter().map(|f| f.name()));
            writer.write_record(&header)?;
            while let Some(s) = rx.blocking_recv() {
                let mut row = vec![s.timestamp.to_string(), sqlite::format_datetime(s.timestamp)];
                row.extend(Field::ALL.iter().map(|f| flat::format_value(*f, s.value(*f))));
                writer.write_record(&row)?;
            }
            writer.flush()?;
            Ok(())
        });

        let streamed = primary
            .for_each_snapshot(|s| {
                tx.send(s)
                    .map_err(|_| StorageError::Io(std::io::Error::other("export writer stopped")))
            })
            .await;
        drop(tx);
        // A writer failure explains a closed channel, so it is reported first.
        writer_task
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))??;
        streamed
    }
}
