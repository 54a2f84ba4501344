// Flat snapshot log: one comma-delimited record per line, no header row.
// Column order: timestamp, active, modulation, hours, starts, temp_out, temp_boiler,
// temp_hotwater, temp_hotwater_target, temp_heating, temp_solcollector, temp_solstorage,
// solar_production, solar_pump[, circulation_pump, dhw_pump].
//
// Schema versions are explicit: a `#schema=N` line applies to every record after it.
// Files written before markers existed carry none; their lines are read by width
// (14 columns = v1, 16 = v2). Bytes after the last newline belong to a write still in
// flight and are never parsed.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use csv::{QuoteStyle, ReaderBuilder, StringRecord, Trim, WriterBuilder};
use tokio::sync::Mutex;
use tracing::instrument;

use crate::error::{MalformedRecord, StorageError, StorageResult};
use crate::models::{Field, FieldKind, Snapshot, Window};

pub const SCHEMA_MARKER_PREFIX: &str = "#schema=";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlatSchema {
    /// Original 14-column layout, ends at `solar_pump`.
    V1,
    /// Adds `circulation_pump` and `dhw_pump`.
    V2,
}

impl FlatSchema {
    pub const CURRENT: FlatSchema = FlatSchema::V2;

    pub fn version(self) -> u32 {
        match self {
            FlatSchema::V1 => 1,
            FlatSchema::V2 => 2,
        }
    }

    pub fn from_version(version: u32) -> Option<Self> {
        match version {
            1 => Some(FlatSchema::V1),
            2 => Some(FlatSchema::V2),
            _ => None,
        }
    }

    /// Guess for unmarked legacy lines.
    pub fn from_width(columns: usize) -> Option<Self> {
        [FlatSchema::V1, FlatSchema::V2]
            .into_iter()
            .find(|s| s.columns() == columns)
    }

    /// Reading columns, in order, after `timestamp`.
    pub fn fields(self) -> &'static [Field] {
        match self {
            FlatSchema::V1 => &Field::ALL[..13],
            FlatSchema::V2 => &Field::ALL[..15],
        }
    }

    pub fn columns(self) -> usize {
        1 + self.fields().len()
    }

    pub fn marker(self) -> String {
        format!("{}{}", SCHEMA_MARKER_PREFIX, self.version())
    }
}

/// Result of reading a flat log. Order is file order.
#[derive(Debug, Default)]
pub struct FlatScan {
    pub records: Vec<Snapshot>,
    pub malformed: Vec<MalformedRecord>,
}

enum Declared {
    Unmarked,
    Known(FlatSchema),
    Unsupported(u32),
}

fn is_null_token(tok: &str) -> bool {
    matches!(tok, "" | "None" | "none" | "nan" | "NaN" | "null")
}

fn parse_timestamp(tok: &str) -> Result<i64, String> {
    if let Ok(ts) = tok.parse::<i64>() {
        return Ok(ts);
    }
    match tok.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 => Ok(v as i64),
        _ => Err(format!("invalid timestamp {tok:?}")),
    }
}

/// One reading token → numeric value (flags as 0/1), `None` for the null spellings.
pub fn parse_token(field: Field, tok: &str) -> Result<Option<f64>, String> {
    let tok = tok.trim();
    if is_null_token(tok) {
        return Ok(None);
    }
    match field.kind() {
        FieldKind::Flag => match tok {
            "0" | "0.0" | "false" | "False" => Ok(Some(0.0)),
            "1" | "1.0" | "true" | "True" => Ok(Some(1.0)),
            _ => Err(format!("invalid flag {tok:?} for {}", field.name())),
        },
        FieldKind::Counter => {
            if let Ok(v) = tok.parse::<i64>() {
                return Ok(Some(v as f64));
            }
            match tok.parse::<f64>() {
                Ok(v) if v.is_finite() && v.fract() == 0.0 => Ok(Some(v)),
                _ => Err(format!("invalid counter {tok:?} for {}", field.name())),
            }
        }
        FieldKind::Float => match tok.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(Some(v)),
            _ => Err(format!("invalid number {tok:?} for {}", field.name())),
        },
    }
}

fn parse_record(record: &StringRecord, declared: &Declared) -> Result<Snapshot, String> {
    let schema = match declared {
        Declared::Known(s) if record.len() == s.columns() => *s,
        Declared::Known(s) => {
            return Err(format!(
                "schema v{} expects {} columns, got {}",
                s.version(),
                s.columns(),
                record.len()
            ));
        }
        Declared::Unsupported(v) => return Err(format!("unsupported schema version {v}")),
        Declared::Unmarked => FlatSchema::from_width(record.len())
            .ok_or_else(|| format!("unexpected column count {}", record.len()))?,
    };

    let mut snapshot = Snapshot::empty(parse_timestamp(record[0].trim())?);
    for (i, field) in schema.fields().iter().enumerate() {
        snapshot.set_value(*field, parse_token(*field, &record[i + 1])?);
    }
    Ok(snapshot)
}

/// Parse a whole flat log. Never fails: unreadable lines land in `malformed`.
pub fn parse(bytes: &[u8]) -> FlatScan {
    let complete = match bytes.iter().rposition(|b| *b == b'\n') {
        Some(last) => &bytes[..=last],
        None => &bytes[..0],
    };

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .trim(Trim::All)
        .from_reader(complete);

    let mut scan = FlatScan::default();
    let mut declared = Declared::Unmarked;
    let mut record = StringRecord::new();
    loop {
        let line = reader.position().line();
        match reader.read_record(&mut record) {
            Ok(false) => break,
            Ok(true) => {}
            Err(e) => {
                scan.malformed.push(MalformedRecord::new(line, e.to_string()));
                continue;
            }
        }
        let line = record.position().map(|p| p.line()).unwrap_or(line);

        if record.len() == 1 && record[0].starts_with('#') {
            if let Some(v) = record[0].strip_prefix(SCHEMA_MARKER_PREFIX) {
                declared = match v.trim().parse::<u32>() {
                    Ok(n) => match FlatSchema::from_version(n) {
                        Some(s) => Declared::Known(s),
                        None => Declared::Unsupported(n),
                    },
                    Err(_) => {
                        scan.malformed
                            .push(MalformedRecord::new(line, "unreadable schema marker"));
                        declared
                    }
                };
            }
            continue;
        }

        match parse_record(&record, &declared) {
            Ok(s) => scan.records.push(s),
            Err(reason) => scan.malformed.push(MalformedRecord::new(line, reason)),
        }
    }
    scan
}

/// Flat-file spelling of one reading: empty for null, 0/1 for flags.
pub fn format_value(field: Field, value: Option<f64>) -> String {
    match (field.kind(), value) {
        (_, None) => String::new(),
        (FieldKind::Flag, Some(v)) if v != 0.0 => "1".to_string(),
        (FieldKind::Flag, Some(_)) => "0".to_string(),
        (FieldKind::Counter, Some(v)) => format!("{}", v as i64),
        (FieldKind::Float, Some(v)) => format!("{v}"),
    }
}

/// One complete line (with trailing newline) for `snapshot` in `schema` layout.
pub fn encode_record(snapshot: &Snapshot, schema: FlatSchema) -> StorageResult<Vec<u8>> {
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .quote_style(QuoteStyle::Never)
        .from_writer(Vec::with_capacity(128));
    let mut row = Vec::with_capacity(schema.columns());
    row.push(snapshot.timestamp.to_string());
    for field in schema.fields() {
        row.push(format_value(*field, snapshot.value(*field)));
    }
    writer.write_record(&row)?;
    writer
        .into_inner()
        .map_err(|e| StorageError::Io(e.into_error()))
}

/// Schema declared by the last marker in the file, `None` if unmarked or empty.
fn tail_schema(path: &Path) -> std::io::Result<Option<FlatSchema>> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut line = Vec::with_capacity(128);
    let mut last = None;
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        // Records may hold arbitrary bytes; only a clean marker line counts.
        let Some(v) = line.trim_ascii().strip_prefix(SCHEMA_MARKER_PREFIX.as_bytes()) else {
            continue;
        };
        last = std::str::from_utf8(v)
            .ok()
            .and_then(|v| v.trim().parse::<u32>().ok())
            .and_then(FlatSchema::from_version);
    }
    Ok(last)
}

/// Whether the file is non-empty and its last byte is not a newline.
fn has_torn_tail(path: &Path) -> std::io::Result<bool> {
    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

/// Append-only flat log on disk. Each append is one `write` of whole lines.
pub struct FlatFile {
    path: PathBuf,
    /// `Some(true)` once the tail is known to be marked with the current schema.
    tail_current: Mutex<Option<bool>>,
}

impl FlatFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            tail_current: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[instrument(skip(self, snapshot), fields(repo = "flat", operation = "append", timestamp = snapshot.timestamp))]
    pub async fn append(&self, snapshot: &Snapshot) -> StorageResult<()> {
        let mut tail_current = self.tail_current.lock().await;
        let record = encode_record(snapshot, FlatSchema::CURRENT)?;
        let path = self.path.clone();
        let known = *tail_current;

        tokio::task::spawn_blocking(move || -> StorageResult<()> {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)?;
            }
            let current = match known {
                Some(c) => c,
                None => tail_schema(&path)? == Some(FlatSchema::CURRENT),
            };
            let mut payload = Vec::with_capacity(record.len() + 16);
            if has_torn_tail(&path)? {
                // Terminate the fragment so it stays a single malformed line.
                payload.push(b'\n');
            }
            if !current {
                payload.extend_from_slice(FlatSchema::CURRENT.marker().as_bytes());
                payload.push(b'\n');
            }
            payload.extend_from_slice(&record);

            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
            file.write_all(&payload)?;
            file.sync_data()?;
            Ok(())
        })
        .await
        .map_err(|e| StorageError::Io(std::io::Error::other(e)))??;

        *tail_current = Some(true);
        Ok(())
    }

    /// Full scan. A missing file is an empty log.
    #[instrument(skip(self), fields(repo = "flat", operation = "read_all"))]
    pub async fn read_all(&self) -> StorageResult<FlatScan> {
        let path = self.path.clone();
        let bytes = tokio::task::spawn_blocking(move || match std::fs::read(&path) {
            Ok(b) => Ok(b),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        })
        .await
        .map_err(std::io::Error::other)??;
        Ok(parse(&bytes))
    }

    /// Records inside `window`, ascending by timestamp (stable for equal timestamps).
    pub async fn query(&self, window: Window) -> StorageResult<FlatScan> {
        if window.is_empty() {
            return Ok(FlatScan::default());
        }
        let mut scan = self.read_all().await?;
        scan.records.retain(|s| window.contains(s.timestamp));
        scan.records.sort_by_key(|s| s.timestamp);
        Ok(scan)
    }
}
