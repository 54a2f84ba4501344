// Error taxonomy for the collection pipeline.
// Device failures are always retryable; storage failures drop one cycle's snapshot;
// malformed stored records are skipped and counted by the reader that hit them.

/// Failure to obtain a snapshot from the boiler. Retried on the next cycle.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("network failure: {0}")]
    Network(String),

    /// The appliance does not expose a required feature.
    #[error("missing device feature: {0}")]
    MissingFeature(String),

    #[error("invalid device payload: {0}")]
    InvalidPayload(String),

    #[error("device poll timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl DeviceError {
    /// Short label for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DeviceError::Auth(_) => "auth",
            DeviceError::Network(_) => "network",
            DeviceError::MissingFeature(_) => "missing_feature",
            DeviceError::InvalidPayload(_) => "invalid_payload",
            DeviceError::Timeout(_) => "timeout",
        }
    }
}

/// Failure to read or write durable state.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),

    /// Neither representation is configured or reachable for this operation.
    #[error("storage unavailable: {0}")]
    Unavailable(&'static str),
}

impl StorageError {
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::Sqlite(_) => "sqlite",
            StorageError::Io(_) => "io",
            StorageError::Csv(_) => "csv",
            StorageError::Encode(_) => "encode",
            StorageError::Unavailable(_) => "unavailable",
        }
    }
}

/// A stored record that could not be parsed. Never fatal to a query or import.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed record at {location}: {reason}")]
pub struct MalformedRecord {
    /// 1-based line in a flat file, or row id in SQLite.
    pub location: u64,
    pub reason: String,
}

impl MalformedRecord {
    pub fn new(location: u64, reason: impl Into<String>) -> Self {
        Self {
            location,
            reason: reason.into(),
        }
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
