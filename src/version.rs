// Build-time version from Cargo.toml

/// Package version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name (from Cargo.toml).
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Highest flat-file layout and SQLite schema this build writes, for `/version`.
pub fn storage_versions() -> (u32, i64) {
    (
        crate::history_repo::flat::FlatSchema::CURRENT.version(),
        crate::history_repo::sqlite::HEATING_SCHEMA_VERSION,
    )
}
