//! Record ledgers: persistent stores keyed by detail id.
//!
//! Two ledgers exist, distinguished by [`LedgerKind`]: the download record
//! (the dedup store consulted before fetching) and the optional detail data
//! record (the metadata of every described item). Each is a closed set of
//! storage backends selected by [`RecordFormat`]. Every backend offers the same capability set: open,
//! look up, upsert, commit and close. Writes are insert-or-update by
//! `detail_id`, so a key never has more than one row, and writes to different
//! keys never wait on each other beyond what the storage engine imposes.

mod json;
mod sqlite;

pub use json::JsonLedger;
pub use sqlite::SqliteLedger;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, instrument, warn};

/// Status written for items whose media all reached disk.
pub const STATUS_COMPLETE: &str = "complete";

/// Status of detail data rows.
pub const STATUS_EXTRACTED: &str = "extracted";

/// Which record a ledger holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerKind {
    /// Completed downloads; consulted to skip re-fetches.
    Download,
    /// Extracted item metadata.
    Data,
}

impl LedgerKind {
    /// File name without extension, under the work path.
    #[must_use]
    pub fn file_stem(self) -> &'static str {
        match self {
            Self::Download => "DownloadRecord",
            Self::Data => "DetailData",
        }
    }

    /// SQLite table holding the rows.
    #[must_use]
    pub fn table(self) -> &'static str {
        match self {
            Self::Download => "download_record",
            Self::Data => "detail_data",
        }
    }
}

/// Errors from ledger storage.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The SQLite ledger file could not be opened.
    #[error("cannot open ledger database {path}: {source}")]
    Open {
        /// Ledger file path.
        path: PathBuf,
        /// Underlying driver error.
        #[source]
        source: sqlx::Error,
    },

    /// The SQLite ledger schema could not be created or upgraded.
    #[error("cannot prepare schema of ledger database {path}: {source}")]
    Migrate {
        /// Ledger file path.
        path: PathBuf,
        /// Underlying migration error.
        #[source]
        source: sqlx::migrate::MigrateError,
    },

    /// A query against a ledger table failed.
    #[error("query on ledger table {table} failed: {source}")]
    Query {
        /// Table name.
        table: &'static str,
        /// Underlying driver error.
        #[source]
        source: sqlx::Error,
    },

    /// The ledger file could not be read or written.
    #[error("ledger file {path}: {source}")]
    Io {
        /// Ledger file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Stored row data is not valid JSON.
    #[error("ledger data in {location} is not valid JSON: {source}")]
    Json {
        /// File path or row key the data came from.
        location: String,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
}

/// Ledger storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordFormat {
    /// SQLite database file.
    #[default]
    Sqlite,
    /// Pretty-printed JSON file.
    Json,
}

impl RecordFormat {
    /// Parses a format name case-insensitively.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Some(Self::Sqlite),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    /// Canonical display name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "SQLite",
            Self::Json => "JSON",
        }
    }

    /// Path of the `kind` ledger file inside `dir`.
    #[must_use]
    pub fn file_path(self, kind: LedgerKind, dir: &Path) -> PathBuf {
        let extension = match self {
            Self::Sqlite => "db",
            Self::Json => "json",
        };
        dir.join(format!("{}.{extension}", kind.file_stem()))
    }
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRow {
    /// Row key.
    pub detail_id: String,
    /// Scalar item fields.
    pub fields: Map<String, Value>,
    /// Processing status, [`STATUS_COMPLETE`] once downloaded.
    pub download_status: String,
}

impl LedgerRow {
    /// Builds a completed row.
    #[must_use]
    pub fn complete(detail_id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            detail_id: detail_id.into(),
            fields,
            download_status: STATUS_COMPLETE.to_string(),
        }
    }

    /// Builds a detail data row.
    #[must_use]
    pub fn extracted(detail_id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            detail_id: detail_id.into(),
            fields,
            download_status: STATUS_EXTRACTED.to_string(),
        }
    }

    /// True when the row marks a finished download.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.download_status == STATUS_COMPLETE
    }
}

/// Open ledger handle; cheap to clone and share across download workers.
#[derive(Debug, Clone)]
pub enum Ledger {
    /// SQLite-backed ledger.
    Sqlite(SqliteLedger),
    /// JSON-file-backed ledger.
    Json(JsonLedger),
}

impl Ledger {
    /// Opens the download record of `format` inside `dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the storage cannot be opened.
    pub async fn open(format: RecordFormat, dir: &Path) -> Result<Self, LedgerError> {
        Self::open_as(LedgerKind::Download, format, dir).await
    }

    /// Opens the `kind` ledger of `format` inside `dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the storage cannot be opened.
    #[instrument(skip(dir), fields(dir = %dir.display()))]
    pub async fn open_as(
        kind: LedgerKind,
        format: RecordFormat,
        dir: &Path,
    ) -> Result<Self, LedgerError> {
        let path = format.file_path(kind, dir);
        let ledger = match format {
            RecordFormat::Sqlite => Self::Sqlite(SqliteLedger::open(&path, kind).await?),
            RecordFormat::Json => Self::Json(JsonLedger::open(&path).await?),
        };
        info!(format = format.as_str(), path = %path.display(), "ledger opened");
        Ok(ledger)
    }

    /// Looks up the row for `detail_id`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the lookup fails.
    pub async fn get(&self, detail_id: &str) -> Result<Option<LedgerRow>, LedgerError> {
        match self {
            Self::Sqlite(l) => l.get(detail_id).await,
            Self::Json(l) => Ok(l.get(detail_id)),
        }
    }

    /// True when `detail_id` has a completed row; lookup failures count as absent.
    pub async fn is_complete(&self, detail_id: &str) -> bool {
        match self.get(detail_id).await {
            Ok(row) => row.is_some_and(|r| r.is_complete()),
            Err(e) => {
                warn!(detail_id, error = %e, "ledger lookup failed, treating as not recorded");
                false
            }
        }
    }

    /// Inserts or replaces the row keyed by `row.detail_id`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the write fails.
    pub async fn update(&self, row: &LedgerRow) -> Result<(), LedgerError> {
        match self {
            Self::Sqlite(l) => l.update(row).await,
            Self::Json(l) => {
                l.update(row);
                Ok(())
            }
        }
    }

    /// Makes every update so far durable.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when flushing fails.
    pub async fn commit(&self) -> Result<(), LedgerError> {
        match self {
            Self::Sqlite(_) => Ok(()),
            Self::Json(l) => l.flush().await,
        }
    }

    /// Commits and releases the storage.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the final flush fails.
    pub async fn close(self) -> Result<(), LedgerError> {
        self.commit().await?;
        match self {
            Self::Sqlite(l) => l.close().await,
            Self::Json(_) => {}
        }
        Ok(())
    }
}
