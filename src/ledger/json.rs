//! JSON-file ledger backend.
//!
//! Rows live in a [`DashMap`] while the batch runs and are written out as a
//! single pretty-printed object on flush. The file is replaced via a
//! temporary sibling and a rename, so a crash mid-write leaves the previous
//! contents intact.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::{LedgerError, LedgerRow};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRow {
    fields: Map<String, Value>,
    download_status: String,
}

/// Ledger stored as `{ detail_id: { fields, download_status } }` in one file.
#[derive(Debug, Clone)]
pub struct JsonLedger {
    path: PathBuf,
    rows: Arc<DashMap<String, StoredRow>>,
    dirty: Arc<AtomicBool>,
}

impl JsonLedger {
    /// Loads the ledger at `path`; a missing file starts empty.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the file exists but cannot be read or parsed.
    pub async fn open(path: &Path) -> Result<Self, LedgerError> {
        let rows = DashMap::new();
        match tokio::fs::read_to_string(path).await {
            Ok(text) if text.trim().is_empty() => {}
            Ok(text) => {
                let stored: BTreeMap<String, StoredRow> =
                    serde_json::from_str(&text).map_err(|source| LedgerError::Json {
                        location: path.display().to_string(),
                        source,
                    })?;
                for (detail_id, row) in stored {
                    rows.insert(detail_id, row);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(LedgerError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }
        debug!(path = %path.display(), rows = rows.len(), "JSON ledger loaded");
        Ok(Self {
            path: path.to_path_buf(),
            rows: Arc::new(rows),
            dirty: Arc::new(AtomicBool::new(false)),
        })
    }

    pub(super) fn get(&self, detail_id: &str) -> Option<LedgerRow> {
        self.rows.get(detail_id).map(|entry| LedgerRow {
            detail_id: detail_id.to_string(),
            fields: entry.fields.clone(),
            download_status: entry.download_status.clone(),
        })
    }

    pub(super) fn update(&self, row: &LedgerRow) {
        self.rows.insert(
            row.detail_id.clone(),
            StoredRow {
                fields: row.fields.clone(),
                download_status: row.download_status.clone(),
            },
        );
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// Writes all rows to disk if anything changed since the last flush.
    pub(super) async fn flush(&self) -> Result<(), LedgerError> {
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let snapshot: BTreeMap<String, StoredRow> = self
            .rows
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        let mut text = serde_json::to_string_pretty(&snapshot).map_err(|source| LedgerError::Json {
            location: self.path.display().to_string(),
            source,
        })?;
        text.push('\n');

        let tmp = self.path.with_extension("json.tmp");
        let io_err = |source| LedgerError::Io {
            path: self.path.clone(),
            source,
        };
        if let Err(e) = tokio::fs::write(&tmp, text).await {
            self.dirty.store(true, Ordering::SeqCst);
            return Err(io_err(e));
        }
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            self.dirty.store(true, Ordering::SeqCst);
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_err(e));
        }
        debug!(path = %self.path.display(), rows = snapshot.len(), "JSON ledger flushed");
        Ok(())
    }
}
