//! SQLite ledger backend.
//!
//! Each ledger file is opened in WAL mode with a busy timeout, so readers
//! never wait on the writer and concurrent upserts to different keys queue
//! inside SQLite instead of failing with `SQLITE_BUSY`. The schema comes from
//! the embedded migrations; every ledger file carries all ledger tables and
//! uses the one its [`LedgerKind`] names.

use std::path::Path;
use std::time::Duration;

use serde_json::{Map, Value};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::{debug, instrument};

use super::{LedgerError, LedgerKind, LedgerRow};

/// SQLite locks the whole file, so a handful of connections is plenty.
const MAX_CONNECTIONS: u32 = 5;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Ledger stored in one table of a SQLite file.
#[derive(Debug, Clone)]
pub struct SqliteLedger {
    pool: SqlitePool,
    table: &'static str,
}

impl SqliteLedger {
    /// Opens (creating if needed) the ledger file at `path` for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Open`] when the file cannot be opened and
    /// [`LedgerError::Migrate`] when the schema cannot be applied.
    #[instrument(skip(path), fields(path = %path.display()))]
    pub async fn open(path: &Path, kind: LedgerKind) -> Result<Self, LedgerError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(|source| LedgerError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|source| LedgerError::Migrate {
                path: path.to_path_buf(),
                source,
            })?;

        debug!(table = kind.table(), "SQLite ledger ready");
        Ok(Self {
            pool,
            table: kind.table(),
        })
    }

    fn query_error(&self) -> impl Fn(sqlx::Error) -> LedgerError + '_ {
        move |source| LedgerError::Query {
            table: self.table,
            source,
        }
    }

    pub(super) async fn get(&self, detail_id: &str) -> Result<Option<LedgerRow>, LedgerError> {
        let sql = format!(
            "SELECT detail_id, fields, download_status FROM {} WHERE detail_id = ?",
            self.table
        );
        let row = sqlx::query(&sql)
            .bind(detail_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(self.query_error())?;

        let Some(row) = row else {
            return Ok(None);
        };
        let raw: String = row.try_get("fields").map_err(self.query_error())?;
        let fields: Map<String, Value> =
            serde_json::from_str(&raw).map_err(|source| LedgerError::Json {
                location: format!("{}[{detail_id}]", self.table),
                source,
            })?;
        Ok(Some(LedgerRow {
            detail_id: row.try_get("detail_id").map_err(self.query_error())?,
            fields,
            download_status: row.try_get("download_status").map_err(self.query_error())?,
        }))
    }

    pub(super) async fn update(&self, row: &LedgerRow) -> Result<(), LedgerError> {
        let fields = Value::Object(row.fields.clone()).to_string();
        let sql = format!(
            r"INSERT INTO {} (detail_id, fields, download_status)
              VALUES (?, ?, ?)
              ON CONFLICT(detail_id) DO UPDATE SET
                  fields = excluded.fields,
                  download_status = excluded.download_status,
                  updated_at = datetime('now')",
            self.table
        );
        sqlx::query(&sql)
            .bind(&row.detail_id)
            .bind(fields)
            .bind(&row.download_status)
            .execute(&self.pool)
            .await
            .map_err(self.query_error())?;
        debug!(table = self.table, detail_id = %row.detail_id, status = %row.download_status, "ledger row written");
        Ok(())
    }

    pub(super) async fn close(self) {
        self.pool.close().await;
    }
}
