//! Concurrent media download.
//!
//! This module turns [`DownloadTask`]s into files on disk on a bounded worker
//! pool, consulting and updating the record ledger so re-runs skip finished
//! items.
//!
//! # Features
//!
//! - Streaming downloads through a buffer of the configured chunk size
//! - Per-task failure isolation (a failed item never aborts the batch)
//! - Retries through the shared [`crate::retry::RetryPolicy`]
//! - `{detail_id}_{caption}` file naming with `_{n}` suffixes for multi-file items
//! - Stop requests end submission without cancelling running tasks

mod client;
mod engine;
mod error;
pub mod filename;
mod item;

pub use client::FetchedFile;
pub use engine::{
    BatchReport, DEFAULT_CONCURRENCY, DownloadEngine, DownloadStats, EngineError, EngineOptions,
    MAX_CONCURRENCY,
};
pub use error::TaskError;
pub use item::{CoverFile, DownloadTask, SkipReason, TaskOutcome};
