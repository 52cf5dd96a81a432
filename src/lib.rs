//! Kuaishou Downloader Core Library
//!
//! This library resolves pasted share links into canonical detail URLs,
//! describes the referenced media items and downloads their files on a
//! bounded worker pool, recording finished items so re-runs skip them.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`retry`] - Bounded retry and error capture for every network call
//! - [`session`] - Shared HTTP client, header bundles and write-once session cookie
//! - [`link`] - Link examiner and detail-parameter extraction
//! - [`extract`] - Metadata extraction from detail pages
//! - [`download`] - Concurrent streaming download engine
//! - [`ledger`] - Download and detail data records (SQLite or JSON)
//! - [`pipeline`] - Batch orchestration from raw input to files on disk
//! - [`config`] - Settings file loading and validation

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod download;
pub mod error;
pub mod extract;
pub mod ledger;
pub mod link;
pub mod pipeline;
pub mod retry;
pub mod session;
#[cfg(test)]
pub mod test_support;
pub(crate) mod user_agent;

// Re-export commonly used types
pub use config::{ConfigError, CoverFormat, ProxySetting, Settings};
pub use download::{
    BatchReport, CoverFile, DEFAULT_CONCURRENCY, DownloadEngine, DownloadStats, DownloadTask,
    EngineError, EngineOptions, SkipReason, TaskError, TaskOutcome,
};
pub use error::RequestError;
pub use extract::{DetailItem, HtmlDetailExtractor, MetadataExtractor};
pub use ledger::{Ledger, LedgerError, LedgerKind, LedgerRow, RecordFormat};
pub use link::{DetailParameters, Examiner, LinkError, Resolution, ResolvedLink, Variant};
pub use pipeline::{BatchSummary, InputSkip, Pipeline, SkipKind};
pub use retry::{DEFAULT_MAX_RETRY, FailureType, RetryDecision, RetryPolicy, classify_error};
pub use session::{
    HeaderKind, ProbeResponse, RedirectProbe, Session, SessionCookie, SessionError,
};
