//! Download tasks and their per-task outcomes.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use super::error::TaskError;
use super::filename::{item_file_stem, sanitize_filename_component};
use crate::config::CoverFormat;
use crate::extract::DetailItem;
use crate::session::HeaderKind;

/// One item to download.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    /// Unique item id; the ledger key.
    pub detail_id: String,
    /// Media URLs in download order.
    pub media_urls: Vec<String>,
    /// Cover image, fetched after the media.
    pub cover: Option<CoverFile>,
    /// Directory the media files are written into.
    pub destination_path: PathBuf,
    /// Stem shared by the item's files.
    pub file_stem: String,
    /// Known complete before the batch started.
    pub already_recorded: bool,
    /// Header bundle for media requests.
    pub headers: HeaderKind,
    /// Scalar item fields written to the ledger on success.
    pub fields: Map<String, Value>,
}

impl DownloadTask {
    /// Builds a task for `item` under `root`; `folder_mode` nests it in its own folder.
    ///
    /// The item's cover joins the task when `cover` is enabled and the item has one.
    #[must_use]
    pub fn from_item(item: &DetailItem, root: &Path, folder_mode: bool, cover: CoverFormat) -> Self {
        let file_stem = item_file_stem(&item.detail_id, &item.caption);
        let destination_path = if folder_mode {
            root.join(&file_stem)
        } else {
            root.to_path_buf()
        };
        let cover = cover
            .extension()
            .filter(|_| !item.cover.is_empty())
            .map(|extension| CoverFile {
                url: item.cover.clone(),
                extension,
            });
        Self {
            detail_id: item.detail_id.clone(),
            media_urls: item.download.clone(),
            cover,
            destination_path,
            file_stem,
            already_recorded: false,
            headers: item.variant.page_headers(),
            fields: item.to_fields(),
        }
    }

    /// Marks the task as recorded before the batch started.
    #[must_use]
    pub fn with_already_recorded(mut self, recorded: bool) -> Self {
        self.already_recorded = recorded;
        self
    }

    /// Minimal task for callers that only have URLs.
    #[must_use]
    pub fn new(detail_id: &str, media_urls: Vec<String>, destination_path: &Path) -> Self {
        let id = sanitize_filename_component(detail_id);
        Self {
            detail_id: detail_id.to_string(),
            media_urls,
            cover: None,
            destination_path: destination_path.to_path_buf(),
            file_stem: if id.is_empty() { "download".to_string() } else { id },
            already_recorded: false,
            headers: HeaderKind::Pc,
            fields: Map::new(),
        }
    }
}

/// Cover image of an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverFile {
    /// Image URL.
    pub url: String,
    /// Extension the file is saved with, leading dot included.
    pub extension: &'static str,
}

/// Why a task was skipped without fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The ledger already holds a completed row for the item.
    AlreadyRecorded,
    /// Every file was already on disk; the ledger now records the item.
    AlreadyOnDisk,
}

/// Result of one task, reported in completion order.
#[derive(Debug)]
pub enum TaskOutcome {
    /// Every media file is on disk.
    Downloaded {
        /// Item id.
        detail_id: String,
        /// Files written (or already present).
        paths: Vec<PathBuf>,
    },
    /// Nothing was fetched.
    Skipped {
        /// Item id.
        detail_id: String,
        /// Why.
        reason: SkipReason,
    },
    /// The task failed; siblings were unaffected.
    Failed {
        /// Item id.
        detail_id: String,
        /// What went wrong.
        error: TaskError,
    },
    /// A stop was requested before the task was submitted.
    NotStarted {
        /// Item id.
        detail_id: String,
    },
}

impl TaskOutcome {
    /// The item id this outcome belongs to.
    #[must_use]
    pub fn detail_id(&self) -> &str {
        match self {
            Self::Downloaded { detail_id, .. }
            | Self::Skipped { detail_id, .. }
            | Self::Failed { detail_id, .. }
            | Self::NotStarted { detail_id } => detail_id,
        }
    }

    /// True for [`TaskOutcome::Failed`].
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}
