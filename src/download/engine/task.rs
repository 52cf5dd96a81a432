use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::DownloadStats;
use crate::download::client::fetch_to_file;
use crate::download::error::TaskError;
use crate::download::filename::{cover_file_stem, find_existing, media_file_stem};
use crate::download::item::{DownloadTask, SkipReason, TaskOutcome};
use crate::ledger::{Ledger, LedgerRow};
use crate::retry::RetryPolicy;
use crate::session::Session;

/// Everything a spawned task needs; cloned once per task.
#[derive(Debug, Clone)]
pub(super) struct TaskContext {
    pub(super) session: Arc<Session>,
    pub(super) ledger: Option<Ledger>,
    pub(super) retry_policy: RetryPolicy,
    pub(super) chunk: usize,
    pub(super) force: bool,
    pub(super) stats: Arc<DownloadStats>,
}

/// Decrements the in-flight count when a fetching task ends, even by panic.
struct InFlightGuard<'a>(&'a DownloadStats);

impl<'a> InFlightGuard<'a> {
    fn enter(stats: &'a DownloadStats) -> Self {
        stats.enter_in_flight();
        Self(stats)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.leave_in_flight();
    }
}

pub(super) async fn process_download_task(ctx: TaskContext, task: DownloadTask) -> TaskOutcome {
    if !ctx.force && is_recorded(&ctx, &task).await {
        info!(detail_id = %task.detail_id, "already recorded, skipping download");
        ctx.stats.increment_skipped();
        return TaskOutcome::Skipped {
            detail_id: task.detail_id,
            reason: SkipReason::AlreadyRecorded,
        };
    }

    let result = {
        let _in_flight = InFlightGuard::enter(&ctx.stats);
        download_media(&ctx, &task).await
    };

    match result {
        Ok(media) => {
            record_success(&ctx, &task, &media.paths).await;
            if media.fetched == 0 {
                info!(detail_id = %task.detail_id, "all files already on disk");
                ctx.stats.increment_skipped();
                return TaskOutcome::Skipped {
                    detail_id: task.detail_id,
                    reason: SkipReason::AlreadyOnDisk,
                };
            }
            ctx.stats.increment_completed();
            info!(detail_id = %task.detail_id, files = media.paths.len(), fetched = media.fetched, "item downloaded");
            TaskOutcome::Downloaded {
                detail_id: task.detail_id,
                paths: media.paths,
            }
        }
        Err(error) => {
            warn!(detail_id = %task.detail_id, error = %error, "download task failed");
            ctx.stats.increment_failed();
            TaskOutcome::Failed {
                detail_id: task.detail_id,
                error,
            }
        }
    }
}

/// Files of one item that are on disk after the task.
struct MediaOnDisk {
    paths: Vec<PathBuf>,
    /// How many of them this task fetched.
    fetched: usize,
}

/// One file to put on disk.
struct MediaFile<'a> {
    url: &'a str,
    stem: String,
    extension: Option<&'static str>,
}

fn media_files(task: &DownloadTask) -> Vec<MediaFile<'_>> {
    let count = task.media_urls.len();
    let mut files: Vec<MediaFile<'_>> = task
        .media_urls
        .iter()
        .enumerate()
        .map(|(index, url)| MediaFile {
            url,
            stem: media_file_stem(&task.file_stem, index, count),
            extension: None,
        })
        .collect();
    if let Some(cover) = &task.cover {
        files.push(MediaFile {
            url: &cover.url,
            stem: cover_file_stem(&task.file_stem),
            extension: Some(cover.extension),
        });
    }
    files
}

async fn is_recorded(ctx: &TaskContext, task: &DownloadTask) -> bool {
    if task.already_recorded {
        return true;
    }
    match &ctx.ledger {
        Some(ledger) => ledger.is_complete(&task.detail_id).await,
        None => false,
    }
}

async fn download_media(ctx: &TaskContext, task: &DownloadTask) -> Result<MediaOnDisk, TaskError> {
    if task.media_urls.is_empty() {
        return Err(TaskError::NoMedia);
    }
    tokio::fs::create_dir_all(&task.destination_path)
        .await
        .map_err(|e| TaskError::destination(task.destination_path.clone(), e))?;

    // Without a download record every run fetches again.
    let reuse_existing = ctx.ledger.is_some() && !ctx.force;
    let files = media_files(task);
    let mut media = MediaOnDisk {
        paths: Vec::with_capacity(files.len()),
        fetched: 0,
    };
    for file in &files {
        if reuse_existing {
            if let Some(existing) = find_existing(&task.destination_path, &file.stem).await {
                debug!(path = %existing.display(), "media already on disk");
                media.paths.push(existing);
                continue;
            }
        }

        let session = &*ctx.session;
        let url = file.url;
        let dir = task.destination_path.as_path();
        let stem = file.stem.as_str();
        let (kind, chunk, extension) = (task.headers, ctx.chunk, file.extension);
        let result = ctx
            .retry_policy
            .run_with_error(url, move || {
                fetch_to_file(session, url, kind, dir, stem, chunk, extension)
            })
            .await;

        match result {
            Ok((fetched, attempts)) => {
                ctx.stats.add_retried(attempts.saturating_sub(1));
                media.paths.push(fetched.path);
                media.fetched += 1;
            }
            Err((error, attempts)) => {
                ctx.stats.add_retried(attempts.saturating_sub(1));
                return Err(TaskError::request(url, attempts, error));
            }
        }
    }
    Ok(media)
}

async fn record_success(ctx: &TaskContext, task: &DownloadTask, paths: &[PathBuf]) {
    let Some(ledger) = &ctx.ledger else {
        return;
    };
    let mut fields = task.fields.clone();
    let joined = paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" ");
    fields.insert("paths".to_string(), joined.into());

    // Best-effort: the media is on disk even if the row cannot be written.
    if let Err(e) = ledger
        .update(&LedgerRow::complete(task.detail_id.clone(), fields))
        .await
    {
        warn!(detail_id = %task.detail_id, error = %e, "failed to record download");
    }
}

pub(super) fn handle_task_join_error(
    detail_id: String,
    join_error: &tokio::task::JoinError,
    stats: &DownloadStats,
) -> TaskOutcome {
    warn!(detail_id = %detail_id, error = %join_error, "download task panicked");
    stats.increment_failed();
    TaskOutcome::Failed {
        detail_id,
        error: TaskError::Panicked {
            message: join_error.to_string(),
        },
    }
}
