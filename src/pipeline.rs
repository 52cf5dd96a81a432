//! Batch orchestration: raw input to files on disk.
//!
//! One call to [`Pipeline::process_batch`] handles everything the user
//! submitted at once. Each input is resolved, each canonical link is parsed
//! and described, and the resulting tasks go to the download engine in a
//! single run. Inputs that fail along the way are reported as
//! [`InputSkip`]s; nothing that goes wrong with one input stops the others.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::Settings;
use crate::download::{
    BatchReport, DownloadEngine, DownloadTask, EngineError, EngineOptions, MAX_CONCURRENCY,
};
use crate::extract::{HtmlDetailExtractor, MetadataExtractor};
use crate::ledger::{Ledger, LedgerKind, LedgerRow};
use crate::link::{Examiner, LinkError, extract_params};
use crate::retry::RetryPolicy;
use crate::session::{RedirectProbe, Session};

/// Why an input or link produced no task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipKind {
    /// The input contained no reachable link.
    #[error("no extractable link")]
    NoLink,

    /// A canonical link had no usable detail id.
    #[error(transparent)]
    UnparseableUrl(LinkError),

    /// The detail page could not be described.
    #[error("no metadata for {url}")]
    NoMetadata {
        /// Canonical link.
        url: String,
    },

    /// Another link in the same batch already produced this item.
    #[error("duplicate of item {detail_id} in this batch")]
    Duplicate {
        /// Item id.
        detail_id: String,
    },
}

/// An input (or one of its links) that was dropped before download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSkip {
    /// The raw input the skip belongs to.
    pub input: String,
    /// Why it was dropped.
    pub kind: SkipKind,
}

/// Tasks built from one batch of inputs.
#[derive(Debug, Default)]
pub struct PreparedBatch {
    /// Tasks ready for the engine, in input order.
    pub tasks: Vec<DownloadTask>,
    /// Inputs and links that produced no task.
    pub skips: Vec<InputSkip>,
}

/// Result of [`Pipeline::process_batch`].
#[derive(Debug)]
pub struct BatchSummary {
    /// Dropped inputs and links.
    pub skips: Vec<InputSkip>,
    /// Engine report for the tasks that were built.
    pub report: BatchReport,
}

impl BatchSummary {
    /// True when at least one task failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.report.failed() > 0
    }
}

/// Sequences examiner, extractor, engine and ledger for each batch.
pub struct Pipeline {
    settings: Settings,
    session: Arc<Session>,
    probe: Arc<dyn RedirectProbe>,
    extractor: Arc<dyn MetadataExtractor>,
    engine: DownloadEngine,
    retry: RetryPolicy,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("settings", &self.settings)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Builds a pipeline over `session` with the default HTML extractor.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if the download engine cannot be created.
    pub fn new(settings: Settings, session: Arc<Session>) -> Result<Self, EngineError> {
        let retry = RetryPolicy::new(settings.max_retry);
        let workers = if settings.max_workers > MAX_CONCURRENCY {
            warn!(
                max_workers = settings.max_workers,
                limit = MAX_CONCURRENCY,
                "max_workers above limit, clamping"
            );
            MAX_CONCURRENCY
        } else {
            settings.max_workers
        };
        let engine = DownloadEngine::new(workers, retry.clone(), settings.chunk)?;
        let probe: Arc<dyn RedirectProbe> = session.clone();
        let extractor: Arc<dyn MetadataExtractor> =
            Arc::new(HtmlDetailExtractor::new(Arc::clone(&session), retry.clone()));
        Ok(Self {
            settings,
            session,
            probe,
            extractor,
            engine,
            retry,
        })
    }

    /// Replaces the redirect probe used by the examiner.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn RedirectProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Replaces the metadata extractor.
    #[must_use]
    pub fn with_extractor(mut self, extractor: Arc<dyn MetadataExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Settings this pipeline was built with.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Opens the ledger of `kind` when `enabled`; failures disable it for this batch.
    async fn open_ledger(&self, kind: LedgerKind, enabled: bool) -> Option<Ledger> {
        if !enabled {
            return None;
        }
        match Ledger::open_as(kind, self.settings.record_format, &self.settings.work_path).await {
            Ok(ledger) => Some(ledger),
            Err(e) => {
                warn!(error = %e, ledger = kind.file_stem(), "cannot open ledger, continuing without it");
                None
            }
        }
    }

    /// Resolves, parses and describes every input into download tasks.
    ///
    /// With a `ledger`, items it already records become pre-skipped tasks and
    /// their detail pages are never fetched.
    #[instrument(skip_all, fields(inputs = inputs.len()))]
    pub async fn prepare(&self, inputs: &[String], ledger: Option<&Ledger>) -> PreparedBatch {
        let examiner = Examiner::new(&*self.probe, self.session.cookie(), self.retry.clone());
        let root = self.settings.download_root();
        let mut batch = PreparedBatch::default();
        let mut seen = HashSet::new();

        for input in inputs {
            let resolution = examiner.resolve(input).await;
            if resolution.is_empty() {
                warn!(input = %input, "no extractable link in input");
                batch.skips.push(InputSkip {
                    input: input.clone(),
                    kind: SkipKind::NoLink,
                });
                continue;
            }

            for link in &resolution.links {
                let params = match extract_params(link) {
                    Ok(params) => params,
                    Err(e) => {
                        warn!(url = %link.url, error = %e, "skipping link");
                        batch.skips.push(InputSkip {
                            input: input.clone(),
                            kind: SkipKind::UnparseableUrl(e),
                        });
                        continue;
                    }
                };

                if !seen.insert(params.detail_id.clone()) {
                    debug!(detail_id = %params.detail_id, "item already in this batch");
                    batch.skips.push(InputSkip {
                        input: input.clone(),
                        kind: SkipKind::Duplicate {
                            detail_id: params.detail_id,
                        },
                    });
                    continue;
                }

                if let Some(ledger) = ledger {
                    if ledger.is_complete(&params.detail_id).await {
                        debug!(detail_id = %params.detail_id, "already recorded, not fetching metadata");
                        batch.tasks.push(
                            DownloadTask::new(&params.detail_id, Vec::new(), &root)
                                .with_already_recorded(true),
                        );
                        continue;
                    }
                }

                let Some(item) = self.extractor.extract(link, &params).await else {
                    warn!(url = %link.url, detail_id = %params.detail_id, "skipping item without metadata");
                    batch.skips.push(InputSkip {
                        input: input.clone(),
                        kind: SkipKind::NoMetadata {
                            url: link.url.clone(),
                        },
                    });
                    continue;
                };

                batch.tasks.push(DownloadTask::from_item(
                    &item,
                    &root,
                    self.settings.folder_mode,
                    self.settings.cover,
                ));
            }
        }

        info!(
            tasks = batch.tasks.len(),
            skips = batch.skips.len(),
            "batch prepared"
        );
        batch
    }

    /// Processes one batch of raw inputs end to end.
    ///
    /// The download record is opened once per batch and closed afterwards; the
    /// engine runs once for all tasks the batch produced. With `data_record`
    /// on, the metadata of every newly described item is written to the
    /// detail data record before downloading starts.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] only if the worker pool itself breaks.
    #[instrument(skip_all, fields(inputs = inputs.len()))]
    pub async fn process_batch(
        &self,
        inputs: &[String],
        options: EngineOptions,
    ) -> Result<BatchSummary, EngineError> {
        let ledger = self
            .open_ledger(LedgerKind::Download, self.settings.download_record)
            .await;
        let recorded_view = if options.force { None } else { ledger.as_ref() };
        let prepared = self.prepare(inputs, recorded_view).await;

        if let Some(data) = self.open_ledger(LedgerKind::Data, self.settings.data_record).await {
            record_metadata(&data, &prepared.tasks).await;
            if let Err(e) = data.close().await {
                warn!(error = %e, "failed to close detail data record");
            }
        }

        let report = self
            .engine
            .run(&self.session, prepared.tasks, ledger.as_ref(), options)
            .await;

        if let Some(ledger) = ledger {
            if let Err(e) = ledger.close().await {
                warn!(error = %e, "failed to close download record");
            }
        }

        Ok(BatchSummary {
            skips: prepared.skips,
            report: report?,
        })
    }
}

/// Writes the extracted metadata of every freshly described task.
async fn record_metadata(data: &Ledger, tasks: &[DownloadTask]) {
    for task in tasks.iter().filter(|t| !t.already_recorded) {
        let row = LedgerRow::extracted(task.detail_id.clone(), task.fields.clone());
        if let Err(e) = data.update(&row).await {
            warn!(detail_id = %task.detail_id, error = %e, "failed to record detail data");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::config::ProxySetting;
    use crate::error::RequestError;
    use crate::extract::DetailItem;
    use crate::ledger::RecordFormat;
    use crate::link::{DetailParameters, ResolvedLink};
    use crate::session::ProbeResponse;

    struct MapProbe(HashMap<String, String>);

    #[async_trait]
    impl RedirectProbe for MapProbe {
        async fn probe(&self, url: &str) -> Result<ProbeResponse, RequestError> {
            self.0
                .get(url)
                .map(|to| ProbeResponse {
                    final_url: to.clone(),
                    cookies: Vec::new(),
                })
                .ok_or_else(|| RequestError::http_status(url, 404))
        }
    }

    struct StaticExtractor;

    #[async_trait]
    impl MetadataExtractor for StaticExtractor {
        async fn extract(&self, link: &ResolvedLink, params: &DetailParameters) -> Option<DetailItem> {
            (params.detail_id != "nometa").then(|| DetailItem {
                detail_id: params.detail_id.clone(),
                user_id: params.user_id.clone(),
                author: "author".to_string(),
                caption: "caption".to_string(),
                timestamp: 0,
                cover: String::new(),
                download: vec!["http://127.0.0.1:9/a.mp4".to_string()],
                variant: link.variant,
            })
        }
    }

    /// Counts extractions, then behaves like [`StaticExtractor`].
    struct CountingExtractor(Arc<AtomicUsize>);

    #[async_trait]
    impl MetadataExtractor for CountingExtractor {
        async fn extract(&self, link: &ResolvedLink, params: &DetailParameters) -> Option<DetailItem> {
            self.0.fetch_add(1, Ordering::SeqCst);
            StaticExtractor.extract(link, params).await
        }
    }

    fn settings(dir: &TempDir) -> Settings {
        Settings {
            work_path: dir.path().to_path_buf(),
            max_retry: 0,
            ..Settings::default()
        }
    }

    fn pipeline_with(settings: Settings, routes: &[(&str, &str)]) -> Pipeline {
        let session = Arc::new(
            Session::with_options(Duration::from_secs(5), &ProxySetting::None, "").unwrap(),
        );
        let routes = routes
            .iter()
            .map(|(from, to)| ((*from).to_string(), (*to).to_string()))
            .collect();
        Pipeline::new(settings, session)
            .unwrap()
            .with_probe(Arc::new(MapProbe(routes)))
            .with_extractor(Arc::new(StaticExtractor))
    }

    fn pipeline(dir: &TempDir, routes: &[(&str, &str)]) -> Pipeline {
        pipeline_with(settings(dir), routes)
    }

    // ==================== Construction Tests ====================

    #[test]
    fn test_new_uses_session_as_default_probe() {
        let dir = TempDir::new().unwrap();
        let session = Arc::new(
            Session::with_options(Duration::from_secs(5), &ProxySetting::None, "").unwrap(),
        );
        let pipeline = Pipeline::new(settings(&dir), Arc::clone(&session)).unwrap();

        assert_eq!(
            Arc::as_ptr(&pipeline.probe).cast::<()>(),
            Arc::as_ptr(&session).cast::<()>()
        );
    }

    #[test]
    fn test_new_clamps_oversized_worker_pool() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline_with(
            Settings {
                max_workers: MAX_CONCURRENCY * 2,
                ..settings(&dir)
            },
            &[],
        );
        assert_eq!(pipeline.engine.concurrency(), MAX_CONCURRENCY);
    }

    // ==================== Prepare Tests ====================

    #[tokio::test]
    async fn test_prepare_valid_and_unparseable_inputs() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(
            &dir,
            &[(
                "https://v.kuaishou.com/abc123",
                "https://www.kuaishou.com/short-video/xyz789",
            )],
        );
        let inputs = vec![
            "check this out v.kuaishou.com/abc123".to_string(),
            "nothing to see here".to_string(),
        ];

        let batch = pipeline.prepare(&inputs, None).await;

        assert_eq!(batch.tasks.len(), 1);
        assert_eq!(batch.tasks[0].detail_id, "xyz789");
        assert_eq!(batch.skips.len(), 1);
        assert_eq!(batch.skips[0].kind, SkipKind::NoLink);
    }

    #[tokio::test]
    async fn test_prepare_reports_missing_metadata() {
        let dir = TempDir::new().unwrap();
        let url = "https://www.kuaishou.com/short-video/nometa";
        let pipeline = pipeline(&dir, &[(url, url)]);
        let inputs = vec![url.to_string()];

        let batch = pipeline.prepare(&inputs, None).await;

        assert!(batch.tasks.is_empty());
        assert!(matches!(batch.skips[0].kind, SkipKind::NoMetadata { .. }));
    }

    #[tokio::test]
    async fn test_prepare_drops_duplicate_items() {
        let dir = TempDir::new().unwrap();
        let url = "https://www.kuaishou.com/short-video/3xdup";
        let pipeline = pipeline(&dir, &[(url, url)]);

        let batch = pipeline
            .prepare(&[url.to_string(), url.to_string()], None)
            .await;

        assert_eq!(batch.tasks.len(), 1);
        assert!(matches!(
            &batch.skips[0].kind,
            SkipKind::Duplicate { detail_id } if detail_id == "3xdup"
        ));
    }

    #[tokio::test]
    async fn test_process_batch_without_links_runs_empty_batch() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir, &[]);

        let summary = pipeline
            .process_batch(&["just text".to_string()], EngineOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.skips.len(), 1);
        assert!(summary.report.outcomes.is_empty());
        assert!(!summary.has_failures());
    }

    // ==================== Ledger Tests ====================

    #[tokio::test]
    async fn test_prepare_recorded_item_skips_metadata_fetch() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::open(RecordFormat::Sqlite, dir.path()).await.unwrap();
        ledger
            .update(&LedgerRow::complete("3xrec", serde_json::Map::new()))
            .await
            .unwrap();

        let url = "https://www.kuaishou.com/short-video/3xrec";
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = pipeline(&dir, &[(url, url)])
            .with_extractor(Arc::new(CountingExtractor(Arc::clone(&calls))));

        let batch = pipeline.prepare(&[url.to_string()], Some(&ledger)).await;
        ledger.close().await.unwrap();

        assert_eq!(batch.tasks.len(), 1);
        assert!(batch.tasks[0].already_recorded);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_process_batch_writes_detail_data_record() {
        let dir = TempDir::new().unwrap();
        let url = "https://www.kuaishou.com/short-video/3xdata";
        let pipeline = pipeline_with(
            Settings {
                data_record: true,
                record_format: RecordFormat::Json,
                ..settings(&dir)
            },
            &[(url, url)],
        );

        pipeline
            .process_batch(&[url.to_string()], EngineOptions::default())
            .await
            .unwrap();

        let data = std::fs::read_to_string(dir.path().join("DetailData.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&data).unwrap();
        assert_eq!(value["3xdata"]["download_status"], "extracted");
        assert_eq!(value["3xdata"]["fields"]["caption"], "caption");
    }

    #[tokio::test]
    async fn test_process_batch_without_data_record_writes_no_data_file() {
        let dir = TempDir::new().unwrap();
        let url = "https://www.kuaishou.com/short-video/3xdata";
        let pipeline = pipeline(&dir, &[(url, url)]);

        pipeline
            .process_batch(&[url.to_string()], EngineOptions::default())
            .await
            .unwrap();

        assert!(!dir.path().join("DetailData.db").exists());
        assert!(!dir.path().join("DetailData.json").exists());
    }
}
