//! Integration tests for the download engine.
//!
//! These tests run DownloadEngine against a mock HTTP server with real ledgers
//! on disk, covering the worker-pool bound, ledger idempotence, per-task
//! failure isolation and retries.

use std::sync::atomic::Ordering;
use std::time::Duration;

use ks_downloader_core::{
    CoverFile, DownloadEngine, DownloadTask, EngineOptions, Ledger, RecordFormat, RetryPolicy,
    TaskError, TaskOutcome,
};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

mod support;
use support::socket_guard::start_mock_server_or_skip;
use support::{FlakyResponder, test_session};

macro_rules! require_mock_server {
    () => {{
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return Ok(());
        };
        mock_server
    }};
}

/// Engine with no retries and a small chunk.
fn create_engine(concurrency: usize) -> DownloadEngine {
    DownloadEngine::new(concurrency, RetryPolicy::new(0), 8 * 1024).expect("valid concurrency")
}

// ==================== Concurrency Tests ====================

#[tokio::test]
async fn test_engine_never_exceeds_worker_pool() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"clip".to_vec())
                .set_delay(Duration::from_millis(150)),
        )
        .mount(&mock_server)
        .await;

    let dir = TempDir::new()?;
    let tasks = (0..8)
        .map(|i| {
            DownloadTask::new(
                &format!("item{i}"),
                vec![format!("{}/media/{i}.mp4", mock_server.uri())],
                dir.path(),
            )
        })
        .collect();

    let engine = create_engine(2);
    let report = engine
        .run(&test_session(), tasks, None, EngineOptions::default())
        .await?;

    assert_eq!(report.downloaded(), 8);
    assert!(report.stats.peak_in_flight() <= 2, "peak {}", report.stats.peak_in_flight());
    assert!(report.stats.peak_in_flight() >= 1);
    assert_eq!(report.stats.in_flight(), 0);
    Ok(())
}

// ==================== Ledger Tests ====================

#[tokio::test]
async fn test_rerun_of_recorded_item_fetches_nothing() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/media/a.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"video".to_vec()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new()?;
    let out = dir.path().join("Download");
    let url = format!("{}/media/a.mp4", mock_server.uri());
    let engine = create_engine(4);

    let ledger = Ledger::open(RecordFormat::Sqlite, dir.path()).await?;
    let first = engine
        .run(
            &test_session(),
            vec![DownloadTask::new("3xabc", vec![url.clone()], &out)],
            Some(&ledger),
            EngineOptions::default(),
        )
        .await?;
    assert_eq!(first.downloaded(), 1);
    ledger.close().await?;

    // Remove the file so only the ledger can prevent a second fetch.
    std::fs::remove_file(out.join("3xabc.mp4"))?;

    let ledger = Ledger::open(RecordFormat::Sqlite, dir.path()).await?;
    let second = engine
        .run(
            &test_session(),
            vec![DownloadTask::new("3xabc", vec![url], &out)],
            Some(&ledger),
            EngineOptions::default(),
        )
        .await?;
    ledger.close().await?;

    assert_eq!(second.skipped(), 1);
    assert_eq!(second.downloaded(), 0);
    Ok(())
}

#[tokio::test]
async fn test_without_ledger_every_run_fetches() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"video".to_vec()))
        .expect(2)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new()?;
    let url = format!("{}/media/a.mp4", mock_server.uri());
    let engine = create_engine(4);

    // Same folder both times: a file left by the first run must not count.
    for _ in 0..2 {
        let report = engine
            .run(
                &test_session(),
                vec![DownloadTask::new("3xabc", vec![url.clone()], dir.path())],
                None,
                EngineOptions::default(),
            )
            .await?;
        assert_eq!(report.downloaded(), 1);
        assert_eq!(report.skipped(), 0);
    }
    assert_eq!(std::fs::read(dir.path().join("3xabc.mp4"))?, b"video");
    Ok(())
}

// ==================== Failure Isolation Tests ====================

#[tokio::test]
async fn test_failed_task_does_not_block_siblings() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/media/ok.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/media/broken.mp4"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new()?;
    let tasks = vec![
        DownloadTask::new(
            "broken",
            vec![format!("{}/media/broken.mp4", mock_server.uri())],
            dir.path(),
        ),
        DownloadTask::new(
            "ok",
            vec![format!("{}/media/ok.mp4", mock_server.uri())],
            dir.path(),
        ),
    ];
    let engine = DownloadEngine::new(2, RetryPolicy::new(1), 8 * 1024)?;

    let report = engine
        .run(&test_session(), tasks, None, EngineOptions::default())
        .await?;

    assert_eq!(report.downloaded(), 1);
    assert_eq!(report.failed(), 1);
    let failure = report
        .outcomes
        .iter()
        .find(|o| o.detail_id() == "broken")
        .expect("broken task reported");
    assert!(matches!(
        failure,
        TaskOutcome::Failed {
            error: TaskError::Request { attempts: 2, .. },
            ..
        }
    ));
    assert!(dir.path().join("ok.mp4").exists());
    assert!(!dir.path().join("broken.mp4.part").exists());
    Ok(())
}

#[tokio::test]
async fn test_uncreatable_destination_fails_only_its_task() -> Result<(), Box<dyn std::error::Error>>
{
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
        .mount(&mock_server)
        .await;

    let dir = TempDir::new()?;
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory")?;
    let tasks = vec![
        DownloadTask::new(
            "blocked",
            vec![format!("{}/media/a.mp4", mock_server.uri())],
            &blocker.join("nested"),
        ),
        DownloadTask::new(
            "fine",
            vec![format!("{}/media/b.mp4", mock_server.uri())],
            dir.path(),
        ),
    ];

    let report = create_engine(2)
        .run(&test_session(), tasks, None, EngineOptions::default())
        .await?;

    assert_eq!(report.downloaded(), 1);
    let blocked = report
        .outcomes
        .iter()
        .find(|o| o.detail_id() == "blocked")
        .expect("blocked task reported");
    assert!(matches!(
        blocked,
        TaskOutcome::Failed {
            error: TaskError::Destination { .. },
            ..
        }
    ));
    Ok(())
}

// ==================== Retry Tests ====================

#[tokio::test]
async fn test_fetch_succeeds_on_third_attempt() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    let (responder, request_count) = FlakyResponder::new(2, b"finally");
    Mock::given(method("GET"))
        .and(path("/media/flaky.mp4"))
        .respond_with(responder)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new()?;
    let engine = DownloadEngine::new(1, RetryPolicy::new(2), 8 * 1024)?;
    let report = engine
        .run(
            &test_session(),
            vec![DownloadTask::new(
                "flaky",
                vec![format!("{}/media/flaky.mp4", mock_server.uri())],
                dir.path(),
            )],
            None,
            EngineOptions::default(),
        )
        .await?;

    assert_eq!(report.downloaded(), 1);
    assert_eq!(request_count.load(Ordering::SeqCst), 3);
    assert_eq!(report.stats.retried(), 2);
    assert_eq!(std::fs::read(dir.path().join("flaky.mp4"))?, b"finally");
    Ok(())
}

#[tokio::test]
async fn test_existing_media_file_is_not_refetched() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"new".to_vec()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new()?;
    let out = dir.path().join("Download");
    std::fs::create_dir(&out)?;
    std::fs::write(out.join("atlas_1.jpg"), b"old")?;
    let urls = vec![
        format!("{}/media/1.jpg", mock_server.uri()),
        format!("{}/media/2.jpg", mock_server.uri()),
    ];

    let ledger = Ledger::open(RecordFormat::Json, dir.path()).await?;
    let report = create_engine(2)
        .run(
            &test_session(),
            vec![DownloadTask::new("atlas", urls, &out)],
            Some(&ledger),
            EngineOptions::default(),
        )
        .await?;
    ledger.close().await?;

    assert_eq!(report.downloaded(), 1);
    assert_eq!(std::fs::read(out.join("atlas_1.jpg"))?, b"old");
    assert_eq!(std::fs::read(out.join("atlas_2.jpg"))?, b"new");
    Ok(())
}

// ==================== Cover Tests ====================

#[tokio::test]
async fn test_cover_is_saved_with_configured_extension() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/media/clip.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"video".to_vec()))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cover/c.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"cover".to_vec()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new()?;
    let mut task = DownloadTask::new(
        "3xabc",
        vec![format!("{}/media/clip.mp4", mock_server.uri())],
        dir.path(),
    );
    task.cover = Some(CoverFile {
        url: format!("{}/cover/c.jpg", mock_server.uri()),
        extension: ".jpeg",
    });

    let report = create_engine(1)
        .run(&test_session(), vec![task], None, EngineOptions::default())
        .await?;

    assert_eq!(report.downloaded(), 1);
    assert_eq!(std::fs::read(dir.path().join("3xabc.mp4"))?, b"video");
    assert_eq!(std::fs::read(dir.path().join("3xabc_cover.jpeg"))?, b"cover");
    Ok(())
}

// ==================== Ordering Tests ====================

#[tokio::test]
async fn test_outcomes_follow_completion_order() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/media/slow.mp4"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"slow".to_vec())
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/media/fast.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"fast".to_vec()))
        .mount(&mock_server)
        .await;

    let dir = TempDir::new()?;
    let tasks = vec![
        DownloadTask::new(
            "slow",
            vec![format!("{}/media/slow.mp4", mock_server.uri())],
            dir.path(),
        ),
        DownloadTask::new(
            "fast",
            vec![format!("{}/media/fast.mp4", mock_server.uri())],
            dir.path(),
        ),
    ];

    let report = create_engine(2)
        .run(&test_session(), tasks, None, EngineOptions::default())
        .await?;

    let order: Vec<&str> = report.outcomes.iter().map(TaskOutcome::detail_id).collect();
    assert_eq!(order, vec!["fast", "slow"]);
    Ok(())
}
