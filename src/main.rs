//! CLI entry point for the Kuaishou downloader.

use std::io::{self, BufRead, IsTerminal, Read, Write};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use ks_downloader_core::{BatchSummary, EngineOptions, Pipeline, Session, Settings, TaskOutcome};
use tracing::{debug, info, warn};

mod cli;

use cli::Args;

/// Input that ends an interactive session.
const QUIT_SENTINEL: &str = "Q";

/// Totals across every batch of the run.
#[derive(Debug, Default)]
struct RunTotals {
    succeeded: usize,
    failed: usize,
}

impl RunTotals {
    fn add(&mut self, summary: &BatchSummary) {
        self.succeeded += summary.report.downloaded() + summary.report.skipped();
        self.failed += summary.report.failed();
    }

    /// 0 when nothing failed, 2 on partial failure, 1 when everything failed.
    fn exit_status(&self) -> u8 {
        match (self.failed, self.succeeded) {
            (0, _) => 0,
            (_, 0) => 1,
            _ => 2,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let settings = Settings::load(&args.settings);
    debug!(?settings, "settings loaded");
    let session = Arc::new(Session::new(&settings).context("cannot build HTTP session")?);
    let pipeline = Pipeline::new(settings, session).context("cannot create download engine")?;

    let stop = Arc::new(AtomicBool::new(false));
    let stop_signal = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("stop requested, finishing running downloads");
            stop_signal.store(true, Ordering::SeqCst);
        }
    });
    let options = EngineOptions {
        force: args.force,
        stop: Arc::clone(&stop),
    };

    let mut totals = RunTotals::default();
    if !args.links.is_empty() {
        run_batch(&pipeline, &args.links, &options, &mut totals).await?;
    } else if !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        let inputs = split_inputs(&buffer);
        if inputs.is_empty() {
            info!("No input provided. Pipe links via stdin or pass them as arguments.");
            return Ok(ExitCode::SUCCESS);
        }
        run_batch(&pipeline, &inputs, &options, &mut totals).await?;
    } else {
        let stdin = io::stdin();
        let mut lines = stdin.lock().lines();
        loop {
            if stop.load(Ordering::SeqCst) {
                break;
            }
            eprint!("Paste links (empty line or {QUIT_SENTINEL} to quit): ");
            io::stderr().flush()?;
            let Some(line) = lines.next().transpose()? else {
                break;
            };
            let line = line.trim();
            if line.is_empty() || line.eq_ignore_ascii_case(QUIT_SENTINEL) {
                break;
            }
            run_batch(&pipeline, &[line.to_string()], &options, &mut totals).await?;
        }
    }

    info!(
        succeeded = totals.succeeded,
        failed = totals.failed,
        "Downloader finished"
    );
    Ok(ExitCode::from(totals.exit_status()))
}

/// One input per non-empty line.
fn split_inputs(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

async fn run_batch(
    pipeline: &Pipeline,
    inputs: &[String],
    options: &EngineOptions,
    totals: &mut RunTotals,
) -> Result<()> {
    let summary = pipeline.process_batch(inputs, options.clone()).await?;

    for skip in &summary.skips {
        warn!(input = %skip.input, reason = %skip.kind, "Skipped input");
    }
    for outcome in &summary.report.outcomes {
        match outcome {
            TaskOutcome::Downloaded { detail_id, paths } => {
                info!(detail_id = %detail_id, files = paths.len(), "Downloaded");
            }
            TaskOutcome::Skipped { detail_id, .. } => {
                info!(detail_id = %detail_id, "Already downloaded");
            }
            TaskOutcome::Failed { detail_id, error } => {
                warn!(detail_id = %detail_id, error = %error, "Download failed");
            }
            TaskOutcome::NotStarted { detail_id } => {
                warn!(detail_id = %detail_id, "Not started");
            }
        }
    }
    info!(
        downloaded = summary.report.downloaded(),
        skipped = summary.report.skipped(),
        failed = summary.report.failed(),
        retried = summary.report.stats.retried(),
        "Batch complete"
    );

    totals.add(&summary);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_inputs_drops_blank_lines() {
        let inputs = split_inputs("v.kuaishou.com/a\n\n  \n  v.kuaishou.com/b  \n");
        assert_eq!(inputs, vec!["v.kuaishou.com/a", "v.kuaishou.com/b"]);
    }

    #[test]
    fn test_exit_code_classes() {
        let all_ok = RunTotals {
            succeeded: 3,
            failed: 0,
        };
        let partial = RunTotals {
            succeeded: 1,
            failed: 1,
        };
        let all_failed = RunTotals {
            succeeded: 0,
            failed: 2,
        };
        assert_eq!(all_ok.exit_status(), 0);
        assert_eq!(partial.exit_status(), 2);
        assert_eq!(all_failed.exit_status(), 1);
    }
}
