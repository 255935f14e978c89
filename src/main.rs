//! CLI entry point for docharvest.

use std::fs::OpenOptions;
use std::io::{self, IsTerminal, Read};
use std::sync::Mutex;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use clap::Parser;
use docharvest_core::targets::{self, Target};
use tracing::{debug, error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

mod cli;
mod progress;

use cli::{Args, TargetSource};

/// Exit status after a second Ctrl-C (128 + SIGINT).
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    let config = args.pipeline_config().context("invalid configuration")?;
    config.layout.ensure().context("cannot prepare data directory")?;
    init_tracing(&args, &config.log_path())?;

    debug!(?args, "CLI arguments parsed");
    info!(source = config.layout.source(), "docharvest starting");

    let targets = load_targets(&args.target_source())?;
    if targets.is_empty() {
        info!("No targets. Pass URLs as arguments, pipe them via stdin, or use --start/--links-json/--url-list.");
        return Ok(());
    }
    info!(targets = targets.len(), "targets loaded");

    let runner = config.build_runner().context("cannot start pipeline")?;

    let stop = runner.stop_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("interrupt received; finishing the current download attempt (Ctrl-C again to quit now)");
        stop.store(true, Ordering::SeqCst);
        if tokio::signal::ctrl_c().await.is_ok() {
            error!("second interrupt; exiting without waiting");
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
    });

    let use_spinner = !args.quiet && !args.no_progress && io::stderr().is_terminal();
    let (progress_handle, progress_stop) = progress::spawn_progress_ui(use_spinner, runner.stats());

    let result = runner.run(targets).await;

    progress_stop.store(true, Ordering::SeqCst);
    if let Some(handle) = progress_handle {
        let _ = handle.await;
    }

    let report = result.context("batch aborted")?;
    info!(
        total = report.total,
        skipped = report.skipped,
        succeeded = report.succeeded,
        no_link_found = report.no_link_found,
        download_failed = report.download_failed,
        not_attempted = report.not_attempted,
        files = report.files_downloaded,
        "Run complete"
    );
    info!(store = %report.store_summary, "Result store totals");
    if report.interrupted {
        warn!("run was interrupted; re-run the same command to continue");
    }

    Ok(())
}

/// Installs a stderr layer and an ANSI-free layer appending to `log_path`.
///
/// Priority: `RUST_LOG` env var > quiet flag > verbose flag > default (info)
fn init_tracing(args: &Args, log_path: &std::path::Path) -> Result<()> {
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("cannot open log file {}", log_path.display()))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(log_file)))
        .init();
    Ok(())
}

fn load_targets(source: &TargetSource) -> Result<Vec<Target>> {
    let targets = match source {
        TargetSource::Range {
            start,
            end,
            template,
        } => targets::from_range(*start, *end, template)?,
        TargetSource::LinksJson(path) => targets::from_links_json(path)?,
        TargetSource::UrlList(path) => targets::from_url_list(path)?,
        TargetSource::Direct(urls) if !urls.is_empty() => targets::from_urls(urls.iter().cloned()),
        TargetSource::Direct(_) => {
            if io::stdin().is_terminal() {
                return Ok(Vec::new());
            }
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("cannot read targets from stdin")?;
            targets::parse_url_lines(&buffer)
        }
    };
    Ok(targets)
}
