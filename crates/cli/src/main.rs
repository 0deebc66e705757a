//! Shotline CLI - Main Entry Point
//!
//! Runs visual regression jobs locally: `before` captures the reference
//! screenshots, `after` captures the changed site and compares, `run` does
//! both in one go.

use anyhow::Context;
use clap::{Parser, Subcommand};
use shotline_common::naming::prepend_http_if_missing;
use shotline_common::{new_run_id, JobConfig, RunState};
use shotline_engine::{EngineConfig, JobRunner, RunTracker, Step, WebDriverFactory};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

mod output;

use output::OutputFormat;

/// Shotline - visual regression testing for web pages
#[derive(Parser)]
#[command(name = "shotline")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Job configuration file (JSON)
    #[arg(short, long, default_value = "lineup.json", global = true)]
    config: PathBuf,

    /// Engine configuration file (TOML)
    #[arg(long, default_value = "shotline.toml", env = "SHOTLINE_CONFIG", global = true)]
    engine_config: PathBuf,

    /// Capture a single URL with default settings instead of reading --config
    #[arg(long, global = true)]
    url: Option<String>,

    /// Directory for screenshots and reports
    #[arg(short, long, global = true)]
    working_dir: Option<PathBuf>,

    /// WebDriver endpoint
    #[arg(long, env = "SHOTLINE_WEBDRIVER_URL", global = true)]
    webdriver_url: Option<String>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture the reference screenshots
    Before,

    /// Capture the changed site and compare against the reference
    After,

    /// Compare screenshots already on disk
    Compare,

    /// Capture before, capture after and compare
    Run,

    /// Print an example job configuration
    PrintConfig,
}

impl Commands {
    fn step(&self) -> Option<Step> {
        match self {
            Commands::Before => Some(Step::Before),
            Commands::After => Some(Step::After),
            Commands::Compare => Some(Step::Compare),
            Commands::Run => Some(Step::Full),
            Commands::PrintConfig => None,
        }
    }
}

fn load_job(cli: &Cli) -> anyhow::Result<JobConfig> {
    let job = match &cli.url {
        Some(url) => JobConfig::default_for(&prepend_http_if_missing(url)),
        None => JobConfig::read(&cli.config)?,
    };
    job.validate()?;
    Ok(job)
}

fn load_engine(cli: &Cli) -> anyhow::Result<EngineConfig> {
    let mut engine = EngineConfig::load(&cli.engine_config)
        .with_context(|| format!("Cannot load {}", cli.engine_config.display()))?;
    if let Some(dir) = &cli.working_dir {
        engine = engine.with_working_dir(dir);
    }
    if let Some(url) = &cli.webdriver_url {
        engine.webdriver_url = url.clone();
    }
    Ok(engine)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let Some(step) = cli.command.step() else {
        println!("{}", JobConfig::example().pretty_print()?);
        return Ok(());
    };

    let job = load_job(&cli)?;

    // Initialize logging
    let log_level = if cli.verbose || job.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let engine = load_engine(&cli)?;
    let factory = Arc::new(WebDriverFactory::new(
        engine.webdriver_url.clone(),
        job.browser,
        Duration::from_secs(job.page_load_timeout),
    ));
    let runner = JobRunner::new(engine, factory);
    let tracker = RunTracker::new(new_run_id(), job);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping after the screenshots in progress");
                cancel.cancel();
            }
        });
    }

    let state = runner.run(&tracker, step, cancel).await;
    let status = tracker.snapshot();

    if state == RunState::BeforeDone {
        output::print_success(&format!(
            "Reference screenshots written to {}",
            runner.store().screenshot_dir().display()
        ));
        for failure in &status.report.failures {
            output::print_warning(&format!("{} at width {}: {}", failure.url, failure.width, failure.error));
        }
        return Ok(());
    }

    output::print_run(&status, cli.format);

    if matches!(state, RunState::FinishedWithDifferences | RunState::Error) {
        std::process::exit(1);
    }

    Ok(())
}
