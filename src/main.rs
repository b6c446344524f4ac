//! drumdag - Main Entry Point
//!
//! Reads note sequences from a JSON-lines file, runs them through the drums
//! dataset graph, and writes training and evaluation examples as JSON lines
//! plus a `run_summary.json` manifest.

use anyhow::Context;
use clap::Parser;
use drumdag::{
    config::{default_config_path, DatasetConfig},
    music::{build_drums_executor, NoteSequence, SequenceExample, EVAL_BUCKET, TRAINING_BUCKET},
    pipeline::{
        BucketSinks, DriverEvent, DriverOptions, FailurePolicy, JsonLinesSink, JsonLinesSource,
        SerialDriver,
    },
};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const SUMMARY_FILE: &str = "run_summary.json";

/// Build drum-track training examples from note sequences.
#[derive(Parser, Debug)]
#[command(name = "drumdag", version, about)]
struct Args {
    /// JSON-lines file of NoteSequences
    #[arg(long)]
    input: PathBuf,

    /// Directory for <bucket>.jsonl outputs and the run summary
    #[arg(long)]
    output_dir: PathBuf,

    /// Fraction of input used for evaluation (overrides the config file)
    #[arg(long)]
    eval_ratio: Option<f64>,

    /// Partition seed (overrides the config file)
    #[arg(long)]
    seed: Option<u64>,

    /// Log filter, e.g. "info" or "drumdag=debug" (falls back to RUST_LOG)
    #[arg(long)]
    log: Option<String>,

    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Config file (defaults to the platform config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Abort on the first failing record instead of skipping it
    #[arg(long)]
    fail_fast: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(args.log.as_deref(), args.log_file.as_deref())?;

    tracing::info!("Starting drumdag");

    let config = resolve_config(&args)?;
    tracing::debug!("Using config: {:?}", config);

    let executor = build_drums_executor(&config).context("Failed to build the drums graph")?;

    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("Failed to create {}", args.output_dir.display()))?;

    let source = JsonLinesSource::<NoteSequence>::open(&args.input)
        .with_context(|| format!("Failed to open {}", args.input.display()))?;
    let sinks = BucketSinks::new()
        .with(
            TRAINING_BUCKET,
            JsonLinesSink::<SequenceExample>::create(&args.output_dir, TRAINING_BUCKET)?,
        )
        .with(
            EVAL_BUCKET,
            JsonLinesSink::<SequenceExample>::create(&args.output_dir, EVAL_BUCKET)?,
        );

    let (event_tx, event_rx) = crossbeam_channel::unbounded();
    let options = DriverOptions {
        flush_every: config.driver.flush_every,
        failure_policy: config.driver.failure_policy,
        events: Some(event_tx),
        ..DriverOptions::default()
    };

    let progress = std::thread::spawn(move || {
        for event in event_rx {
            match event {
                DriverEvent::Progress {
                    records_read,
                    records_processed,
                    records_skipped,
                } => tracing::info!(
                    "Progress: {} read, {} processed, {} skipped",
                    records_read,
                    records_processed,
                    records_skipped
                ),
                DriverEvent::RecordSkipped {
                    input_index,
                    stage,
                    message,
                } => tracing::debug!("Record {} skipped in {}: {}", input_index, stage, message),
                DriverEvent::Started | DriverEvent::Finished { .. } => {}
            }
        }
    });

    let mut driver = SerialDriver::new(executor, options);
    let result = driver.run(source, sinks);
    // Dropping the driver closes the event channel
    drop(driver);
    if progress.join().is_err() {
        tracing::warn!("Progress logger thread panicked");
    }
    let summary = result.context("Run failed")?;

    let summary_path = args.output_dir.join(SUMMARY_FILE);
    let json = serde_json::to_string_pretty(&summary)?;
    std::fs::write(&summary_path, json)
        .with_context(|| format!("Failed to write {}", summary_path.display()))?;

    tracing::info!(
        "Wrote {} training and {} eval examples to {} in {}ms",
        summary.bucket_count(TRAINING_BUCKET),
        summary.bucket_count(EVAL_BUCKET),
        args.output_dir.display(),
        summary.elapsed().num_milliseconds()
    );

    Ok(())
}

/// Config file (explicit or default location), then command line overrides.
fn resolve_config(args: &Args) -> anyhow::Result<DatasetConfig> {
    let mut config = match &args.config {
        Some(path) => DatasetConfig::load(path)?,
        None => {
            if let Some(path) = default_config_path() {
                tracing::debug!("Looking for config at {}", path.display());
            }
            DatasetConfig::load_or_default()
        }
    };

    if let Some(ratio) = args.eval_ratio {
        config.eval_ratio = ratio;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if args.fail_fast {
        config.driver.failure_policy = FailurePolicy::Abort;
    }
    config.validate()?;
    Ok(config)
}

fn init_logging(filter: Option<&str>, log_file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let make_filter = || match filter {
        Some(directive) => EnvFilter::try_new(directive),
        None => EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info")),
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(make_filter()?);

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create log file {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(make_filter()?);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}
