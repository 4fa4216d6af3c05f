//! Stage Replay CLI
//!
//! The `stage-replay` command replays a recorded event as a progressive live
//! timing feed.
//!
//! ## Commands
//!
//! - `run`: release records on a timer until the event is fully replayed
//! - `drain`: pull batches on demand and print them as feed rows
//! - `inspect`: summarise a dataset file without touching the database

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};

use stage_replay_core::{
    classification_rows, ClassificationRow, DatasetIndex, EventDataset, EventId,
    ReplayController, ReplayParams, RunState, TimingRepository,
};
use timing_store::SurrealTimingRepository;

#[derive(Parser)]
#[command(name = "stage-replay")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Replay stage timing datasets as a live feed", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay an event on a timer until every record is released
    Run {
        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        replay: ReplayArgs,
    },

    /// Pull batches on demand and print them as feed rows (JSON lines)
    Drain {
        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        replay: ReplayArgs,

        /// Stop after this many batches (default: until complete)
        #[arg(short, long)]
        batches: Option<usize>,
    },

    /// Summarise a dataset file: stages, totals, skipped records, pacing
    Inspect {
        /// Path to the dataset (JSON)
        dataset: PathBuf,

        #[command(flatten)]
        replay: ReplayArgs,
    },
}

#[derive(Args, Debug, Clone, Default)]
struct SourceArgs {
    /// Dataset (JSON) to import before replaying
    #[arg(short, long, env = "STAGE_REPLAY_DATASET")]
    dataset: Option<PathBuf>,

    /// Event to replay (default: the imported dataset's event)
    #[arg(short, long, env = "STAGE_REPLAY_EVENT")]
    event: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
struct ReplayArgs {
    /// Smallest batch released per tick
    #[arg(long, env = "STAGE_REPLAY_BATCH_MIN")]
    batch_min: Option<usize>,

    /// Largest batch released per tick
    #[arg(long, env = "STAGE_REPLAY_BATCH_MAX")]
    batch_max: Option<usize>,

    /// Fixed batch size (overrides min/max)
    #[arg(long, env = "STAGE_REPLAY_BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Seconds between ticks
    #[arg(long, env = "STAGE_REPLAY_INTERVAL_SECS")]
    interval_secs: Option<u64>,

    /// Target replay length; derives the tick interval
    #[arg(long, env = "STAGE_REPLAY_DURATION_MINUTES")]
    duration_minutes: Option<f64>,

    /// Stage completion (0..1) before the next stage opens
    #[arg(long, env = "STAGE_REPLAY_OVERLAP")]
    overlap_threshold: Option<f64>,

    /// Max places a competitor drifts from start order
    #[arg(long, env = "STAGE_REPLAY_ORDER_VARIATION")]
    order_variation: Option<f64>,

    /// RNG seed for reproducible runs
    #[arg(long, env = "STAGE_REPLAY_SEED")]
    seed: Option<u64>,
}

impl From<ReplayArgs> for ReplayParams {
    fn from(args: ReplayArgs) -> Self {
        ReplayParams {
            batch_min: args.batch_min,
            batch_max: args.batch_max,
            batch_size: args.batch_size,
            interval_secs: args.interval_secs,
            duration_minutes: args.duration_minutes,
            overlap_threshold: args.overlap_threshold,
            order_variation: args.order_variation,
            seed: args.seed,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    stage_replay_core::telemetry::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run { source, replay } => {
            let repo = open_repository().await?;
            let event_id = resolve_source(&repo, &source).await?;
            cmd_run(Arc::new(repo), &event_id, replay.into()).await
        }
        Commands::Drain {
            source,
            replay,
            batches,
        } => {
            let repo = open_repository().await?;
            let event_id = resolve_source(&repo, &source).await?;
            cmd_drain(Arc::new(repo), &event_id, replay.into(), batches).await
        }
        Commands::Inspect { dataset, replay } => cmd_inspect(&dataset, &replay.into()),
    }
}

async fn open_repository() -> Result<SurrealTimingRepository> {
    SurrealTimingRepository::from_env()
        .await
        .context("Failed to connect to timing database")
}

/// Import the dataset file if one was given and pick the event to replay.
async fn resolve_source(repo: &SurrealTimingRepository, source: &SourceArgs) -> Result<EventId> {
    let imported = match &source.dataset {
        Some(path) => {
            let dataset: EventDataset = read_json_file(path)?;
            repo.import_event(&dataset)
                .await
                .with_context(|| format!("Failed to import dataset {:?}", path))?;
            info!(
                event_id = %dataset.event.id,
                records = dataset.records.len(),
                "dataset imported"
            );
            Some(dataset.event.id)
        }
        None => None,
    };

    match (source.event.as_deref(), imported) {
        (Some(event), _) => Ok(EventId::new(event)),
        (None, Some(event)) => Ok(event),
        (None, None) => bail!("Either --dataset or --event is required"),
    }
}

/// Replay on the timer until completion or Ctrl-C.
async fn cmd_run<R: TimingRepository + 'static>(
    repo: Arc<R>,
    event_id: &EventId,
    params: ReplayParams,
) -> Result<()> {
    let controller = ReplayController::new(repo);
    let report = controller
        .initialize(event_id, params)
        .await
        .with_context(|| format!("Failed to initialize replay for {}", event_id))?;

    println!(
        "Replaying '{}': {} records, {} competitors, {} stages",
        report.event_name, report.total_records, report.competitor_count, report.stage_count
    );
    if report.skipped_records > 0 {
        println!("Skipped {} unreleasable records", report.skipped_records);
    }
    println!("Release interval: {} ms", report.interval_ms);

    controller.start().await?;

    let mut poll = tokio::time::interval(Duration::from_millis(report.interval_ms.max(1)));
    let mut last_released = None;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                let stopped = controller.stop().await?;
                println!(
                    "Stopped at {}/{}",
                    stopped.total_released, stopped.total_records
                );
                break;
            }
            _ = poll.tick() => {
                let status = controller.status().await;
                if last_released != Some(status.total_released) {
                    last_released = Some(status.total_released);
                    println!("{}", render_progress_line(&status));
                }
                if status.state == RunState::Completed {
                    break;
                }
            }
        }
    }

    controller.shutdown().await;

    let status = controller.status().await;
    println!(
        "Released {}/{} records ({} persisted, {} failed)",
        status.total_released, status.total_records, status.persisted, status.persist_failures
    );
    if status.persist_failures > 0 {
        warn!(
            failures = status.persist_failures,
            "some released records were not persisted"
        );
    }
    Ok(())
}

fn render_progress_line(status: &stage_replay_core::ReplayStatus) -> String {
    let stages: Vec<String> = status
        .active_stages
        .iter()
        .map(|s| format!("{} {:.0}%", s.stage, s.percent))
        .collect();
    format!(
        "[{}] {}/{} ({:.0}%) live: {} eta {}s",
        status.state,
        status.total_released,
        status.total_records,
        status.percent,
        if stages.is_empty() {
            "-".to_string()
        } else {
            stages.join(", ")
        },
        status.estimated_seconds_remaining
    )
}

/// One drained batch as printed by `drain`.
#[derive(Debug, Serialize)]
struct FeedBatch {
    batch: usize,
    percent: f64,
    rows: Vec<ClassificationRow>,
}

/// Pull batches until complete (or `limit` batches) and print each as a JSON line.
async fn cmd_drain<R: TimingRepository + 'static>(
    repo: Arc<R>,
    event_id: &EventId,
    params: ReplayParams,
    limit: Option<usize>,
) -> Result<()> {
    let batches = drain_feed(repo, event_id, params, limit).await?;
    for batch in &batches {
        println!("{}", serde_json::to_string(batch)?);
    }
    info!(batches = batches.len(), "drain finished");
    Ok(())
}

async fn drain_feed<R: TimingRepository + 'static>(
    repo: Arc<R>,
    event_id: &EventId,
    params: ReplayParams,
    limit: Option<usize>,
) -> Result<Vec<FeedBatch>> {
    let controller = ReplayController::new(repo);
    controller
        .initialize(event_id, params)
        .await
        .with_context(|| format!("Failed to initialize replay for {}", event_id))?;

    let mut batches = Vec::new();
    while limit.map_or(true, |n| batches.len() < n) {
        let outcome = controller.drain_one_batch().await?;
        if outcome.completed {
            break;
        }
        batches.push(FeedBatch {
            batch: batches.len() + 1,
            percent: outcome.percent,
            rows: classification_rows(&outcome.records),
        });
    }
    Ok(batches)
}

#[derive(Debug, Serialize)]
struct InspectOutput {
    event_id: String,
    event_name: String,
    total_records: usize,
    skipped_records: usize,
    competitors: usize,
    stages: Vec<StageSummary>,
    interval_ms: u64,
    estimated_ticks: u64,
    fingerprint: String,
}

#[derive(Debug, Serialize)]
struct StageSummary {
    stage: String,
    records: usize,
}

fn cmd_inspect(path: &PathBuf, params: &ReplayParams) -> Result<()> {
    let dataset: EventDataset = read_json_file(path)?;
    let output = build_inspect(&dataset, params)?;
    println!("{}", render_inspect_text(&output));
    Ok(())
}

fn build_inspect(dataset: &EventDataset, params: &ReplayParams) -> Result<InspectOutput> {
    let index = DatasetIndex::build(dataset.records.clone())
        .with_context(|| format!("Event {} has no timing records", dataset.event.id))?;
    let config = params.resolve(index.total_records());
    let estimated_ticks = (index.total_records() as f64 / config.batch.mean()).ceil() as u64;

    Ok(InspectOutput {
        event_id: dataset.event.id.to_string(),
        event_name: dataset.event.name.clone(),
        total_records: index.total_records(),
        skipped_records: index.skipped_records(),
        competitors: index.competitor_count(),
        stages: index
            .stages()
            .iter()
            .map(|s| StageSummary {
                stage: s.id.to_string(),
                records: s.total,
            })
            .collect(),
        interval_ms: config.interval.as_millis() as u64,
        estimated_ticks,
        fingerprint: index.fingerprint().to_string(),
    })
}

fn render_inspect_text(output: &InspectOutput) -> String {
    let mut lines = vec![
        format!("Event:       {} ({})", output.event_name, output.event_id),
        format!("Records:     {}", output.total_records),
        format!("Skipped:     {}", output.skipped_records),
        format!("Competitors: {}", output.competitors),
        format!("Stages:      {}", output.stages.len()),
    ];
    for stage in &output.stages {
        lines.push(format!("  {:<6} {} records", stage.stage, stage.records));
    }
    lines.push(format!(
        "Pacing:      {} ticks every {} ms (~{}s)",
        output.estimated_ticks,
        output.interval_ms,
        output.estimated_ticks * output.interval_ms / 1000
    ));
    lines.push(format!("Fingerprint: {}", output.fingerprint));
    lines.join("\n")
}

fn read_json_file<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read JSON file: {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {:?}", path))
}
