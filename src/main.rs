use std::thread;
use std::time::Duration;

use clap::Parser;
use task_chain_scheduler::mock::{generate_mock_chain_with_config, MockConfig};
use task_chain_scheduler::{
    DependencyLink, EventLog, LoggingTracker, MockStage, Outcome, ScheduleOptions,
    SchedulerConfig, SchedulerError, StageKind, TaskScheduler, DEFAULT_BATCH_SIZE,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Runs a randomized chain of single, array and paired stages on a worker pool.
#[derive(Parser, Debug)]
#[command(name = "task-chain-scheduler", version, about)]
struct Cli {
    /// Number of worker threads.
    #[arg(long, env = "TASKS_WORKER_THREADS", default_value_t = 7)]
    workers: usize,

    /// Batch size for every array stage (random per stage when omitted).
    #[arg(long, env = "TASKS_BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Number of chained stages to generate.
    #[arg(long, default_value_t = 8)]
    stages: usize,

    /// Upper bound of simulated work per element, in milliseconds.
    #[arg(long, default_value_t = 20)]
    max_work_ms: u64,

    /// Log every lifecycle transition.
    #[arg(short, long)]
    verbose: bool,
}

fn simulate(ms: &u64) {
    thread::sleep(Duration::from_millis(*ms));
}

/// Schedules one stage after `previous`
fn schedule_stage(
    scheduler: &TaskScheduler,
    stage: &MockStage,
    previous: Option<&DependencyLink>,
    log: &EventLog,
    batch_override: Option<usize>,
) -> Result<DependencyLink, SchedulerError> {
    let trackers = (log.clone(), LoggingTracker::with_label(&stage.name));
    let mut options = ScheduleOptions::new().tracked_by(&trackers);
    if let Some(previous) = previous {
        options = options.after(previous);
    }

    match stage.kind {
        StageKind::Single => {
            let ms = stage.work_ms.first().copied().unwrap_or(0);
            scheduler.schedule_single(ms, simulate, options)
        }
        StageKind::Array { batch_size, .. } => scheduler.schedule_array(
            stage.work_ms.clone(),
            simulate,
            options.batch_size(batch_override.unwrap_or(batch_size)),
        ),
        StageKind::Paired { batch_size, .. } => {
            let indices: Vec<usize> = (0..stage.len()).collect();
            scheduler.schedule_array_paired(
                stage.work_ms.clone(),
                indices,
                |ms: &u64, _index: &usize| simulate(ms),
                options.batch_size(batch_override.unwrap_or(batch_size)),
            )
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), SchedulerError> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    println!("=== Task Chain Scheduler ===\n");
    println!("Generating {} mock stages...", cli.stages);

    let stages = generate_mock_chain_with_config(MockConfig {
        stage_count: cli.stages,
        max_work_ms: cli.max_work_ms,
        ..Default::default()
    });

    let elements: usize = stages.iter().map(MockStage::len).sum();
    let arrays = stages
        .iter()
        .filter(|s| !matches!(s.kind, StageKind::Single))
        .count();
    println!("  - Stages: {}", stages.len());
    println!("  - Array stages: {}", arrays);
    println!("  - Total elements: {}", elements);

    let config = SchedulerConfig::new(cli.workers)
        .with_default_batch_size(cli.batch_size.unwrap_or(DEFAULT_BATCH_SIZE));
    let scheduler = TaskScheduler::new(config)?;
    let log = EventLog::new();

    // Each stage depends on the one before it
    let mut links: Vec<DependencyLink> = Vec::with_capacity(stages.len());
    for stage in &stages {
        let link = schedule_stage(&scheduler, stage, links.last(), &log, cli.batch_size)?;
        links.push(link);
    }

    if let Some(tail) = links.last() {
        let outcome = tail.wait().await;
        info!("Chain tail finished: {:?}", outcome);
    }

    println!("\n=== Execution Summary ===");
    let mut succeeded = 0;
    for (stage, link) in stages.iter().zip(&links) {
        let outcome = link.outcome().unwrap_or(Outcome::Cancelled);
        if outcome.is_success() {
            succeeded += 1;
        } else {
            println!("  - {}: {:?}", stage.name, outcome);
        }
    }
    println!("  - Succeeded: {}/{}", succeeded, stages.len());
    println!("  - Worker threads: {}", scheduler.pool().size());
    println!(
        "  - Default batch size: {}",
        scheduler.config().default_batch_size
    );
    println!("  - Lifecycle events: {}", log.events().len());
    println!("  - Jobs executed: {}", scheduler.pool().executed_jobs());
    println!("  - Jobs panicked: {}", scheduler.pool().panicked_jobs());

    if succeeded == stages.len() {
        println!("  - Status: SUCCESS - All stages completed");
    } else {
        println!("  - Status: PARTIAL - {} stages did not succeed", stages.len() - succeeded);
    }

    scheduler.shutdown();
    Ok(())
}
