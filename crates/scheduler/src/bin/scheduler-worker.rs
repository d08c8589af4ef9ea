//! scheduler-worker: runs a synthetic workload through the priority scheduler.
//!
//! Submits `--tasks` jobs with descending priorities (every `--critical-every`th
//! one above the critical threshold), starts the scheduler, requests a graceful
//! stop after `--stop-after-ms` (or on Ctrl-C), waits for the critical drain
//! and prints what happened.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use priosched::{
    CounterSnapshot, Scheduler, SchedulerConfig, SchedulerEvent, SchedulerMetrics, SchedulerState,
};

// ── CLI ─────────────────────────────────────────────────────────────

/// Priority scheduler demo worker.
#[derive(Parser, Debug)]
#[command(name = "scheduler-worker", version, about)]
struct Cli {
    /// Path to the scheduler TOML config file.
    #[arg(long, env = "PRIOSCHED_CONFIG", default_value = "config/scheduler.toml")]
    config: String,

    /// Number of synthetic tasks to submit.
    #[arg(long, default_value_t = 64)]
    tasks: usize,

    /// Every Nth task is submitted above the critical threshold (0 = none).
    #[arg(long, default_value_t = 4)]
    critical_every: usize,

    /// Simulated work per task in milliseconds.
    #[arg(long, default_value_t = 20)]
    task_ms: u64,

    /// Request a graceful stop after this many milliseconds.
    #[arg(long, default_value_t = 250)]
    stop_after_ms: u64,

    /// Print the summary as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct Summary {
    state: String,
    queued: usize,
    counters: CounterSnapshot,
    metrics: SchedulerMetrics,
}

fn load_config(path: &str) -> anyhow::Result<SchedulerConfig> {
    if Path::new(path).exists() {
        let config = SchedulerConfig::from_file(path)
            .with_context(|| format!("failed to load scheduler config from {path}"))?;
        info!(path, "loaded scheduler config");
        return Ok(config);
    }
    warn!(path, "config file not found, using defaults");
    SchedulerConfig::from_env().context("invalid scheduler environment overrides")
}

/// Priority for the `i`th synthetic task: a descending ramp below the
/// threshold, with every `critical_every`th task lifted above it.
fn synthetic_priority(i: usize, tasks: usize, critical_every: usize, threshold: f64) -> f64 {
    let ramp = (tasks - i) as f64 / tasks.max(1) as f64;
    if critical_every > 0 && i % critical_every == 0 {
        threshold + ramp * 10.0
    } else {
        threshold * ramp * 0.9
    }
}

/// Wait for the dispatch thread to leave `Starting`; `stop` is only valid
/// once the scheduler is `Running`.
async fn wait_until_running(scheduler: &Scheduler) {
    while scheduler.state() == SchedulerState::Starting {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

async fn log_events(mut rx: tokio::sync::broadcast::Receiver<SchedulerEvent>) {
    loop {
        match rx.recv().await {
            Ok(SchedulerEvent::Stopped) => {
                info!("scheduler reported stopped");
                break;
            }
            Ok(SchedulerEvent::CriticalTasksCompleted) => debug!("critical tasks completed"),
            Ok(event) => debug!(?event, "scheduler event"),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "event log lagging"),
            Err(RecvError::Closed) => break,
        }
    }
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    priosched_core::load_dotenv();
    priosched_core::init_tracing("info");

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    config.log_summary();

    let scheduler = Arc::new(Scheduler::new(config).context("failed to build scheduler")?);
    let events = tokio::spawn(log_events(scheduler.subscribe()));

    let threshold = scheduler.min_critical_priority();
    let task_ms = cli.task_ms;
    for i in 0..cli.tasks {
        let priority = synthetic_priority(i, cli.tasks, cli.critical_every, threshold);
        scheduler.submit(priority, i, move |i: usize| {
            std::thread::sleep(Duration::from_millis(task_ms));
            debug!(task = i, "synthetic task done");
        })?;
    }
    info!(
        tasks = cli.tasks,
        critical = scheduler.waiting_critical(),
        "workload submitted"
    );

    scheduler.start()?;
    wait_until_running(&scheduler).await;

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(cli.stop_after_ms)) => {
            info!("stop delay elapsed");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received");
        }
    }

    let stopper = Arc::clone(&scheduler);
    tokio::task::spawn_blocking(move || stopper.shutdown())
        .await
        .context("shutdown task panicked")??;
    if let Err(e) = events.await {
        warn!(error = %e, "event logger failed");
    }

    let summary = Summary {
        state: scheduler.state().to_string(),
        queued: scheduler.queued(),
        counters: scheduler.counters(),
        metrics: scheduler.metrics(),
    };
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "state={} started={} completed={} faulted={} left_queued={} (critical waiting={})",
            summary.state,
            summary.metrics.tasks_started,
            summary.metrics.tasks_completed,
            summary.metrics.tasks_faulted,
            summary.queued,
            summary.counters.waiting_critical,
        );
    }

    info!("scheduler-worker exited cleanly");
    Ok(())
}
