// Lanes - command-line driver
// Pushes synthetic workloads through a scheduler and prints sequence IDs

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use lanes::config::{load_config, Config};
use lanes::logging::init_tracing;
use lanes::{BoxTask, Scheduler, Sequence, StatusSnapshot, SubmitError};

#[derive(Parser, Debug)]
#[command(name = "lanes", version)]
#[command(about = "Multi-lane task dispatcher with cross-lane work sharing")]
struct Cli {
    /// Config file (default: ~/.lanes/config.toml)
    #[arg(long, global = true, env = "LANES_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Drive a synthetic workload through a scheduler and report its status
    Run(RunArgs),
    /// Print sequence IDs
    Ids(IdsArgs),
    /// Print the effective configuration as TOML
    Config,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Number of lanes (overrides config)
    #[arg(long)]
    lanes: Option<usize>,

    /// Intake queue capacity per lane (overrides config)
    #[arg(long)]
    queue_size: Option<usize>,

    /// Submission timeout in milliseconds (overrides config)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Number of tasks to submit
    #[arg(long, default_value_t = 1000)]
    tasks: usize,

    /// How long each task works, in milliseconds
    #[arg(long, default_value_t = 5)]
    task_ms: u64,

    /// Make every Nth task panic
    #[arg(long)]
    panic_every: Option<usize>,

    /// Print the final status as JSON
    #[arg(long)]
    json: bool,
}

impl RunArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(lanes) = self.lanes {
            config.scheduler.lanes = lanes;
        }
        if let Some(queue_size) = self.queue_size {
            config.scheduler.queue_size = queue_size;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.scheduler.submit_timeout_ms = timeout_ms;
        }
    }
}

#[derive(Args, Debug)]
struct IdsArgs {
    /// How many IDs to print
    #[arg(long, default_value_t = 10)]
    count: usize,

    /// Random prefix length (overrides config)
    #[arg(long)]
    prefix_len: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config.logging)?;

    match cli.command {
        Command::Run(args) => run(config, args).await,
        Command::Ids(args) => ids(&config, &args),
        Command::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

async fn run(mut config: Config, args: RunArgs) -> Result<()> {
    args.apply(&mut config);
    config.validate().context("Invalid run options")?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    ctrlc::set_handler(move || on_interrupt.cancel())
        .context("Failed to install Ctrl-C handler")?;

    let scheduler = Scheduler::from_settings(cancel.clone(), &config.scheduler)?;
    let ids = Sequence::new(config.sequence.prefix_len)?;
    let finished = Arc::new(Semaphore::new(0));
    let work = Duration::from_millis(args.task_ms);

    info!(
        tasks = args.tasks,
        lanes = scheduler.lane_count(),
        queue_size = scheduler.queue_size(),
        "Starting workload"
    );
    let started = Instant::now();
    let mut accepted: u32 = 0;
    let mut retries: u64 = 0;

    'submit: for n in 0..args.tasks {
        let mut task = synthetic_task(ids.next_id(), n, work, args.panic_every, &finished);
        loop {
            match scheduler.submit_balanced(task).await {
                Ok(()) => {
                    accepted += 1;
                    break;
                }
                Err(SubmitError::Timeout(returned)) => {
                    retries += 1;
                    warn!(task = n, "Intake full; retrying");
                    task = returned;
                }
                Err(SubmitError::Cancelled(_)) => {
                    warn!("Interrupted; no more tasks will be submitted");
                    break 'submit;
                }
            }
        }
    }

    // Every accepted task releases one permit when it finishes or unwinds.
    tokio::select! {
        _ = cancel.cancelled() => {}
        result = finished.acquire_many(accepted) => {
            result.context("Completion semaphore closed")?.forget();
        }
    }

    cancel.cancel();
    scheduler.wait().await;
    let elapsed = started.elapsed();

    let status = scheduler.status();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print_status(&status);
        println!("accepted:     {accepted}");
        println!("retries:      {retries}");
        println!("elapsed:      {elapsed:.2?}");
        println!();
        print!("{}", scheduler.render_metrics()?);
    }
    Ok(())
}

fn ids(config: &Config, args: &IdsArgs) -> Result<()> {
    let prefix_len = args.prefix_len.unwrap_or(config.sequence.prefix_len);
    let sequence = Sequence::new(prefix_len)?;
    for _ in 0..args.count {
        println!("{}", sequence.next_id());
    }
    Ok(())
}

fn print_status(status: &StatusSnapshot) {
    println!("lanes:        {}", status.lane_count);
    println!("queue size:   {}", status.queue_size);
    println!("pending:      {}", status.pending_tasks);
    match &status.last_failure {
        Some(failure) => println!(
            "last failure: lane {} at {}: {}",
            failure.lane,
            failure.occurred_at.to_rfc3339(),
            failure.message
        ),
        None => println!("last failure: none"),
    }
}

/// Releases one completion permit when dropped, including during a panic.
struct Finished(Arc<Semaphore>);

impl Drop for Finished {
    fn drop(&mut self) {
        self.0.add_permits(1);
    }
}

fn synthetic_task(
    id: String,
    n: usize,
    work: Duration,
    panic_every: Option<usize>,
    finished: &Arc<Semaphore>,
) -> BoxTask {
    let finished = Finished(Arc::clone(finished));
    Box::new(move |cancel: CancellationToken| async move {
        let _finished = finished;
        tracing::debug!(%id, "Task started");
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(work) => {}
        }
        if panic_every.is_some_and(|every| every > 0 && (n + 1) % every == 0) {
            panic!("synthetic failure in task {id}");
        }
    })
}
