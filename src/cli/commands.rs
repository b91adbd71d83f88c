//! CLI command definitions for furrow.
//!
//! The binary is an operational shell around the library: producers and
//! monitors get `enqueue`, `status`, `dlq` and friends, and `worker` runs a
//! worker pool until interrupted. Real deployments embed the library and
//! register their own handlers; the built-in worker mode only carries an
//! `echo` handler for smoke-testing a queue end to end.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::json;
use tracing::info;

use crate::manager::WorkerManager;
use crate::metrics;
use crate::queue::{QueueConfig, TaskQueue};
use crate::store::{RedisStore, Store};
use crate::task::EnqueueOptions;
use crate::worker::WorkerConfig;

/// Redis-backed priority task queue with worker pools, retry back-off and
/// dead-letter handling.
#[derive(Parser)]
#[command(name = "furrow")]
#[command(about = "Priority task queue with workers, retries and dead-letter handling")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Redis connection URL.
    #[arg(
        long,
        env = "REDIS_URL",
        default_value = "redis://localhost:6379",
        global = true
    )]
    pub redis_url: String,

    /// Key namespace prefix shared by all queue records.
    #[arg(long, env = "FURROW_NAMESPACE", default_value = "app", global = true)]
    pub namespace: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Enqueue a task.
    Enqueue(EnqueueArgs),

    /// Run a worker pool until interrupted (SIGINT).
    Worker(WorkerArgs),

    /// Print aggregate queue status as JSON.
    Status,

    /// Print one task record as JSON.
    Show(ShowArgs),

    /// Cancel a pending task.
    Cancel(ShowArgs),

    /// Inspect or replay the dead-letter queue.
    #[command(subcommand)]
    Dlq(DlqCommand),

    /// Run one timeout sweep and print the reaped task ids.
    Sweep,

    /// Delete every record under the namespace.
    Purge(PurgeArgs),
}

/// Arguments for `furrow enqueue`.
#[derive(Parser, Debug)]
pub struct EnqueueArgs {
    /// Task type, used to route the task to a handler.
    pub task_type: String,

    /// JSON payload handed to the handler.
    #[arg(short, long, default_value = "null")]
    pub payload: String,

    /// Priority 1-10; higher is served first.
    #[arg(long, default_value = "5")]
    pub priority: u8,

    /// Maximum retry attempts before dead-lettering.
    #[arg(long, default_value = "3")]
    pub max_retries: u32,

    /// In-flight timeout in seconds.
    #[arg(long, default_value = "300")]
    pub timeout_seconds: u64,

    /// Delay eligibility by this many seconds.
    #[arg(long)]
    pub delay_seconds: Option<u64>,
}

/// Arguments for `furrow worker`.
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Number of workers to run.
    #[arg(short, long, default_value = "1")]
    pub count: usize,

    /// Comma-separated task types to accept (default: all).
    #[arg(long, value_delimiter = ',')]
    pub task_types: Option<Vec<String>>,

    /// Maximum concurrently-dispatched tasks per worker.
    #[arg(long, default_value = "10")]
    pub max_tasks: usize,

    /// Idle poll interval in milliseconds.
    #[arg(long, default_value = "1000")]
    pub poll_interval_ms: u64,

    /// Timeout sweep interval in seconds.
    #[arg(long, default_value = "30")]
    pub sweep_interval_seconds: u64,
}

/// Arguments naming a single task.
#[derive(Parser, Debug)]
pub struct ShowArgs {
    /// Task id.
    pub task_id: String,
}

/// Dead-letter queue subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum DlqCommand {
    /// List the newest dead-lettered tasks.
    List(DlqListArgs),

    /// Requeue a dead-lettered task with a fresh retry budget.
    Retry(ShowArgs),
}

/// Arguments for `furrow dlq list`.
#[derive(Parser, Debug)]
pub struct DlqListArgs {
    /// Maximum number of tasks to print.
    #[arg(long, default_value = "20")]
    pub limit: usize,
}

/// Arguments for `furrow purge`.
#[derive(Parser, Debug)]
pub struct PurgeArgs {
    /// Confirm the deletion; without this flag the command refuses to run.
    #[arg(long)]
    pub yes: bool,
}

/// Parses command-line arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Executes a parsed CLI invocation.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let store: Arc<dyn Store> = Arc::new(RedisStore::connect(&cli.redis_url).await?);
    let queue = Arc::new(TaskQueue::new(store, QueueConfig::new(&cli.namespace)));

    match cli.command {
        Commands::Enqueue(args) => {
            let payload = serde_json::from_str(&args.payload)
                .map_err(|e| anyhow::anyhow!("invalid --payload JSON: {e}"))?;

            let mut options = EnqueueOptions::new()
                .with_priority(args.priority)
                .with_max_retries(args.max_retries)
                .with_timeout_seconds(args.timeout_seconds);
            if let Some(delay) = args.delay_seconds {
                options = options.with_scheduled_at(
                    chrono::Utc::now() + chrono::Duration::seconds(delay as i64),
                );
            }

            let task_id = queue.enqueue(&args.task_type, payload, options).await?;
            println!("{task_id}");
        }

        Commands::Worker(args) => {
            metrics::init_metrics().map_err(|e| anyhow::anyhow!("metrics init failed: {e}"))?;

            let mut config = WorkerConfig::new()
                .with_poll_interval(Duration::from_millis(args.poll_interval_ms))
                .with_max_tasks(args.max_tasks);
            if let Some(task_types) = args.task_types {
                config = config.with_task_types(task_types);
            }

            let mut manager = WorkerManager::new(Arc::clone(&queue), config);
            manager
                .register_handler("echo", |payload: serde_json::Value| async move { Ok(payload) });
            manager.scale_workers(args.count, None).await?;
            manager.start_timeout_sweeper(Duration::from_secs(args.sweep_interval_seconds));

            info!(workers = args.count, "Worker pool running, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            info!("Shutdown requested");
            manager.stop_all().await;
        }

        Commands::Status => {
            let status = queue.status().await?;
            let report = json!({
                "pending_by_priority": status.pending_by_priority,
                "total_pending": status.total_pending,
                "total_processing": status.total_processing,
                "dead_letter_size": status.dead_letter_size,
                "counters": status.counters,
                "by_type": status.type_breakdown(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Show(args) => match queue.get_task(&args.task_id).await? {
            Some(task) => println!("{}", serde_json::to_string_pretty(&task)?),
            None => anyhow::bail!("task {} not found", args.task_id),
        },

        Commands::Cancel(args) => {
            if queue.cancel_task(&args.task_id).await? {
                println!("cancelled {}", args.task_id);
            } else {
                println!("not cancelled (task missing or already claimed)");
            }
        }

        Commands::Dlq(DlqCommand::List(args)) => {
            let tasks = queue.dead_letter_tasks(args.limit).await?;
            println!("{}", serde_json::to_string_pretty(&tasks)?);
        }

        Commands::Dlq(DlqCommand::Retry(args)) => {
            if queue.retry_failed(&args.task_id).await? {
                println!("requeued {}", args.task_id);
            } else {
                println!("not requeued (task missing or not in a failed state)");
            }
        }

        Commands::Sweep => {
            let reaped = queue.check_timeouts().await?;
            println!("{}", serde_json::to_string_pretty(&reaped)?);
        }

        Commands::Purge(args) => {
            if !args.yes {
                anyhow::bail!(
                    "refusing to purge namespace '{}' without --yes",
                    cli.namespace
                );
            }
            queue.purge().await?;
            println!("purged namespace '{}'", cli.namespace);
        }
    }

    Ok(())
}
