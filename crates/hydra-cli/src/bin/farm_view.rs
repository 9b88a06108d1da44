//! Read-only farm listings, plus the full controller-operations surface
//! (job/task/node lifecycle transitions, including remote kill) exposed as
//! subcommands. The non-GUI substance of the original queue viewer.

use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use hydra_cli::config::{ConfigOverrides, HydraConfig};
use hydra_cli::{credentials, logging};
use hydra_core::controller::{self, KillOutcome};
use hydra_core::protocol::client::TcpKillConfig;
use hydra_db::pool::create_pool;
use hydra_db::queries::{capabilities, jobs, nodes, tasks};
use hydra_db::{HydraStatus, Schema};

#[derive(Parser)]
#[command(name = "farm_view", about = "View and control the render farm")]
struct Cli {
    #[arg(long)]
    database_host: Option<String>,
    #[arg(long)]
    database_port: Option<u16>,
    #[arg(long)]
    database_name: Option<String>,
    #[arg(long)]
    database_username: Option<String>,
    #[arg(long)]
    host_port: Option<u16>,

    #[arg(long)]
    test_mode: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List all jobs.
    Jobs,
    /// List all tasks belonging to a job.
    Tasks { job_id: i32 },
    /// List all registered nodes.
    Nodes,
    /// List all recognized capability tokens.
    Capabilities,
    /// Resume a job's paused tasks.
    JobStart { job_id: i32 },
    /// Pause a job's not-yet-running tasks.
    JobPause { job_id: i32 },
    /// Kill every unfinished task of a job.
    JobKill { job_id: i32 },
    /// Reset a job and its tasks to a freshly-submitted state.
    JobReset { job_id: i32 },
    /// Mark a single task ready to be claimed again.
    TaskStart { task_id: i32 },
    /// Take a single not-yet-claimed task out of the dispatch pool.
    TaskPause { task_id: i32 },
    /// Kill a single task.
    TaskKill { task_id: i32 },
    /// Reset a single task to a freshly-queued state.
    TaskReset { task_id: i32 },
    /// Bring a node back online.
    NodeOnline { node_id: i32 },
    /// Take a node out of dispatch consideration immediately.
    NodeOffline { node_id: i32 },
    /// Ask a node to go offline once its current task finishes.
    NodeGetOff { node_id: i32 },
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = run().await {
        eprintln!("farm_view: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let _guard = logging::init(&hydra_cli::config::config_dir(), "farm_view")?;

    let overrides = ConfigOverrides {
        db_host: cli.database_host.as_deref(),
        db_port: cli.database_port,
        db_name: cli.database_name.as_deref(),
        db_username: cli.database_username.as_deref(),
        host_port: cli.host_port,
    };
    let mut config = HydraConfig::resolve(&overrides)?;
    let password = credentials::resolve_password(&config.db_config.username, config.autologin)?;
    config.db_config.password = Some(password);

    let pool = create_pool(&config.db_config).await?;
    let schema = if cli.test_mode {
        Schema::test_mode()
    } else {
        Schema::production()
    };
    let port = config.host_port;
    let tcp = TcpKillConfig {
        timeout: Duration::from_secs(10),
    };

    match cli.command {
        Command::Jobs => {
            for job in jobs::list_jobs(&pool, schema).await? {
                println!(
                    "{:>6}  {:<10}  {}  priority={} attempts={}/{} done={}/{}",
                    job.id,
                    job.status.nice_name(),
                    job.mode,
                    job.priority,
                    job.attempts,
                    job.max_attempts,
                    job.task_done,
                    job.task_total
                );
            }
        }
        Command::Tasks { job_id } => {
            for task in tasks::list_tasks_for_job(&pool, schema, job_id).await? {
                println!(
                    "{:>6}  {:<10}  frames {}-{}  host={}",
                    task.id,
                    task.status.nice_name(),
                    task.start_frame,
                    task.end_frame,
                    task.host.as_deref().unwrap_or("-")
                );
            }
        }
        Command::Nodes => {
            for node in nodes::list_nodes(&pool, schema).await? {
                println!(
                    "{:>6}  {:<16}  {:<10}  task_id={}",
                    node.id,
                    node.host,
                    node.status.nice_name(),
                    node.task_id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string())
                );
            }
        }
        Command::Capabilities => {
            for cap in capabilities::list_capabilities(&pool, schema).await? {
                println!("{:>6}  {}", cap.id, cap.name);
            }
        }
        Command::JobStart { job_id } => {
            controller::job_start(&pool, schema, job_id).await?;
            println!("job {job_id} started");
        }
        Command::JobPause { job_id } => {
            controller::job_pause(&pool, schema, job_id).await?;
            println!("job {job_id} paused");
        }
        Command::JobKill { job_id } => {
            let outcomes =
                controller::job_kill(&pool, schema, job_id, HydraStatus::Killed, port, tcp)
                    .await?;
            for (task_id, outcome) in outcomes {
                print_kill_outcome(task_id, &outcome);
            }
        }
        Command::JobReset { job_id } => {
            controller::job_reset(&pool, schema, job_id).await?;
            println!("job {job_id} reset");
        }
        Command::TaskStart { task_id } => {
            controller::task_start(&pool, schema, task_id).await?;
            println!("task {task_id} started");
        }
        Command::TaskPause { task_id } => {
            controller::task_pause(&pool, schema, task_id).await?;
            println!("task {task_id} paused");
        }
        Command::TaskKill { task_id } => {
            let outcome =
                controller::task_kill(&pool, schema, task_id, HydraStatus::Killed, port, tcp)
                    .await?;
            print_kill_outcome(task_id, &outcome);
        }
        Command::TaskReset { task_id } => {
            controller::task_reset(&pool, schema, task_id).await?;
            println!("task {task_id} reset");
        }
        Command::NodeOnline { node_id } => {
            controller::node_online(&pool, schema, node_id).await?;
            println!("node {node_id} online");
        }
        Command::NodeOffline { node_id } => {
            controller::node_offline(&pool, schema, node_id).await?;
            println!("node {node_id} offline");
        }
        Command::NodeGetOff { node_id } => {
            controller::node_get_off(&pool, schema, node_id, HydraStatus::Killed, port, tcp)
                .await?;
            println!("node {node_id} drained offline");
        }
    }

    Ok(())
}

fn print_kill_outcome(task_id: i32, outcome: &KillOutcome) {
    match outcome {
        KillOutcome::NoOp => println!("task {task_id}: not running, nothing to do"),
        KillOutcome::WorkerTerminated(response) => println!("task {task_id}: {}", response.msg),
        KillOutcome::LocallyFinalized => {
            println!("task {task_id}: finalized locally (worker unreachable)")
        }
    }
}
