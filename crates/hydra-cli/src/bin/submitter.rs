//! Submit a job (and its tasks) from CLI flags. The non-GUI substance of
//! the original submission form: expand a frame range into per-task
//! slices and insert one `jobs` row plus one `tasks` row per slice.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use hydra_cli::config::{ConfigOverrides, HydraConfig};
use hydra_cli::{credentials, logging};
use hydra_core::submission::{expand_frame_slices, parse_archived_flag, MAX_SCRIPT_LEN};
use hydra_db::pool::create_pool;
use hydra_db::queries::{jobs, tasks};
use hydra_db::{JobMode, Schema};
use tracing::info;

#[derive(Copy, Clone, ValueEnum)]
enum SubmitMode {
    MayaRender,
    MayaPy,
    Command,
}

impl From<SubmitMode> for JobMode {
    fn from(mode: SubmitMode) -> Self {
        match mode {
            SubmitMode::MayaRender => JobMode::MayaRender,
            SubmitMode::MayaPy => JobMode::MayaPy,
            SubmitMode::Command => JobMode::Command,
        }
    }
}

#[derive(Parser)]
#[command(name = "submitter", about = "Submit a render job")]
struct Cli {
    #[arg(long, value_enum)]
    mode: SubmitMode,

    #[arg(long)]
    task_file: Option<String>,
    #[arg(long)]
    args: Option<String>,
    #[arg(long)]
    render_layers: Option<String>,
    #[arg(long)]
    project: Option<String>,
    #[arg(long)]
    output_directory: Option<String>,
    #[arg(long)]
    script: Option<String>,

    #[arg(long)]
    start_frame: Option<i32>,
    #[arg(long)]
    end_frame: Option<i32>,
    #[arg(long, default_value_t = 1)]
    by_frame: i32,

    #[arg(long, default_value_t = 50)]
    priority: i32,
    #[arg(long)]
    max_nodes: Option<i32>,
    #[arg(long)]
    timeout: Option<i32>,
    #[arg(long, default_value_t = 3)]
    max_attempts: i32,
    #[arg(long, default_value = "%")]
    requirements: String,
    #[arg(long, default_value = "false")]
    archived: String,
    #[arg(long)]
    owner: Option<String>,

    #[arg(long)]
    database_host: Option<String>,
    #[arg(long)]
    database_port: Option<u16>,
    #[arg(long)]
    database_name: Option<String>,
    #[arg(long)]
    database_username: Option<String>,

    #[arg(long)]
    test_mode: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = run().await {
        eprintln!("submitter: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let _guard = logging::init(&hydra_cli::config::config_dir(), "submitter")?;

    if let Some(script) = &cli.script {
        if script.len() > MAX_SCRIPT_LEN {
            anyhow::bail!("script is {} bytes, exceeds the {MAX_SCRIPT_LEN} byte limit", script.len());
        }
    }

    let overrides = ConfigOverrides {
        db_host: cli.database_host.as_deref(),
        db_port: cli.database_port,
        db_name: cli.database_name.as_deref(),
        db_username: cli.database_username.as_deref(),
        host_port: None,
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

    let slices = match (cli.start_frame, cli.end_frame) {
        (Some(start), Some(end)) => expand_frame_slices(start, end, cli.by_frame),
        _ => vec![(0, 0)],
    };

    let new_job = jobs::NewJob {
        mode: JobMode::from(cli.mode),
        task_file: cli.task_file.as_deref(),
        args: cli.args.as_deref(),
        render_layers: cli.render_layers.as_deref(),
        project: cli.project.as_deref(),
        output_directory: cli.output_directory.as_deref(),
        script: cli.script.as_deref(),
        start_frame: cli.start_frame,
        end_frame: cli.end_frame,
        by_frame: Some(cli.by_frame),
        priority: cli.priority,
        max_nodes: cli.max_nodes,
        timeout: cli.timeout,
        max_attempts: cli.max_attempts,
        requirements: &cli.requirements,
        archived: parse_archived_flag(&cli.archived),
        owner: cli.owner.as_deref(),
    };

    let job = jobs::insert_job(&pool, schema, &new_job, slices.len() as i32)
        .await
        .context("failed to insert job")?;

    for (start, end) in &slices {
        let new_task = tasks::NewTask {
            job_id: job.id,
            priority: cli.priority,
            start_frame: *start,
            end_frame: *end,
        };
        tasks::insert_task(&pool, schema, &new_task)
            .await
            .context("failed to insert task")?;
    }

    info!(job_id = job.id, task_count = slices.len(), "job submitted");
    println!("submitted job {} with {} task(s)", job.id, slices.len());
    Ok(())
}
