//! The worker process: claims and executes tasks on a dispatch timer, sends
//! a pulse on its own timer, and serves the remote kill protocol on a TCP
//! listener. All three run as cooperative loops sharing one `WorkerState`,
//! torn down together by one `CancellationToken` on shutdown.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use hydra_cli::config::{ConfigOverrides, HydraConfig};
use hydra_cli::{credentials, logging};
use hydra_core::dispatch::{dispatch_tick, unstick_node};
use hydra_core::lock::SingleInstanceLock;
use hydra_core::looper::{spawn_loop, LoopSpec};
use hydra_core::protocol::server::run_server;
use hydra_core::WorkerState;
use hydra_db::pool::create_pool;
use hydra_db::queries::nodes;
use hydra_db::Schema;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "render_node", about = "Run this host as a render worker")]
struct Cli {
    /// Hostname this worker serves; must already be registered.
    #[arg(long)]
    host: String,

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

    /// Seconds between dispatch attempts.
    #[arg(long, default_value_t = 5)]
    dispatch_period_secs: u64,

    /// Seconds between pulse updates.
    #[arg(long, default_value_t = 30)]
    pulse_period_secs: u64,

    /// Run against the `test_`-prefixed mirror tables.
    #[arg(long)]
    test_mode: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = run().await {
        eprintln!("render_node: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let basedir = hydra_cli::config::config_dir();
    let _guard = logging::init(&basedir, "render_node")?;

    let lock = match SingleInstanceLock::acquire(&basedir, "render_node") {
        Ok(lock) => lock,
        Err(e) => {
            eprintln!("render_node: {e}");
            std::process::exit(255);
        }
    };
    info!(path = %lock.path().display(), "single-instance lock acquired");

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

    std::fs::create_dir_all(&config.render_log_path).with_context(|| {
        format!(
            "failed to create render log directory {}",
            config.render_log_path.display()
        )
    })?;

    let pool = create_pool(&config.db_config).await?;
    let schema = if cli.test_mode {
        Schema::test_mode()
    } else {
        Schema::production()
    };

    unstick_node(&pool, schema, &cli.host)
        .await
        .context("crash recovery failed")?;

    let worker = WorkerState::new(cli.host.clone());
    let shutdown = CancellationToken::new();

    let listen_addr: SocketAddr = ([0, 0, 0, 0], config.host_port).into();
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind control listener on {listen_addr}"))?;
    info!(addr = %listen_addr, "control server listening");

    let server_handle = {
        let worker = worker.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(run_server(listener, worker, shutdown))
    };

    let dispatch_handle = {
        let pool = pool.clone();
        let worker = worker.clone();
        let render_log_path = config.render_log_path.clone();
        let keep_all_render_logs = config.keep_all_render_logs;
        let spec = LoopSpec::periodic(Duration::from_secs(cli.dispatch_period_secs));
        spawn_loop("dispatch", spec, shutdown.clone(), move || {
            let pool = pool.clone();
            let worker = worker.clone();
            let render_log_path = render_log_path.clone();
            async move {
                dispatch_tick(&pool, schema, &worker, &render_log_path, keep_all_render_logs)
                    .await
                    .map(|_| ())
            }
        })
    };

    let pulse_handle = {
        let pool = pool.clone();
        let host = cli.host.clone();
        let spec = LoopSpec::periodic(Duration::from_secs(cli.pulse_period_secs));
        spawn_loop("pulse", spec, shutdown.clone(), move || {
            let pool = pool.clone();
            let host = host.clone();
            async move { send_pulse(&pool, schema, &host).await }
        })
    };

    tokio::signal::ctrl_c().await.ok();
    info!("shutdown signal received");
    shutdown.cancel();

    let _ = tokio::join!(server_handle, dispatch_handle, pulse_handle);
    drop(lock);
    Ok(())
}

async fn send_pulse(pool: &sqlx::PgPool, schema: Schema, host: &str) -> Result<()> {
    let Some(mut node) = nodes::fetch_node_by_host(pool, schema, host).await? else {
        error!(host, "pulse: node has no render_nodes row");
        return Ok(());
    };
    node.set_pulse(Utc::now());
    node.update(pool, schema).await?;
    Ok(())
}
