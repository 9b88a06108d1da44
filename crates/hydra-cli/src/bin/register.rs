//! Register this host as a render node.
//!
//! The non-GUI substance of the original registration step: insert a
//! `render_nodes` row for a given host if one does not already exist.

use anyhow::{Context, Result};
use clap::Parser;
use hydra_cli::config::{ConfigOverrides, HydraConfig};
use hydra_cli::{credentials, logging};
use hydra_db::pool::{create_pool, ensure_database_exists};
use hydra_db::queries::nodes;
use hydra_db::Schema;
use tracing::info;

#[derive(Parser)]
#[command(name = "register", about = "Register this host as a render node")]
struct Cli {
    /// Hostname to register (must be resolvable by other nodes).
    #[arg(long)]
    host: String,

    /// This host's IP address, used by remote kill requests.
    #[arg(long)]
    ip_addr: Option<String>,

    /// Platform identifier (e.g. "linux", "windows").
    #[arg(long)]
    platform: Option<String>,

    #[arg(long)]
    database_host: Option<String>,
    #[arg(long)]
    database_port: Option<u16>,
    #[arg(long)]
    database_name: Option<String>,
    #[arg(long)]
    database_username: Option<String>,

    /// Run against the `test_`-prefixed mirror tables.
    #[arg(long)]
    test_mode: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = run().await {
        eprintln!("register: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let _guard = logging::init(&hydra_cli::config::config_dir(), "register")?;

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

    ensure_database_exists(&config.db_config).await?;
    let pool = create_pool(&config.db_config).await?;

    let schema = if cli.test_mode {
        Schema::test_mode()
    } else {
        Schema::production()
    };

    match nodes::fetch_node_by_host(&pool, schema, &cli.host).await? {
        Some(_) => {
            info!(host = %cli.host, "node already registered");
            println!("{} is already registered", cli.host);
        }
        None => {
            let platform = cli.platform.unwrap_or_else(|| std::env::consts::OS.to_string());
            nodes::insert_node(&pool, schema, &cli.host, cli.ip_addr.as_deref(), &platform)
                .await
                .context("failed to register node")?;
            info!(host = %cli.host, "node registered");
            println!("registered {}", cli.host);
        }
    }

    Ok(())
}
