//! Configuration file management for the render farm CLIs.
//!
//! Provides a YAML config file at `~/.config/hydra_farm/hydra.yaml` and a
//! resolution chain: CLI flag > env var > config file > default, mirroring
//! the teacher's TOML-based `GatorConfig::resolve`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use hydra_db::DbConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub networking: NetworkingSection,
    #[serde(default)]
    pub logs: LogsSection,
    #[serde(default)]
    pub general: GeneralSection,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub host: String,
    pub port: u16,
    pub db: String,
    pub username: String,
    pub autologin: bool,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            host: DbConfig::DEFAULT_HOST.to_string(),
            port: DbConfig::DEFAULT_PORT,
            db: DbConfig::DEFAULT_DB.to_string(),
            username: DbConfig::DEFAULT_USERNAME.to_string(),
            autologin: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NetworkingSection {
    pub host_port: u16,
    pub dns_domain_ext: String,
}

impl Default for NetworkingSection {
    fn default() -> Self {
        Self {
            host_port: 8000,
            dns_domain_ext: String::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogsSection {
    pub render_log_path: String,
}

impl Default for LogsSection {
    fn default() -> Self {
        Self {
            render_log_path: "/var/log/hydra_farm".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct GeneralSection {
    pub keep_all_render_logs: bool,
}

/// Return the hydra_farm config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/hydra_farm` or
/// `~/.config/hydra_farm`. We intentionally ignore the platform-specific
/// `dirs::config_dir()` (which returns `~/Library/Application Support` on
/// macOS).
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("hydra_farm");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("hydra_farm")
}

/// Return the path to the hydra_farm config file, honoring the
/// `HYDRA_CONFIG_PATH` env override before falling back to the XDG default.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("HYDRA_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    config_dir().join("hydra.yaml")
}

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile =
        serde_yaml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = serde_yaml::to_string(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

/// Fully resolved configuration, ready for use by any of the four binaries.
#[derive(Debug)]
pub struct HydraConfig {
    pub db_config: DbConfig,
    pub autologin: bool,
    pub host_port: u16,
    pub dns_domain_ext: String,
    pub render_log_path: PathBuf,
    pub keep_all_render_logs: bool,
}

/// CLI-flag overrides accepted by `HydraConfig::resolve`. Each field
/// overrides the corresponding env var/config file/default when present.
#[derive(Debug, Default)]
pub struct ConfigOverrides<'a> {
    pub db_host: Option<&'a str>,
    pub db_port: Option<u16>,
    pub db_name: Option<&'a str>,
    pub db_username: Option<&'a str>,
    pub host_port: Option<u16>,
}

impl HydraConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config
    /// file > built-in default, field by field.
    pub fn resolve(overrides: &ConfigOverrides<'_>) -> Result<Self> {
        let file_config = load_config().ok();
        let file_db = file_config.as_ref().map(|c| &c.database);
        let file_net = file_config.as_ref().map(|c| &c.networking);
        let file_logs = file_config.as_ref().map(|c| &c.logs);
        let file_general = file_config.as_ref().map(|c| &c.general);

        let host = overrides
            .db_host
            .map(str::to_string)
            .or_else(|| std::env::var("HYDRA_DATABASE_HOST").ok())
            .or_else(|| file_db.map(|d| d.host.clone()))
            .unwrap_or_else(|| DbConfig::DEFAULT_HOST.to_string());

        let port = overrides
            .db_port
            .or_else(|| {
                std::env::var("HYDRA_DATABASE_PORT")
                    .ok()
                    .and_then(|v| v.parse().ok())
            })
            .or_else(|| file_db.map(|d| d.port))
            .unwrap_or(DbConfig::DEFAULT_PORT);

        let db = overrides
            .db_name
            .map(str::to_string)
            .or_else(|| std::env::var("HYDRA_DATABASE_NAME").ok())
            .or_else(|| file_db.map(|d| d.db.clone()))
            .unwrap_or_else(|| DbConfig::DEFAULT_DB.to_string());

        let username = overrides
            .db_username
            .map(str::to_string)
            .or_else(|| std::env::var("HYDRA_DATABASE_USERNAME").ok())
            .or_else(|| file_db.map(|d| d.username.clone()))
            .unwrap_or_else(|| DbConfig::DEFAULT_USERNAME.to_string());

        let autologin = file_db.map(|d| d.autologin).unwrap_or(true);

        let host_port = overrides
            .host_port
            .or_else(|| {
                std::env::var("HYDRA_HOST_PORT")
                    .ok()
                    .and_then(|v| v.parse().ok())
            })
            .or_else(|| file_net.map(|n| n.host_port))
            .unwrap_or(8000);

        let dns_domain_ext = file_net.map(|n| n.dns_domain_ext.clone()).unwrap_or_default();

        let render_log_path = file_logs
            .map(|l| PathBuf::from(&l.render_log_path))
            .unwrap_or_else(|| PathBuf::from("/var/log/hydra_farm"));

        let keep_all_render_logs = file_general.map(|g| g.keep_all_render_logs).unwrap_or(false);

        Ok(Self {
            db_config: DbConfig::new(host, port, db, username, None),
            autologin,
            host_port,
            dns_domain_ext,
            render_log_path,
            keep_all_render_logs,
        })
    }
}
