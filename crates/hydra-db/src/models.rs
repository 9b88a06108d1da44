//! Row-mapped types for the four render-farm tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

use crate::status::HydraStatus;

/// The job's execution mode, and how its command vector is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobMode {
    MayaRender,
    MayaPy,
    Command,
}

impl fmt::Display for JobMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobMode::MayaRender => "Maya Render",
            JobMode::MayaPy => "MayaPy",
            JobMode::Command => "Command",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid job mode: {0:?}")]
pub struct JobModeParseError(pub String);

impl FromStr for JobMode {
    type Err = JobModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Maya Render" => Ok(JobMode::MayaRender),
            "MayaPy" => Ok(JobMode::MayaPy),
            "Command" => Ok(JobMode::Command),
            other => Err(JobModeParseError(other.to_owned())),
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for JobMode {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for JobMode {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <String as sqlx::Encode<sqlx::Postgres>>::encode(self.to_string(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for JobMode {
    fn decode(
        value: sqlx::postgres::PgValueRef<'r>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let s = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        JobMode::from_str(&s).map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
    }
}

/// A worker host, mapped from a `render_nodes` row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RenderNode {
    pub id: i32,
    pub host: String,
    pub ip_addr: Option<String>,
    pub status: HydraStatus,
    pub task_id: Option<i32>,
    pub min_priority: i32,
    pub capabilities: String,
    pub is_render_node: bool,
    pub platform: Option<String>,
    pub software_version: Option<String>,
    pub pulse: Option<DateTime<Utc>>,
}

/// A user-submitted job, mapped from a `jobs` row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RenderJob {
    pub id: i32,
    pub mode: JobMode,
    pub task_file: Option<String>,
    pub args: Option<String>,
    pub render_layers: Option<String>,
    pub project: Option<String>,
    pub output_directory: Option<String>,
    pub script: Option<String>,
    pub start_frame: Option<i32>,
    pub end_frame: Option<i32>,
    pub by_frame: Option<i32>,
    pub priority: i32,
    pub max_nodes: Option<i32>,
    pub timeout: Option<i32>,
    pub max_attempts: i32,
    pub requirements: String,
    pub archived: bool,
    pub status: HydraStatus,
    pub task_total: i32,
    pub task_done: i32,
    pub attempts: i32,
    pub failed_nodes: String,
    pub mpf: Option<f64>,
    pub creation_time: DateTime<Utc>,
    pub owner: Option<String>,
}

/// A single frame-range work unit, mapped from a `tasks` row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RenderTask {
    pub id: i32,
    pub job_id: i32,
    pub host: Option<String>,
    pub priority: i32,
    pub start_frame: i32,
    pub end_frame: i32,
    pub status: HydraStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub mpf: Option<f64>,
}

/// A recognized capability token, consulted only for CLI listing.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Capability {
    pub id: i32,
    pub name: String,
}
