use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, QueryBuilder};

use crate::dirty::Dirty;
use crate::models::RenderNode;
use crate::schema::Schema;
use crate::status::HydraStatus;

/// A `render_nodes` row plus its dirty-tracking handle.
pub type NodeHandle = Dirty<RenderNode>;

/// Insert a newly registered node. Fails with a unique-violation error if
/// `host` already has a row, mirroring the source's `IntegrityError` path
/// (see `register.py`); callers should treat that as "already registered",
/// not a hard failure.
pub async fn insert_node<'e>(
    exec: impl PgExecutor<'e>,
    schema: Schema,
    host: &str,
    ip_addr: Option<&str>,
    platform: &str,
) -> Result<RenderNode> {
    let table = schema.render_nodes();
    let row: RenderNode = sqlx::query_as(&format!(
        "INSERT INTO {table} (host, ip_addr, platform, status, min_priority, capabilities, is_render_node) \
         VALUES ($1, $2, $3, $4, 0, '', true) \
         RETURNING *"
    ))
    .bind(host)
    .bind(ip_addr)
    .bind(platform)
    .bind(HydraStatus::Offline)
    .fetch_one(exec)
    .await
    .context("failed to insert render node")?;
    Ok(row)
}

pub async fn fetch_node_by_id<'e>(
    exec: impl PgExecutor<'e>,
    schema: Schema,
    id: i32,
) -> Result<Option<NodeHandle>> {
    let table = schema.render_nodes();
    let row: Option<RenderNode> = sqlx::query_as(&format!("SELECT * FROM {table} WHERE id = $1"))
        .bind(id)
        .fetch_optional(exec)
        .await
        .context("failed to fetch render node by id")?;
    Ok(row.map(Dirty::from_db))
}

pub async fn fetch_node_by_host<'e>(
    exec: impl PgExecutor<'e>,
    schema: Schema,
    host: &str,
) -> Result<Option<NodeHandle>> {
    let table = schema.render_nodes();
    let row: Option<RenderNode> = sqlx::query_as(&format!("SELECT * FROM {table} WHERE host = $1"))
        .bind(host)
        .fetch_optional(exec)
        .await
        .context("failed to fetch render node by host")?;
    Ok(row.map(Dirty::from_db))
}

pub async fn list_nodes<'e>(exec: impl PgExecutor<'e>, schema: Schema) -> Result<Vec<RenderNode>> {
    let table = schema.render_nodes();
    let rows: Vec<RenderNode> = sqlx::query_as(&format!("SELECT * FROM {table} ORDER BY id"))
        .fetch_all(exec)
        .await
        .context("failed to list render nodes")?;
    Ok(rows)
}

impl NodeHandle {
    pub fn set_status(&mut self, status: HydraStatus) {
        self.row.status = status;
        self.mark_dirty("status");
    }

    pub fn set_task_id(&mut self, task_id: Option<i32>) {
        self.row.task_id = task_id;
        self.mark_dirty("task_id");
    }

    pub fn set_pulse(&mut self, pulse: DateTime<Utc>) {
        self.row.pulse = Some(pulse);
        self.mark_dirty("pulse");
    }

    pub fn set_min_priority(&mut self, min_priority: i32) {
        self.row.min_priority = min_priority;
        self.mark_dirty("min_priority");
    }

    pub fn set_capabilities(&mut self, capabilities: String) {
        self.row.capabilities = capabilities;
        self.mark_dirty("capabilities");
    }

    pub fn set_ip_addr(&mut self, ip_addr: Option<String>) {
        self.row.ip_addr = ip_addr;
        self.mark_dirty("ip_addr");
    }

    /// Flush the dirty column set with a single `UPDATE`. A no-op if nothing
    /// was changed since the last flush.
    pub async fn update<'e>(&mut self, exec: impl PgExecutor<'e>, schema: Schema) -> Result<()> {
        if !self.is_dirty() {
            return Ok(());
        }
        let table = schema.render_nodes();
        let mut qb = QueryBuilder::new(format!("UPDATE {table} SET "));
        let mut first = true;
        let mut columns: Vec<_> = self.dirty_columns().collect();
        columns.sort_unstable();
        for column in &columns {
            if !first {
                qb.push(", ");
            }
            first = false;
            qb.push(*column).push(" = ");
            match *column {
                "status" => {
                    qb.push_bind(self.row.status);
                }
                "task_id" => {
                    qb.push_bind(self.row.task_id);
                }
                "pulse" => {
                    qb.push_bind(self.row.pulse);
                }
                "min_priority" => {
                    qb.push_bind(self.row.min_priority);
                }
                "capabilities" => {
                    qb.push_bind(self.row.capabilities.clone());
                }
                "ip_addr" => {
                    qb.push_bind(self.row.ip_addr.clone());
                }
                other => unreachable!("unhandled dirty column on render_nodes: {other}"),
            }
        }
        qb.push(" WHERE id = ").push_bind(self.row.id);
        qb.build()
            .execute(exec)
            .await
            .context("failed to update render node")?;
        self.clear_dirty();
        Ok(())
    }
}
