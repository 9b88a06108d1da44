//! Database query functions for the `capabilities` table. A trivial
//! lookup table: the set of capability tokens a node's `capabilities`
//! string can be checked against by CLI tooling.

use anyhow::{Context, Result};
use sqlx::PgExecutor;

use crate::models::Capability;
use crate::schema::Schema;

pub async fn insert_capability<'e>(
    exec: impl PgExecutor<'e>,
    schema: Schema,
    name: &str,
) -> Result<Capability> {
    let table = schema.capabilities();
    let row: Capability = sqlx::query_as(&format!(
        "INSERT INTO {table} (name) VALUES ($1) RETURNING *"
    ))
    .bind(name)
    .fetch_one(exec)
    .await
    .context("failed to insert capability")?;
    Ok(row)
}

pub async fn list_capabilities<'e>(
    exec: impl PgExecutor<'e>,
    schema: Schema,
) -> Result<Vec<Capability>> {
    let table = schema.capabilities();
    let rows: Vec<Capability> = sqlx::query_as(&format!("SELECT * FROM {table} ORDER BY name"))
        .fetch_all(exec)
        .await
        .context("failed to list capabilities")?;
    Ok(rows)
}
