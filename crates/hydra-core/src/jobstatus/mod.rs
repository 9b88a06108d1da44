//! Job status aggregation: `update_job_status`, called whenever a task
//! completes, recomputes the job's aggregate state from its tasks.

use anyhow::{Context, Result};
use hydra_db::queries::jobs::JobHandle;
use hydra_db::queries::tasks;
use hydra_db::{HydraStatus, Schema};
use sqlx::PgPool;

/// Recompute and persist `job`'s aggregate status, `task_done`, and `mpf`.
///
/// The sibling task list is snapshotted *before* any transaction is opened;
/// the precedence evaluation below runs against that snapshot, not a
/// re-query inside the transaction, matching the source's
/// `update_job_status(self, failed_node=None, mpf=None)`.
pub async fn update_job_status(
    pool: &PgPool,
    schema: Schema,
    job: &mut JobHandle,
    failed_node: Option<&str>,
    new_mpf: Option<f64>,
) -> Result<()> {
    let task_list = tasks::list_tasks_for_job(pool, schema, job.row.id)
        .await
        .context("failed to snapshot sibling tasks for job status aggregation")?;

    let mut tx = pool
        .begin()
        .await
        .context("failed to start job status transaction")?;

    let task_done = task_list
        .iter()
        .filter(|t| t.status == HydraStatus::Finished)
        .count() as i32;
    job.set_task_done(task_done);

    if let Some(failed_node) = failed_node {
        job.set_attempts(job.row.attempts + 1);
        let mut failed_nodes = job.row.failed_nodes.clone();
        failed_nodes.push_str(failed_node);
        failed_nodes.push(' ');
        job.set_failed_nodes(failed_nodes);
    }

    let new_status = resolve_job_status(&task_list, job.row.attempts, job.row.max_attempts);
    job.set_status(new_status);

    if let Some(new_mpf) = new_mpf {
        let merged = match job.row.mpf {
            Some(old_mpf) => (old_mpf + new_mpf) / 2.0,
            None => new_mpf,
        };
        job.set_mpf(Some(merged));
    }

    job.update(&mut *tx, schema)
        .await
        .context("failed to persist aggregated job status")?;

    tx.commit()
        .await
        .context("failed to commit job status transaction")?;

    Ok(())
}

/// Resolve the job's new status from a pre-transaction sibling snapshot, per
/// the precedence chain in the job aggregation design: first match wins.
fn resolve_job_status(
    task_list: &[hydra_db::RenderTask],
    attempts: i32,
    max_attempts: i32,
) -> HydraStatus {
    if attempts >= max_attempts {
        return HydraStatus::Error;
    }
    if task_list.iter().all(|t| t.status == HydraStatus::Finished) {
        return HydraStatus::Finished;
    }
    if task_list.iter().any(|t| t.status == HydraStatus::Started) {
        return HydraStatus::Started;
    }
    if task_list.iter().any(|t| t.status == HydraStatus::Ready) {
        return HydraStatus::Ready;
    }
    if task_list.iter().any(|t| t.status == HydraStatus::Error) {
        return HydraStatus::Error;
    }
    HydraStatus::Paused
}
