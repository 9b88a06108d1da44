//! Controller operations: the job/task/node lifecycle transitions exposed to
//! the farm_view CLI and any other operator-facing surface. Kill operations
//! reach out over the control protocol to whichever node is actually running
//! a task; every other transition is a plain database write guarded by the
//! precondition on the entity's current status.

use anyhow::{Context, Result};
use chrono::Utc;
use hydra_db::queries::{jobs, nodes, tasks};
use hydra_db::{HydraStatus, Schema};
use sqlx::PgPool;

use crate::protocol::client::{self, TcpKillConfig};
use crate::protocol::Response;

/// Outcome of a kill request against a single task.
#[derive(Debug, Clone)]
pub enum KillOutcome {
    /// The task was not running; nothing was done.
    NoOp,
    /// The node accepted the kill request and will finalize the task itself
    /// through its own completion path.
    WorkerTerminated(Response),
    /// The controller finalized the task's status directly, because the
    /// node's row had already diverged or the TCP round-trip failed.
    LocallyFinalized,
}

/// Start (or resume) a job: only if it is currently `PAUSED` or `KILLED`.
/// Moves the job, and any of its `PAUSED`/`KILLED` tasks, to `READY`.
pub async fn job_start(pool: &PgPool, schema: Schema, job_id: i32) -> Result<()> {
    let mut job = jobs::fetch_job_by_id(pool, schema, job_id)
        .await?
        .context("job not found")?;

    if !matches!(job.row.status, HydraStatus::Paused | HydraStatus::Killed) {
        return Ok(());
    }

    tasks::bulk_set_task_status(
        pool,
        schema,
        job_id,
        &[HydraStatus::Paused, HydraStatus::Killed],
        HydraStatus::Ready,
    )
    .await
    .context("failed to start job's tasks")?;

    job.set_status(HydraStatus::Ready);
    job.update(pool, schema).await?;
    Ok(())
}

/// Pause a job: only if it is currently `READY` or `KILLED`. Moves the job,
/// and any of its `READY`/`KILLED` tasks, to `PAUSED`. Tasks already running
/// are left alone; pausing does not interrupt work in flight.
pub async fn job_pause(pool: &PgPool, schema: Schema, job_id: i32) -> Result<()> {
    let mut job = jobs::fetch_job_by_id(pool, schema, job_id)
        .await?
        .context("job not found")?;

    if !matches!(job.row.status, HydraStatus::Ready | HydraStatus::Killed) {
        return Ok(());
    }

    tasks::bulk_set_task_status(
        pool,
        schema,
        job_id,
        &[HydraStatus::Ready, HydraStatus::Killed],
        HydraStatus::Paused,
    )
    .await
    .context("failed to pause job's tasks")?;

    job.set_status(HydraStatus::Paused);
    job.update(pool, schema).await?;
    Ok(())
}

/// Kill every task of a job, reaching over the control protocol to whichever
/// node is currently running one, then force every not-yet-`FINISHED` task
/// to `new_status` as a safety net against a task that raced the kill loop.
/// Returns a per-task outcome so callers can report partial failures rather
/// than a single pass/fail.
pub async fn job_kill(
    pool: &PgPool,
    schema: Schema,
    job_id: i32,
    new_status: HydraStatus,
    port: u16,
    tcp: TcpKillConfig,
) -> Result<Vec<(i32, KillOutcome)>> {
    let task_rows = tasks::list_tasks_for_job(pool, schema, job_id)
        .await
        .context("failed to list tasks for job kill")?;

    let mut outcomes = Vec::with_capacity(task_rows.len());
    for task in &task_rows {
        let outcome = task_kill(pool, schema, task.id, new_status, port, tcp).await?;
        outcomes.push((task.id, outcome));
    }

    let mut job = jobs::fetch_job_by_id(pool, schema, job_id)
        .await?
        .context("job not found")?;
    job.set_status(new_status);
    job.update(pool, schema).await?;

    tasks::bulk_force_task_status_excluding(pool, schema, job_id, HydraStatus::Finished, new_status)
        .await
        .context("failed to force remaining task statuses after job kill")?;

    Ok(outcomes)
}

/// Reset a job and every one of its tasks back to a freshly-submitted state.
pub async fn job_reset(pool: &PgPool, schema: Schema, job_id: i32) -> Result<()> {
    tasks::bulk_reset_run_state_for_job(pool, schema, job_id)
        .await
        .context("failed to reset job's tasks")?;

    let mut job = jobs::fetch_job_by_id(pool, schema, job_id)
        .await?
        .context("job not found")?;
    job.reset_run_state();
    job.update(pool, schema).await?;
    Ok(())
}

/// Start a single task: only if it is `PAUSED` or `KILLED`. If the parent
/// job had retreated to `PAUSED`, it is advanced back to `READY` too.
pub async fn task_start(pool: &PgPool, schema: Schema, task_id: i32) -> Result<()> {
    let mut task = tasks::fetch_task_by_id(pool, schema, task_id)
        .await?
        .context("task not found")?;

    if !matches!(task.row.status, HydraStatus::Paused | HydraStatus::Killed) {
        return Ok(());
    }
    task.set_status(HydraStatus::Ready);
    task.update(pool, schema).await?;

    let mut job = jobs::fetch_job_by_id(pool, schema, task.row.job_id)
        .await?
        .context("task's job not found")?;
    if matches!(job.row.status, HydraStatus::Paused | HydraStatus::Killed) {
        job.set_status(HydraStatus::Ready);
        job.update(pool, schema).await?;
    }
    Ok(())
}

/// Pause a single not-yet-claimed task. If the parent job was `READY`, it
/// retreats to `PAUSED` too.
pub async fn task_pause(pool: &PgPool, schema: Schema, task_id: i32) -> Result<()> {
    let mut task = tasks::fetch_task_by_id(pool, schema, task_id)
        .await?
        .context("task not found")?;

    if !matches!(task.row.status, HydraStatus::Ready | HydraStatus::Killed) {
        return Ok(());
    }
    task.set_status(HydraStatus::Paused);
    task.update(pool, schema).await?;

    let mut job = jobs::fetch_job_by_id(pool, schema, task.row.job_id)
        .await?
        .context("task's job not found")?;
    if job.row.status == HydraStatus::Ready {
        job.set_status(HydraStatus::Paused);
        job.update(pool, schema).await?;
    }
    Ok(())
}

/// Kill a single task. If it is not running, this is a no-op. If it is
/// running and the node's own bookkeeping still agrees it owns the task,
/// the node is contacted over the control protocol; the worker's own
/// completion path finalizes the task once its child exits. If the node
/// disagrees, or the TCP round-trip fails, the controller finalizes the
/// task's status (and the node's) directly.
pub async fn task_kill(
    pool: &PgPool,
    schema: Schema,
    task_id: i32,
    new_status: HydraStatus,
    port: u16,
    tcp: TcpKillConfig,
) -> Result<KillOutcome> {
    let task = tasks::fetch_task_by_id(pool, schema, task_id)
        .await?
        .context("task not found")?;

    if task.row.status != HydraStatus::Started {
        return Ok(KillOutcome::NoOp);
    }

    let host = task
        .row
        .host
        .as_deref()
        .context("task is STARTED but has no host recorded")?;
    let node = nodes::fetch_node_by_host(pool, schema, host)
        .await?
        .context("task's node has no render_nodes row")?;

    if node.row.task_id != Some(task_id) {
        return finalize_kill_locally(pool, schema, task_id, new_status, node).await;
    }

    let ip_addr = node
        .row
        .ip_addr
        .as_deref()
        .context("task's node has no ip_addr recorded")?;
    let addr: std::net::IpAddr = ip_addr
        .parse()
        .with_context(|| format!("invalid ip_addr on node {host}: {ip_addr}"))?;

    let response = client::kill_current_task((addr, port).into(), new_status.code(), tcp).await;
    if response.err {
        finalize_kill_locally(pool, schema, task_id, new_status, node).await
    } else {
        Ok(KillOutcome::WorkerTerminated(response))
    }
}

async fn finalize_kill_locally(
    pool: &PgPool,
    schema: Schema,
    task_id: i32,
    new_status: HydraStatus,
    mut node: hydra_db::queries::nodes::NodeHandle,
) -> Result<KillOutcome> {
    let mut task = tasks::fetch_task_by_id(pool, schema, task_id)
        .await?
        .context("task not found")?;
    task.set_status(new_status);
    task.set_exit_code(Some(1));
    task.set_end_time(Some(Utc::now()));
    task.update(pool, schema).await?;

    let next_node_status = if node.row.status == HydraStatus::Started {
        HydraStatus::Idle
    } else {
        HydraStatus::Offline
    };
    node.set_status(next_node_status);
    node.set_task_id(None);
    node.update(pool, schema).await?;

    Ok(KillOutcome::LocallyFinalized)
}

/// Reset a single task: no-op if it is currently running. If the parent job
/// was `KILLED` and no sibling task is `STARTED`, the job retreats to
/// `PAUSED`.
pub async fn task_reset(pool: &PgPool, schema: Schema, task_id: i32) -> Result<()> {
    let mut task = tasks::fetch_task_by_id(pool, schema, task_id)
        .await?
        .context("task not found")?;

    if task.row.status == HydraStatus::Started {
        return Ok(());
    }
    let job_id = task.row.job_id;
    task.reset_run_state();
    task.update(pool, schema).await?;

    let mut job = jobs::fetch_job_by_id(pool, schema, job_id)
        .await?
        .context("task's job not found")?;
    if job.row.status == HydraStatus::Killed {
        let siblings = tasks::list_tasks_for_job(pool, schema, job_id).await?;
        if !siblings.iter().any(|t| t.status == HydraStatus::Started) {
            job.set_status(HydraStatus::Paused);
            job.update(pool, schema).await?;
        }
    }
    Ok(())
}

/// Bring a node back online: `OFFLINE` becomes `IDLE`, `PENDING` becomes
/// `STARTED` (a drain was requested but the node picked work back up);
/// otherwise a no-op.
pub async fn node_online(pool: &PgPool, schema: Schema, node_id: i32) -> Result<()> {
    let mut node = nodes::fetch_node_by_id(pool, schema, node_id)
        .await?
        .context("node not found")?;

    let next = match node.row.status {
        HydraStatus::Offline => HydraStatus::Idle,
        HydraStatus::Pending => HydraStatus::Started,
        _ => return Ok(()),
    };
    node.set_status(next);
    node.update(pool, schema).await?;
    Ok(())
}

/// Take a node out of dispatch consideration: if it is currently `STARTED`,
/// it drains to `PENDING` and finishes its current task before going fully
/// offline; otherwise it goes `OFFLINE` immediately.
pub async fn node_offline(pool: &PgPool, schema: Schema, node_id: i32) -> Result<()> {
    let mut node = nodes::fetch_node_by_id(pool, schema, node_id)
        .await?
        .context("node not found")?;

    let next = if node.row.status == HydraStatus::Started {
        HydraStatus::Pending
    } else {
        HydraStatus::Offline
    };
    node.set_status(next);
    node.update(pool, schema).await?;
    Ok(())
}

/// Drain a node immediately: if it is running a task, kill it (to
/// `new_status`) rather than waiting for it to finish, then force the node
/// offline and clear its `task_id`. A no-op on a node that is not `STARTED`.
pub async fn node_get_off(
    pool: &PgPool,
    schema: Schema,
    node_id: i32,
    new_status: HydraStatus,
    port: u16,
    tcp: TcpKillConfig,
) -> Result<()> {
    let mut node = nodes::fetch_node_by_id(pool, schema, node_id)
        .await?
        .context("node not found")?;

    if node.row.status != HydraStatus::Started {
        return Ok(());
    }

    node.set_status(HydraStatus::Pending);
    node.update(pool, schema).await?;

    if let Some(task_id) = node.row.task_id {
        task_kill(pool, schema, task_id, new_status, port, tcp).await?;
    }

    let mut node = nodes::fetch_node_by_id(pool, schema, node_id)
        .await?
        .context("node not found")?;
    node.set_status(HydraStatus::Offline);
    node.set_task_id(None);
    node.update(pool, schema).await?;
    Ok(())
}
