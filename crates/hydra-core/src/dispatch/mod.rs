//! Worker dispatch: claim one task per tick, execute it, and persist the
//! outcome. See `hydra_db::queries::tasks::claim_task` for the claim query
//! itself; this module owns what happens after a claim succeeds.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use hydra_db::queries::{jobs, nodes, tasks};
use hydra_db::{HydraStatus, Schema};
use sqlx::PgPool;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::command::build_command;
use crate::jobstatus::update_job_status;
use crate::worker::WorkerState;

/// Sentinel `exit_code` recorded when the child process never started.
pub const EXIT_CODE_NEVER_STARTED: i32 = -1234;
/// `exit_code` recorded when the worker itself terminated the child.
pub const EXIT_CODE_KILLED: i32 = -1;

/// Path to a task's log file: `<render_log_path>/<task_id:010>.log.txt`.
pub fn task_log_path(render_log_path: &Path, task_id: i32) -> PathBuf {
    render_log_path.join(format!("{task_id:010}.log.txt"))
}

/// One dispatch tick: refresh this node, skip if it is in the offline set,
/// otherwise attempt to claim a task and run it to completion.
///
/// Returns `true` if a task was claimed and run this tick.
pub async fn dispatch_tick(
    pool: &PgPool,
    schema: Schema,
    worker: &WorkerState,
    render_log_path: &Path,
    keep_all_logs: bool,
) -> Result<bool> {
    let host = worker.host.as_ref();
    let node = nodes::fetch_node_by_host(pool, schema, host)
        .await
        .context("failed to refresh node before dispatch tick")?
        .context("this node has no render_nodes row; has it been registered?")?;

    if node.row.status.is_offline_set() {
        return Ok(false);
    }

    let claimed = tasks::claim_task(
        pool,
        schema,
        host,
        node.row.min_priority,
        &node.row.capabilities,
    )
    .await
    .context("dispatch claim query failed")?;

    let Some(claimed) = claimed else {
        return Ok(false);
    };

    info!(task_id = claimed.task.id, job_id = claimed.job.id, "claimed task");
    run_claimed_task(pool, schema, worker, render_log_path, keep_all_logs, claimed).await?;
    Ok(true)
}

async fn run_claimed_task(
    pool: &PgPool,
    schema: Schema,
    worker: &WorkerState,
    render_log_path: &Path,
    keep_all_logs: bool,
    claimed: tasks::ClaimedTask,
) -> Result<()> {
    let host = worker.host.as_ref();
    let command = build_command(&claimed.job, &claimed.task);
    let log_path = task_log_path(render_log_path, claimed.task.id);

    let (exit_code, killed_status, elapsed_secs) =
        execute_command(worker, &command, &log_path, claimed.task.id).await?;

    let mut task_handle = tasks::fetch_task_by_id(pool, schema, claimed.task.id)
        .await
        .context("failed to refetch task after execution")?
        .context("task disappeared mid-execution")?;

    task_handle.set_end_time(Some(Utc::now()));
    task_handle.set_exit_code(Some(exit_code));

    let success = killed_status.is_none() && exit_code == 0;
    match killed_status {
        Some(status) => task_handle.set_status(status),
        None if success => {
            task_handle.set_status(HydraStatus::Finished);
            task_handle.set_mpf(Some(elapsed_secs));
        }
        None => task_handle.set_status(HydraStatus::Ready),
    }
    task_handle
        .update(pool, schema)
        .await
        .context("failed to persist task completion")?;

    let killed = killed_status.is_some();
    let failed_node = if !success && !killed { Some(host) } else { None };
    let mpf = if success { Some(elapsed_secs) } else { None };

    let mut job_handle = jobs::fetch_job_by_id(pool, schema, claimed.job.id)
        .await
        .context("failed to refetch job for status aggregation")?
        .context("job disappeared mid-execution")?;
    update_job_status(pool, schema, &mut job_handle, failed_node, mpf)
        .await
        .context("failed to update job status after task completion")?;

    let mut node_handle = nodes::fetch_node_by_host(pool, schema, host)
        .await
        .context("failed to refetch node after task completion")?
        .context("this node has no render_nodes row")?;
    node_handle.set_task_id(None);
    let next_status = if node_handle.row.status == HydraStatus::Pending {
        HydraStatus::Offline
    } else {
        HydraStatus::Idle
    };
    node_handle.set_status(next_status);
    node_handle
        .update(pool, schema)
        .await
        .context("failed to persist node state after task completion")?;

    if success && !keep_all_logs {
        if let Err(e) = tokio::fs::remove_file(&log_path).await {
            warn!(error = %e, path = %log_path.display(), "failed to remove successful task's log file");
        }
    }

    Ok(())
}

/// Spawn the child command, write the log preamble, wait for exit, and
/// report `(exit_code, killed_status, elapsed_seconds)`. `killed_status` is
/// `Some(status)` when the control protocol's `kill_current_task` fired
/// while this child was running, carrying the status the task should be
/// finalized to instead of the ordinary exit-code-driven outcome.
async fn execute_command(
    worker: &WorkerState,
    command: &[String],
    log_path: &Path,
    task_id: i32,
) -> Result<(i32, Option<HydraStatus>, f64)> {
    let mut log_file = match tokio::fs::File::create(log_path).await {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, path = %log_path.display(), "failed to open task log file");
            return Ok((EXIT_CODE_NEVER_STARTED, None, 0.0));
        }
    };

    let preamble = format!(
        "log: {}\nargv: {:?}\ncommand: {:?}\n\n",
        log_path.display(),
        std::env::args().collect::<Vec<_>>(),
        command
    );
    let _ = log_file.write_all(preamble.as_bytes()).await;

    let Some((program, args)) = command.split_first() else {
        warn!(task_id, "empty command vector, nothing to execute");
        return Ok((EXIT_CODE_NEVER_STARTED, None, 0.0));
    };

    let log_for_stdout = log_file.try_clone().await;
    let log_for_stderr = log_file.try_clone().await;

    let mut cmd = Command::new(program);
    cmd.args(args);
    match log_for_stdout {
        Ok(f) => {
            cmd.stdout(Stdio::from(f.into_std().await));
        }
        Err(_) => {
            cmd.stdout(Stdio::null());
        }
    }
    match log_for_stderr {
        Ok(f) => {
            cmd.stderr(Stdio::from(f.into_std().await));
        }
        Err(_) => {
            cmd.stderr(Stdio::null());
        }
    }

    // Spawn into a new process group (pgid = the child's own pid) so a
    // single `killpg` from the control protocol's kill handler reaches any
    // descendants the child forks, without walking `/proc`.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        unsafe {
            cmd.pre_exec(|| {
                if libc::setpgid(0, 0) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }

    let start = Instant::now();
    let child: Result<Child, std::io::Error> = cmd.spawn();

    let mut child = match child {
        Ok(child) => child,
        Err(e) => {
            warn!(error = %e, task_id, "failed to spawn render command");
            return Ok((EXIT_CODE_NEVER_STARTED, None, 0.0));
        }
    };

    let pgid = child.id().unwrap_or(0) as i32;
    let requested_status = worker.register_child(pgid).await;

    let status = child.wait().await.context("failed to wait on child process")?;
    let elapsed_secs = start.elapsed().as_secs_f64();
    worker.clear_child().await;

    let killed_status = *requested_status.lock().await;
    let exit_code = if killed_status.is_some() {
        EXIT_CODE_KILLED
    } else {
        status.code().unwrap_or(EXIT_CODE_KILLED)
    };
    Ok((exit_code, killed_status, elapsed_secs))
}

/// Crash recovery at worker startup: correct a node left mid-operation by a
/// previous crash, and requeue any task it still held.
pub async fn unstick_node(pool: &PgPool, schema: Schema, host: &str) -> Result<()> {
    let mut node = match nodes::fetch_node_by_host(pool, schema, host).await? {
        Some(node) => node,
        None => return Ok(()),
    };

    if !node.row.status.is_stuck() {
        return Ok(());
    }

    let new_node_status = match node.row.status {
        HydraStatus::Started => HydraStatus::Idle,
        HydraStatus::Pending => HydraStatus::Offline,
        other => other,
    };

    if let Some(task_id) = node.row.task_id {
        if let Some(mut task) = tasks::fetch_task_by_id(pool, schema, task_id).await? {
            task.set_status(HydraStatus::Ready);
            task.set_end_time(Some(Utc::now()));
            task.set_exit_code(Some(999));
            task.update(pool, schema).await?;
        }
    }

    node.set_status(new_node_status);
    node.set_task_id(None);
    node.update(pool, schema).await?;

    Ok(())
}
