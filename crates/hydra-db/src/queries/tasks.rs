//! Database query functions for the `tasks` table, including the dispatch
//! claim query that is the heart of the worker's render loop.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, QueryBuilder};

use crate::dirty::Dirty;
use crate::models::RenderTask;
use crate::schema::Schema;
use crate::status::HydraStatus;

/// A `tasks` row plus its dirty-tracking handle.
pub type TaskHandle = Dirty<RenderTask>;

pub struct NewTask {
    pub job_id: i32,
    pub priority: i32,
    pub start_frame: i32,
    pub end_frame: i32,
}

pub async fn insert_task<'e>(
    exec: impl PgExecutor<'e>,
    schema: Schema,
    new_task: &NewTask,
) -> Result<RenderTask> {
    let table = schema.tasks();
    let row: RenderTask = sqlx::query_as(&format!(
        "INSERT INTO {table} (job_id, priority, start_frame, end_frame, status) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *"
    ))
    .bind(new_task.job_id)
    .bind(new_task.priority)
    .bind(new_task.start_frame)
    .bind(new_task.end_frame)
    .bind(HydraStatus::Ready)
    .fetch_one(exec)
    .await
    .context("failed to insert task")?;
    Ok(row)
}

pub async fn fetch_task_by_id<'e>(
    exec: impl PgExecutor<'e>,
    schema: Schema,
    id: i32,
) -> Result<Option<TaskHandle>> {
    let table = schema.tasks();
    let row: Option<RenderTask> = sqlx::query_as(&format!("SELECT * FROM {table} WHERE id = $1"))
        .bind(id)
        .fetch_optional(exec)
        .await
        .context("failed to fetch task by id")?;
    Ok(row.map(Dirty::from_db))
}

pub async fn list_tasks_for_job<'e>(
    exec: impl PgExecutor<'e>,
    schema: Schema,
    job_id: i32,
) -> Result<Vec<RenderTask>> {
    let table = schema.tasks();
    let rows: Vec<RenderTask> = sqlx::query_as(&format!(
        "SELECT * FROM {table} WHERE job_id = $1 ORDER BY id ASC"
    ))
    .bind(job_id)
    .fetch_all(exec)
    .await
    .context("failed to list tasks for job")?;
    Ok(rows)
}

/// Sibling tasks of `task_id` within the same job (excludes `task_id` itself).
pub async fn list_other_tasks<'e>(
    exec: impl PgExecutor<'e>,
    schema: Schema,
    job_id: i32,
    task_id: i32,
) -> Result<Vec<RenderTask>> {
    let table = schema.tasks();
    let rows: Vec<RenderTask> = sqlx::query_as(&format!(
        "SELECT * FROM {table} WHERE job_id = $1 AND id != $2 ORDER BY id ASC"
    ))
    .bind(job_id)
    .bind(task_id)
    .fetch_all(exec)
    .await
    .context("failed to list sibling tasks")?;
    Ok(rows)
}

/// The result of a successful dispatch claim: the claimed task plus the
/// job's mode-specific command fields, fetched inside the same transaction.
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub task: RenderTask,
    pub job: crate::models::RenderJob,
}

/// Atomically claim one `READY` task for `host`, per the dispatch claim
/// algorithm: status, archival, priority floor, attempt budget, failed-node
/// exclusion, and capability/requirements `LIKE` match all filter the
/// candidate set; the match is ordered by priority desc, id asc, and the
/// first row is claimed within the same transaction that selected it.
///
/// Returns `Ok(None)` when no task matches (claim contention or empty queue
/// are both silent, per the error-handling design — this is not an error).
pub async fn claim_task(
    pool: &sqlx::PgPool,
    schema: Schema,
    host: &str,
    min_priority: i32,
    capabilities: &str,
) -> Result<Option<ClaimedTask>> {
    let tasks_table = schema.tasks();
    let jobs_table = schema.jobs();

    let mut tx = pool.begin().await.context("failed to start claim transaction")?;

    let not_failed_pattern = format!("%{host}%");

    let candidate: Option<RenderTask> = sqlx::query_as(&format!(
        "SELECT T.* FROM {tasks_table} T \
         JOIN {jobs_table} J ON T.job_id = J.id \
         WHERE T.status = $1 \
           AND J.archived = false \
           AND T.priority > $2 \
           AND J.max_attempts > J.attempts \
           AND J.failed_nodes NOT LIKE $3 \
           AND $4 LIKE J.requirements \
         ORDER BY T.priority DESC, T.id ASC \
         LIMIT 1 \
         FOR UPDATE OF T SKIP LOCKED"
    ))
    .bind(HydraStatus::Ready)
    .bind(min_priority)
    .bind(&not_failed_pattern)
    .bind(capabilities)
    .fetch_optional(&mut *tx)
    .await
    .context("failed to run dispatch claim query")?;

    let Some(mut task) = candidate else {
        tx.commit().await.ok();
        return Ok(None);
    };

    let job: crate::models::RenderJob =
        sqlx::query_as(&format!("SELECT * FROM {jobs_table} WHERE id = $1"))
            .bind(task.job_id)
            .fetch_one(&mut *tx)
            .await
            .context("failed to fetch claimed task's job")?;

    let now = Utc::now();
    task.status = HydraStatus::Started;
    task.host = Some(host.to_owned());
    task.start_time = Some(now);

    sqlx::query(&format!(
        "UPDATE {tasks_table} SET status = $1, host = $2, start_time = $3 WHERE id = $4"
    ))
    .bind(task.status)
    .bind(&task.host)
    .bind(task.start_time)
    .bind(task.id)
    .execute(&mut *tx)
    .await
    .context("failed to write claimed task")?;

    sqlx::query(&format!("UPDATE {jobs_table} SET status = $1 WHERE id = $2"))
        .bind(HydraStatus::Started)
        .bind(job.id)
        .execute(&mut *tx)
        .await
        .context("failed to mark job started on claim")?;

    sqlx::query(&format!(
        "UPDATE {} SET status = $1, task_id = $2 WHERE host = $3",
        schema.render_nodes()
    ))
    .bind(HydraStatus::Started)
    .bind(task.id)
    .bind(host)
    .execute(&mut *tx)
    .await
    .context("failed to mark node started on claim")?;

    tx.commit().await.context("failed to commit claim transaction")?;

    let mut job = job;
    job.status = HydraStatus::Started;

    Ok(Some(ClaimedTask { task, job }))
}

/// Bulk-transition every task of `job_id` currently in one of `from` to
/// `to`. Used by the job-level controller operations (`job.start()`,
/// `job.pause()`), which move a whole sibling set in one step rather than
/// looping per-task handles.
pub async fn bulk_set_task_status<'e>(
    exec: impl PgExecutor<'e>,
    schema: Schema,
    job_id: i32,
    from: &[HydraStatus],
    to: HydraStatus,
) -> Result<u64> {
    let table = schema.tasks();
    let from_codes: Vec<String> = from.iter().map(|s| s.code().to_string()).collect();
    let result = sqlx::query(&format!(
        "UPDATE {table} SET status = $1 WHERE job_id = $2 AND status = ANY($3::text[])"
    ))
    .bind(to)
    .bind(job_id)
    .bind(&from_codes)
    .execute(exec)
    .await
    .context("failed to bulk-update task status for job")?;
    Ok(result.rows_affected())
}

/// Force every task of `job_id` not already `exclude` to `to`. Used by
/// `job.kill()`'s "for any task not already FINISHED" step.
pub async fn bulk_force_task_status_excluding<'e>(
    exec: impl PgExecutor<'e>,
    schema: Schema,
    job_id: i32,
    exclude: HydraStatus,
    to: HydraStatus,
) -> Result<u64> {
    let table = schema.tasks();
    let result = sqlx::query(&format!(
        "UPDATE {table} SET status = $1 WHERE job_id = $2 AND status != $3"
    ))
    .bind(to)
    .bind(job_id)
    .bind(exclude)
    .execute(exec)
    .await
    .context("failed to force task status for job")?;
    Ok(result.rows_affected())
}

/// Reset every run-state column on every task of `job_id` back to a
/// freshly-queued task, mirroring [`TaskHandle::reset_run_state`] applied
/// to a whole sibling set at once. Used by `job.reset()`.
pub async fn bulk_reset_run_state_for_job<'e>(
    exec: impl PgExecutor<'e>,
    schema: Schema,
    job_id: i32,
) -> Result<u64> {
    let table = schema.tasks();
    let result = sqlx::query(&format!(
        "UPDATE {table} SET status = $1, host = NULL, start_time = NULL, \
         end_time = NULL, exit_code = NULL, mpf = NULL WHERE job_id = $2"
    ))
    .bind(HydraStatus::Paused)
    .bind(job_id)
    .execute(exec)
    .await
    .context("failed to bulk-reset task run state for job")?;
    Ok(result.rows_affected())
}

impl TaskHandle {
    pub fn set_status(&mut self, status: HydraStatus) {
        self.row.status = status;
        self.mark_dirty("status");
    }

    pub fn set_host(&mut self, host: Option<String>) {
        self.row.host = host;
        self.mark_dirty("host");
    }

    pub fn set_priority(&mut self, priority: i32) {
        self.row.priority = priority;
        self.mark_dirty("priority");
    }

    pub fn set_start_time(&mut self, start_time: Option<DateTime<Utc>>) {
        self.row.start_time = start_time;
        self.mark_dirty("start_time");
    }

    pub fn set_end_time(&mut self, end_time: Option<DateTime<Utc>>) {
        self.row.end_time = end_time;
        self.mark_dirty("end_time");
    }

    pub fn set_exit_code(&mut self, exit_code: Option<i32>) {
        self.row.exit_code = exit_code;
        self.mark_dirty("exit_code");
    }

    pub fn set_mpf(&mut self, mpf: Option<f64>) {
        self.row.mpf = mpf;
        self.mark_dirty("mpf");
    }

    /// Clear every run-state column back to a freshly-queued task, used by
    /// `task.reset()` and `job.reset()`.
    pub fn reset_run_state(&mut self) {
        self.set_status(HydraStatus::Paused);
        self.set_mpf(None);
        self.set_host(None);
        self.set_start_time(None);
        self.set_end_time(None);
        self.set_exit_code(None);
    }

    pub async fn update<'e>(&mut self, exec: impl PgExecutor<'e>, schema: Schema) -> Result<()> {
        if !self.is_dirty() {
            return Ok(());
        }
        let table = schema.tasks();
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
                "host" => {
                    qb.push_bind(self.row.host.clone());
                }
                "priority" => {
                    qb.push_bind(self.row.priority);
                }
                "start_time" => {
                    qb.push_bind(self.row.start_time);
                }
                "end_time" => {
                    qb.push_bind(self.row.end_time);
                }
                "exit_code" => {
                    qb.push_bind(self.row.exit_code);
                }
                "mpf" => {
                    qb.push_bind(self.row.mpf);
                }
                other => unreachable!("unhandled dirty column on tasks: {other}"),
            }
        }
        qb.push(" WHERE id = ").push_bind(self.row.id);
        qb.build()
            .execute(exec)
            .await
            .context("failed to update task")?;
        self.clear_dirty();
        Ok(())
    }
}
