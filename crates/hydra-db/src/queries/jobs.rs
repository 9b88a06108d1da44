use anyhow::{Context, Result};
use sqlx::{PgExecutor, QueryBuilder};

use crate::dirty::Dirty;
use crate::models::{JobMode, RenderJob};
use crate::schema::Schema;
use crate::status::HydraStatus;

/// A `jobs` row plus its dirty-tracking handle.
pub type JobHandle = Dirty<RenderJob>;

/// Parameters for inserting a new job. Mirrors the submitter's non-GUI
/// surface: one row per submitted job, fanned out into tasks separately.
pub struct NewJob<'a> {
    pub mode: JobMode,
    pub task_file: Option<&'a str>,
    pub args: Option<&'a str>,
    pub render_layers: Option<&'a str>,
    pub project: Option<&'a str>,
    pub output_directory: Option<&'a str>,
    pub script: Option<&'a str>,
    pub start_frame: Option<i32>,
    pub end_frame: Option<i32>,
    pub by_frame: Option<i32>,
    pub priority: i32,
    pub max_nodes: Option<i32>,
    pub timeout: Option<i32>,
    pub max_attempts: i32,
    pub requirements: &'a str,
    pub archived: bool,
    pub owner: Option<&'a str>,
}

pub async fn insert_job<'e>(
    exec: impl PgExecutor<'e>,
    schema: Schema,
    new_job: &NewJob<'_>,
    task_total: i32,
) -> Result<RenderJob> {
    let table = schema.jobs();
    let row: RenderJob = sqlx::query_as(&format!(
        "INSERT INTO {table} \
         (mode, task_file, args, render_layers, project, output_directory, script, \
          start_frame, end_frame, by_frame, priority, max_nodes, timeout, max_attempts, \
          requirements, archived, status, task_total, task_done, attempts, failed_nodes, owner) \
         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,0,0,'',$19) \
         RETURNING *"
    ))
    .bind(new_job.mode)
    .bind(new_job.task_file)
    .bind(new_job.args)
    .bind(new_job.render_layers)
    .bind(new_job.project)
    .bind(new_job.output_directory)
    .bind(new_job.script)
    .bind(new_job.start_frame)
    .bind(new_job.end_frame)
    .bind(new_job.by_frame)
    .bind(new_job.priority)
    .bind(new_job.max_nodes)
    .bind(new_job.timeout)
    .bind(new_job.max_attempts)
    .bind(new_job.requirements)
    .bind(new_job.archived)
    .bind(HydraStatus::Ready)
    .bind(task_total)
    .bind(new_job.owner)
    .fetch_one(exec)
    .await
    .context("failed to insert job")?;
    Ok(row)
}

pub async fn fetch_job_by_id<'e>(
    exec: impl PgExecutor<'e>,
    schema: Schema,
    id: i32,
) -> Result<Option<JobHandle>> {
    let table = schema.jobs();
    let row: Option<RenderJob> = sqlx::query_as(&format!("SELECT * FROM {table} WHERE id = $1"))
        .bind(id)
        .fetch_optional(exec)
        .await
        .context("failed to fetch job by id")?;
    Ok(row.map(Dirty::from_db))
}

pub async fn list_jobs<'e>(exec: impl PgExecutor<'e>, schema: Schema) -> Result<Vec<RenderJob>> {
    let table = schema.jobs();
    let rows: Vec<RenderJob> = sqlx::query_as(&format!(
        "SELECT * FROM {table} ORDER BY priority DESC, id ASC"
    ))
    .fetch_all(exec)
    .await
    .context("failed to list jobs")?;
    Ok(rows)
}

impl JobHandle {
    pub fn set_status(&mut self, status: HydraStatus) {
        self.row.status = status;
        self.mark_dirty("status");
    }

    pub fn set_task_done(&mut self, task_done: i32) {
        self.row.task_done = task_done;
        self.mark_dirty("task_done");
    }

    pub fn set_attempts(&mut self, attempts: i32) {
        self.row.attempts = attempts;
        self.mark_dirty("attempts");
    }

    pub fn set_failed_nodes(&mut self, failed_nodes: String) {
        self.row.failed_nodes = failed_nodes;
        self.mark_dirty("failed_nodes");
    }

    pub fn set_mpf(&mut self, mpf: Option<f64>) {
        self.row.mpf = mpf;
        self.mark_dirty("mpf");
    }

    pub fn set_archived(&mut self, archived: bool) {
        self.row.archived = archived;
        self.mark_dirty("archived");
    }

    pub fn set_priority(&mut self, priority: i32) {
        self.row.priority = priority;
        self.mark_dirty("priority");
    }

    pub async fn update<'e>(&mut self, exec: impl PgExecutor<'e>, schema: Schema) -> Result<()> {
        if !self.is_dirty() {
            return Ok(());
        }
        let table = schema.jobs();
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
                "task_done" => {
                    qb.push_bind(self.row.task_done);
                }
                "attempts" => {
                    qb.push_bind(self.row.attempts);
                }
                "failed_nodes" => {
                    qb.push_bind(self.row.failed_nodes.clone());
                }
                "mpf" => {
                    qb.push_bind(self.row.mpf);
                }
                "archived" => {
                    qb.push_bind(self.row.archived);
                }
                "priority" => {
                    qb.push_bind(self.row.priority);
                }
                other => unreachable!("unhandled dirty column on jobs: {other}"),
            }
        }
        qb.push(" WHERE id = ").push_bind(self.row.id);
        qb.build()
            .execute(exec)
            .await
            .context("failed to update job")?;
        self.clear_dirty();
        Ok(())
    }

    /// Force every run-state column back to its freshly-submitted values.
    /// Used by `job.reset()`; callers still need to reset sibling tasks.
    pub fn reset_run_state(&mut self) {
        self.set_status(HydraStatus::Paused);
        self.set_attempts(0);
        self.set_failed_nodes(String::new());
        self.set_mpf(None);
    }
}
