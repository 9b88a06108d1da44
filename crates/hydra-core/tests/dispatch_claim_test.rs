//! End-to-end dispatch/claim tests against a real Postgres instance: the
//! successful-claim, failed-node-filter, and task-completion seed scenarios.

use hydra_core::dispatch::{dispatch_tick, unstick_node};
use hydra_core::jobstatus::update_job_status;
use hydra_core::worker::WorkerState;
use hydra_db::queries::{jobs, nodes, tasks};
use hydra_db::{HydraStatus, JobMode, Schema};
use sqlx::PgPool;

const SCHEMA: Schema = Schema::production();

async fn insert_ready_job(pool: &PgPool, priority: i32, max_attempts: i32, requirements: &str) -> hydra_db::RenderJob {
    jobs::insert_job(
        pool,
        SCHEMA,
        &jobs::NewJob {
            mode: JobMode::Command,
            task_file: None,
            args: None,
            render_layers: None,
            project: None,
            output_directory: None,
            script: Some("true"),
            start_frame: Some(1),
            end_frame: Some(1),
            by_frame: Some(1),
            priority,
            max_nodes: None,
            timeout: None,
            max_attempts,
            requirements,
            archived: false,
            owner: None,
        },
        1,
    )
    .await
    .expect("insert job")
}

async fn insert_node(pool: &PgPool, host: &str, min_priority: i32, capabilities: &str) -> hydra_db::RenderNode {
    let mut node = nodes::insert_node(pool, SCHEMA, host, Some("127.0.0.1"), "linux")
        .await
        .expect("insert node");
    let mut handle = hydra_db::Dirty::from_db(node.clone());
    handle.set_min_priority(min_priority);
    handle.set_capabilities(capabilities.to_owned());
    handle.set_status(HydraStatus::Idle);
    handle.update(pool, SCHEMA).await.expect("configure node");
    node.min_priority = min_priority;
    node.capabilities = capabilities.to_owned();
    node.status = HydraStatus::Idle;
    node
}

#[tokio::test]
async fn successful_claim_sets_task_job_and_node_started() {
    let (pool, db_name) = hydra_test_utils::create_test_db().await;

    let job = insert_ready_job(&pool, 50, 3, "%").await;
    tasks::insert_task(
        &pool,
        SCHEMA,
        &tasks::NewTask {
            job_id: job.id,
            priority: 50,
            start_frame: 1,
            end_frame: 10,
        },
    )
    .await
    .expect("insert task");
    insert_node(&pool, "nodeA", 10, "linux render").await;

    let claimed = tasks::claim_task(&pool, SCHEMA, "nodeA", 10, "linux render")
        .await
        .expect("claim query should not fail")
        .expect("should claim the one ready task");

    assert_eq!(claimed.task.status, HydraStatus::Started);
    assert_eq!(claimed.task.host.as_deref(), Some("nodeA"));
    assert!(claimed.task.start_time.is_some());
    assert_eq!(claimed.job.status, HydraStatus::Started);

    let node = nodes::fetch_node_by_host(&pool, SCHEMA, "nodeA")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(node.row.status, HydraStatus::Started);
    assert_eq!(node.row.task_id, Some(claimed.task.id));

    pool.close().await;
    hydra_test_utils::drop_test_db(&db_name).await;
}

#[tokio::test]
async fn failed_node_filter_excludes_a_host_already_in_failed_nodes() {
    let (pool, db_name) = hydra_test_utils::create_test_db().await;

    let job = insert_ready_job(&pool, 50, 3, "%").await;
    let mut job_handle = jobs::fetch_job_by_id(&pool, SCHEMA, job.id).await.unwrap().unwrap();
    job_handle.set_failed_nodes("nodeA ".to_owned());
    job_handle.update(&pool, SCHEMA).await.unwrap();

    tasks::insert_task(
        &pool,
        SCHEMA,
        &tasks::NewTask {
            job_id: job.id,
            priority: 50,
            start_frame: 1,
            end_frame: 1,
        },
    )
    .await
    .unwrap();
    insert_node(&pool, "nodeA", 0, "").await;

    let claimed = tasks::claim_task(&pool, SCHEMA, "nodeA", 0, "")
        .await
        .expect("claim query should not fail");
    assert!(claimed.is_none(), "nodeA should be filtered out by failed_nodes");

    let tasks_for_job = tasks::list_tasks_for_job(&pool, SCHEMA, job.id).await.unwrap();
    assert_eq!(tasks_for_job[0].status, HydraStatus::Ready);

    pool.close().await;
    hydra_test_utils::drop_test_db(&db_name).await;
}

#[tokio::test]
async fn min_priority_floor_excludes_low_priority_tasks() {
    let (pool, db_name) = hydra_test_utils::create_test_db().await;

    let job = insert_ready_job(&pool, 5, 3, "%").await;
    tasks::insert_task(
        &pool,
        SCHEMA,
        &tasks::NewTask {
            job_id: job.id,
            priority: 5,
            start_frame: 1,
            end_frame: 1,
        },
    )
    .await
    .unwrap();
    insert_node(&pool, "nodeA", 10, "").await;

    let claimed = tasks::claim_task(&pool, SCHEMA, "nodeA", 10, "")
        .await
        .expect("claim query should not fail");
    assert!(claimed.is_none(), "task priority 5 is not > node's min_priority 10");

    pool.close().await;
    hydra_test_utils::drop_test_db(&db_name).await;
}

#[tokio::test]
async fn claim_tie_break_prefers_higher_priority_then_lower_id() {
    let (pool, db_name) = hydra_test_utils::create_test_db().await;

    let job = insert_ready_job(&pool, 50, 3, "%").await;
    let low = tasks::insert_task(
        &pool,
        SCHEMA,
        &tasks::NewTask {
            job_id: job.id,
            priority: 10,
            start_frame: 1,
            end_frame: 1,
        },
    )
    .await
    .unwrap();
    let high = tasks::insert_task(
        &pool,
        SCHEMA,
        &tasks::NewTask {
            job_id: job.id,
            priority: 90,
            start_frame: 2,
            end_frame: 2,
        },
    )
    .await
    .unwrap();
    insert_node(&pool, "nodeA", 0, "").await;

    let claimed = tasks::claim_task(&pool, SCHEMA, "nodeA", 0, "")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.task.id, high.id, "higher priority task should claim first");
    assert_ne!(claimed.task.id, low.id);

    pool.close().await;
    hydra_test_utils::drop_test_db(&db_name).await;
}

#[tokio::test]
async fn archived_job_is_never_claimed() {
    let (pool, db_name) = hydra_test_utils::create_test_db().await;

    let job = insert_ready_job(&pool, 50, 3, "%").await;
    let mut job_handle = jobs::fetch_job_by_id(&pool, SCHEMA, job.id).await.unwrap().unwrap();
    job_handle.set_archived(true);
    job_handle.update(&pool, SCHEMA).await.unwrap();

    tasks::insert_task(
        &pool,
        SCHEMA,
        &tasks::NewTask {
            job_id: job.id,
            priority: 50,
            start_frame: 1,
            end_frame: 1,
        },
    )
    .await
    .unwrap();
    insert_node(&pool, "nodeA", 0, "").await;

    let claimed = tasks::claim_task(&pool, SCHEMA, "nodeA", 0, "").await.unwrap();
    assert!(claimed.is_none());

    pool.close().await;
    hydra_test_utils::drop_test_db(&db_name).await;
}

#[tokio::test]
async fn dispatch_tick_runs_a_real_command_to_completion() {
    let (pool, db_name) = hydra_test_utils::create_test_db().await;

    let job = insert_ready_job(&pool, 50, 3, "%").await;
    tasks::insert_task(
        &pool,
        SCHEMA,
        &tasks::NewTask {
            job_id: job.id,
            priority: 50,
            start_frame: 1,
            end_frame: 1,
        },
    )
    .await
    .unwrap();
    insert_node(&pool, "nodeA", 0, "").await;

    let worker = WorkerState::new("nodeA");
    let log_dir = tempfile::tempdir().unwrap();

    let claimed = dispatch_tick(&pool, SCHEMA, &worker, log_dir.path(), true)
        .await
        .expect("dispatch tick should not fail");
    assert!(claimed, "a ready task should have been claimed and run");

    let task = tasks::list_tasks_for_job(&pool, SCHEMA, job.id).await.unwrap();
    assert_eq!(task[0].status, HydraStatus::Finished);
    assert_eq!(task[0].exit_code, Some(0));
    assert!(task[0].mpf.is_some());

    let job_after = jobs::fetch_job_by_id(&pool, SCHEMA, job.id).await.unwrap().unwrap();
    assert_eq!(job_after.row.status, HydraStatus::Finished);
    assert_eq!(job_after.row.task_done, 1);

    let node = nodes::fetch_node_by_host(&pool, SCHEMA, "nodeA").await.unwrap().unwrap();
    assert_eq!(node.row.status, HydraStatus::Idle);
    assert!(node.row.task_id.is_none());

    // keep_all_logs = true, so the log file survives.
    let log_path = hydra_core::dispatch::task_log_path(log_dir.path(), task[0].id);
    assert!(log_path.exists());

    pool.close().await;
    hydra_test_utils::drop_test_db(&db_name).await;
}

#[tokio::test]
async fn dispatch_tick_requeues_on_nonzero_exit_and_keeps_log() {
    let (pool, db_name) = hydra_test_utils::create_test_db().await;

    let job = jobs::insert_job(
        &pool,
        SCHEMA,
        &jobs::NewJob {
            mode: JobMode::Command,
            task_file: None,
            args: None,
            render_layers: None,
            project: None,
            output_directory: None,
            script: Some("false"),
            start_frame: Some(1),
            end_frame: Some(1),
            by_frame: Some(1),
            priority: 50,
            max_nodes: None,
            timeout: None,
            max_attempts: 3,
            requirements: "%",
            archived: false,
            owner: None,
        },
        1,
    )
    .await
    .unwrap();
    tasks::insert_task(
        &pool,
        SCHEMA,
        &tasks::NewTask {
            job_id: job.id,
            priority: 50,
            start_frame: 1,
            end_frame: 1,
        },
    )
    .await
    .unwrap();
    insert_node(&pool, "nodeA", 0, "").await;

    let worker = WorkerState::new("nodeA");
    let log_dir = tempfile::tempdir().unwrap();

    dispatch_tick(&pool, SCHEMA, &worker, log_dir.path(), false)
        .await
        .expect("dispatch tick should not fail");

    let tasks_for_job = tasks::list_tasks_for_job(&pool, SCHEMA, job.id).await.unwrap();
    assert_eq!(tasks_for_job[0].status, HydraStatus::Ready);
    assert_eq!(tasks_for_job[0].exit_code, Some(1));

    let job_after = jobs::fetch_job_by_id(&pool, SCHEMA, job.id).await.unwrap().unwrap();
    assert_eq!(job_after.row.attempts, 1);
    assert!(job_after.row.failed_nodes.contains("nodeA"));

    // A failed (non-killed) task's log is kept regardless of keep_all_logs,
    // since it failed; only a successful task's log is ever deleted.
    let log_path = hydra_core::dispatch::task_log_path(log_dir.path(), tasks_for_job[0].id);
    assert!(log_path.exists());

    pool.close().await;
    hydra_test_utils::drop_test_db(&db_name).await;
}

#[tokio::test]
async fn task_failure_retries_until_error_at_max_attempts() {
    let (pool, db_name) = hydra_test_utils::create_test_db().await;

    let job = jobs::insert_job(
        &pool,
        SCHEMA,
        &jobs::NewJob {
            mode: JobMode::Command,
            task_file: None,
            args: None,
            render_layers: None,
            project: None,
            output_directory: None,
            script: Some("false"),
            start_frame: Some(1),
            end_frame: Some(1),
            by_frame: Some(1),
            priority: 50,
            max_nodes: None,
            timeout: None,
            max_attempts: 2,
            requirements: "%",
            archived: false,
            owner: None,
        },
        1,
    )
    .await
    .unwrap();
    tasks::insert_task(
        &pool,
        SCHEMA,
        &tasks::NewTask {
            job_id: job.id,
            priority: 50,
            start_frame: 1,
            end_frame: 1,
        },
    )
    .await
    .unwrap();
    insert_node(&pool, "nodeA", 0, "").await;
    insert_node(&pool, "nodeB", 0, "").await;

    let worker_a = WorkerState::new("nodeA");
    let log_dir = tempfile::tempdir().unwrap();
    dispatch_tick(&pool, SCHEMA, &worker_a, log_dir.path(), false)
        .await
        .unwrap();

    let job_after_first = jobs::fetch_job_by_id(&pool, SCHEMA, job.id).await.unwrap().unwrap();
    assert_eq!(job_after_first.row.attempts, 1);
    assert_ne!(job_after_first.row.status, HydraStatus::Error);

    let worker_b = WorkerState::new("nodeB");
    dispatch_tick(&pool, SCHEMA, &worker_b, log_dir.path(), false)
        .await
        .unwrap();

    let job_after_second = jobs::fetch_job_by_id(&pool, SCHEMA, job.id).await.unwrap().unwrap();
    assert_eq!(job_after_second.row.attempts, 2);
    assert_eq!(job_after_second.row.status, HydraStatus::Error);

    pool.close().await;
    hydra_test_utils::drop_test_db(&db_name).await;
}

#[tokio::test]
async fn crash_recovery_unsticks_a_started_node_and_requeues_its_task() {
    let (pool, db_name) = hydra_test_utils::create_test_db().await;

    let job = insert_ready_job(&pool, 50, 3, "%").await;
    let task = tasks::insert_task(
        &pool,
        SCHEMA,
        &tasks::NewTask {
            job_id: job.id,
            priority: 50,
            start_frame: 1,
            end_frame: 1,
        },
    )
    .await
    .unwrap();
    insert_node(&pool, "nodeA", 0, "").await;

    // Simulate a crash mid-render: node STARTED holding a STARTED task.
    let mut node = nodes::fetch_node_by_host(&pool, SCHEMA, "nodeA").await.unwrap().unwrap();
    node.set_status(HydraStatus::Started);
    node.set_task_id(Some(task.id));
    node.update(&pool, SCHEMA).await.unwrap();

    let mut task_handle = tasks::fetch_task_by_id(&pool, SCHEMA, task.id).await.unwrap().unwrap();
    task_handle.set_status(HydraStatus::Started);
    task_handle.update(&pool, SCHEMA).await.unwrap();

    unstick_node(&pool, SCHEMA, "nodeA").await.expect("crash recovery should not fail");

    let node_after = nodes::fetch_node_by_host(&pool, SCHEMA, "nodeA").await.unwrap().unwrap();
    assert_eq!(node_after.row.status, HydraStatus::Idle);
    assert!(node_after.row.task_id.is_none());

    let task_after = tasks::fetch_task_by_id(&pool, SCHEMA, task.id).await.unwrap().unwrap();
    assert_eq!(task_after.row.status, HydraStatus::Ready);
    assert_eq!(task_after.row.exit_code, Some(999));
    assert!(task_after.row.end_time.is_some());

    pool.close().await;
    hydra_test_utils::drop_test_db(&db_name).await;
}

#[tokio::test]
async fn offline_set_node_is_skipped_by_dispatch_tick() {
    let (pool, db_name) = hydra_test_utils::create_test_db().await;

    let job = insert_ready_job(&pool, 50, 3, "%").await;
    tasks::insert_task(
        &pool,
        SCHEMA,
        &tasks::NewTask {
            job_id: job.id,
            priority: 50,
            start_frame: 1,
            end_frame: 1,
        },
    )
    .await
    .unwrap();
    insert_node(&pool, "nodeA", 0, "").await;
    let mut handle = nodes::fetch_node_by_host(&pool, SCHEMA, "nodeA").await.unwrap().unwrap();
    handle.set_status(HydraStatus::Pending);
    handle.update(&pool, SCHEMA).await.unwrap();

    let worker = WorkerState::new("nodeA");
    let log_dir = tempfile::tempdir().unwrap();
    let claimed = dispatch_tick(&pool, SCHEMA, &worker, log_dir.path(), false)
        .await
        .unwrap();
    assert!(!claimed, "a node in the offline set must not dispatch");

    let task = tasks::list_tasks_for_job(&pool, SCHEMA, job.id).await.unwrap();
    assert_eq!(task[0].status, HydraStatus::Ready);

    pool.close().await;
    hydra_test_utils::drop_test_db(&db_name).await;
}

#[tokio::test]
async fn job_mpf_is_the_running_mean_of_successive_task_mpfs() {
    let (pool, db_name) = hydra_test_utils::create_test_db().await;

    let job = insert_ready_job(&pool, 50, 3, "%").await;
    let mut job_handle = jobs::fetch_job_by_id(&pool, SCHEMA, job.id).await.unwrap().unwrap();
    update_job_status(&pool, SCHEMA, &mut job_handle, None, Some(120.0))
        .await
        .unwrap();
    let after_first = jobs::fetch_job_by_id(&pool, SCHEMA, job.id).await.unwrap().unwrap();
    assert_eq!(after_first.row.mpf, Some(120.0));

    let mut job_handle = after_first;
    update_job_status(&pool, SCHEMA, &mut job_handle, None, Some(60.0))
        .await
        .unwrap();
    let after_second = jobs::fetch_job_by_id(&pool, SCHEMA, job.id).await.unwrap().unwrap();
    assert_eq!(after_second.row.mpf, Some(90.0));

    pool.close().await;
    hydra_test_utils::drop_test_db(&db_name).await;
}
