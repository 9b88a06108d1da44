//! End-to-end controller tests: job/task/node lifecycle transitions and the
//! remote kill protocol's happy path and local-finalization fallback.

use std::time::Duration;

use hydra_core::controller::{self, KillOutcome};
use hydra_core::protocol::client::TcpKillConfig;
use hydra_core::protocol::server::run_server;
use hydra_core::worker::WorkerState;
use hydra_db::queries::{jobs, nodes, tasks};
use hydra_db::{HydraStatus, JobMode, Schema};
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const SCHEMA: Schema = Schema::production();
const FAST_TCP: TcpKillConfig = TcpKillConfig {
    timeout: Duration::from_millis(500),
};

async fn insert_job(pool: &PgPool) -> hydra_db::RenderJob {
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
    .expect("insert job")
}

/// Bind a loopback listener and spawn `run_server` against it, returning the
/// bound port and a handle that stops the server when dropped.
async fn spawn_control_server(worker: WorkerState) -> (u16, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind control listener");
    let port = listener.local_addr().unwrap().port();
    let shutdown = CancellationToken::new();
    let shutdown_for_server = shutdown.clone();
    tokio::spawn(async move {
        run_server(listener, worker, shutdown_for_server).await;
    });
    (port, shutdown)
}

#[tokio::test]
async fn job_start_moves_paused_job_and_tasks_to_ready() {
    let (pool, db_name) = hydra_test_utils::create_test_db().await;

    let job = insert_job(&pool).await;
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

    let mut job_handle = jobs::fetch_job_by_id(&pool, SCHEMA, job.id).await.unwrap().unwrap();
    job_handle.set_status(HydraStatus::Paused);
    job_handle.update(&pool, SCHEMA).await.unwrap();
    let mut task_handle = tasks::fetch_task_by_id(&pool, SCHEMA, task.id).await.unwrap().unwrap();
    task_handle.set_status(HydraStatus::Paused);
    task_handle.update(&pool, SCHEMA).await.unwrap();

    controller::job_start(&pool, SCHEMA, job.id).await.unwrap();

    let job_after = jobs::fetch_job_by_id(&pool, SCHEMA, job.id).await.unwrap().unwrap();
    assert_eq!(job_after.row.status, HydraStatus::Ready);
    let task_after = tasks::fetch_task_by_id(&pool, SCHEMA, task.id).await.unwrap().unwrap();
    assert_eq!(task_after.row.status, HydraStatus::Ready);

    pool.close().await;
    hydra_test_utils::drop_test_db(&db_name).await;
}

#[tokio::test]
async fn job_start_is_a_noop_on_a_ready_job() {
    let (pool, db_name) = hydra_test_utils::create_test_db().await;

    let job = insert_job(&pool).await;
    controller::job_start(&pool, SCHEMA, job.id).await.unwrap();

    let job_after = jobs::fetch_job_by_id(&pool, SCHEMA, job.id).await.unwrap().unwrap();
    assert_eq!(job_after.row.status, HydraStatus::Ready);

    pool.close().await;
    hydra_test_utils::drop_test_db(&db_name).await;
}

#[tokio::test]
async fn job_pause_moves_ready_job_and_tasks_to_paused_but_leaves_started_tasks() {
    let (pool, db_name) = hydra_test_utils::create_test_db().await;

    let job = insert_job(&pool).await;
    let ready_task = tasks::insert_task(
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
    let running_task = tasks::insert_task(
        &pool,
        SCHEMA,
        &tasks::NewTask {
            job_id: job.id,
            priority: 50,
            start_frame: 2,
            end_frame: 2,
        },
    )
    .await
    .unwrap();
    let mut running_handle = tasks::fetch_task_by_id(&pool, SCHEMA, running_task.id)
        .await
        .unwrap()
        .unwrap();
    running_handle.set_status(HydraStatus::Started);
    running_handle.update(&pool, SCHEMA).await.unwrap();

    controller::job_pause(&pool, SCHEMA, job.id).await.unwrap();

    let job_after = jobs::fetch_job_by_id(&pool, SCHEMA, job.id).await.unwrap().unwrap();
    assert_eq!(job_after.row.status, HydraStatus::Paused);
    let ready_after = tasks::fetch_task_by_id(&pool, SCHEMA, ready_task.id).await.unwrap().unwrap();
    assert_eq!(ready_after.row.status, HydraStatus::Paused);
    let running_after = tasks::fetch_task_by_id(&pool, SCHEMA, running_task.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(running_after.row.status, HydraStatus::Started);

    pool.close().await;
    hydra_test_utils::drop_test_db(&db_name).await;
}

#[tokio::test]
async fn task_kill_is_a_noop_on_a_task_that_is_not_running() {
    let (pool, db_name) = hydra_test_utils::create_test_db().await;

    let job = insert_job(&pool).await;
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

    let outcome = controller::task_kill(&pool, SCHEMA, task.id, HydraStatus::Killed, 9, FAST_TCP)
        .await
        .unwrap();
    assert!(matches!(outcome, KillOutcome::NoOp));

    pool.close().await;
    hydra_test_utils::drop_test_db(&db_name).await;
}

#[tokio::test]
async fn task_kill_reaches_a_live_worker_over_tcp() {
    let (pool, db_name) = hydra_test_utils::create_test_db().await;

    let job = insert_job(&pool).await;
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

    let node = nodes::insert_node(&pool, SCHEMA, "nodeA", Some("127.0.0.1"), "linux")
        .await
        .unwrap();
    let mut node_handle = nodes::fetch_node_by_id(&pool, SCHEMA, node.id).await.unwrap().unwrap();
    node_handle.set_status(HydraStatus::Started);
    node_handle.set_task_id(Some(task.id));
    node_handle.update(&pool, SCHEMA).await.unwrap();

    let mut task_handle = tasks::fetch_task_by_id(&pool, SCHEMA, task.id).await.unwrap().unwrap();
    task_handle.set_status(HydraStatus::Started);
    task_handle.set_host(Some("nodeA".to_owned()));
    task_handle.update(&pool, SCHEMA).await.unwrap();

    let worker = WorkerState::new("nodeA");
    let (port, shutdown) = spawn_control_server(worker).await;

    let outcome = controller::task_kill(&pool, SCHEMA, task.id, HydraStatus::Killed, port, FAST_TCP)
        .await
        .unwrap();
    assert!(
        matches!(outcome, KillOutcome::WorkerTerminated(_)),
        "expected the worker to accept the kill over TCP, got {outcome:?}"
    );

    shutdown.cancel();
    pool.close().await;
    hydra_test_utils::drop_test_db(&db_name).await;
}

#[tokio::test]
async fn task_kill_finalizes_locally_when_the_node_is_unreachable() {
    let (pool, db_name) = hydra_test_utils::create_test_db().await;

    let job = insert_job(&pool).await;
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

    let node = nodes::insert_node(&pool, SCHEMA, "nodeA", Some("127.0.0.1"), "linux")
        .await
        .unwrap();
    let mut node_handle = nodes::fetch_node_by_id(&pool, SCHEMA, node.id).await.unwrap().unwrap();
    node_handle.set_status(HydraStatus::Started);
    node_handle.set_task_id(Some(task.id));
    node_handle.update(&pool, SCHEMA).await.unwrap();

    let mut task_handle = tasks::fetch_task_by_id(&pool, SCHEMA, task.id).await.unwrap().unwrap();
    task_handle.set_status(HydraStatus::Started);
    task_handle.set_host(Some("nodeA".to_owned()));
    task_handle.update(&pool, SCHEMA).await.unwrap();

    // Port 1 is a privileged, never-listening port; the connection is
    // refused immediately instead of hanging for the timeout.
    let unreachable_port = 1u16;

    let outcome = controller::task_kill(
        &pool,
        SCHEMA,
        task.id,
        HydraStatus::Killed,
        unreachable_port,
        FAST_TCP,
    )
    .await
    .unwrap();
    assert!(
        matches!(outcome, KillOutcome::LocallyFinalized),
        "expected local finalization when the worker cannot be reached, got {outcome:?}"
    );

    let task_after = tasks::fetch_task_by_id(&pool, SCHEMA, task.id).await.unwrap().unwrap();
    assert_eq!(task_after.row.status, HydraStatus::Killed);
    assert!(task_after.row.end_time.is_some());

    let node_after = nodes::fetch_node_by_id(&pool, SCHEMA, node.id).await.unwrap().unwrap();
    assert_eq!(node_after.row.status, HydraStatus::Idle);
    assert!(node_after.row.task_id.is_none());

    pool.close().await;
    hydra_test_utils::drop_test_db(&db_name).await;
}

#[tokio::test]
async fn task_kill_finalizes_locally_when_the_node_no_longer_owns_the_task() {
    let (pool, db_name) = hydra_test_utils::create_test_db().await;

    let job = insert_job(&pool).await;
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

    let node = nodes::insert_node(&pool, SCHEMA, "nodeA", Some("127.0.0.1"), "linux")
        .await
        .unwrap();
    // Node believes it is idle and holds no task, even though the task row
    // still claims to be STARTED on this host — a divergent-bookkeeping case.
    let mut node_handle = nodes::fetch_node_by_id(&pool, SCHEMA, node.id).await.unwrap().unwrap();
    node_handle.set_status(HydraStatus::Idle);
    node_handle.update(&pool, SCHEMA).await.unwrap();

    let mut task_handle = tasks::fetch_task_by_id(&pool, SCHEMA, task.id).await.unwrap().unwrap();
    task_handle.set_status(HydraStatus::Started);
    task_handle.set_host(Some("nodeA".to_owned()));
    task_handle.update(&pool, SCHEMA).await.unwrap();

    let outcome = controller::task_kill(&pool, SCHEMA, task.id, HydraStatus::Killed, 9, FAST_TCP)
        .await
        .unwrap();
    assert!(matches!(outcome, KillOutcome::LocallyFinalized));

    let node_after = nodes::fetch_node_by_id(&pool, SCHEMA, node.id).await.unwrap().unwrap();
    assert_eq!(node_after.row.status, HydraStatus::Offline);

    pool.close().await;
    hydra_test_utils::drop_test_db(&db_name).await;
}

#[tokio::test]
async fn node_offline_drains_a_started_node_to_pending() {
    let (pool, db_name) = hydra_test_utils::create_test_db().await;

    let node = nodes::insert_node(&pool, SCHEMA, "nodeA", Some("127.0.0.1"), "linux")
        .await
        .unwrap();
    let mut node_handle = nodes::fetch_node_by_id(&pool, SCHEMA, node.id).await.unwrap().unwrap();
    node_handle.set_status(HydraStatus::Started);
    node_handle.update(&pool, SCHEMA).await.unwrap();

    controller::node_offline(&pool, SCHEMA, node.id).await.unwrap();
    let after = nodes::fetch_node_by_id(&pool, SCHEMA, node.id).await.unwrap().unwrap();
    assert_eq!(after.row.status, HydraStatus::Pending);

    pool.close().await;
    hydra_test_utils::drop_test_db(&db_name).await;
}

#[tokio::test]
async fn node_offline_on_an_idle_node_goes_straight_to_offline() {
    let (pool, db_name) = hydra_test_utils::create_test_db().await;

    let node = nodes::insert_node(&pool, SCHEMA, "nodeA", Some("127.0.0.1"), "linux")
        .await
        .unwrap();
    let mut node_handle = nodes::fetch_node_by_id(&pool, SCHEMA, node.id).await.unwrap().unwrap();
    node_handle.set_status(HydraStatus::Idle);
    node_handle.update(&pool, SCHEMA).await.unwrap();

    controller::node_offline(&pool, SCHEMA, node.id).await.unwrap();
    let after = nodes::fetch_node_by_id(&pool, SCHEMA, node.id).await.unwrap().unwrap();
    assert_eq!(after.row.status, HydraStatus::Offline);

    pool.close().await;
    hydra_test_utils::drop_test_db(&db_name).await;
}

#[tokio::test]
async fn node_get_off_kills_the_running_task_and_forces_the_node_offline() {
    let (pool, db_name) = hydra_test_utils::create_test_db().await;

    let job = insert_job(&pool).await;
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

    let node = nodes::insert_node(&pool, SCHEMA, "nodeA", Some("127.0.0.1"), "linux")
        .await
        .unwrap();
    let mut node_handle = nodes::fetch_node_by_id(&pool, SCHEMA, node.id).await.unwrap().unwrap();
    node_handle.set_status(HydraStatus::Started);
    node_handle.set_task_id(Some(task.id));
    node_handle.update(&pool, SCHEMA).await.unwrap();

    let mut task_handle = tasks::fetch_task_by_id(&pool, SCHEMA, task.id).await.unwrap().unwrap();
    task_handle.set_status(HydraStatus::Started);
    task_handle.set_host(Some("nodeA".to_owned()));
    task_handle.update(&pool, SCHEMA).await.unwrap();

    let worker = WorkerState::new("nodeA");
    let (port, shutdown) = spawn_control_server(worker).await;

    controller::node_get_off(&pool, SCHEMA, node.id, HydraStatus::Killed, port, FAST_TCP)
        .await
        .unwrap();

    let node_after = nodes::fetch_node_by_id(&pool, SCHEMA, node.id).await.unwrap().unwrap();
    assert_eq!(node_after.row.status, HydraStatus::Offline);
    assert!(node_after.row.task_id.is_none());

    shutdown.cancel();
    pool.close().await;
    hydra_test_utils::drop_test_db(&db_name).await;
}

#[tokio::test]
async fn job_kill_forces_every_unfinished_task_to_the_new_status() {
    let (pool, db_name) = hydra_test_utils::create_test_db().await;

    let job = insert_job(&pool).await;
    let finished_task = tasks::insert_task(
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
    let mut finished_handle = tasks::fetch_task_by_id(&pool, SCHEMA, finished_task.id)
        .await
        .unwrap()
        .unwrap();
    finished_handle.set_status(HydraStatus::Finished);
    finished_handle.update(&pool, SCHEMA).await.unwrap();

    let ready_task = tasks::insert_task(
        &pool,
        SCHEMA,
        &tasks::NewTask {
            job_id: job.id,
            priority: 50,
            start_frame: 2,
            end_frame: 2,
        },
    )
    .await
    .unwrap();

    controller::job_kill(&pool, SCHEMA, job.id, HydraStatus::Killed, 9, FAST_TCP)
        .await
        .unwrap();

    let job_after = jobs::fetch_job_by_id(&pool, SCHEMA, job.id).await.unwrap().unwrap();
    assert_eq!(job_after.row.status, HydraStatus::Killed);

    let finished_after = tasks::fetch_task_by_id(&pool, SCHEMA, finished_task.id).await.unwrap().unwrap();
    assert_eq!(finished_after.row.status, HydraStatus::Finished, "a finished task must survive a job kill");

    let ready_after = tasks::fetch_task_by_id(&pool, SCHEMA, ready_task.id).await.unwrap().unwrap();
    assert_eq!(ready_after.row.status, HydraStatus::Killed);

    pool.close().await;
    hydra_test_utils::drop_test_db(&db_name).await;
}

#[tokio::test]
async fn job_reset_restores_job_and_task_run_state() {
    let (pool, db_name) = hydra_test_utils::create_test_db().await;

    let job = insert_job(&pool).await;
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

    let mut job_handle = jobs::fetch_job_by_id(&pool, SCHEMA, job.id).await.unwrap().unwrap();
    job_handle.set_status(HydraStatus::Error);
    job_handle.set_attempts(3);
    job_handle.set_failed_nodes("nodeA nodeB ".to_owned());
    job_handle.update(&pool, SCHEMA).await.unwrap();

    let mut task_handle = tasks::fetch_task_by_id(&pool, SCHEMA, task.id).await.unwrap().unwrap();
    task_handle.set_status(HydraStatus::Error);
    task_handle.set_exit_code(Some(1));
    task_handle.update(&pool, SCHEMA).await.unwrap();

    controller::job_reset(&pool, SCHEMA, job.id).await.unwrap();

    let job_after = jobs::fetch_job_by_id(&pool, SCHEMA, job.id).await.unwrap().unwrap();
    assert_eq!(job_after.row.status, HydraStatus::Paused);
    assert_eq!(job_after.row.attempts, 0);
    assert_eq!(job_after.row.failed_nodes, "");

    let task_after = tasks::fetch_task_by_id(&pool, SCHEMA, task.id).await.unwrap().unwrap();
    assert_eq!(task_after.row.status, HydraStatus::Paused);
    assert!(task_after.row.exit_code.is_none());

    pool.close().await;
    hydra_test_utils::drop_test_db(&db_name).await;
}

#[tokio::test]
async fn task_reset_retreats_a_killed_job_to_paused_once_no_task_is_running() {
    let (pool, db_name) = hydra_test_utils::create_test_db().await;

    let job = insert_job(&pool).await;
    let mut job_handle = jobs::fetch_job_by_id(&pool, SCHEMA, job.id).await.unwrap().unwrap();
    job_handle.set_status(HydraStatus::Killed);
    job_handle.update(&pool, SCHEMA).await.unwrap();

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
    let mut task_handle = tasks::fetch_task_by_id(&pool, SCHEMA, task.id).await.unwrap().unwrap();
    task_handle.set_status(HydraStatus::Killed);
    task_handle.update(&pool, SCHEMA).await.unwrap();

    controller::task_reset(&pool, SCHEMA, task.id).await.unwrap();

    let job_after = jobs::fetch_job_by_id(&pool, SCHEMA, job.id).await.unwrap().unwrap();
    assert_eq!(job_after.row.status, HydraStatus::Paused);
    let task_after = tasks::fetch_task_by_id(&pool, SCHEMA, task.id).await.unwrap().unwrap();
    assert_eq!(task_after.row.status, HydraStatus::Paused);

    pool.close().await;
    hydra_test_utils::drop_test_db(&db_name).await;
}

