//! Integration tests for the cycle orchestrator: the atomic full-cleanup
//! pass and the cycle-boundary bookkeeping around it.

use std::time::Duration;

use chrono::Duration as ChronoDuration;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use cycle_manager_core::orchestrator::{self, CycleOrchestratorConfig};
use cycle_manager_db::models::{
    AgentStatus, CycleStatus, RunStatus, TaskContext, TaskKind, TaskRole, TaskStatus,
};
use cycle_manager_db::queries::{agents, cycles, leases, runs, tasks};

use cycle_manager_test_utils::{create_test_db, drop_test_db};

async fn insert_task(pool: &sqlx::PgPool, title: &str) -> cycle_manager_db::models::Task {
    tasks::insert_task(
        pool,
        title,
        "goal",
        TaskRole::Worker,
        TaskKind::Code,
        0,
        0,
        30,
        &[],
        &[],
        &TaskContext::default(),
    )
    .await
    .expect("insert task should succeed")
}

#[tokio::test]
async fn perform_full_cleanup_resets_every_kind_of_in_flight_state_atomically() {
    let (pool, db_name) = create_test_db().await;

    let agent = agents::insert_agent(&pool, TaskRole::Worker, &json!({}))
        .await
        .expect("insert agent should succeed");
    sqlx::query("UPDATE agents SET status = 'busy' WHERE id = $1")
        .bind(agent.id)
        .execute(&pool)
        .await
        .expect("setup update should succeed");

    // A task still leased, with an expired lease -- the lease cleaner's job.
    let leased_task = insert_task(&pool, "leased, lease expired").await;
    sqlx::query("UPDATE tasks SET status = 'running' WHERE id = $1")
        .bind(leased_task.id)
        .execute(&pool)
        .await
        .expect("setup update should succeed");
    leases::insert_lease(
        &pool,
        leased_task.id,
        agent.id,
        chrono::Utc::now() - ChronoDuration::minutes(1),
    )
    .await
    .expect("insert lease should succeed");

    // A task running with no lease at all -- only the force-revert catches it.
    let orphaned_task = insert_task(&pool, "running, never leased").await;
    sqlx::query("UPDATE tasks SET status = 'running' WHERE id = $1")
        .bind(orphaned_task.id)
        .execute(&pool)
        .await
        .expect("setup update should succeed");
    let run = runs::insert_run(&pool, orphaned_task.id, agent.id)
        .await
        .expect("insert run should succeed");

    let summary = orchestrator::perform_full_cleanup(&pool)
        .await
        .expect("cleanup should succeed");

    assert_eq!(summary.expired_leases, 1);
    assert_eq!(summary.remaining_leases_deleted, 0);
    assert_eq!(summary.agents_marked_offline, 0);
    assert_eq!(summary.agents_reset_to_idle, 1);
    assert_eq!(summary.tasks_reverted_to_queued, 2);
    assert_eq!(summary.runs_cancelled, 1);

    let fetched_agent = agents::get_agent(&pool, agent.id)
        .await
        .expect("get agent should succeed")
        .expect("agent should exist");
    assert_eq!(fetched_agent.status, AgentStatus::Idle);

    for task_id in [leased_task.id, orphaned_task.id] {
        let fetched = tasks::get_task(&pool, task_id)
            .await
            .expect("get task should succeed")
            .expect("task should exist");
        assert_eq!(fetched.status, TaskStatus::Queued);
    }

    let fetched_run = runs::get_run(&pool, run.id)
        .await
        .expect("get run should succeed")
        .expect("run should exist");
    assert_eq!(fetched_run.status, RunStatus::Cancelled);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn run_cycle_orchestrator_records_a_completed_cycle_on_shutdown() {
    let (pool, db_name) = create_test_db().await;

    let config = CycleOrchestratorConfig::from_env();
    let cancel = CancellationToken::new();
    let cancel_for_task = cancel.clone();
    let pool_for_task = pool.clone();

    let handle = tokio::spawn(async move {
        orchestrator::run_cycle_orchestrator(&pool_for_task, &config, cancel_for_task).await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    handle
        .await
        .expect("orchestrator task should not panic")
        .expect("orchestrator should shut down cleanly");

    let cycle = cycles::get_latest_cycle(&pool)
        .await
        .expect("get latest cycle should succeed")
        .expect("a cycle should have been recorded");
    assert_eq!(cycle.status, CycleStatus::Completed);
    assert!(cycle.completed_at.is_some());

    pool.close().await;
    drop_test_db(&db_name).await;
}
