//! Integration tests for the validated `transition()` wrapper: it must
//! refuse to issue SQL for a transition outside the cycle manager's
//! recovery sub-graph, not just rely on optimistic locking.

use cycle_manager_core::state;
use cycle_manager_db::models::{TaskContext, TaskKind, TaskRole, TaskStatus};
use cycle_manager_db::queries::tasks;

use cycle_manager_test_utils::{create_test_db, drop_test_db};

#[tokio::test]
async fn transition_allows_a_graph_edge_the_cycle_manager_owns() {
    let (pool, db_name) = create_test_db().await;

    let task = tasks::insert_task(
        &pool,
        "failed task",
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
    .expect("insert task should succeed");
    sqlx::query("UPDATE tasks SET status = 'failed' WHERE id = $1")
        .bind(task.id)
        .execute(&pool)
        .await
        .expect("setup update should succeed");

    let rows = state::transition(&pool, task.id, TaskStatus::Failed, TaskStatus::Queued, None)
        .await
        .expect("a graph-valid transition should succeed");
    assert_eq!(rows, 1);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn transition_rejects_an_edge_outside_the_recovery_sub_graph() {
    let (pool, db_name) = create_test_db().await;

    let task = tasks::insert_task(
        &pool,
        "queued task",
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
    .expect("insert task should succeed");

    // queued -> done belongs to the Judge, never to the cycle manager.
    let result = state::transition(&pool, task.id, TaskStatus::Queued, TaskStatus::Done, None).await;
    assert!(result.is_err());

    let fetched = tasks::get_task(&pool, task.id)
        .await
        .expect("get task should succeed")
        .expect("task should exist");
    assert_eq!(
        fetched.status,
        TaskStatus::Queued,
        "a rejected transition must never touch the row"
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}
