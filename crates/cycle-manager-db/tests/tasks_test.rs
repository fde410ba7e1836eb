//! Integration tests for the `tasks` query module.

use cycle_manager_db::models::{TaskContext, TaskKind, TaskRole, TaskStatus};
use cycle_manager_db::queries::tasks;

use cycle_manager_test_utils::{create_test_db, drop_test_db};

async fn insert_autofix_task(
    pool: &sqlx::PgPool,
    title: &str,
) -> cycle_manager_db::models::Task {
    tasks::insert_task(
        pool,
        title,
        "fix it",
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
    .expect("insert should succeed")
}

#[tokio::test]
async fn has_active_autofix_task_for_pr_is_scoped_to_the_pr() {
    let (pool, db_name) = create_test_db().await;

    insert_autofix_task(&pool, "[AutoFix] PR #7 merge conflict").await;

    // PR 7 has a pending AutoFix task.
    assert!(
        tasks::has_active_autofix_task_for_pr(&pool, 7)
            .await
            .expect("query should succeed")
    );

    // A different PR with no task of its own must not see PR 7's task.
    assert!(
        !tasks::has_active_autofix_task_for_pr(&pool, 42)
            .await
            .expect("query should succeed")
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn has_active_autofix_task_for_pr_matches_conflict_variant() {
    let (pool, db_name) = create_test_db().await;

    insert_autofix_task(&pool, "[AutoFix-Conflict] PR #42 merge conflict").await;

    assert!(
        tasks::has_active_autofix_task_for_pr(&pool, 42)
            .await
            .expect("query should succeed")
    );
    assert!(
        !tasks::has_active_autofix_task_for_pr(&pool, 7)
            .await
            .expect("query should succeed")
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn transition_task_status_is_optimistically_locked() {
    let (pool, db_name) = create_test_db().await;

    let task = insert_autofix_task(&pool, "[AutoFix] PR #1 conflict").await;
    sqlx::query("UPDATE tasks SET status = 'running' WHERE id = $1")
        .bind(task.id)
        .execute(&pool)
        .await
        .expect("setup update should succeed");

    let rows = tasks::transition_task_status(
        &pool,
        task.id,
        TaskStatus::Running,
        TaskStatus::Queued,
        None,
    )
    .await
    .expect("transition should succeed");
    assert_eq!(rows, 1);

    // The task is no longer `running`, so the same transition is a no-op,
    // not an error -- a concurrent writer may have already moved it on.
    let rows = tasks::transition_task_status(
        &pool,
        task.id,
        TaskStatus::Running,
        TaskStatus::Queued,
        None,
    )
    .await
    .expect("transition should succeed");
    assert_eq!(rows, 0);

    let fetched = tasks::get_task(&pool, task.id)
        .await
        .expect("get should succeed")
        .expect("task should exist");
    assert_eq!(fetched.status, TaskStatus::Queued);
    assert_eq!(fetched.block_reason, None);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn revert_all_running_to_queued_only_touches_running_tasks() {
    let (pool, db_name) = create_test_db().await;

    let running = insert_autofix_task(&pool, "[AutoFix] PR #2 conflict").await;
    let blocked = insert_autofix_task(&pool, "[AutoFix] PR #3 conflict").await;
    sqlx::query("UPDATE tasks SET status = 'running' WHERE id = $1")
        .bind(running.id)
        .execute(&pool)
        .await
        .expect("setup update should succeed");
    sqlx::query("UPDATE tasks SET status = 'blocked', block_reason = 'needs_rework' WHERE id = $1")
        .bind(blocked.id)
        .execute(&pool)
        .await
        .expect("setup update should succeed");

    let reverted = tasks::revert_all_running_to_queued(&pool)
        .await
        .expect("revert should succeed");
    assert_eq!(reverted.len(), 1);
    assert_eq!(reverted[0].id, running.id);

    let fetched_running = tasks::get_task(&pool, running.id)
        .await
        .expect("get should succeed")
        .expect("task should exist");
    assert_eq!(fetched_running.status, TaskStatus::Queued);

    let fetched_blocked = tasks::get_task(&pool, blocked.id)
        .await
        .expect("get should succeed")
        .expect("task should exist");
    assert_eq!(fetched_blocked.status, TaskStatus::Blocked);

    pool.close().await;
    drop_test_db(&db_name).await;
}
