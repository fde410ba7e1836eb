//! Integration tests for `with_transaction`'s commit/rollback semantics.

use cycle_manager_db::models::{TaskContext, TaskKind, TaskRole, TaskStatus};
use cycle_manager_db::queries::tasks;
use cycle_manager_db::with_transaction;

use cycle_manager_test_utils::{create_test_db, drop_test_db};

async fn insert_running_task(pool: &sqlx::PgPool, title: &str) -> cycle_manager_db::models::Task {
    let task = tasks::insert_task(
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
    .expect("insert should succeed");

    sqlx::query("UPDATE tasks SET status = 'running' WHERE id = $1")
        .bind(task.id)
        .execute(pool)
        .await
        .expect("setup update should succeed");

    task
}

#[tokio::test]
async fn commits_all_writes_on_ok() {
    let (pool, db_name) = create_test_db().await;

    let first = insert_running_task(&pool, "first").await;
    let second = insert_running_task(&pool, "second").await;

    let result = with_transaction(&pool, |tx| {
        Box::pin(async move {
            tasks::transition_task_status(
                &mut **tx,
                first.id,
                TaskStatus::Running,
                TaskStatus::Queued,
                None,
            )
            .await?;
            tasks::transition_task_status(
                &mut **tx,
                second.id,
                TaskStatus::Running,
                TaskStatus::Queued,
                None,
            )
            .await
        })
    })
    .await;

    assert!(result.is_ok());

    for task in [first.id, second.id] {
        let fetched = tasks::get_task(&pool, task)
            .await
            .expect("get should succeed")
            .expect("task should exist");
        assert_eq!(fetched.status, TaskStatus::Queued);
    }

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn rolls_back_every_write_on_err() {
    let (pool, db_name) = create_test_db().await;

    let task = insert_running_task(&pool, "will be rolled back").await;
    let task_id = task.id;

    let result: anyhow::Result<()> = with_transaction(&pool, |tx| {
        Box::pin(async move {
            tasks::transition_task_status(
                &mut **tx,
                task_id,
                TaskStatus::Running,
                TaskStatus::Queued,
                None,
            )
            .await?;

            anyhow::bail!("simulated failure after the first write")
        })
    })
    .await;

    assert!(result.is_err());

    let fetched = tasks::get_task(&pool, task_id)
        .await
        .expect("get should succeed")
        .expect("task should exist");
    assert_eq!(
        fetched.status,
        TaskStatus::Running,
        "the transition must not survive the rollback"
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}
