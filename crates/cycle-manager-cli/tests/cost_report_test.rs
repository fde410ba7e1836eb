//! Integration tests covering the data `cyclemgr cost-report` and
//! `cyclemgr status` summarize, exercised directly against a real database
//! the way those commands do.

use cycle_manager_core::monitors::cost::get_cost_by_period;
use cycle_manager_db::models::{RunStatus, TaskContext, TaskKind, TaskRole};
use cycle_manager_db::queries::{agents, runs, tasks};

use cycle_manager_test_utils::{create_test_db, drop_test_db};

#[tokio::test]
async fn cost_report_summarizes_finished_runs_in_the_window() {
    let (pool, db_name) = create_test_db().await;

    let agent = agents::insert_agent(&pool, TaskRole::Worker, &serde_json::json!({}))
        .await
        .expect("insert agent should succeed");
    let task = tasks::insert_task(
        &pool,
        "task",
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

    let success_run = runs::insert_run(&pool, task.id, agent.id)
        .await
        .expect("insert run should succeed");
    runs::finish_run(&pool, success_run.id, RunStatus::Success, Some(1000), None, None)
        .await
        .expect("finish run should succeed");

    let failed_run = runs::insert_run(&pool, task.id, agent.id)
        .await
        .expect("insert run should succeed");
    runs::finish_run(
        &pool,
        failed_run.id,
        RunStatus::Failed,
        Some(500),
        Some("boom"),
        None,
    )
    .await
    .expect("finish run should succeed");

    let now = chrono::Utc::now();
    let start = now - chrono::Duration::days(1);
    let summary = get_cost_by_period(&pool, start, now)
        .await
        .expect("cost summary should succeed");

    assert_eq!(summary.runs_count, 2);
    assert_eq!(summary.successful_runs, 1);
    assert_eq!(summary.failed_runs, 1);
    assert_eq!(summary.total_tokens, 1500);

    pool.close().await;
    drop_test_db(&db_name).await;
}
