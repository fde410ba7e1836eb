//! Blocked-Task Requeuer (C10): wakes tasks parked `blocked` once their
//! reason-specific cooldown has elapsed, routing each to a retry, a rework
//! split, or a suppressed no-op depending on why it was blocked.

use anyhow::Result;
use serde_json::json;
use sqlx::PgPool;

use cycle_manager_db::models::{BlockReason, Task};
use cycle_manager_db::queries::{runs, tasks};

use crate::backoff::{self, QuotaBackoffConfig};
use crate::events::record_event;
use crate::pr_detection::{is_conflict_autofix_task, is_pr_review_task};
use crate::rework;

const DEFAULT_COOLDOWN_MS: i64 = 300_000;

/// Blocked-task requeuer configuration.
#[derive(Debug, Clone)]
pub struct BlockedTaskRequeuerConfig {
    pub cooldown_ms: i64,
    pub quota_backoff: QuotaBackoffConfig,
}

impl BlockedTaskRequeuerConfig {
    pub fn from_env() -> Self {
        Self {
            cooldown_ms: std::env::var("CYCLE_MANAGER_BLOCKED_TASK_COOLDOWN_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_COOLDOWN_MS),
            quota_backoff: QuotaBackoffConfig::from_env(),
        }
    }
}

/// Run one pass of the blocked-task requeuer. Returns the number of tasks
/// acted on.
pub async fn run(pool: &PgPool, config: &BlockedTaskRequeuerConfig) -> Result<usize> {
    let candidates = tasks::select_blocked_tasks_past_cooldown(pool, config.cooldown_ms).await?;
    let now = tasks::db_now(pool).await?;
    let mut acted_on = 0;

    for task in &candidates {
        let required_cooldown = required_cooldown_ms(pool, config, task).await?;
        let elapsed = (now - task.updated_at).num_milliseconds();
        if elapsed < required_cooldown {
            continue;
        }

        if process_task(pool, task).await? {
            acted_on += 1;
        }
    }

    Ok(acted_on)
}

async fn required_cooldown_ms(
    pool: &PgPool,
    config: &BlockedTaskRequeuerConfig,
    task: &Task,
) -> Result<i64> {
    if task.block_reason != Some(BlockReason::QuotaWait) {
        return Ok(config.cooldown_ms);
    }

    let latest_error_message = runs::list_runs_for_task(pool, task.id, &[], 1)
        .await?
        .into_iter()
        .next()
        .and_then(|r| r.error_message);

    Ok(backoff::compute_quota_backoff(
        &config.quota_backoff,
        task.retry_count,
        task.id,
        latest_error_message.as_deref(),
    )
    .num_milliseconds())
}

async fn process_task(pool: &PgPool, task: &Task) -> Result<bool> {
    match task.block_reason {
        Some(BlockReason::NeedsRework) if is_pr_review_task(task) => {
            needs_rework_pr_review(pool, task).await
        }
        Some(BlockReason::NeedsRework) if is_conflict_autofix_task(task) => {
            needs_rework_conflict_autofix(pool, task).await
        }
        Some(BlockReason::NeedsRework) => needs_rework_generic(pool, task).await,
        Some(BlockReason::AwaitingJudge) => awaiting_judge(pool, task).await,
        _ => requeue_generic(pool, task, "blocked_cooldown_retry").await,
    }
}

async fn needs_rework_pr_review(pool: &PgPool, task: &Task) -> Result<bool> {
    if let Some(pr) = &task.context.0.pr {
        if tasks::has_active_autofix_task_for_pr(pool, pr.number).await? {
            return Ok(false);
        }
    }

    if !runs::has_pending_judge_run(pool, task.id).await? {
        runs::restore_latest_judgeable_run(pool, task.id).await?;
    }

    let rows =
        tasks::rebump_blocked_task(pool, task.id, task.retry_count, BlockReason::AwaitingJudge)
            .await?;
    if rows > 0 {
        record_event(
            pool,
            "task.requeued",
            "task",
            task.id,
            None,
            json!({ "reason": "pr_review_awaiting_judge_rebumped" }),
        )
        .await;
    }
    Ok(rows > 0)
}

async fn needs_rework_conflict_autofix(pool: &PgPool, task: &Task) -> Result<bool> {
    let rows = tasks::cancel_blocked_task(pool, task.id).await?;
    if rows == 0 {
        return Ok(false);
    }

    if let Some(pr) = &task.context.0.pr {
        if let Some(source_task_id) = pr.source_task_id {
            if let Some(source_task) = tasks::get_task(pool, source_task_id).await? {
                if is_pr_review_task(&source_task) {
                    tasks::rebump_blocked_task(
                        pool,
                        source_task.id,
                        source_task.retry_count,
                        BlockReason::AwaitingJudge,
                    )
                    .await?;
                }
            }
        }
    }

    record_event(
        pool,
        "task.recovery_escalated",
        "task",
        task.id,
        None,
        json!({ "reason": "conflict_autofix_needs_rework_suppressed" }),
    )
    .await;

    Ok(true)
}

async fn needs_rework_generic(pool: &PgPool, task: &Task) -> Result<bool> {
    let sibling = rework::insert_rework_sibling(pool, task).await?;
    let rows = tasks::fail_blocked_task(pool, task.id).await?;
    if rows > 0 {
        record_event(
            pool,
            "task.split",
            "task",
            task.id,
            None,
            json!({ "reworkTaskId": sibling.id }),
        )
        .await;
    }
    Ok(rows > 0)
}

async fn awaiting_judge(pool: &PgPool, task: &Task) -> Result<bool> {
    if runs::has_pending_judge_run(pool, task.id).await? {
        return Ok(false);
    }

    if runs::restore_latest_judgeable_run(pool, task.id)
        .await?
        .is_some()
    {
        let rows = tasks::rebump_blocked_task(
            pool,
            task.id,
            task.retry_count,
            BlockReason::AwaitingJudge,
        )
        .await?;
        if rows > 0 {
            record_event(
                pool,
                "task.requeued",
                "task",
                task.id,
                None,
                json!({ "reason": "awaiting_judge_run_restored" }),
            )
            .await;
        }
        return Ok(rows > 0);
    }

    requeue_generic(pool, task, "awaiting_judge_timeout_retry").await
}

async fn requeue_generic(pool: &PgPool, task: &Task, reason: &str) -> Result<bool> {
    let reason = match task.block_reason {
        Some(BlockReason::QuotaWait) => "quota_wait_retry",
        _ => reason,
    };

    let rows = tasks::requeue_blocked_task(pool, task.id, task.retry_count).await?;
    if rows > 0 {
        record_event(
            pool,
            "task.requeued",
            "task",
            task.id,
            None,
            json!({ "reason": reason }),
        )
        .await;
    }
    Ok(rows > 0)
}
