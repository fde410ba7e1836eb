//! Database query functions for the `runs` table.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{ErrorMeta, Run, RunStatus};

/// Insert a new run row for a task/agent pair. Returns the inserted run
/// (status=running, started_at=now, finished_at=NULL).
pub async fn insert_run(pool: &PgPool, task_id: Uuid, agent_id: Uuid) -> Result<Run> {
    let run = sqlx::query_as::<_, Run>(
        "INSERT INTO runs (task_id, agent_id) VALUES ($1, $2) RETURNING *",
    )
    .bind(task_id)
    .bind(agent_id)
    .fetch_one(pool)
    .await
    .context("failed to insert run")?;

    Ok(run)
}

/// Fetch a single run by ID.
pub async fn get_run(pool: &PgPool, id: Uuid) -> Result<Option<Run>> {
    let run = sqlx::query_as::<_, Run>("SELECT * FROM runs WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch run")?;

    Ok(run)
}

/// List runs for a task, most recent first, optionally filtered to a set of
/// statuses and limited to `limit` rows. Used by the classifier's
/// repeated-signature lookback and the requeuers' "latest failed run" reads.
pub async fn list_runs_for_task(
    pool: &PgPool,
    task_id: Uuid,
    statuses: &[RunStatus],
    limit: i64,
) -> Result<Vec<Run>> {
    let runs = if statuses.is_empty() {
        sqlx::query_as::<_, Run>(
            "SELECT * FROM runs WHERE task_id = $1 ORDER BY started_at DESC LIMIT $2",
        )
        .bind(task_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    } else {
        sqlx::query_as::<_, Run>(
            "SELECT * FROM runs WHERE task_id = $1 AND status = ANY($2) \
             ORDER BY started_at DESC LIMIT $3",
        )
        .bind(task_id)
        .bind(statuses)
        .bind(limit)
        .fetch_all(pool)
        .await
    }
    .context("failed to list runs for task")?;

    Ok(runs)
}

/// Mark a run finished with the given status, error message, and error meta.
/// `status` must not be `running`.
pub async fn finish_run(
    pool: &PgPool,
    run_id: Uuid,
    status: RunStatus,
    cost_tokens: Option<i64>,
    error_message: Option<&str>,
    error_meta: Option<&ErrorMeta>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE runs \
         SET status = $1, finished_at = now(), cost_tokens = $2, \
             error_message = $3, error_meta = $4 \
         WHERE id = $5 AND status = 'running'",
    )
    .bind(status)
    .bind(cost_tokens)
    .bind(error_message)
    .bind(error_meta.map(sqlx::types::Json))
    .bind(run_id)
    .execute(pool)
    .await
    .context("failed to finish run")?;

    Ok(result.rows_affected())
}

/// Select runs stuck `running` past `max_duration_ms` (C7 Run Cleaner).
pub async fn select_stuck_runs(pool: &PgPool, max_duration_ms: i64) -> Result<Vec<Run>> {
    let runs = sqlx::query_as::<_, Run>(
        "SELECT * FROM runs \
         WHERE status = 'running' \
           AND started_at < now() - ($1 || ' milliseconds')::interval",
    )
    .bind(max_duration_ms.to_string())
    .fetch_all(pool)
    .await
    .context("failed to select stuck runs")?;

    Ok(runs)
}

/// Cancel a run with a fixed timeout message (C7). Optimistically locked on
/// `status = 'running'`.
pub async fn cancel_run_for_timeout(pool: &PgPool, run_id: Uuid) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE runs \
         SET status = 'cancelled', finished_at = now(), \
             error_message = 'Cancelled due to timeout' \
         WHERE id = $1 AND status = 'running'",
    )
    .bind(run_id)
    .execute(pool)
    .await
    .context("failed to cancel run for timeout")?;

    Ok(result.rows_affected())
}

/// Cancel every run still `running`, with a fixed cycle-cleanup message
/// (C13 `performFullCleanup`). Returns the ids of cancelled runs.
///
/// Generic over the executor so callers can run it against a plain pool or
/// against an in-flight transaction.
pub async fn cancel_all_running_runs<'e, E>(executor: E) -> Result<Vec<Uuid>>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        "UPDATE runs \
         SET status = 'cancelled', finished_at = now(), \
             error_message = 'Cancelled during cycle cleanup' \
         WHERE status = 'running' \
         RETURNING id",
    )
    .fetch_all(executor)
    .await
    .context("failed to cancel all running runs")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Restore the latest success run for a task that has a PR/worktree/research
/// artifact by clearing its `judged_at`. Returns the restored run, if one
/// was found and updated.
pub async fn restore_latest_judgeable_run(pool: &PgPool, task_id: Uuid) -> Result<Option<Run>> {
    let run = sqlx::query_as::<_, Run>(
        "UPDATE runs \
         SET judged_at = NULL \
         WHERE id = ( \
             SELECT r.id FROM runs r \
             WHERE r.task_id = $1 AND r.status = 'success' AND r.judged_at IS NOT NULL \
               AND EXISTS (SELECT 1 FROM artifacts a WHERE a.run_id = r.id) \
             ORDER BY r.finished_at DESC \
             LIMIT 1 \
         ) \
         RETURNING *",
    )
    .bind(task_id)
    .fetch_optional(pool)
    .await
    .context("failed to restore latest judgeable run")?;

    Ok(run)
}

/// Whether a success run with `judged_at IS NULL` already exists for the
/// task (i.e. a judge run is already pending, nothing to restore).
pub async fn has_pending_judge_run(pool: &PgPool, task_id: Uuid) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS ( \
             SELECT 1 FROM runs \
             WHERE task_id = $1 AND status = 'success' AND judged_at IS NULL \
         )",
    )
    .bind(task_id)
    .fetch_one(pool)
    .await
    .context("failed to check pending judge run")?;

    Ok(exists)
}

/// Aggregate run costs and counts over `[start, end)`, grouped by status.
/// Backs the C11 Cost Tracker's `getCostByPeriod`.
#[derive(Debug, Clone, Default)]
pub struct CostPeriodSummary {
    pub total_tokens: i64,
    pub runs_count: i64,
    pub successful_runs: i64,
    pub failed_runs: i64,
}

pub async fn get_cost_by_period(
    pool: &PgPool,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<CostPeriodSummary> {
    let rows: Vec<(String, i64, i64)> = sqlx::query_as(
        "SELECT status::text, COUNT(*), COALESCE(SUM(cost_tokens), 0) \
         FROM runs \
         WHERE started_at >= $1 AND started_at < $2 \
         GROUP BY status",
    )
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await
    .context("failed to get cost by period")?;

    let mut summary = CostPeriodSummary::default();
    for (status, count, tokens) in &rows {
        summary.runs_count += count;
        summary.total_tokens += tokens;
        match status.as_str() {
            "success" => summary.successful_runs += count,
            "failed" | "cancelled" => summary.failed_runs += count,
            _ => {}
        }
    }
    Ok(summary)
}

/// Count runs that finished successfully at or after `since`. Backs the
/// C12 Anomaly Detector's "no progress" check.
pub async fn count_successful_finishes_since(pool: &PgPool, since: DateTime<Utc>) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM runs WHERE status = 'success' AND finished_at >= $1",
    )
    .bind(since)
    .fetch_one(pool)
    .await
    .context("failed to count successful finishes")?;

    Ok(count)
}
