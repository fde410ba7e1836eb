//! Run Cleaner (C7): cancel runs stuck `running` past the max duration and
//! fail the tasks they belong to.

use anyhow::Result;
use serde_json::json;
use sqlx::PgPool;

use cycle_manager_db::models::TaskStatus;
use cycle_manager_db::queries::runs;

use crate::events::record_event;
use crate::state;

const DEFAULT_MAX_RUN_DURATION_MS: i64 = 15 * 60 * 1000;

/// Max duration a run may stay `running` before the cleaner cancels it,
/// read from `STUCK_RUN_TIMEOUT_MS` (default 15 minutes).
pub fn max_run_duration_ms() -> i64 {
    std::env::var("STUCK_RUN_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_MAX_RUN_DURATION_MS)
}

/// Run one pass of the run cleaner. Returns the number of runs cancelled.
pub async fn clean(pool: &PgPool) -> Result<usize> {
    let stuck = runs::select_stuck_runs(pool, max_run_duration_ms()).await?;
    if stuck.is_empty() {
        return Ok(0);
    }

    for run in &stuck {
        runs::cancel_run_for_timeout(pool, run.id).await?;

        state::transition(
            pool,
            run.task_id,
            TaskStatus::Running,
            TaskStatus::Failed,
            None,
        )
        .await?;

        record_event(
            pool,
            "run.timeout",
            "run",
            run.id,
            Some(run.agent_id),
            json!({ "taskId": run.task_id }),
        )
        .await;

        tracing::info!(run_id = %run.id, task_id = %run.task_id, "cancelled stuck run");
    }

    Ok(stuck.len())
}
