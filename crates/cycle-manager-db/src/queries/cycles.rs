//! Database query functions for the `cycles` table (C13 Cycle Orchestrator).
//!
//! Supplemental to the spec's named components: a runnable orchestrator
//! needs somewhere durable to record "a cycle happened and here is what it
//! did," which spec.md's `Cycle` entity (§3) implies but does not wire to a
//! specific operation -- this module is that wiring.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Cycle;

/// Start a new cycle, returning the next sequential number.
pub async fn start_cycle(pool: &PgPool) -> Result<Cycle> {
    let cycle = sqlx::query_as::<_, Cycle>(
        "INSERT INTO cycles (number) \
         VALUES (COALESCE((SELECT MAX(number) FROM cycles), 0) + 1) \
         RETURNING *",
    )
    .fetch_one(pool)
    .await
    .context("failed to start cycle")?;

    Ok(cycle)
}

/// Mark a cycle completed, recording aggregated stats and a snapshot of
/// queue-depth-by-status at cycle boundary.
pub async fn complete_cycle(
    pool: &PgPool,
    cycle_id: Uuid,
    stats: &Value,
    state_snapshot: &Value,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE cycles \
         SET status = 'completed', completed_at = now(), stats = $1, state_snapshot = $2 \
         WHERE id = $3 AND status = 'running'",
    )
    .bind(sqlx::types::Json(stats))
    .bind(sqlx::types::Json(state_snapshot))
    .bind(cycle_id)
    .execute(pool)
    .await
    .context("failed to complete cycle")?;

    Ok(result.rows_affected())
}

/// Fetch the most recently started cycle, if any.
pub async fn get_latest_cycle(pool: &PgPool) -> Result<Option<Cycle>> {
    let cycle = sqlx::query_as::<_, Cycle>("SELECT * FROM cycles ORDER BY number DESC LIMIT 1")
        .fetch_optional(pool)
        .await
        .context("failed to fetch latest cycle")?;

    Ok(cycle)
}
