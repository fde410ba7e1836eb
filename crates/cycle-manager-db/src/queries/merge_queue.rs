//! Database query functions for the `pr_merge_queue` table
//! (C8 Merge-Queue Recoverer).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::MergeQueueEntry;

/// Insert a pending merge-queue claim row for a task/PR pair.
pub async fn insert_merge_queue_entry(
    pool: &PgPool,
    task_id: Uuid,
    pr_number: i64,
) -> Result<MergeQueueEntry> {
    let row = sqlx::query_as::<_, MergeQueueEntry>(
        "INSERT INTO pr_merge_queue (task_id, pr_number) VALUES ($1, $2) RETURNING *",
    )
    .bind(task_id)
    .bind(pr_number)
    .fetch_one(pool)
    .await
    .context("failed to insert merge queue entry")?;

    Ok(row)
}

/// Select claims stuck `processing` with an expired claim (C8).
pub async fn select_stale_merge_queue_claims(pool: &PgPool) -> Result<Vec<MergeQueueEntry>> {
    let rows = sqlx::query_as::<_, MergeQueueEntry>(
        "SELECT * FROM pr_merge_queue WHERE status = 'processing' AND claim_expires_at <= now()",
    )
    .fetch_all(pool)
    .await
    .context("failed to select stale merge queue claims")?;

    Ok(rows)
}

/// Return a stale claim to `pending`, clearing claim fields and setting
/// `next_attempt_at` (C8).
pub async fn recover_merge_queue_claim(
    pool: &PgPool,
    id: Uuid,
    next_attempt_at: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE pr_merge_queue \
         SET status = 'pending', claim_owner = NULL, claim_token = NULL, \
             claimed_at = NULL, claim_expires_at = NULL, \
             next_attempt_at = $1, updated_at = now() \
         WHERE id = $2 AND status = 'processing'",
    )
    .bind(next_attempt_at)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to recover merge queue claim")?;

    Ok(result.rows_affected())
}
