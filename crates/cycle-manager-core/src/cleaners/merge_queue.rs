//! Merge-Queue Recoverer (C8): claims stuck `processing` past their
//! expiry are returned to `pending` so another worker can retry the merge.

use anyhow::Result;
use chrono::Duration;
use serde_json::json;
use sqlx::PgPool;

use cycle_manager_db::queries::merge_queue;

use crate::events::record_event;

const DEFAULT_RETRY_DELAY_MS: i64 = 30_000;

/// Delay before a recovered claim becomes eligible again, read from
/// `JUDGE_MERGE_QUEUE_RETRY_DELAY_MS` (default 30 s).
pub fn retry_delay() -> Duration {
    let ms = std::env::var("JUDGE_MERGE_QUEUE_RETRY_DELAY_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_RETRY_DELAY_MS);
    Duration::milliseconds(ms)
}

/// Run one pass of the merge-queue recoverer. Returns the number of claims
/// recovered.
pub async fn clean(pool: &PgPool) -> Result<usize> {
    let stale = merge_queue::select_stale_merge_queue_claims(pool).await?;
    if stale.is_empty() {
        return Ok(0);
    }

    let next_attempt_at = chrono::Utc::now() + retry_delay();
    let mut recovered_ids = Vec::with_capacity(stale.len());

    for claim in &stale {
        let rows = merge_queue::recover_merge_queue_claim(pool, claim.id, next_attempt_at).await?;
        if rows > 0 {
            recovered_ids.push(claim.id);
        }
    }

    if recovered_ids.is_empty() {
        return Ok(0);
    }

    record_event(
        pool,
        "cycle.merge_queue_claim_recovered",
        "merge_queue",
        recovered_ids[0],
        None,
        json!({ "recoveredIds": recovered_ids }),
    )
    .await;

    tracing::info!(count = recovered_ids.len(), "recovered stale merge queue claims");

    Ok(recovered_ids.len())
}
