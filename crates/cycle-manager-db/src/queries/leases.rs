//! Database query functions for the `leases` table (C5 Lease Cleaner).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Lease;

/// Insert a lease, granting `owner_agent_id` exclusive hold on `task_id`
/// until `expires_at`. Fails if a lease on the task already exists (unique
/// constraint on `task_id`).
pub async fn insert_lease(
    pool: &PgPool,
    task_id: Uuid,
    owner_agent_id: Uuid,
    expires_at: DateTime<Utc>,
) -> Result<Lease> {
    let lease = sqlx::query_as::<_, Lease>(
        "INSERT INTO leases (task_id, owner_agent_id, expires_at) \
         VALUES ($1, $2, $3) \
         RETURNING *",
    )
    .bind(task_id)
    .bind(owner_agent_id)
    .bind(expires_at)
    .fetch_one(pool)
    .await
    .context("failed to insert lease")?;

    Ok(lease)
}

/// Fetch the lease for a task, if one exists.
pub async fn get_lease_for_task(pool: &PgPool, task_id: Uuid) -> Result<Option<Lease>> {
    let lease = sqlx::query_as::<_, Lease>("SELECT * FROM leases WHERE task_id = $1")
        .bind(task_id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch lease for task")?;

    Ok(lease)
}

/// Select every lease with `expires_at < now` (C5).
///
/// Generic over the executor so callers can run it against a plain pool or
/// against an in-flight transaction.
pub async fn select_expired_leases<'e, E>(executor: E) -> Result<Vec<Lease>>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let leases = sqlx::query_as::<_, Lease>("SELECT * FROM leases WHERE expires_at < now()")
        .fetch_all(executor)
        .await
        .context("failed to select expired leases")?;

    Ok(leases)
}

/// Delete leases by id. Returns the number of rows removed.
pub async fn delete_leases_by_id<'e, E>(executor: E, ids: &[Uuid]) -> Result<u64>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    if ids.is_empty() {
        return Ok(0);
    }
    let result = sqlx::query("DELETE FROM leases WHERE id = ANY($1)")
        .bind(ids)
        .execute(executor)
        .await
        .context("failed to delete leases")?;

    Ok(result.rows_affected())
}

/// Delete every lease unconditionally (C13 `performFullCleanup`). Returns
/// the number of rows removed.
pub async fn delete_all_leases<'e, E>(executor: E) -> Result<u64>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let result = sqlx::query("DELETE FROM leases")
        .execute(executor)
        .await
        .context("failed to delete all leases")?;

    Ok(result.rows_affected())
}
