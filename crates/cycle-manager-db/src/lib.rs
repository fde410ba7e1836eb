//! Typed persistence gateway (C1) for the cycle manager: connection
//! pooling, migrations, row models, and one query module per table.
//!
//! Every multi-row transition the cleaners and requeuers in
//! `cycle-manager-core` perform runs inside a single [`sqlx::Transaction`]
//! via [`with_transaction`], so that state-machine transitions appear
//! atomic to observers (§5 of the governing design).

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use sqlx::PgPool;

/// Run `f` inside a single transaction, committing on `Ok` and rolling back
/// on `Err`. `f` is boxed because a closure that awaits on the borrowed
/// transaction cannot otherwise express a return type whose lifetime ties
/// back to that borrow.
pub async fn with_transaction<T, F>(pool: &PgPool, f: F) -> Result<T>
where
    F: for<'a> FnOnce(&'a mut sqlx::Transaction<'_, sqlx::Postgres>) -> BoxFuture<'a, Result<T>>,
{
    let mut tx = pool.begin().await.context("failed to begin transaction")?;
    let result = f(&mut tx).await;
    match result {
        Ok(value) => {
            tx.commit().await.context("failed to commit transaction")?;
            Ok(value)
        }
        Err(err) => {
            // Best effort: the transaction also rolls back on drop.
            let _ = tx.rollback().await;
            Err(err)
        }
    }
}

/// Attempt to acquire a session-scoped Postgres advisory lock keyed by a
/// hash of the caller-supplied signature, releasing automatically when the
/// current transaction ends. Returns `false` without blocking if another
/// session already holds the lock for that signature.
pub async fn try_advisory_lock(pool: &PgPool, signature_hash: i64) -> Result<bool> {
    let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_xact_lock($1)")
        .bind(signature_hash)
        .fetch_one(pool)
        .await
        .context("failed to attempt advisory lock")?;

    Ok(acquired)
}
