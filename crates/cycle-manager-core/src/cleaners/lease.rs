//! Lease Cleaner (C5): detect expired leases, delete them, and revert tied
//! tasks still `running` back to `queued`.

use anyhow::Result;
use serde_json::json;
use sqlx::{PgPool, Postgres, Transaction};

use cycle_manager_db::models::{Lease, TaskStatus};
use cycle_manager_db::queries::{leases, tasks};
use cycle_manager_db::with_transaction;

use crate::events::record_event;
use crate::state;

/// Select expired leases, delete them, and revert any task still `running`
/// tied to one of them back to `queued` -- all within `tx`. Returns the
/// released leases so the caller can record events once the transaction
/// commits.
pub(crate) async fn clean_tx(tx: &mut Transaction<'_, Postgres>) -> Result<Vec<Lease>> {
    let expired = leases::select_expired_leases(&mut **tx).await?;
    if expired.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<_> = expired.iter().map(|l| l.id).collect();
    leases::delete_leases_by_id(&mut **tx, &ids).await?;

    for lease in &expired {
        if let Some(task) = tasks::get_task(&mut **tx, lease.task_id).await? {
            if task.status == TaskStatus::Running {
                state::transition(
                    &mut **tx,
                    task.id,
                    TaskStatus::Running,
                    TaskStatus::Queued,
                    None,
                )
                .await?;
            }
        }
    }

    Ok(expired)
}

/// Run one pass of the lease cleaner. Returns the number of leases released.
pub async fn clean(pool: &PgPool) -> Result<usize> {
    let expired = with_transaction(pool, |tx| Box::pin(clean_tx(tx))).await?;

    for lease in &expired {
        record_event(
            pool,
            "lease.expired",
            "task",
            lease.task_id,
            Some(lease.owner_agent_id),
            json!({ "taskId": lease.task_id }),
        )
        .await;

        tracing::info!(task_id = %lease.task_id, lease_id = %lease.id, "released expired lease");
    }

    Ok(expired.len())
}
