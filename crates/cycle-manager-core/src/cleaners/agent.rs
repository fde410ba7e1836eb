//! Agent Cleaner (C6): offline agents whose heartbeat has gone stale.

use anyhow::Result;
use chrono::Duration;
use serde_json::json;
use sqlx::{PgPool, Postgres, Transaction};

use cycle_manager_db::models::Agent;
use cycle_manager_db::queries::agents;
use cycle_manager_db::with_transaction;

use crate::events::record_event;

/// Agents with no heartbeat for this long are considered offline.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::minutes(10);

/// Select agents past the heartbeat timeout and mark them offline, all
/// within `tx`. Returns the agents marked so the caller can record events
/// once the transaction commits.
pub(crate) async fn clean_tx(tx: &mut Transaction<'_, Postgres>) -> Result<Vec<Agent>> {
    let threshold = chrono::Utc::now() - HEARTBEAT_TIMEOUT;
    let expired = agents::select_heartbeat_expired_agents(&mut **tx, threshold).await?;
    if expired.is_empty() {
        return Ok(Vec::new());
    }

    for agent in &expired {
        agents::mark_agent_offline(&mut **tx, agent.id).await?;
    }

    Ok(expired)
}

/// Run one pass of the agent cleaner. Returns the number of agents marked
/// offline.
pub async fn clean(pool: &PgPool) -> Result<usize> {
    let expired = with_transaction(pool, |tx| Box::pin(clean_tx(tx))).await?;

    for agent in &expired {
        record_event(
            pool,
            "agent.offline",
            "agent",
            agent.id,
            Some(agent.id),
            json!({ "reason": "heartbeat_timeout" }),
        )
        .await;

        tracing::info!(agent_id = %agent.id, "agent marked offline for heartbeat timeout");
    }

    Ok(expired.len())
}
