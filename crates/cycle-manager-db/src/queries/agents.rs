//! Database query functions for the `agents` table (C6 Agent Cleaner).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Agent, TaskRole};

/// Register a new agent. Returns the inserted row (status=idle,
/// last_heartbeat=now).
pub async fn insert_agent(
    pool: &PgPool,
    role: TaskRole,
    metadata: &serde_json::Value,
) -> Result<Agent> {
    let agent = sqlx::query_as::<_, Agent>(
        "INSERT INTO agents (role, metadata) VALUES ($1, $2) RETURNING *",
    )
    .bind(role)
    .bind(sqlx::types::Json(metadata))
    .fetch_one(pool)
    .await
    .context("failed to insert agent")?;

    Ok(agent)
}

/// Fetch a single agent by ID.
pub async fn get_agent(pool: &PgPool, id: Uuid) -> Result<Option<Agent>> {
    let agent = sqlx::query_as::<_, Agent>("SELECT * FROM agents WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch agent")?;

    Ok(agent)
}

/// Record a heartbeat, keeping the agent's current status.
pub async fn record_heartbeat(pool: &PgPool, agent_id: Uuid) -> Result<u64> {
    let result = sqlx::query("UPDATE agents SET last_heartbeat = now() WHERE id = $1")
        .bind(agent_id)
        .execute(pool)
        .await
        .context("failed to record heartbeat")?;

    Ok(result.rows_affected())
}

/// Select agents with `status != offline` whose `last_heartbeat` is older
/// than the given threshold timestamp (C6).
///
/// Generic over the executor so callers can run it against a plain pool or
/// against an in-flight transaction.
pub async fn select_heartbeat_expired_agents<'e, E>(
    executor: E,
    threshold: DateTime<Utc>,
) -> Result<Vec<Agent>>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let agents = sqlx::query_as::<_, Agent>(
        "SELECT * FROM agents WHERE status != 'offline' AND last_heartbeat < $1",
    )
    .bind(threshold)
    .fetch_all(executor)
    .await
    .context("failed to select heartbeat-expired agents")?;

    Ok(agents)
}

/// Transition an agent to offline and clear its current task binding (C6).
pub async fn mark_agent_offline<'e, E>(executor: E, agent_id: Uuid) -> Result<u64>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let result = sqlx::query(
        "UPDATE agents SET status = 'offline', current_task_id = NULL WHERE id = $1",
    )
    .bind(agent_id)
    .execute(executor)
    .await
    .context("failed to mark agent offline")?;

    Ok(result.rows_affected())
}

/// Reset every non-offline agent to idle with no current task (C13
/// `performFullCleanup`). Returns the number of rows updated.
pub async fn reset_all_non_offline_agents_to_idle<'e, E>(executor: E) -> Result<u64>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let result = sqlx::query(
        "UPDATE agents SET status = 'idle', current_task_id = NULL WHERE status != 'offline'",
    )
    .execute(executor)
    .await
    .context("failed to reset agents to idle")?;

    Ok(result.rows_affected())
}

/// Count agents currently `busy`, optionally filtered to those with a fresh
/// heartbeat (see the no-progress-check deviation note in DESIGN.md).
pub async fn count_busy_agents(pool: &PgPool, fresh_since: Option<DateTime<Utc>>) -> Result<i64> {
    let count: i64 = match fresh_since {
        Some(since) => {
            sqlx::query_scalar(
                "SELECT COUNT(*) FROM agents WHERE status = 'busy' AND last_heartbeat >= $1",
            )
            .bind(since)
            .fetch_one(pool)
            .await
        }
        None => {
            sqlx::query_scalar("SELECT COUNT(*) FROM agents WHERE status = 'busy'")
                .fetch_one(pool)
                .await
        }
    }
    .context("failed to count busy agents")?;

    Ok(count)
}

/// Select busy agents whose heartbeat is older than the given threshold
/// (C12 agent-timeout check).
pub async fn select_busy_agents_with_stale_heartbeat(
    pool: &PgPool,
    threshold: DateTime<Utc>,
) -> Result<Vec<Agent>> {
    let agents = sqlx::query_as::<_, Agent>(
        "SELECT * FROM agents WHERE status = 'busy' AND last_heartbeat < $1",
    )
    .bind(threshold)
    .fetch_all(pool)
    .await
    .context("failed to select busy agents with stale heartbeat")?;

    Ok(agents)
}

