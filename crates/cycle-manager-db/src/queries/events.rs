//! Database query functions for the `events` table -- the append-only
//! structured log (C2 Event Logger's storage half).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Event;

/// Parameters for inserting a new event row.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub agent_id: Option<Uuid>,
    pub payload: Value,
}

/// Insert a new event row. Returns the inserted row with server-generated
/// defaults (id, created_at).
pub async fn insert_event(pool: &PgPool, new: &NewEvent) -> Result<Event> {
    let event = sqlx::query_as::<_, Event>(
        "INSERT INTO events (event_type, entity_type, entity_id, agent_id, payload) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(&new.event_type)
    .bind(&new.entity_type)
    .bind(new.entity_id)
    .bind(new.agent_id)
    .bind(&new.payload)
    .fetch_one(pool)
    .await
    .with_context(|| {
        format!(
            "failed to insert event type={} entity_type={} entity_id={}",
            new.event_type, new.entity_type, new.entity_id
        )
    })?;

    Ok(event)
}

/// List events for a given entity, ordered by creation time.
pub async fn list_events_for_entity(
    pool: &PgPool,
    entity_type: &str,
    entity_id: Uuid,
) -> Result<Vec<Event>> {
    let events = sqlx::query_as::<_, Event>(
        "SELECT * FROM events \
         WHERE entity_type = $1 AND entity_id = $2 \
         ORDER BY created_at ASC",
    )
    .bind(entity_type)
    .bind(entity_id)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to list events for {entity_type} {entity_id}"))?;

    Ok(events)
}

/// Count events of a given type within a time range (inclusive start,
/// exclusive end). Used by the cost tracker and anomaly detector.
pub async fn count_events_by_type(
    pool: &PgPool,
    event_type: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<i64> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM events \
         WHERE event_type = $1 AND created_at >= $2 AND created_at < $3",
    )
    .bind(event_type)
    .bind(start)
    .bind(end)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to count events of type {event_type}"))?;

    Ok(row.0)
}

/// Fetch all events within a time range, ordered by creation time.
pub async fn get_events_by_time_range(
    pool: &PgPool,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<Event>> {
    let events = sqlx::query_as::<_, Event>(
        "SELECT * FROM events \
         WHERE created_at >= $1 AND created_at < $2 \
         ORDER BY created_at ASC",
    )
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await
    .context("failed to get events by time range")?;

    Ok(events)
}
