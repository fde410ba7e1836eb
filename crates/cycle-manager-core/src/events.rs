//! Event Logger (C2), logging half.
//!
//! The storage half (`insert_event` and the read queries) lives in
//! `cycle-manager-db::queries::events`; this wraps it with the structured
//! `tracing` call every cleaner/requeuer/monitor expects, and treats event
//! persistence as best effort: a failure to record an event is logged but
//! never aborts the state transition it describes.

use cycle_manager_db::queries::events::NewEvent;
use sqlx::PgPool;
use uuid::Uuid;

/// Record an event. Logs at `error` and swallows the error on failure --
/// losing an audit-log row must never unwind a cleaner or requeuer that has
/// already committed the state transition the event describes.
pub async fn record_event(
    pool: &PgPool,
    event_type: &str,
    entity_type: &str,
    entity_id: Uuid,
    agent_id: Option<Uuid>,
    payload: serde_json::Value,
) {
    let new = NewEvent {
        event_type: event_type.to_string(),
        entity_type: entity_type.to_string(),
        entity_id,
        agent_id,
        payload,
    };

    if let Err(err) = cycle_manager_db::queries::events::insert_event(pool, &new).await {
        tracing::error!(
            event_type,
            entity_type,
            %entity_id,
            error = %err,
            "failed to record event"
        );
    }
}
