//! Rework task splitting (C10 "needs_rework, generic" case): freeze a
//! blocked task as an audit record and spawn a fresh sibling to retry the
//! work, optionally carrying forward detail a verification run packed into
//! the parent's notes.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use cycle_manager_db::models::{Task, TaskContext};
use cycle_manager_db::queries::tasks;

const VERIFY_REWORK_MARKER_PREFIX: &str = "[verify-rework-json]";

/// Detail a verification run packs into a blocked task's `context.notes`
/// when it wants the rework split to carry forward exactly what failed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifyReworkMarker {
    #[serde(default)]
    pub failed_command: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
}

/// Find a `[verify-rework-json]<percent-encoded-json>` marker anywhere in
/// `notes`, decode it, and return it along with `notes` with the marker
/// line removed. Returns `(None, notes unchanged)` when no marker is
/// present or it fails to decode/parse.
pub fn extract_verify_rework_marker(notes: &str) -> (Option<VerifyReworkMarker>, String) {
    let Some(start) = notes.find(VERIFY_REWORK_MARKER_PREFIX) else {
        return (None, notes.to_string());
    };

    let encoded_start = start + VERIFY_REWORK_MARKER_PREFIX.len();
    let line_end = notes[encoded_start..]
        .find('\n')
        .map(|i| encoded_start + i)
        .unwrap_or(notes.len());
    let encoded = &notes[encoded_start..line_end];

    let decoded = percent_encoding::percent_decode_str(encoded).decode_utf8_lossy();
    let marker = match serde_json::from_str::<VerifyReworkMarker>(&decoded) {
        Ok(m) => Some(m),
        Err(_) => None,
    };

    let mut stripped = String::with_capacity(notes.len());
    stripped.push_str(&notes[..start]);
    if line_end < notes.len() {
        stripped.push_str(&notes[line_end + 1..]);
    }

    (marker, stripped.trim().to_string())
}

/// Title prefix a rework sibling task gets: `[Rework-Verify]` when a verify
/// marker was present, else `[Rework]`. Existing prefixes are left alone so
/// a rework-of-a-rework doesn't stack prefixes.
pub fn rework_title(parent_title: &str, has_verify_marker: bool) -> String {
    if parent_title.starts_with("[Rework]") || parent_title.starts_with("[Rework-Verify]") {
        return parent_title.to_string();
    }
    let prefix = if has_verify_marker {
        "[Rework-Verify]"
    } else {
        "[Rework]"
    };
    format!("{prefix} {parent_title}")
}

/// `max(30, floor(prev * 0.8))` (§4.10).
pub fn rework_timebox_minutes(prev: i32) -> i32 {
    let scaled = (prev as f64 * 0.8).floor() as i32;
    scaled.max(30)
}

/// Build the rework sibling's context: the parent's context with notes
/// stripped of the verify marker and, when one was present, its
/// `failedCommand`/`source`/`stderr` lifted into `specs`.
fn rework_context(parent: &Task, marker: Option<&VerifyReworkMarker>, stripped_notes: String) -> TaskContext {
    let mut context = parent.context.0.clone();
    context.notes = stripped_notes;

    if let Some(marker) = marker {
        if let Some(cmd) = &marker.failed_command {
            context.specs.push(format!("Previously failed command: {cmd}"));
        }
        if let Some(source) = &marker.source {
            context.specs.push(format!("Source: {source}"));
        }
        if let Some(stderr) = &marker.stderr {
            context.specs.push(format!("Prior stderr:\n{stderr}"));
        }
    }

    context
}

/// Insert a rework sibling of `parent`, per §4.10's generic `needs_rework`
/// case. Does not touch `parent` itself -- callers transition it to
/// `failed` and emit `task.split` once this returns successfully.
pub async fn insert_rework_sibling(pool: &PgPool, parent: &Task) -> Result<Task> {
    let (marker, stripped_notes) = extract_verify_rework_marker(&parent.context.0.notes);
    let title = rework_title(&parent.title, marker.is_some());
    let context = rework_context(parent, marker.as_ref(), stripped_notes);
    let timebox_minutes = rework_timebox_minutes(parent.timebox_minutes);

    tasks::insert_rework_task(
        pool,
        &title,
        &parent.goal,
        parent.role,
        parent.kind,
        parent.priority + 5,
        parent.risk_level,
        timebox_minutes,
        &parent.allowed_paths,
        &parent.commands,
        &context,
    )
    .await
    .context("failed to insert rework sibling task")
}
