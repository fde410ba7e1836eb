//! Database query functions for the `artifacts` table.
//!
//! Supplemental to the spec's named components: backs the "success run that
//! has a PR/worktree/research artifact" lookups the failed- and
//! blocked-task requeuers (C9/C10) perform before restoring a judge run.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Artifact, ArtifactType};

/// Record that a run produced an artifact of the given type. Idempotent:
/// re-recording the same (run_id, artifact_type) pair is a no-op.
pub async fn insert_artifact(pool: &PgPool, run_id: Uuid, artifact_type: ArtifactType) -> Result<()> {
    sqlx::query(
        "INSERT INTO artifacts (run_id, artifact_type) VALUES ($1, $2) \
         ON CONFLICT (run_id, artifact_type) DO NOTHING",
    )
    .bind(run_id)
    .bind(artifact_type)
    .execute(pool)
    .await
    .context("failed to insert artifact")?;

    Ok(())
}

/// List artifacts recorded against a run.
pub async fn list_artifacts_for_run(pool: &PgPool, run_id: Uuid) -> Result<Vec<Artifact>> {
    let artifacts =
        sqlx::query_as::<_, Artifact>("SELECT * FROM artifacts WHERE run_id = $1")
            .bind(run_id)
            .fetch_all(pool)
            .await
            .context("failed to list artifacts for run")?;

    Ok(artifacts)
}
