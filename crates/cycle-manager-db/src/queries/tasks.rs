//! Database query functions for the `tasks` and `task_dependencies` tables.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{BlockReason, Task, TaskContext, TaskKind, TaskRole, TaskStatus};

/// Insert a new task row. Returns the inserted task with server-generated
/// defaults (id, created_at, updated_at, status=queued, retry_count=0).
#[allow(clippy::too_many_arguments)]
pub async fn insert_task(
    pool: &PgPool,
    title: &str,
    goal: &str,
    role: TaskRole,
    kind: TaskKind,
    priority: i32,
    risk_level: i32,
    timebox_minutes: i32,
    allowed_paths: &[String],
    commands: &[String],
    context: &TaskContext,
) -> Result<Task> {
    let task = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks \
           (title, goal, role, kind, priority, risk_level, timebox_minutes, \
            allowed_paths, commands, context) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
         RETURNING *",
    )
    .bind(title)
    .bind(goal)
    .bind(role)
    .bind(kind)
    .bind(priority)
    .bind(risk_level)
    .bind(timebox_minutes)
    .bind(allowed_paths)
    .bind(commands)
    .bind(sqlx::types::Json(context))
    .fetch_one(pool)
    .await
    .context("failed to insert task")?;

    Ok(task)
}

/// Fetch a single task by ID.
///
/// Generic over the executor so callers can run it against a plain pool or
/// against an in-flight transaction.
pub async fn get_task<'e, E>(executor: E, id: Uuid) -> Result<Option<Task>>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("failed to fetch task")?;

    Ok(task)
}

/// List all tasks with the given status, oldest first (FIFO within
/// priority -- callers that need priority ordering should sort client-side
/// or extend this query; the cleaners/requeuers in this crate only need
/// cooldown ordering).
pub async fn list_tasks_by_status(pool: &PgPool, status: TaskStatus) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE status = $1 ORDER BY created_at ASC",
    )
    .bind(status)
    .fetch_all(pool)
    .await
    .context("failed to list tasks by status")?;

    Ok(tasks)
}

/// Insert a dependency edge: `task_id` depends on `depends_on_id`.
///
/// Uses `ON CONFLICT DO NOTHING` so this is idempotent.
pub async fn insert_task_dependency(
    pool: &PgPool,
    task_id: Uuid,
    depends_on_id: Uuid,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO task_dependencies (task_id, depends_on) VALUES ($1, $2) \
         ON CONFLICT DO NOTHING",
    )
    .bind(task_id)
    .bind(depends_on_id)
    .execute(pool)
    .await
    .context("failed to insert task dependency")?;

    Ok(())
}

/// Get the IDs of all tasks that a given task depends on.
pub async fn get_task_dependencies(pool: &PgPool, task_id: Uuid) -> Result<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> =
        sqlx::query_as("SELECT depends_on FROM task_dependencies WHERE task_id = $1")
            .bind(task_id)
            .fetch_all(pool)
            .await
            .context("failed to get task dependencies")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Get all queued tasks whose dependencies are all `done`, i.e. ready to be
/// leased by a worker.
pub async fn get_ready_tasks(pool: &PgPool) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT t.* \
         FROM tasks t \
         WHERE t.status = 'queued' \
           AND NOT EXISTS ( \
               SELECT 1 FROM task_dependencies td \
               JOIN tasks dep ON dep.id = td.depends_on \
               WHERE td.task_id = t.id AND dep.status != 'done' \
           ) \
         ORDER BY t.priority DESC, t.created_at ASC",
    )
    .fetch_all(pool)
    .await
    .context("failed to get ready tasks")?;

    Ok(tasks)
}

/// Atomically transition a task from one status to another.
///
/// Uses optimistic locking: the UPDATE's WHERE clause includes
/// `status = $from`, so the row is only updated if the current status
/// still matches. Returns the number of rows affected (0 means the
/// expected `from` status no longer held -- a concurrent writer won the
/// race, which callers treat as a no-op, not an error).
pub async fn transition_task_status<'e, E>(
    executor: E,
    task_id: Uuid,
    from: TaskStatus,
    to: TaskStatus,
    block_reason: Option<BlockReason>,
) -> Result<u64>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = $1, block_reason = $2, updated_at = now() \
         WHERE id = $3 AND status = $4",
    )
    .bind(to)
    .bind(block_reason)
    .bind(task_id)
    .bind(from)
    .execute(executor)
    .await
    .context("failed to transition task status")?;

    Ok(result.rows_affected())
}

/// Requeue a task from `failed` back to `queued`, incrementing
/// `retry_count` and clearing `block_reason`. Optimistically locked on the
/// caller-observed `retry_count` so a concurrent requeue cannot double-bump.
pub async fn requeue_failed_task(
    pool: &PgPool,
    task_id: Uuid,
    current_retry_count: i32,
    new_allowed_paths: Option<&[String]>,
    new_commands: Option<&[String]>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'queued', \
             block_reason = NULL, \
             retry_count = retry_count + 1, \
             allowed_paths = COALESCE($1, allowed_paths), \
             commands = COALESCE($2, commands), \
             updated_at = now() \
         WHERE id = $3 AND status = 'failed' AND retry_count = $4",
    )
    .bind(new_allowed_paths)
    .bind(new_commands)
    .bind(task_id)
    .bind(current_retry_count)
    .execute(pool)
    .await
    .context("failed to requeue failed task")?;

    Ok(result.rows_affected())
}

/// Escalate a task from `failed` to `blocked` with the given reason,
/// incrementing `retry_count`.
pub async fn escalate_failed_task(
    pool: &PgPool,
    task_id: Uuid,
    current_retry_count: i32,
    block_reason: BlockReason,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'blocked', \
             block_reason = $1, \
             retry_count = retry_count + 1, \
             updated_at = now() \
         WHERE id = $2 AND status = 'failed' AND retry_count = $3",
    )
    .bind(block_reason)
    .bind(task_id)
    .bind(current_retry_count)
    .execute(pool)
    .await
    .context("failed to escalate failed task")?;

    Ok(result.rows_affected())
}

/// Requeue a task from `blocked` back to `queued`, incrementing
/// `retry_count` and clearing `block_reason`.
pub async fn requeue_blocked_task(
    pool: &PgPool,
    task_id: Uuid,
    current_retry_count: i32,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'queued', \
             block_reason = NULL, \
             retry_count = retry_count + 1, \
             updated_at = now() \
         WHERE id = $1 AND status = 'blocked' AND retry_count = $2",
    )
    .bind(task_id)
    .bind(current_retry_count)
    .execute(pool)
    .await
    .context("failed to requeue blocked task")?;

    Ok(result.rows_affected())
}

/// Keep a task blocked but bump its block reason and retry count (used when
/// a blocked task is "re-confirmed" blocked rather than requeued, e.g. the
/// awaiting-judge restore paths).
pub async fn rebump_blocked_task(
    pool: &PgPool,
    task_id: Uuid,
    current_retry_count: i32,
    block_reason: BlockReason,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET block_reason = $1, \
             retry_count = retry_count + 1, \
             updated_at = now() \
         WHERE id = $2 AND status = 'blocked' AND retry_count = $3",
    )
    .bind(block_reason)
    .bind(task_id)
    .bind(current_retry_count)
    .execute(pool)
    .await
    .context("failed to rebump blocked task")?;

    Ok(result.rows_affected())
}

/// Transition a blocked task to `failed` (used by the rework-split path,
/// where the parent task is frozen as an audit record once its child
/// rework task is inserted).
pub async fn fail_blocked_task(pool: &PgPool, task_id: Uuid) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks SET status = 'failed', block_reason = NULL, updated_at = now() \
         WHERE id = $1 AND status = 'blocked'",
    )
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to fail blocked task")?;

    Ok(result.rows_affected())
}

/// Transition a blocked task to `cancelled` (used by the conflict-autofix
/// suppression path).
pub async fn cancel_blocked_task(pool: &PgPool, task_id: Uuid) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks SET status = 'cancelled', block_reason = NULL, updated_at = now() \
         WHERE id = $1 AND status = 'blocked'",
    )
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to cancel blocked task")?;

    Ok(result.rows_affected())
}

/// Select failed tasks whose `updated_at` is past the given cooldown.
pub async fn select_failed_tasks_past_cooldown(
    pool: &PgPool,
    cooldown_ms: i64,
) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks \
         WHERE status = 'failed' \
           AND updated_at < now() - ($1 || ' milliseconds')::interval \
         ORDER BY created_at ASC",
    )
    .bind(cooldown_ms.to_string())
    .fetch_all(pool)
    .await
    .context("failed to select failed tasks past cooldown")?;

    Ok(tasks)
}

/// Select blocked tasks whose `updated_at` is past the given base cooldown.
///
/// Quota-wait tasks need a larger, per-task back-off computed in
/// `cycle-manager-core`; this query returns every blocked task past the
/// *minimum* cooldown and leaves the per-reason cooldown check to the
/// caller, matching how the requeuer inspects `block_reason` before
/// deciding the effective cooldown.
pub async fn select_blocked_tasks_past_cooldown(
    pool: &PgPool,
    min_cooldown_ms: i64,
) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks \
         WHERE status = 'blocked' \
           AND updated_at < now() - ($1 || ' milliseconds')::interval \
         ORDER BY created_at ASC",
    )
    .bind(min_cooldown_ms.to_string())
    .fetch_all(pool)
    .await
    .context("failed to select blocked tasks past cooldown")?;

    Ok(tasks)
}

/// Check whether an active (queued/running/blocked) AutoFix or
/// AutoFix-Conflict task already exists for the given PR number.
pub async fn has_active_autofix_task_for_pr(pool: &PgPool, pr_number: i64) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS ( \
             SELECT 1 FROM tasks \
             WHERE status IN ('queued', 'running', 'blocked') \
               AND (title LIKE '[AutoFix] PR #' || $1 || '%' \
                    OR title LIKE '[AutoFix-Conflict] PR #' || $1 || '%') \
         )",
    )
    .bind(pr_number)
    .fetch_one(pool)
    .await
    .context("failed to check active autofix task")?;

    Ok(exists)
}

/// Reset tasks stuck `running` with no live lease back to `queued`. Used by
/// restart recovery and the full-cycle-cleanup path (C13).
///
/// Generic over the executor so callers can run it against a plain pool or
/// against an in-flight transaction.
pub async fn revert_all_running_to_queued<'e, E>(executor: E) -> Result<Vec<Task>>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let tasks = sqlx::query_as::<_, Task>(
        "UPDATE tasks \
         SET status = 'queued', block_reason = NULL, updated_at = now() \
         WHERE status = 'running' \
         RETURNING *",
    )
    .fetch_all(executor)
    .await
    .context("failed to revert running tasks to queued")?;

    Ok(tasks)
}

/// Insert a rework task as a sibling of `parent_task_id`, copying forward
/// the context the blocked-task requeuer derives (title, priority,
/// timebox, specs/notes). Returns the inserted task.
#[allow(clippy::too_many_arguments)]
pub async fn insert_rework_task(
    pool: &PgPool,
    title: &str,
    goal: &str,
    role: TaskRole,
    kind: TaskKind,
    priority: i32,
    risk_level: i32,
    timebox_minutes: i32,
    allowed_paths: &[String],
    commands: &[String],
    context: &TaskContext,
) -> Result<Task> {
    insert_task(
        pool,
        title,
        goal,
        role,
        kind,
        priority,
        risk_level,
        timebox_minutes,
        allowed_paths,
        commands,
        context,
    )
    .await
    .context("failed to insert rework task")
}

/// Timestamp accessor used by cooldown math in `cycle-manager-core` so the
/// effective "now" always comes from the database clock, not the local
/// process clock.
pub async fn db_now(pool: &PgPool) -> Result<DateTime<Utc>> {
    let row: (DateTime<Utc>,) = sqlx::query_as("SELECT now()")
        .fetch_one(pool)
        .await
        .context("failed to read database clock")?;
    Ok(row.0)
}
