//! Cycle Orchestrator (C13): drives the cleaners, requeuers, and monitors
//! on a fixed cadence instead of a DAG-aware agent-spawning loop, and
//! performs the full-cleanup pass on cycle boundaries.

use std::time::Duration as StdDuration;

use anyhow::Result;
use serde_json::{json, Value};
use sqlx::PgPool;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use cycle_manager_db::models::TaskStatus;
use cycle_manager_db::queries::{agents, cycles, leases, runs, tasks};
use cycle_manager_db::with_transaction;

use crate::cleaners;
use crate::events::record_event;
use crate::monitors::anomaly::{self, AnomalyDetector, AnomalyDetectorConfig};
use crate::monitors::cost::{self, CostLimitsConfig};
use crate::requeue::{blocked_task, failed_task};

const FAST_TICK: StdDuration = StdDuration::from_secs(30);
const SLOW_TICK: StdDuration = StdDuration::from_secs(60);
const ANOMALY_TICK: StdDuration = StdDuration::from_secs(120);
const COST_REPORT_TICK: StdDuration = StdDuration::from_secs(3600);

/// Configuration for every loop the orchestrator drives.
#[derive(Debug, Clone)]
pub struct CycleOrchestratorConfig {
    pub failed_task: failed_task::FailedTaskRequeuerConfig,
    pub blocked_task: blocked_task::BlockedTaskRequeuerConfig,
    pub cost_limits: CostLimitsConfig,
    pub anomaly: AnomalyDetectorConfig,
}

impl CycleOrchestratorConfig {
    pub fn from_env() -> Self {
        Self {
            failed_task: failed_task::FailedTaskRequeuerConfig::from_env(),
            blocked_task: blocked_task::BlockedTaskRequeuerConfig::from_env(),
            cost_limits: CostLimitsConfig::from_env(),
            anomaly: AnomalyDetectorConfig::from_env(),
        }
    }
}

/// Counts of rows acted on by one `perform_full_cleanup` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleCleanupSummary {
    pub expired_leases: usize,
    pub remaining_leases_deleted: u64,
    pub agents_marked_offline: usize,
    pub agents_reset_to_idle: u64,
    pub tasks_reverted_to_queued: usize,
    pub runs_cancelled: usize,
}

/// Reset in-flight state to a clean slate: expire leases, idle every agent,
/// and return running tasks/runs to a restartable state. Run once on the
/// cycle boundary (process start).
///
/// All six mutations run inside a single transaction (spec.md §4.1): a
/// crash partway through must never leave a task `running` with its lease
/// already gone and no path back to `queued`.
pub async fn perform_full_cleanup(pool: &PgPool) -> Result<CycleCleanupSummary> {
    let (expired_leases, agents_marked_offline, summary) = with_transaction(pool, |tx| {
        Box::pin(async move {
            let expired_leases = cleaners::lease::clean_tx(&mut *tx).await?;
            let remaining_leases_deleted = leases::delete_all_leases(&mut **tx).await?;
            let agents_marked_offline = cleaners::agent::clean_tx(&mut *tx).await?;
            let agents_reset_to_idle = agents::reset_all_non_offline_agents_to_idle(&mut **tx).await?;
            let tasks_reverted_to_queued =
                tasks::revert_all_running_to_queued(&mut **tx).await?.len();
            let runs_cancelled = runs::cancel_all_running_runs(&mut **tx).await?.len();

            let summary = CycleCleanupSummary {
                expired_leases: expired_leases.len(),
                remaining_leases_deleted,
                agents_marked_offline: agents_marked_offline.len(),
                agents_reset_to_idle,
                tasks_reverted_to_queued,
                runs_cancelled,
            };

            Ok((expired_leases, agents_marked_offline, summary))
        })
    })
    .await?;

    for lease in &expired_leases {
        record_event(
            pool,
            "lease.expired",
            "task",
            lease.task_id,
            Some(lease.owner_agent_id),
            json!({ "taskId": lease.task_id }),
        )
        .await;
    }
    for agent in &agents_marked_offline {
        record_event(
            pool,
            "agent.offline",
            "agent",
            agent.id,
            Some(agent.id),
            json!({ "reason": "heartbeat_timeout" }),
        )
        .await;
    }

    record_event(
        pool,
        "cycle.cleanup",
        "cycle",
        Uuid::nil(),
        None,
        json!({
            "expiredLeases": summary.expired_leases,
            "remainingLeasesDeleted": summary.remaining_leases_deleted,
            "agentsMarkedOffline": summary.agents_marked_offline,
            "agentsResetToIdle": summary.agents_reset_to_idle,
            "tasksRevertedToQueued": summary.tasks_reverted_to_queued,
            "runsCancelled": summary.runs_cancelled,
        }),
    )
    .await;

    tracing::info!(?summary, "performed full cycle cleanup");

    Ok(summary)
}

/// Build a point-in-time count of tasks by status, used as a cycle's
/// completion `state_snapshot`.
async fn queue_depth_snapshot(pool: &PgPool) -> Result<Value> {
    let mut depth = serde_json::Map::new();
    for status in [
        TaskStatus::Queued,
        TaskStatus::Running,
        TaskStatus::Blocked,
        TaskStatus::Failed,
        TaskStatus::Done,
        TaskStatus::Cancelled,
    ] {
        let count = tasks::list_tasks_by_status(pool, status).await?.len();
        depth.insert(status.to_string(), json!(count));
    }
    Ok(Value::Object(depth))
}

/// Mark the current cycle completed, recording the cleanup summary as
/// `stats` and a queue-depth snapshot as `state_snapshot`. Best-effort: a
/// failure here is logged, not propagated, since it runs during shutdown.
async fn complete_current_cycle(pool: &PgPool, cycle_id: Uuid, cleanup: &CycleCleanupSummary) {
    let stats = json!({
        "expiredLeases": cleanup.expired_leases,
        "remainingLeasesDeleted": cleanup.remaining_leases_deleted,
        "agentsMarkedOffline": cleanup.agents_marked_offline,
        "agentsResetToIdle": cleanup.agents_reset_to_idle,
        "tasksRevertedToQueued": cleanup.tasks_reverted_to_queued,
        "runsCancelled": cleanup.runs_cancelled,
    });

    let state_snapshot = match queue_depth_snapshot(pool).await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            tracing::error!(error = %err, "failed to build cycle state snapshot");
            json!({})
        }
    };

    if let Err(err) = cycles::complete_cycle(pool, cycle_id, &stats, &state_snapshot).await {
        tracing::error!(error = %err, "failed to complete cycle");
    }
}

async fn run_fast_tick(pool: &PgPool, config: &CycleOrchestratorConfig) {
    if let Err(err) = cleaners::lease::clean(pool).await {
        tracing::error!(error = %err, "lease cleaner failed");
    }
    if let Err(err) = cleaners::run::clean(pool).await {
        tracing::error!(error = %err, "run cleaner failed");
    }
    if let Err(err) = failed_task::run(pool, &config.failed_task).await {
        tracing::error!(error = %err, "failed-task requeuer failed");
    }
}

async fn run_slow_tick(pool: &PgPool, config: &CycleOrchestratorConfig) {
    if let Err(err) = blocked_task::run(pool, &config.blocked_task).await {
        tracing::error!(error = %err, "blocked-task requeuer failed");
    }
    if let Err(err) = cleaners::agent::clean(pool).await {
        tracing::error!(error = %err, "agent cleaner failed");
    }
    if let Err(err) = cleaners::merge_queue::clean(pool).await {
        tracing::error!(error = %err, "merge-queue recoverer failed");
    }
}

async fn run_anomaly_tick(pool: &PgPool, detector: &AnomalyDetector, config: &CycleOrchestratorConfig) {
    match anomaly::run_checks(pool, detector, &config.anomaly).await {
        Ok(reported) => {
            if !reported.is_empty() {
                tracing::warn!(count = reported.len(), "anomalies reported");
            }
        }
        Err(err) => tracing::error!(error = %err, "anomaly detector failed"),
    }
}

async fn run_cost_report_tick(pool: &PgPool, config: &CycleOrchestratorConfig) {
    match cost::check_cost_limits(pool, &config.cost_limits).await {
        Ok(alerts) => {
            if !alerts.is_empty() {
                tracing::warn!(count = alerts.len(), "cost limit alerts raised");
            }
        }
        Err(err) => tracing::error!(error = %err, "cost limit check failed"),
    }
}

/// Run exactly one pass of every cleaner, requeuer, and monitor, then
/// return. Used by `cyclemgr tick` -- unlike [`perform_full_cleanup`], this
/// does not reset in-flight leases/agents/tasks/runs, it just drives the
/// normal recovery passes once.
pub async fn run_one_tick(pool: &PgPool, config: &CycleOrchestratorConfig) {
    let detector = AnomalyDetector::new();
    run_fast_tick(pool, config).await;
    run_slow_tick(pool, config).await;
    run_anomaly_tick(pool, &detector, config).await;
    run_cost_report_tick(pool, config).await;
}

/// Drive every cleaner, requeuer, and monitor on its configured cadence
/// until `cancel` fires. Performs one full cleanup pass before entering the
/// tick loop.
pub async fn run_cycle_orchestrator(
    pool: &PgPool,
    config: &CycleOrchestratorConfig,
    cancel: CancellationToken,
) -> Result<()> {
    let cycle = cycles::start_cycle(pool).await?;
    let cleanup_summary = perform_full_cleanup(pool).await?;

    let detector = AnomalyDetector::new();

    let mut fast = interval(FAST_TICK);
    fast.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut slow = interval(SLOW_TICK);
    slow.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut anomaly_timer = interval(ANOMALY_TICK);
    anomaly_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut cost_report = interval(COST_REPORT_TICK);
    cost_report.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // The first tick of a `tokio::time::interval` fires immediately; skip it
    // since `perform_full_cleanup` already covered the startup pass.
    fast.tick().await;
    slow.tick().await;
    anomaly_timer.tick().await;
    cost_report.tick().await;

    loop {
        tokio::select! {
            _ = fast.tick() => run_fast_tick(pool, config).await,
            _ = slow.tick() => run_slow_tick(pool, config).await,
            _ = anomaly_timer.tick() => run_anomaly_tick(pool, &detector, config).await,
            _ = cost_report.tick() => run_cost_report_tick(pool, config).await,
            _ = cancel.cancelled() => {
                tracing::info!("cycle orchestrator cancelled, shutting down");
                complete_current_cycle(pool, cycle.id, &cleanup_summary).await;
                return Ok(());
            }
        }
    }
}
