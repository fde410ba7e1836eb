//! Task state machine: the transition graph cleaners and requeuers operate
//! within.
//!
//! Unlike the Planner/Worker/Judge surface (out of scope here), the cycle
//! manager never originates a `queued -> running` or `running -> done`
//! transition -- those belong to the external agents that hold leases. What
//! this module validates is the recovery sub-graph the cleaners and
//! requeuers are allowed to drive.

use anyhow::Result;
use cycle_manager_db::models::{BlockReason, TaskStatus};
use cycle_manager_db::queries::tasks;

/// The task state machine.
///
/// Transitions the cycle manager itself performs:
///
/// ```text
/// running  -> queued     (lease expiry: C5)
/// running  -> failed     (stuck run: C7)
/// failed   -> queued      (requeue: C9)
/// failed   -> blocked     (escalate: C9)
/// blocked  -> queued      (requeue: C10)
/// blocked  -> blocked     (rebump block reason/retry count: C10)
/// blocked  -> failed      (rework split freezes the parent: C10)
/// blocked  -> cancelled   (conflict-autofix suppression: C10)
/// ```
///
/// `queued -> running` (lease acquisition) and `running -> done`/`running ->
/// failed` via judge verdict belong to Workers/Judges and are not validated
/// here.
pub struct TaskStateMachine;

impl TaskStateMachine {
    /// Check whether a transition from `from` to `to` is one the cycle
    /// manager is allowed to drive.
    pub fn is_valid_transition(from: TaskStatus, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (from, to),
            (Running, Queued)
                | (Running, Failed)
                | (Failed, Queued)
                | (Failed, Blocked)
                | (Blocked, Queued)
                | (Blocked, Blocked)
                | (Blocked, Failed)
                | (Blocked, Cancelled)
        )
    }
}

/// Validate `from -> to` against [`TaskStateMachine`] before issuing the
/// transition, so the cycle manager can never drive a task into a status
/// change outside the recovery sub-graph it owns. Wraps
/// `cycle_manager_db::queries::tasks::transition_task_status`, which only
/// enforces optimistic locking against `from`, not the state graph.
pub async fn transition<'e, E>(
    executor: E,
    task_id: uuid::Uuid,
    from: TaskStatus,
    to: TaskStatus,
    block_reason: Option<BlockReason>,
) -> Result<u64>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    if !TaskStateMachine::is_valid_transition(from, to) {
        anyhow::bail!("invalid task transition for cycle manager: {from} -> {to}");
    }

    tasks::transition_task_status(executor, task_id, from, to, block_reason).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use TaskStatus::*;

    #[test]
    fn lease_expiry_and_run_timeout_are_valid() {
        assert!(TaskStateMachine::is_valid_transition(Running, Queued));
        assert!(TaskStateMachine::is_valid_transition(Running, Failed));
    }

    #[test]
    fn failed_task_requeuer_transitions_are_valid() {
        assert!(TaskStateMachine::is_valid_transition(Failed, Queued));
        assert!(TaskStateMachine::is_valid_transition(Failed, Blocked));
    }

    #[test]
    fn blocked_task_requeuer_transitions_are_valid() {
        assert!(TaskStateMachine::is_valid_transition(Blocked, Queued));
        assert!(TaskStateMachine::is_valid_transition(Blocked, Blocked));
        assert!(TaskStateMachine::is_valid_transition(Blocked, Failed));
        assert!(TaskStateMachine::is_valid_transition(Blocked, Cancelled));
    }

    #[test]
    fn worker_and_judge_owned_transitions_are_not_validated_here() {
        assert!(!TaskStateMachine::is_valid_transition(Queued, Running));
        assert!(!TaskStateMachine::is_valid_transition(Running, Done));
        assert!(!TaskStateMachine::is_valid_transition(Done, Queued));
    }
}
