//! PR-review task predicate, shared by the failed-task (C9) and
//! blocked-task (C10) requeuers.

use cycle_manager_db::models::Task;

const GOAL_PREFIX: &str = "Review and process open PR #";
const TITLE_PREFIX: &str = "[PR] Review #";

/// Whether `task` represents reviewing and processing an already-open PR,
/// as opposed to a task whose own work produces a fresh PR.
pub fn is_pr_review_task(task: &Task) -> bool {
    task.goal.starts_with(GOAL_PREFIX)
        || task.title.starts_with(TITLE_PREFIX)
        || task.context.0.pr.is_some()
        || task.context.0.imported_from_pr_backlog
}

/// Whether `task` is a conflict-autofix task spawned to resolve a merge
/// conflict on an existing PR-review task (§4.10).
pub fn is_conflict_autofix_task(task: &Task) -> bool {
    task.title.starts_with("[AutoFix-Conflict] PR #")
}

#[cfg(test)]
mod tests {
    use super::*;
    use cycle_manager_db::models::{PrContext, TaskContext, TaskKind, TaskRole, TaskStatus};
    use uuid::Uuid;

    fn base_task() -> Task {
        Task {
            id: Uuid::new_v4(),
            title: "do some work".to_string(),
            goal: "implement a feature".to_string(),
            role: TaskRole::Worker,
            kind: TaskKind::Code,
            status: TaskStatus::Queued,
            block_reason: None,
            retry_count: 0,
            priority: 0,
            risk_level: 0,
            timebox_minutes: 30,
            allowed_paths: vec![],
            commands: vec![],
            context: sqlx::types::Json(TaskContext::default()),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn detects_via_goal_prefix() {
        let mut t = base_task();
        t.goal = "Review and process open PR #42".to_string();
        assert!(is_pr_review_task(&t));
    }

    #[test]
    fn detects_via_title_prefix() {
        let mut t = base_task();
        t.title = "[PR] Review #42".to_string();
        assert!(is_pr_review_task(&t));
    }

    #[test]
    fn detects_via_pr_context() {
        let mut t = base_task();
        t.context.0.pr = Some(PrContext {
            number: 42,
            url: "https://example.com/pr/42".to_string(),
            source_task_id: None,
            head_ref: "feature".to_string(),
            head_sha: "abc123".to_string(),
            base_ref: "main".to_string(),
        });
        assert!(is_pr_review_task(&t));
    }

    #[test]
    fn detects_via_backlog_marker() {
        let mut t = base_task();
        t.context.0.imported_from_pr_backlog = true;
        assert!(is_pr_review_task(&t));
    }

    #[test]
    fn plain_task_is_not_pr_review() {
        assert!(!is_pr_review_task(&base_task()));
    }

    #[test]
    fn conflict_autofix_title_detected() {
        let mut t = base_task();
        t.title = "[AutoFix-Conflict] PR #42 merge conflict".to_string();
        assert!(is_conflict_autofix_task(&t));
    }
}
