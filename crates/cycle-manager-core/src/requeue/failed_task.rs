//! Failed-Task Requeuer (C9): retries, adjusts, or escalates tasks that
//! have sat `failed` past their cooldown.

use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use serde_json::json;
use sqlx::PgPool;

use cycle_manager_db::models::{BlockReason, RunStatus, Task};
use cycle_manager_db::queries::{runs, tasks};

use crate::classifier::{self, DEFAULT_SIGNATURE_THRESHOLD};
use crate::events::record_event;
use crate::policy_recovery::{self, PolicyRecoveryConfig};
use crate::pr_detection::is_pr_review_task;
use crate::retry_policy::{self, RetryPolicyConfig};

const DEFAULT_COOLDOWN_MS: i64 = 120_000;

/// Failed-task requeuer configuration.
#[derive(Debug, Clone)]
pub struct FailedTaskRequeuerConfig {
    pub cooldown_ms: i64,
    pub retry_policy: RetryPolicyConfig,
    pub signature_threshold: usize,
    pub policy_recovery: PolicyRecoveryConfig,
}

impl FailedTaskRequeuerConfig {
    pub fn from_env() -> Self {
        Self {
            cooldown_ms: std::env::var("CYCLE_MANAGER_FAILED_TASK_COOLDOWN_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_COOLDOWN_MS),
            retry_policy: RetryPolicyConfig::from_env(),
            signature_threshold: DEFAULT_SIGNATURE_THRESHOLD,
            policy_recovery: PolicyRecoveryConfig::from_env(),
        }
    }
}

static ARTIFACT_PRESENCE_CHECK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^test -[fs]\s+(\S+)").expect("valid regex"));
static CLEAN_LIKE_COMMAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(make clean|pnpm run clean|npm run clean|yarn clean|cargo clean)\b")
        .expect("valid regex")
});
static GENERATED_ARTIFACT_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|/)(build|dist|out|target)(?:/|$)").expect("valid regex"));

/// Drop a specific failed command, or all commands if it can't be
/// identified, so the next run falls back to auto-verify.
fn drop_missing_script_command(commands: &[String], failed_command: Option<&str>) -> Option<Vec<String>> {
    if commands.is_empty() {
        return None;
    }

    match failed_command.and_then(|fc| commands.iter().position(|c| c == fc)) {
        Some(idx) => {
            let mut new_commands = commands.to_vec();
            new_commands.remove(idx);
            Some(new_commands)
        }
        None => Some(Vec::new()),
    }
}

/// Swap a generated-artifact presence check with an immediately preceding
/// clean-like command, since the clean wiped the artifact the check now
/// fails to find.
fn swap_clean_before_artifact_check(commands: &[String]) -> Option<Vec<String>> {
    if commands.len() < 2 {
        return None;
    }

    for (idx, cmd) in commands.iter().enumerate().skip(1) {
        let Some(caps) = ARTIFACT_PRESENCE_CHECK.captures(cmd) else {
            continue;
        };
        let path = &caps[1];
        if path.contains('*') || !GENERATED_ARTIFACT_SEGMENT.is_match(path) {
            continue;
        }
        if !CLEAN_LIKE_COMMAND.is_match(&commands[idx - 1]) {
            continue;
        }

        let mut new_commands = commands.to_vec();
        new_commands.swap(idx - 1, idx);
        return Some(new_commands);
    }

    None
}

/// Apply the verification-recovery strategy for `reason`, if any, returning
/// the adjusted command list plus the recovery-rule label to emit.
fn adjust_verification_commands(
    reason: &str,
    commands: &[String],
    failed_command: Option<&str>,
) -> Option<(Vec<String>, &'static str)> {
    match reason {
        "verification_command_missing_script" | "missing_make_target" | "unsupported_format" => {
            drop_missing_script_command(commands, failed_command)
                .map(|c| (c, "verification_command_dropped"))
        }
        "verification_command_sequence_issue" => swap_clean_before_artifact_check(commands)
            .map(|c| (c, "verification_command_sequence_swapped")),
        _ => None,
    }
}

/// Run one pass of the failed-task requeuer. Returns the number of tasks
/// acted on (requeued, adjusted, or escalated).
pub async fn run(pool: &PgPool, config: &FailedTaskRequeuerConfig) -> Result<usize> {
    let candidates = tasks::select_failed_tasks_past_cooldown(pool, config.cooldown_ms).await?;
    let mut acted_on = 0;

    for task in &candidates {
        if process_task(pool, config, task).await? {
            acted_on += 1;
        }
    }

    Ok(acted_on)
}

async fn process_task(pool: &PgPool, config: &FailedTaskRequeuerConfig, task: &Task) -> Result<bool> {
    if is_pr_review_task(task) {
        return requeue_pr_review_task(pool, task).await.map(|_| true);
    }

    let latest_run = runs::list_runs_for_task(pool, task.id, &[RunStatus::Failed, RunStatus::Cancelled], 1)
        .await?
        .into_iter()
        .next();

    let (error_message, error_meta) = match &latest_run {
        Some(run) => (run.error_message.clone(), run.error_meta.0.clone()),
        None => (None, None),
    };

    let failure = classifier::classify(error_message.as_deref(), error_meta.as_ref());
    let category_limit = retry_policy::resolve_category_limit(&config.retry_policy, failure.category);
    let current_retry_count = task.retry_count;

    let global_allowed = retry_policy::is_retry_allowed(&config.retry_policy, current_retry_count);
    let category_allowed =
        retry_policy::is_category_retry_allowed(current_retry_count, category_limit);

    let signature_runs = runs::list_runs_for_task(
        pool,
        task.id,
        &[RunStatus::Failed, RunStatus::Cancelled],
        config.signature_threshold as i64,
    )
    .await?;
    let repeated_failure =
        classifier::has_repeated_failure_signature(&signature_runs, config.signature_threshold);

    if let Some((new_commands, recovery_rule)) = adjust_verification_commands(
        &failure.reason,
        &task.commands,
        error_meta.as_ref().and_then(|m| m.failed_command.as_deref()),
    ) {
        let rows = tasks::requeue_failed_task(
            pool,
            task.id,
            current_retry_count,
            None,
            Some(&new_commands),
        )
        .await?;
        if rows > 0 {
            record_event(
                pool,
                "task.requeued",
                "task",
                task.id,
                None,
                json!({ "reason": failure.reason, "recoveryRule": recovery_rule }),
            )
            .await;
            return Ok(true);
        }
    }

    if failure.reason == "policy_violation" {
        if let Some(merged_paths) = policy_recovery::resolve_allowed_paths(
            &config.policy_recovery,
            task,
            error_message.as_deref(),
            error_meta.as_ref(),
        ) {
            let rows = tasks::requeue_failed_task(
                pool,
                task.id,
                current_retry_count,
                Some(&merged_paths),
                None,
            )
            .await?;
            if rows > 0 {
                record_event(
                    pool,
                    "task.requeued",
                    "task",
                    task.id,
                    None,
                    json!({ "reason": "policy_allowed_paths_adjusted" }),
                )
                .await;
                return Ok(true);
            }
        }
    }

    if !global_allowed || !failure.retryable || !category_allowed || repeated_failure {
        let block_reason = if repeated_failure {
            BlockReason::NeedsRework
        } else {
            failure.block_reason
        };
        let rows =
            tasks::escalate_failed_task(pool, task.id, current_retry_count, block_reason).await?;
        if rows > 0 {
            record_event(
                pool,
                "task.recovery_escalated",
                "task",
                task.id,
                None,
                json!({
                    "reason": failure.reason,
                    "category": failure.category.to_string(),
                    "blockReason": block_reason.to_string(),
                }),
            )
            .await;
            return Ok(true);
        }
        return Ok(false);
    }

    let rows = tasks::requeue_failed_task(pool, task.id, current_retry_count, None, None).await?;
    if rows > 0 {
        record_event(
            pool,
            "task.requeued",
            "task",
            task.id,
            None,
            json!({ "reason": "cooldown_retry" }),
        )
        .await;
        return Ok(true);
    }

    Ok(false)
}

async fn requeue_pr_review_task(pool: &PgPool, task: &Task) -> Result<()> {
    let reason = if runs::has_pending_judge_run(pool, task.id).await? {
        "pending_judge_run_exists"
    } else if runs::restore_latest_judgeable_run(pool, task.id).await?.is_some() {
        "judge_run_restored"
    } else {
        "awaiting_judge_no_run_to_restore"
    };

    let rows =
        tasks::escalate_failed_task(pool, task.id, task.retry_count, BlockReason::AwaitingJudge)
            .await?;
    if rows > 0 {
        record_event(
            pool,
            "task.requeued",
            "task",
            task.id,
            None,
            json!({ "reason": reason }),
        )
        .await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_script_drops_named_command() {
        let commands = vec!["pnpm run build".to_string(), "pnpm run verify".to_string()];
        let result = adjust_verification_commands(
            "verification_command_missing_script",
            &commands,
            Some("pnpm run verify"),
        );
        let (new_commands, rule) = result.expect("should adjust");
        assert_eq!(new_commands, vec!["pnpm run build".to_string()]);
        assert_eq!(rule, "verification_command_dropped");
    }

    #[test]
    fn missing_script_clears_all_when_command_unknown() {
        let commands = vec!["pnpm run build".to_string()];
        let (new_commands, _) =
            adjust_verification_commands("unsupported_format", &commands, None).unwrap();
        assert!(new_commands.is_empty());
    }

    #[test]
    fn sequence_issue_swaps_clean_before_generated_artifact_check() {
        let commands = vec![
            "make clean".to_string(),
            "test -f build/output.bin".to_string(),
        ];
        let (new_commands, rule) =
            adjust_verification_commands("verification_command_sequence_issue", &commands, None)
                .unwrap();
        assert_eq!(
            new_commands,
            vec![
                "test -f build/output.bin".to_string(),
                "make clean".to_string(),
            ]
        );
        assert_eq!(rule, "verification_command_sequence_swapped");
    }

    #[test]
    fn sequence_issue_ignores_non_generated_path() {
        let commands = vec![
            "make clean".to_string(),
            "test -f src/lib.rs".to_string(),
        ];
        assert!(
            adjust_verification_commands("verification_command_sequence_issue", &commands, None)
                .is_none()
        );
    }

    #[test]
    fn unrelated_reason_produces_no_adjustment() {
        let commands = vec!["cargo test".to_string()];
        assert!(adjust_verification_commands("model_doom_loop", &commands, None).is_none());
    }
}
