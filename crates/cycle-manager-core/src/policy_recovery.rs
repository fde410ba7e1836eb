//! Policy-violation recovery (C9 step 4): widen a task's `allowedPaths` when
//! a failure was caused by writing outside them, instead of retrying the
//! identical, doomed-to-fail command set.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use cycle_manager_db::models::{ErrorMeta, Task};

/// Paths auto-allowed regardless of the failure, read as a comma-separated
/// list from `CYCLE_MANAGER_POLICY_AUTO_ALLOW_PATHS`. Empty by default --
/// recovery should come from the violation itself, not a blanket allowlist.
#[derive(Debug, Clone, Default)]
pub struct PolicyRecoveryConfig {
    pub auto_allow_paths: Vec<String>,
}

impl PolicyRecoveryConfig {
    pub fn from_env() -> Self {
        let auto_allow_paths = std::env::var("CYCLE_MANAGER_POLICY_AUTO_ALLOW_PATHS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Self { auto_allow_paths }
    }
}

static OUTSIDE_ALLOWED_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)outside (?:the )?allowed paths?:?\s*([^\s,;]+)").expect("valid regex")
});

/// Pull candidate paths out of a policy-violation failure: the structured
/// `errorMeta.policyViolations` list wins when present, otherwise fall back
/// to scraping `outside allowed paths: <path>` mentions from the message.
fn extract_violation_paths(error_message: Option<&str>, error_meta: Option<&ErrorMeta>) -> Vec<String> {
    if let Some(meta) = error_meta {
        if !meta.policy_violations.is_empty() {
            return meta.policy_violations.clone();
        }
    }

    let Some(message) = error_message else {
        return Vec::new();
    };

    OUTSIDE_ALLOWED_PATH
        .captures_iter(message)
        .map(|c| c[1].trim_matches(|ch| ch == '\'' || ch == '"').to_string())
        .collect()
}

/// Scan a task's own commands for path-like tokens (e.g. a `make` target's
/// output directory) that aren't already allowed -- these are often the
/// paths a widened policy needs to cover next.
fn command_driven_hints(commands: &[String], already_allowed: &BTreeSet<&str>) -> Vec<String> {
    commands
        .iter()
        .flat_map(|cmd| cmd.split_whitespace())
        .filter(|tok| tok.contains('/') && !tok.starts_with('-'))
        .filter(|tok| !already_allowed.contains(tok))
        .map(|tok| tok.trim_end_matches(['/', ',']).to_string())
        .collect()
}

/// Compute a merged `allowedPaths` set for `task`, given the failure detail
/// from its most recent run. Returns `None` if the merge gains no new path
/// (nothing for C9 step 4 to act on).
pub fn resolve_allowed_paths(
    config: &PolicyRecoveryConfig,
    task: &Task,
    error_message: Option<&str>,
    error_meta: Option<&ErrorMeta>,
) -> Option<Vec<String>> {
    let mut merged: BTreeSet<String> = task.allowed_paths.iter().cloned().collect();
    let before = merged.len();

    let already_allowed: BTreeSet<&str> = task.allowed_paths.iter().map(String::as_str).collect();

    for path in extract_violation_paths(error_message, error_meta) {
        merged.insert(path);
    }
    for path in command_driven_hints(&task.commands, &already_allowed) {
        merged.insert(path);
    }
    for path in &config.auto_allow_paths {
        merged.insert(path.clone());
    }

    if merged.len() > before {
        Some(merged.into_iter().collect())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cycle_manager_db::models::{TaskContext, TaskKind, TaskRole, TaskStatus};
    use uuid::Uuid;

    fn task_with_paths(allowed: &[&str], commands: &[&str]) -> Task {
        Task {
            id: Uuid::new_v4(),
            title: "t".to_string(),
            goal: "g".to_string(),
            role: TaskRole::Worker,
            kind: TaskKind::Code,
            status: TaskStatus::Failed,
            block_reason: None,
            retry_count: 0,
            priority: 0,
            risk_level: 0,
            timebox_minutes: 30,
            allowed_paths: allowed.iter().map(|s| s.to_string()).collect(),
            commands: commands.iter().map(|s| s.to_string()).collect(),
            context: sqlx::types::Json(TaskContext::default()),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn structured_violations_win_over_message() {
        let cfg = PolicyRecoveryConfig::default();
        let task = task_with_paths(&["src/"], &[]);
        let meta = ErrorMeta {
            policy_violations: vec!["config/secrets.yaml".to_string()],
            ..Default::default()
        };
        let result = resolve_allowed_paths(&cfg, &task, Some("unrelated message"), Some(&meta));
        assert_eq!(result, Some(vec!["config/secrets.yaml".to_string(), "src/".to_string()]));
    }

    #[test]
    fn message_scrape_extracts_outside_path() {
        let cfg = PolicyRecoveryConfig::default();
        let task = task_with_paths(&["src/"], &[]);
        let result = resolve_allowed_paths(
            &cfg,
            &task,
            Some("write failed: outside allowed paths: build/output.bin"),
            None,
        );
        assert_eq!(
            result,
            Some(vec!["build/output.bin".to_string(), "src/".to_string()])
        );
    }

    #[test]
    fn no_new_path_returns_none() {
        let cfg = PolicyRecoveryConfig::default();
        let task = task_with_paths(&["src/"], &[]);
        let result = resolve_allowed_paths(&cfg, &task, Some("something failed"), None);
        assert_eq!(result, None);
    }

    #[test]
    fn command_driven_hint_is_picked_up() {
        let cfg = PolicyRecoveryConfig::default();
        let task = task_with_paths(&["src/"], &["make -C build/output all"]);
        let result = resolve_allowed_paths(&cfg, &task, None, None);
        assert_eq!(result, Some(vec!["build/output".to_string(), "src/".to_string()]));
    }
}
