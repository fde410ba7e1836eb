//! Failure Classifier (C3): maps a run's `(errorMessage, errorMeta)` pair to
//! a category, retry eligibility, a reason code, and the block reason an
//! escalation would use.
//!
//! Structured codes win outright (§6 "Failure codes"); everything else falls
//! through to a priority-ordered regex pattern match over the normalized
//! message. Also implements repeated-failure signature detection, used by
//! the failed-task requeuer (C9) to recognize a task stuck failing the same
//! way.

use std::sync::LazyLock;

use regex::Regex;

use cycle_manager_db::models::{BlockReason, ErrorMeta, FailureCategory, Run, RunStatus};

/// Default repeated-signature lookback window (§4.3).
pub const DEFAULT_SIGNATURE_THRESHOLD: usize = 4;

/// Result of classifying a run's failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category: FailureCategory,
    pub retryable: bool,
    /// Stable string code identifying the matched rule, e.g.
    /// `"verification_command_missing_script"`.
    pub reason: String,
    /// The block reason an escalation from this classification would carry.
    /// Always `needs_rework`: the other block reasons (`awaiting_judge`,
    /// `quota_wait`, `issue_linking`) arise from the PR-review predicate and
    /// quota back-off paths, never from the classifier itself.
    pub block_reason: BlockReason,
}

fn classification(category: FailureCategory, retryable: bool, reason: &str) -> Classification {
    Classification {
        category,
        retryable,
        reason: reason.to_string(),
        block_reason: BlockReason::NeedsRework,
    }
}

/// Map a known structured failure code to its classification. Returns `None`
/// for unrecognized codes, which falls through to message pattern matching.
fn classify_known_code(code: &str) -> Option<Classification> {
    use FailureCategory::*;
    let c = match code {
        "external_directory_permission_prompt" => classification(Permission, false, code),
        "no_actionable_changes" => classification(Noop, false, code),
        "policy_violation" => classification(Policy, true, code),
        "verification_command_missing_script"
        | "unsupported_format"
        | "verification_command_sequence_issue"
        | "missing_make_target"
        | "no_test_files" => classification(Setup, false, code),
        "setup_or_bootstrap_issue" => classification(Setup, true, code),
        "environment_issue" | "quota_failure" => classification(Env, true, code),
        "verification_command_failed" | "test_failure" => classification(Test, true, code),
        "transient_or_flaky_failure" => classification(Flaky, true, code),
        "model_doom_loop" => classification(ModelLoop, true, code),
        "model_or_unknown_failure" | "execution_failed" => classification(Model, true, code),
        _ => return None,
    };
    Some(c)
}

struct PatternRule {
    pattern: &'static Regex,
    category: FailureCategory,
    retryable: bool,
    reason: &'static str,
}

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*[a-zA-Z]").expect("valid regex"));

static PERMISSION_PROMPT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)permission prompt|requires (elevated )?permission|external directory permission")
        .expect("valid regex")
});
static NO_ACTIONABLE_CHANGES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)no actionable changes|nothing to do|no changes (were )?made").expect("valid regex")
});
static POLICY_VIOLATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)policy violation|outside (the )?allowed paths|disallowed path").expect("valid regex")
});
static MISSING_VERIFICATION_SCRIPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"err_pnpm_no_script|missing script").expect("valid regex"));
static BOOTSTRAP_OR_ENV: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)enoent|module not found|cannot find module|packaging error|auth(entication)? (failed|required)")
        .expect("valid regex")
});
static DB_CONNECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)database|connection refused|econnrefused|could not connect").expect("valid regex")
});
static VERIFICATION_FAILED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)jest|pytest|go test|cargo test|verification commands? failed").expect("valid regex")
});
static TRANSIENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)rate limit|too many requests|\b5\d\d\b|timed? ?out|econnreset").expect("valid regex")
});
static MODEL_DOOM_LOOP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)doom.?loop|repeating the same (action|change)|stuck in a loop").expect("valid regex")
});

/// Rules in documented priority order (§4.3 step 2). First match wins.
static PATTERN_RULES: LazyLock<Vec<PatternRule>> = LazyLock::new(|| {
    vec![
        PatternRule {
            pattern: &PERMISSION_PROMPT,
            category: FailureCategory::Permission,
            retryable: false,
            reason: "external_directory_permission_prompt",
        },
        PatternRule {
            pattern: &NO_ACTIONABLE_CHANGES,
            category: FailureCategory::Noop,
            retryable: false,
            reason: "no_actionable_changes",
        },
        PatternRule {
            pattern: &POLICY_VIOLATION,
            category: FailureCategory::Policy,
            retryable: true,
            reason: "policy_violation",
        },
        PatternRule {
            pattern: &MISSING_VERIFICATION_SCRIPT,
            category: FailureCategory::Setup,
            retryable: false,
            reason: "verification_command_missing_script",
        },
        PatternRule {
            pattern: &BOOTSTRAP_OR_ENV,
            category: FailureCategory::Setup,
            retryable: true,
            reason: "setup_or_bootstrap_issue",
        },
        PatternRule {
            pattern: &DB_CONNECTION,
            category: FailureCategory::Env,
            retryable: true,
            reason: "environment_issue",
        },
        PatternRule {
            pattern: &VERIFICATION_FAILED,
            category: FailureCategory::Test,
            retryable: true,
            reason: "verification_command_failed",
        },
        PatternRule {
            pattern: &TRANSIENT,
            category: FailureCategory::Flaky,
            retryable: true,
            reason: "transient_or_flaky_failure",
        },
        PatternRule {
            pattern: &MODEL_DOOM_LOOP,
            category: FailureCategory::ModelLoop,
            retryable: true,
            reason: "model_doom_loop",
        },
    ]
});

/// Lowercase and strip ANSI escape sequences, the normalization §4.3 step 2
/// applies before pattern matching.
fn normalize_message(message: &str) -> String {
    ANSI_ESCAPE.replace_all(message, "").to_lowercase()
}

/// Classify a run's failure. Structured codes win outright; otherwise the
/// message is normalized and matched against [`PATTERN_RULES`] in order.
/// An unmatched message classifies as `{category: model, retryable: true,
/// reason: model_or_unknown_failure}`.
pub fn classify(error_message: Option<&str>, error_meta: Option<&ErrorMeta>) -> Classification {
    if let Some(code) = error_meta.and_then(|m| m.failure_code.as_deref()) {
        if let Some(known) = classify_known_code(code) {
            return known;
        }
    }

    if let Some(message) = error_message {
        let normalized = normalize_message(message);
        for rule in PATTERN_RULES.iter() {
            if rule.pattern.is_match(&normalized) {
                return classification(rule.category, rule.retryable, rule.reason);
            }
        }
    }

    classification(FailureCategory::Model, true, "model_or_unknown_failure")
}

static UUID_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}")
        .expect("valid regex")
});
static PATH_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:/[\w.\-]+){2,}").expect("valid regex"));
static NUMBER_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

const SIGNATURE_MAX_LEN: usize = 400;

/// Compute a normalized signature for an error, collapsing UUID/path/number
/// variations so repeated occurrences of "the same" failure compare equal.
///
/// Order: strip ANSI, lowercase, substitute UUID-like tokens with `<uuid>`,
/// long paths with `<path>`, digit runs with `<n>`, collapse whitespace,
/// truncate to 400 chars, then prefix `code:<failureCode>` if a structured
/// code was present.
pub fn normalize_failure_signature(error_message: Option<&str>, failure_code: Option<&str>) -> String {
    let Some(message) = error_message else {
        return match failure_code {
            Some(code) => format!("code:{code}"),
            None => String::new(),
        };
    };

    let normalized = normalize_message(message);
    let normalized = UUID_TOKEN.replace_all(&normalized, "<uuid>");
    let normalized = PATH_TOKEN.replace_all(&normalized, "<path>");
    let normalized = NUMBER_TOKEN.replace_all(&normalized, "<n>");
    let normalized = WHITESPACE.replace_all(normalized.trim(), " ");

    let mut truncated: String = normalized.chars().take(SIGNATURE_MAX_LEN).collect();
    if let Some(code) = failure_code {
        truncated = format!("code:{code}:{truncated}");
    }
    truncated
}

/// Whether the task's recent terminal runs (failed/cancelled) share a single
/// repeated failure signature.
///
/// `runs` must already be the task's last-N terminal runs ordered most
/// recent first (`list_runs_for_task` with a `[Failed, Cancelled]` filter
/// and `limit = threshold`). Returns true iff at least `threshold` runs
/// exist and all share the same non-empty signature. `threshold <= 1` forces
/// true (nothing to compare against); an empty signature forces false.
pub fn has_repeated_failure_signature(runs: &[Run], threshold: usize) -> bool {
    if threshold <= 1 {
        return true;
    }
    if runs.len() < threshold {
        return false;
    }

    let signatures: Vec<String> = runs
        .iter()
        .filter(|r| matches!(r.status, RunStatus::Failed | RunStatus::Cancelled))
        .map(|r| {
            let code = r
                .error_meta
                .0
                .as_ref()
                .and_then(|m| m.failure_code.as_deref());
            normalize_failure_signature(r.error_message.as_deref(), code)
        })
        .collect();

    if signatures.len() < threshold {
        return false;
    }

    let first = &signatures[0];
    if first.is_empty() {
        return false;
    }

    signatures.iter().all(|s| s == first)
}
