//! Retry Policy (C4): global and per-category retry limits.
//!
//! Mirrors the teacher's `attempt >= retry_max` guard in
//! `state::TaskStateMachine::retry_transition`, generalized to a global
//! limit plus a per-[`FailureCategory`] table (§4.4).

use cycle_manager_db::models::FailureCategory;

/// `< 0` means unlimited.
const UNLIMITED: i32 = -1;

/// Default per-category retry limits (§4.4). `0` means never retryable
/// regardless of the global limit.
fn default_category_limit(category: FailureCategory) -> i32 {
    use FailureCategory::*;
    match category {
        Env => 5,
        Setup => 3,
        Permission => 0,
        Noop => 0,
        Policy => 2,
        Test => 2,
        Flaky => 6,
        Model => 2,
        ModelLoop => 1,
    }
}

/// Retry policy configuration, sourced from `FAILED_TASK_MAX_RETRY_COUNT`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicyConfig {
    /// Global retry limit across all categories. `< 0` is unlimited.
    pub global_limit: i32,
}

impl RetryPolicyConfig {
    pub fn new(global_limit: i32) -> Self {
        Self { global_limit }
    }

    /// Read `FAILED_TASK_MAX_RETRY_COUNT` from the environment, defaulting
    /// to unlimited (`-1`) when unset or unparseable.
    pub fn from_env() -> Self {
        let global_limit = std::env::var("FAILED_TASK_MAX_RETRY_COUNT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(UNLIMITED);
        Self::new(global_limit)
    }
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self::new(UNLIMITED)
    }
}

/// Whether a retry is allowed under the global limit alone.
pub fn is_retry_allowed(config: &RetryPolicyConfig, retry_count: i32) -> bool {
    config.global_limit < 0 || retry_count < config.global_limit
}

/// Resolve the effective retry limit for a category, combining the global
/// limit with the category table (§4.4):
///
/// - If the global limit is unlimited, a category with a positive table
///   value is itself unlimited; a non-retryable category (`permission`,
///   `noop`, table value `0`) stays `0`.
/// - Otherwise the effective limit is `min(table[category], global_limit)`.
pub fn resolve_category_limit(config: &RetryPolicyConfig, category: FailureCategory) -> i32 {
    let table_limit = default_category_limit(category);

    if config.global_limit < 0 {
        if table_limit <= 0 { 0 } else { UNLIMITED }
    } else {
        table_limit.min(config.global_limit)
    }
}

/// Whether a retry is allowed under a resolved category limit.
pub fn is_category_retry_allowed(retry_count: i32, category_limit: i32) -> bool {
    category_limit < 0 || retry_count < category_limit
}

#[cfg(test)]
mod tests {
    use super::*;
    use FailureCategory::*;

    #[test]
    fn unlimited_global_allows_any_count() {
        let cfg = RetryPolicyConfig::new(-1);
        assert!(is_retry_allowed(&cfg, 9999));
    }

    #[test]
    fn bounded_global_enforces_limit() {
        let cfg = RetryPolicyConfig::new(3);
        assert!(is_retry_allowed(&cfg, 2));
        assert!(!is_retry_allowed(&cfg, 3));
    }

    #[test]
    fn unlimited_global_category_with_positive_table_value_is_unlimited() {
        let cfg = RetryPolicyConfig::new(-1);
        assert_eq!(resolve_category_limit(&cfg, Flaky), -1);
    }

    #[test]
    fn unlimited_global_non_retry_category_stays_zero() {
        let cfg = RetryPolicyConfig::new(-1);
        assert_eq!(resolve_category_limit(&cfg, Permission), 0);
        assert_eq!(resolve_category_limit(&cfg, Noop), 0);
    }

    #[test]
    fn bounded_global_caps_category_at_one() {
        let cfg = RetryPolicyConfig::new(1);
        assert_eq!(resolve_category_limit(&cfg, Flaky), 1);
        assert_eq!(resolve_category_limit(&cfg, Permission), 0);
    }

    #[test]
    fn category_limit_respected() {
        assert!(is_category_retry_allowed(1, 2));
        assert!(!is_category_retry_allowed(2, 2));
        assert!(is_category_retry_allowed(100, -1));
    }

    #[test]
    fn config_from_env_defaults_to_unlimited() {
        // SAFETY: test-only; env var manipulation is safe in single-threaded tests.
        unsafe { std::env::remove_var("FAILED_TASK_MAX_RETRY_COUNT") };
        let cfg = RetryPolicyConfig::from_env();
        assert_eq!(cfg.global_limit, -1);
    }
}
