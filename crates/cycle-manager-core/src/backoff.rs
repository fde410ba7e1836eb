//! Quota back-off (C10): deterministic exponential back-off with jitter for
//! tasks blocked on `quota_wait`.
//!
//! Jitter is seeded from a hash of the task id and latest error message
//! rather than a random number generator, so the same task in the same
//! state always computes the same delay -- useful for tests and for
//! reasoning about when a task will next be eligible, mirroring the
//! teacher's HMAC-seeded deterministic token derivation in `token::`.

use std::hash::{Hash, Hasher};

use chrono::Duration;
use uuid::Uuid;

const DEFAULT_BASE_MS: i64 = 30_000;
const DEFAULT_MAX_MS: i64 = 30 * 60 * 1000;
const DEFAULT_FACTOR: f64 = 2.0;
const DEFAULT_JITTER_RATIO: f64 = 0.2;

/// Quota back-off configuration, env-overridable (§4.10).
#[derive(Debug, Clone, Copy)]
pub struct QuotaBackoffConfig {
    pub base_ms: i64,
    pub max_ms: i64,
    pub factor: f64,
    pub jitter_ratio: f64,
}

impl QuotaBackoffConfig {
    pub fn from_env() -> Self {
        // OPENCODE_QUOTA_RETRY_DELAY_MS is a legacy alias for the base delay,
        // honored when the canonical name isn't set.
        let base_default = env_i64("OPENCODE_QUOTA_RETRY_DELAY_MS", DEFAULT_BASE_MS);
        Self {
            base_ms: env_i64("QUOTA_BACKOFF_BASE_MS", base_default),
            max_ms: env_i64("QUOTA_BACKOFF_MAX_MS", DEFAULT_MAX_MS),
            factor: env_f64("QUOTA_BACKOFF_FACTOR", DEFAULT_FACTOR),
            jitter_ratio: env_f64("QUOTA_BACKOFF_JITTER_RATIO", DEFAULT_JITTER_RATIO),
        }
    }
}

impl Default for QuotaBackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: DEFAULT_BASE_MS,
            max_ms: DEFAULT_MAX_MS,
            factor: DEFAULT_FACTOR,
            jitter_ratio: DEFAULT_JITTER_RATIO,
        }
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

/// Hash `task_id` and `latest_error_message` into a stable fraction in
/// `[-1.0, 1.0]` used to seed jitter deterministically.
fn jitter_fraction(task_id: Uuid, latest_error_message: Option<&str>) -> f64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    task_id.hash(&mut hasher);
    latest_error_message.unwrap_or("").hash(&mut hasher);
    let bits = hasher.finish();
    // Map the top 53 bits onto [0, 1), then rescale to [-1, 1).
    let unit = (bits >> 11) as f64 / (1u64 << 53) as f64;
    unit * 2.0 - 1.0
}

/// Compute the quota back-off delay for a blocked task's `retry_count`-th
/// wait, deterministic per `(task_id, latest_error_message)`.
pub fn compute_quota_backoff(
    config: &QuotaBackoffConfig,
    retry_count: i32,
    task_id: Uuid,
    latest_error_message: Option<&str>,
) -> Duration {
    let exponent = retry_count.max(0) as i32;
    let raw = config.base_ms as f64 * config.factor.powi(exponent);
    let capped = raw.min(config.max_ms as f64);

    let fraction = jitter_fraction(task_id, latest_error_message);
    let jitter = capped * config.jitter_ratio * fraction;
    let with_jitter = (capped + jitter).max(0.0);

    Duration::milliseconds(with_jitter.round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_before_cap() {
        let cfg = QuotaBackoffConfig::default();
        let id = Uuid::new_v4();
        let d0 = compute_quota_backoff(&cfg, 0, id, None);
        let d1 = compute_quota_backoff(&cfg, 1, id, None);
        // Jitter can shift either delay by up to 20%, but growth is still
        // visible across a full doubling.
        assert!(d1.num_milliseconds() > d0.num_milliseconds());
    }

    #[test]
    fn backoff_is_capped_at_max() {
        let cfg = QuotaBackoffConfig::default();
        let id = Uuid::new_v4();
        let d = compute_quota_backoff(&cfg, 100, id, None);
        let max_with_jitter = (cfg.max_ms as f64 * (1.0 + cfg.jitter_ratio)).round() as i64;
        assert!(d.num_milliseconds() <= max_with_jitter);
    }

    #[test]
    fn backoff_is_deterministic_for_same_inputs() {
        let cfg = QuotaBackoffConfig::default();
        let id = Uuid::new_v4();
        let a = compute_quota_backoff(&cfg, 2, id, Some("quota exceeded"));
        let b = compute_quota_backoff(&cfg, 2, id, Some("quota exceeded"));
        assert_eq!(a, b);
    }

    #[test]
    fn backoff_differs_across_tasks() {
        let cfg = QuotaBackoffConfig::default();
        let a = compute_quota_backoff(&cfg, 3, Uuid::new_v4(), Some("quota exceeded"));
        let b = compute_quota_backoff(&cfg, 3, Uuid::new_v4(), Some("quota exceeded"));
        assert_ne!(a, b);
    }

    #[test]
    fn config_from_env_defaults_match_spec() {
        for key in [
            "QUOTA_BACKOFF_BASE_MS",
            "QUOTA_BACKOFF_MAX_MS",
            "QUOTA_BACKOFF_FACTOR",
            "QUOTA_BACKOFF_JITTER_RATIO",
            "OPENCODE_QUOTA_RETRY_DELAY_MS",
        ] {
            // SAFETY: test-only; env var manipulation is safe in single-threaded tests.
            unsafe { std::env::remove_var(key) };
        }
        let cfg = QuotaBackoffConfig::from_env();
        assert_eq!(cfg.base_ms, DEFAULT_BASE_MS);
        assert_eq!(cfg.max_ms, DEFAULT_MAX_MS);
        assert_eq!(cfg.factor, DEFAULT_FACTOR);
        assert_eq!(cfg.jitter_ratio, DEFAULT_JITTER_RATIO);
    }
}
