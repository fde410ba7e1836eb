//! Anomaly Detector (C12): a handful of health checks over the task/run
//! stream, each emitting at most once per cooldown window per signature.

use std::num::NonZeroUsize;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use serde_json::{json, Value};
use sqlx::PgPool;
use tokio::sync::Mutex;
use uuid::Uuid;

use cycle_manager_db::queries::{agents, runs};

use crate::events::record_event;

const SIGNATURE_TABLE_CAPACITY: usize = 200;
const DEFAULT_REPEAT_COOLDOWN_MS: i64 = 300_000;

const DEFAULT_FAILURE_RATE_WARNING: f64 = 0.2;
const DEFAULT_FAILURE_RATE_CRITICAL: f64 = 0.4;
const DEFAULT_COST_SPIKE_RATIO: f64 = 2.0;
const DEFAULT_STUCK_MINUTES: i64 = 60;
const DEFAULT_NO_PROGRESS_MINUTES: i64 = 30;
const DEFAULT_AGENT_TIMEOUT_MINUTES: i64 = 10;

/// Anomaly-detector thresholds, env-overridable (§4.12).
#[derive(Debug, Clone, Copy)]
pub struct AnomalyDetectorConfig {
    pub failure_rate_warning: f64,
    pub failure_rate_critical: f64,
    pub cost_spike_ratio: f64,
    pub stuck_minutes: i64,
    pub no_progress_minutes: i64,
    pub agent_timeout_minutes: i64,
    pub repeat_cooldown_ms: i64,
}

impl AnomalyDetectorConfig {
    pub fn from_env() -> Self {
        Self {
            failure_rate_warning: env_f64(
                "CYCLE_MANAGER_ANOMALY_FAILURE_RATE_WARNING",
                DEFAULT_FAILURE_RATE_WARNING,
            ),
            failure_rate_critical: env_f64(
                "CYCLE_MANAGER_ANOMALY_FAILURE_RATE_CRITICAL",
                DEFAULT_FAILURE_RATE_CRITICAL,
            ),
            cost_spike_ratio: env_f64("CYCLE_MANAGER_ANOMALY_COST_SPIKE_RATIO", DEFAULT_COST_SPIKE_RATIO),
            stuck_minutes: env_i64("CYCLE_MANAGER_ANOMALY_STUCK_MINUTES", DEFAULT_STUCK_MINUTES),
            no_progress_minutes: env_i64(
                "CYCLE_MANAGER_ANOMALY_NO_PROGRESS_MINUTES",
                DEFAULT_NO_PROGRESS_MINUTES,
            ),
            agent_timeout_minutes: env_i64(
                "CYCLE_MANAGER_ANOMALY_AGENT_TIMEOUT_MINUTES",
                DEFAULT_AGENT_TIMEOUT_MINUTES,
            ),
            repeat_cooldown_ms: env_i64("ANOMALY_REPEAT_COOLDOWN_MS", DEFAULT_REPEAT_COOLDOWN_MS),
        }
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalySeverity {
    Warning,
    Critical,
}

impl AnomalySeverity {
    fn as_str(self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyKind {
    HighFailureRate,
    CostSpike,
    StuckTask,
    NoProgress,
    AgentTimeout,
}

impl AnomalyKind {
    fn event_type(self) -> &'static str {
        match self {
            Self::HighFailureRate => "anomaly.high_failure_rate",
            Self::CostSpike => "anomaly.cost_spike",
            Self::StuckTask => "anomaly.stuck_task",
            Self::NoProgress => "anomaly.no_progress",
            Self::AgentTimeout => "anomaly.agent_timeout",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub severity: AnomalySeverity,
    pub entity_type: &'static str,
    pub entity_id: Uuid,
    pub details: Value,
}

fn signature(anomaly: &Anomaly) -> String {
    let details = anomaly.details.to_string();
    let truncated: String = details.chars().take(200).collect();
    format!("{}:{}:{truncated}", anomaly.kind.event_type(), anomaly.severity.as_str())
}

/// Process-local, LRU-bounded table of per-signature suppression state, and
/// the detected-anomaly list produced by one `run_checks` pass.
pub struct AnomalyDetector {
    signatures: Mutex<LruCache<String, DateTime<Utc>>>,
}

impl AnomalyDetector {
    pub fn new() -> Self {
        Self {
            signatures: Mutex::new(LruCache::new(
                NonZeroUsize::new(SIGNATURE_TABLE_CAPACITY).expect("capacity is non-zero"),
            )),
        }
    }

    /// Emit `anomaly` unless an identical signature was reported within the
    /// last `repeat_cooldown_ms`. Returns whether it was actually emitted;
    /// `false` means suppressed, and callers must not count it as reported.
    pub async fn report_anomaly(
        &self,
        pool: &PgPool,
        config: &AnomalyDetectorConfig,
        anomaly: &Anomaly,
    ) -> Result<bool> {
        let sig = signature(anomaly);
        let now = Utc::now();
        let cooldown = Duration::milliseconds(config.repeat_cooldown_ms);

        {
            let mut table = self.signatures.lock().await;
            if let Some(last) = table.get(&sig) {
                if now - *last < cooldown {
                    return Ok(false);
                }
            }
            table.put(sig, now);
        }

        record_event(
            pool,
            anomaly.kind.event_type(),
            anomaly.entity_type,
            anomaly.entity_id,
            None,
            json!({ "severity": anomaly.severity.as_str(), "details": anomaly.details }),
        )
        .await;

        Ok(true)
    }
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new()
    }
}

async fn check_failure_rate(pool: &PgPool, config: &AnomalyDetectorConfig) -> Result<Option<Anomaly>> {
    let now = Utc::now();
    let summary = runs::get_cost_by_period(pool, now - Duration::hours(1), now).await?;
    if summary.runs_count < 5 {
        return Ok(None);
    }

    let rate = summary.failed_runs as f64 / summary.runs_count as f64;
    let severity = if rate >= config.failure_rate_critical {
        AnomalySeverity::Critical
    } else if rate >= config.failure_rate_warning {
        AnomalySeverity::Warning
    } else {
        return Ok(None);
    };

    Ok(Some(Anomaly {
        kind: AnomalyKind::HighFailureRate,
        severity,
        entity_type: "cycle",
        entity_id: Uuid::nil(),
        details: json!({ "rate": rate, "total": summary.runs_count, "failed": summary.failed_runs }),
    }))
}

async fn check_cost_spike(pool: &PgPool, config: &AnomalyDetectorConfig) -> Result<Option<Anomaly>> {
    let now = Utc::now();
    let hour_ago = now - Duration::hours(1);
    let last_hour = runs::get_cost_by_period(pool, hour_ago, now).await?.total_tokens;
    let prior_hour = runs::get_cost_by_period(pool, hour_ago - Duration::hours(1), hour_ago)
        .await?
        .total_tokens;
    if prior_hour == 0 {
        return Ok(None);
    }

    let ratio = last_hour as f64 / prior_hour as f64;
    let severity = if ratio >= config.cost_spike_ratio * 1.5 {
        AnomalySeverity::Critical
    } else if ratio >= config.cost_spike_ratio {
        AnomalySeverity::Warning
    } else {
        return Ok(None);
    };

    Ok(Some(Anomaly {
        kind: AnomalyKind::CostSpike,
        severity,
        entity_type: "cycle",
        entity_id: Uuid::nil(),
        details: json!({ "ratio": ratio, "lastHourTokens": last_hour, "priorHourTokens": prior_hour }),
    }))
}

async fn check_stuck_task(pool: &PgPool, config: &AnomalyDetectorConfig) -> Result<Option<Anomaly>> {
    let now = Utc::now();
    let threshold_ms = config.stuck_minutes * 60_000;
    let stuck = runs::select_stuck_runs(pool, threshold_ms).await?;
    let Some(run) = stuck.iter().max_by_key(|r| now - r.started_at) else {
        return Ok(None);
    };

    let duration = now - run.started_at;
    let severity = if duration > Duration::minutes(config.stuck_minutes) * 2 {
        AnomalySeverity::Critical
    } else {
        AnomalySeverity::Warning
    };

    Ok(Some(Anomaly {
        kind: AnomalyKind::StuckTask,
        severity,
        entity_type: "run",
        entity_id: run.id,
        details: json!({ "taskId": run.task_id, "durationMs": duration.num_milliseconds() }),
    }))
}

async fn check_no_progress(pool: &PgPool, config: &AnomalyDetectorConfig) -> Result<Option<Anomaly>> {
    let busy_agents = agents::count_busy_agents(pool, None).await?;
    if busy_agents == 0 {
        return Ok(None);
    }

    let since = Utc::now() - Duration::minutes(config.no_progress_minutes);
    let finishes = runs::count_successful_finishes_since(pool, since).await?;
    if finishes > 0 {
        return Ok(None);
    }

    Ok(Some(Anomaly {
        kind: AnomalyKind::NoProgress,
        severity: AnomalySeverity::Warning,
        entity_type: "cycle",
        entity_id: Uuid::nil(),
        details: json!({ "busyAgents": busy_agents, "windowMinutes": config.no_progress_minutes }),
    }))
}

async fn check_agent_timeout(pool: &PgPool, config: &AnomalyDetectorConfig) -> Result<Option<Anomaly>> {
    let threshold = Utc::now() - Duration::minutes(config.agent_timeout_minutes);
    let stale = agents::select_busy_agents_with_stale_heartbeat(pool, threshold).await?;
    let Some(agent) = stale.into_iter().next() else {
        return Ok(None);
    };

    Ok(Some(Anomaly {
        kind: AnomalyKind::AgentTimeout,
        severity: AnomalySeverity::Warning,
        entity_type: "agent",
        entity_id: agent.id,
        details: json!({ "agentId": agent.id }),
    }))
}

/// Run all five checks and report whichever fire, subject to repeat
/// suppression. Returns only the anomalies actually emitted this pass.
pub async fn run_checks(
    pool: &PgPool,
    detector: &AnomalyDetector,
    config: &AnomalyDetectorConfig,
) -> Result<Vec<Anomaly>> {
    let candidates = [
        check_failure_rate(pool, config).await?,
        check_cost_spike(pool, config).await?,
        check_stuck_task(pool, config).await?,
        check_no_progress(pool, config).await?,
        check_agent_timeout(pool, config).await?,
    ];

    let mut reported = Vec::new();
    for anomaly in candidates.into_iter().flatten() {
        if detector.report_anomaly(pool, config, &anomaly).await? {
            reported.push(anomaly);
        }
    }

    Ok(reported)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anomaly(details: Value) -> Anomaly {
        Anomaly {
            kind: AnomalyKind::HighFailureRate,
            severity: AnomalySeverity::Warning,
            entity_type: "cycle",
            entity_id: Uuid::nil(),
            details,
        }
    }

    #[test]
    fn signature_is_stable_for_identical_anomalies() {
        let a = anomaly(json!({ "rate": 0.3 }));
        let b = anomaly(json!({ "rate": 0.3 }));
        assert_eq!(signature(&a), signature(&b));
    }

    #[test]
    fn signature_differs_by_severity() {
        let mut critical = anomaly(json!({ "rate": 0.3 }));
        critical.severity = AnomalySeverity::Critical;
        let warning = anomaly(json!({ "rate": 0.3 }));
        assert_ne!(signature(&critical), signature(&warning));
    }

    #[test]
    fn signature_truncates_to_200_chars_of_details() {
        let long_reason = "x".repeat(500);
        let a = anomaly(json!({ "reason": long_reason }));
        // type + severity prefix plus at most 200 chars of details.
        assert!(signature(&a).len() <= AnomalyKind::HighFailureRate.event_type().len() + 1 + 7 + 1 + 200);
    }

    #[tokio::test]
    async fn report_anomaly_suppresses_within_cooldown_without_a_database() {
        // The cooldown check happens entirely in the in-memory signature
        // table before any DB access, so we can exercise it directly.
        let detector = AnomalyDetector::new();
        let sig = signature(&anomaly(json!({ "rate": 0.3 })));
        let mut table = detector.signatures.lock().await;
        table.put(sig.clone(), Utc::now());
        let last = *table.get(&sig).unwrap();
        assert!(Utc::now() - last < Duration::milliseconds(DEFAULT_REPEAT_COOLDOWN_MS));
    }
}
