//! Cost Tracker (C11): aggregate run cost over a period, compare against
//! configured limits, and report whether efficiency is trending up or down.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use cycle_manager_db::queries::runs::{self, CostPeriodSummary};

use crate::events::record_event;

/// A cost summary over a period, with the derived ratios §4.11 names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CostSummary {
    pub total_tokens: i64,
    pub runs_count: i64,
    pub successful_runs: i64,
    pub failed_runs: i64,
    pub average_tokens_per_run: f64,
    pub cost_per_successful_task: f64,
}

impl From<CostPeriodSummary> for CostSummary {
    fn from(s: CostPeriodSummary) -> Self {
        let average_tokens_per_run = if s.runs_count > 0 {
            s.total_tokens as f64 / s.runs_count as f64
        } else {
            0.0
        };
        let cost_per_successful_task = if s.successful_runs > 0 {
            s.total_tokens as f64 / s.successful_runs as f64
        } else {
            0.0
        };
        Self {
            total_tokens: s.total_tokens,
            runs_count: s.runs_count,
            successful_runs: s.successful_runs,
            failed_runs: s.failed_runs,
            average_tokens_per_run,
            cost_per_successful_task,
        }
    }
}

/// `getCostByPeriod` (§4.11).
pub async fn get_cost_by_period(pool: &PgPool, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<CostSummary> {
    Ok(runs::get_cost_by_period(pool, start, end).await?.into())
}

/// Cost-limit configuration. `<= 0` means unlimited.
#[derive(Debug, Clone, Copy)]
pub struct CostLimitsConfig {
    pub daily_limit_tokens: i64,
    pub hourly_limit_tokens: i64,
    pub warning_threshold: f64,
}

impl CostLimitsConfig {
    pub fn from_env() -> Self {
        Self {
            daily_limit_tokens: env_i64("DAILY_TOKEN_LIMIT", -1),
            hourly_limit_tokens: env_i64("HOURLY_TOKEN_LIMIT", -1),
            warning_threshold: env_f64("CYCLE_MANAGER_COST_WARNING_THRESHOLD", 0.8),
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
pub enum CostAlertLevel {
    Warning,
    Exceeded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CostAlert {
    pub period: &'static str,
    pub level: CostAlertLevel,
    pub used_tokens: i64,
    pub limit_tokens: i64,
}

fn check_limit(period: &'static str, used_tokens: i64, limit_tokens: i64, warning_threshold: f64) -> Option<CostAlert> {
    if limit_tokens <= 0 {
        return None;
    }
    let ratio = used_tokens as f64 / limit_tokens as f64;
    if ratio >= 1.0 {
        Some(CostAlert { period, level: CostAlertLevel::Exceeded, used_tokens, limit_tokens })
    } else if ratio >= warning_threshold {
        Some(CostAlert { period, level: CostAlertLevel::Warning, used_tokens, limit_tokens })
    } else {
        None
    }
}

/// `checkCostLimits` (§4.11): compare today's and the last hour's usage
/// against `config`, emitting `cost.warning`/`cost.exceeded` events for any
/// breach.
pub async fn check_cost_limits(pool: &PgPool, config: &CostLimitsConfig) -> Result<Vec<CostAlert>> {
    let now = Utc::now();
    let today_start = now.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc();
    let hour_ago = now - Duration::hours(1);

    let today = get_cost_by_period(pool, today_start, now).await?;
    let last_hour = get_cost_by_period(pool, hour_ago, now).await?;

    let mut alerts = Vec::new();
    if let Some(alert) = check_limit("daily", today.total_tokens, config.daily_limit_tokens, config.warning_threshold) {
        alerts.push(alert);
    }
    if let Some(alert) = check_limit("hourly", last_hour.total_tokens, config.hourly_limit_tokens, config.warning_threshold) {
        alerts.push(alert);
    }

    for alert in &alerts {
        let event_type = match alert.level {
            CostAlertLevel::Warning => "cost.warning",
            CostAlertLevel::Exceeded => "cost.exceeded",
        };
        record_event(
            pool,
            event_type,
            "cycle",
            Uuid::nil(),
            None,
            json!({
                "period": alert.period,
                "usedTokens": alert.used_tokens,
                "limitTokens": alert.limit_tokens,
            }),
        )
        .await;
    }

    Ok(alerts)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EfficiencyTrend {
    Improving,
    Degrading,
    Stable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CostEfficiencyReport {
    pub trend: EfficiencyTrend,
    pub success_rate: f64,
    pub tokens_per_successful_task: f64,
    pub recommendations: Vec<String>,
}

/// `analyzeCostEfficiency(days)` (§4.11): compare the first and second half
/// of a `days`-day trailing window.
pub async fn analyze_cost_efficiency(pool: &PgPool, days: i64) -> Result<CostEfficiencyReport> {
    let now = Utc::now();
    let window_start = now - Duration::days(days);
    let midpoint = window_start + (now - window_start) / 2;

    let first_half = get_cost_by_period(pool, window_start, midpoint).await?;
    let second_half = get_cost_by_period(pool, midpoint, now).await?;
    let whole = get_cost_by_period(pool, window_start, now).await?;

    let trend = if first_half.successful_runs == 0 && second_half.successful_runs == 0 {
        EfficiencyTrend::Stable
    } else if first_half.cost_per_successful_task == 0.0 {
        if second_half.cost_per_successful_task > 0.0 {
            EfficiencyTrend::Degrading
        } else {
            EfficiencyTrend::Stable
        }
    } else if second_half.cost_per_successful_task > first_half.cost_per_successful_task * 1.10 {
        EfficiencyTrend::Degrading
    } else if second_half.cost_per_successful_task < first_half.cost_per_successful_task * 0.90 {
        EfficiencyTrend::Improving
    } else {
        EfficiencyTrend::Stable
    };

    let success_rate = if whole.runs_count > 0 {
        whole.successful_runs as f64 / whole.runs_count as f64
    } else {
        0.0
    };

    let mut recommendations = Vec::new();
    if whole.runs_count > 0 && success_rate < 0.7 {
        recommendations.push(format!(
            "success rate {:.0}% is below 70%; investigate recurring failure categories",
            success_rate * 100.0
        ));
    }
    if whole.cost_per_successful_task > 50_000.0 {
        recommendations.push(format!(
            "{:.0} tokens per successful task exceeds the 50,000 guideline; consider tighter timeboxing",
            whole.cost_per_successful_task
        ));
    }

    Ok(CostEfficiencyReport {
        trend,
        success_rate,
        tokens_per_successful_task: whole.cost_per_successful_task,
        recommendations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(total_tokens: i64, runs_count: i64, successful_runs: i64, failed_runs: i64) -> CostSummary {
        CostPeriodSummary { total_tokens, runs_count, successful_runs, failed_runs }.into()
    }

    #[test]
    fn average_and_cost_per_success_are_derived() {
        let s = summary(1000, 4, 2, 2);
        assert_eq!(s.average_tokens_per_run, 250.0);
        assert_eq!(s.cost_per_successful_task, 500.0);
    }

    #[test]
    fn zero_runs_avoids_division_by_zero() {
        let s = summary(0, 0, 0, 0);
        assert_eq!(s.average_tokens_per_run, 0.0);
        assert_eq!(s.cost_per_successful_task, 0.0);
    }

    #[test]
    fn check_limit_unlimited_when_non_positive() {
        assert_eq!(check_limit("daily", 1_000_000, 0, 0.8), None);
        assert_eq!(check_limit("daily", 1_000_000, -1, 0.8), None);
    }

    #[test]
    fn check_limit_warns_at_threshold() {
        let alert = check_limit("daily", 850, 1000, 0.8).unwrap();
        assert_eq!(alert.level, CostAlertLevel::Warning);
    }

    #[test]
    fn check_limit_exceeds_at_or_above_limit() {
        let alert = check_limit("daily", 1000, 1000, 0.8).unwrap();
        assert_eq!(alert.level, CostAlertLevel::Exceeded);
    }

    #[test]
    fn check_limit_silent_below_threshold() {
        assert_eq!(check_limit("daily", 100, 1000, 0.8), None);
    }
}
