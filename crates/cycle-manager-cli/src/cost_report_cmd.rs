//! `cyclemgr cost-report`: token-cost breakdown over a trailing window.

use anyhow::Result;
use chrono::{Duration, Utc};
use sqlx::PgPool;

use cycle_manager_core::monitors::cost::{analyze_cost_efficiency, get_cost_by_period};

/// Print a cost summary for the last `days` days and an efficiency trend
/// comparing its two halves.
pub async fn run_cost_report(pool: &PgPool, days: i64) -> Result<()> {
    let now = Utc::now();
    let start = now - Duration::days(days);

    let summary = get_cost_by_period(pool, start, now).await?;

    println!("Cost report: last {days} day(s)");
    println!("  total tokens:       {}", summary.total_tokens);
    println!("  runs:               {}", summary.runs_count);
    println!(
        "  success / failed:   {} / {}",
        summary.successful_runs, summary.failed_runs
    );
    println!(
        "  avg tokens/run:     {:.0}",
        summary.average_tokens_per_run
    );
    println!(
        "  tokens/success:     {:.0}",
        summary.cost_per_successful_task
    );
    println!();

    let efficiency = analyze_cost_efficiency(pool, days).await?;
    println!("Efficiency trend: {:?}", efficiency.trend);
    println!("  success rate:       {:.1}%", efficiency.success_rate * 100.0);
    println!(
        "  tokens/success:     {:.0}",
        efficiency.tokens_per_successful_task
    );
    if !efficiency.recommendations.is_empty() {
        println!("  recommendations:");
        for rec in &efficiency.recommendations {
            println!("    - {rec}");
        }
    }

    Ok(())
}
