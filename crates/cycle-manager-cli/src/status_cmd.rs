//! `cyclemgr status`: a read-only snapshot of queue depth, agent fleet, and
//! the current cycle.

use anyhow::Result;
use sqlx::PgPool;

use cycle_manager_db::models::TaskStatus;
use cycle_manager_db::queries::{agents as agent_db, cycles, tasks as task_db};

/// Print queue depth by task status, agent counts by status, and the
/// latest cycle's stats.
pub async fn run_status(pool: &PgPool) -> Result<()> {
    println!("Queue:");
    for status in [
        TaskStatus::Queued,
        TaskStatus::Running,
        TaskStatus::Blocked,
        TaskStatus::Failed,
        TaskStatus::Done,
        TaskStatus::Cancelled,
    ] {
        let count = task_db::list_tasks_by_status(pool, status).await?.len();
        let icon = match status {
            TaskStatus::Queued => ".",
            TaskStatus::Running => "*",
            TaskStatus::Blocked => "?",
            TaskStatus::Failed => "!",
            TaskStatus::Done => "+",
            TaskStatus::Cancelled => "x",
        };
        println!("  [{icon}] {status:<9} {count}");
    }

    let ready = task_db::get_ready_tasks(pool).await?.len();
    println!("  ready to run: {ready}");
    println!();

    let busy = agent_db::count_busy_agents(pool, None).await?;
    println!("Agents:");
    println!("  busy {busy}");
    println!();

    match cycles::get_latest_cycle(pool).await? {
        Some(cycle) => {
            println!("Cycle #{}: {}", cycle.number, cycle.status);
            println!(
                "  started: {}",
                cycle.started_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            if let Some(completed_at) = cycle.completed_at {
                println!(
                    "  completed: {}",
                    completed_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
        }
        None => println!("No cycles recorded yet."),
    }

    Ok(())
}
