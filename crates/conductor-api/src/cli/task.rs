//! CLI scheduled-task management subcommands.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use comfy_table::{ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;

use conductor_core::repository::task::TaskRepository;
use conductor_core::scheduler::scheduler::TaskInput;
use conductor_types::task::ScheduleConfig;

use crate::state::AppState;

/// Scheduled task subcommands.
#[derive(Subcommand)]
pub enum TaskCommand {
    /// Create a scheduled task. Exactly one of --at / --interval-ms / --cron.
    Create {
        /// Task name.
        #[arg(long)]
        name: String,

        /// Fire once at an RFC 3339 timestamp.
        #[arg(long, conflicts_with_all = ["interval_ms", "cron"])]
        at: Option<DateTime<Utc>>,

        /// Fire every N milliseconds.
        #[arg(long, conflicts_with = "cron")]
        interval_ms: Option<u64>,

        /// Fire per a 5-field cron expression.
        #[arg(long)]
        cron: Option<String>,

        /// Workflow to execute on each firing.
        #[arg(long)]
        workflow: Option<Uuid>,

        /// JSON payload handed to the workflow (or echoed as output).
        #[arg(long)]
        payload: Option<String>,

        /// Auto-pause after this many failed runs (0 = never).
        #[arg(long, default_value = "0")]
        max_retries: u32,
    },

    /// List all tasks.
    List,

    /// Pause a task (clears its timer, keeps history).
    Pause { task_id: Uuid },

    /// Resume a paused task.
    Resume { task_id: Uuid },

    /// Cancel a task (soft delete).
    Cancel { task_id: Uuid },

    /// Run a task immediately without disturbing its schedule.
    Trigger { task_id: Uuid },

    /// Show recent runs for a task.
    Runs {
        task_id: Uuid,

        /// Maximum number of runs to display.
        #[arg(long, default_value = "10")]
        limit: u32,
    },
}

/// Handle a task subcommand.
pub async fn handle(cmd: TaskCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        TaskCommand::Create {
            name,
            at,
            interval_ms,
            cron,
            workflow,
            payload,
            max_retries,
        } => {
            let schedule = match (at, interval_ms, cron) {
                (Some(at), None, None) => ScheduleConfig::At { at },
                (None, Some(interval_ms), None) => ScheduleConfig::Interval { interval_ms },
                (None, None, Some(expression)) => ScheduleConfig::Cron { expression },
                _ => bail!("specify exactly one of --at, --interval-ms, --cron"),
            };
            let payload = payload
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .context("--payload must be valid JSON")?;

            let task_id = state
                .scheduler
                .create_task(TaskInput {
                    name: name.clone(),
                    schedule,
                    workflow_id: workflow,
                    payload,
                    max_retries,
                    created_by: None,
                })
                .await
                .context("failed to create task")?;

            let task = state.scheduler.get_task(task_id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&task)?);
            } else {
                println!(
                    "{} task '{}' ({})\n  next run: {}",
                    style("Created").green().bold(),
                    name,
                    task_id,
                    task.next_run_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "never".to_string())
                );
            }
            Ok(())
        }

        TaskCommand::List => {
            let tasks = state.scheduler.tasks().list_tasks().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
                return Ok(());
            }
            if tasks.is_empty() {
                println!("No tasks.");
                return Ok(());
            }
            let mut table = Table::new();
            table
                .load_preset(presets::UTF8_FULL_CONDENSED)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    "ID", "Name", "Type", "Active", "Next run", "Runs", "Failures",
                ]);
            for task in tasks {
                table.add_row(vec![
                    task.id.to_string(),
                    task.name,
                    format!("{:?}", task.task_type),
                    task.is_active.to_string(),
                    task.next_run_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string()),
                    task.run_count.to_string(),
                    task.failure_count.to_string(),
                ]);
            }
            println!("{table}");
            Ok(())
        }

        TaskCommand::Pause { task_id } => {
            state.scheduler.pause_task(task_id).await?;
            println!("{} task {}", style("Paused").yellow().bold(), task_id);
            Ok(())
        }

        TaskCommand::Resume { task_id } => {
            state.scheduler.resume_task(task_id).await?;
            let task = state.scheduler.get_task(task_id).await?;
            println!(
                "{} task {} (next run: {})",
                style("Resumed").green().bold(),
                task_id,
                task.next_run_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string())
            );
            Ok(())
        }

        TaskCommand::Cancel { task_id } => {
            state.scheduler.cancel_task(task_id).await?;
            println!("{} task {}", style("Cancelled").yellow().bold(), task_id);
            Ok(())
        }

        TaskCommand::Trigger { task_id } => {
            let before = state
                .scheduler
                .tasks()
                .list_task_runs(&task_id, 1)
                .await?
                .len();
            state.scheduler.trigger_now(task_id).await?;

            // The run happens on a background task; wait briefly so the
            // one-shot CLI process can report its outcome.
            for _ in 0..50 {
                let runs = state.scheduler.tasks().list_task_runs(&task_id, 5).await?;
                if runs.len() > before
                    && runs
                        .first()
                        .is_some_and(|r| r.status != conductor_types::task::TaskRunStatus::Running)
                {
                    let run = &runs[0];
                    if json {
                        println!("{}", serde_json::to_string_pretty(run)?);
                    } else {
                        println!(
                            "{} run {:?}",
                            style("Triggered").green().bold(),
                            run.status
                        );
                    }
                    return Ok(());
                }
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
            bail!("triggered run did not finish within 5s; check `condr task runs {task_id}`");
        }

        TaskCommand::Runs { task_id, limit } => {
            let runs = state.scheduler.tasks().list_task_runs(&task_id, limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&runs)?);
                return Ok(());
            }
            if runs.is_empty() {
                println!("No runs for task {task_id}.");
                return Ok(());
            }
            let mut table = Table::new();
            table
                .load_preset(presets::UTF8_FULL_CONDENSED)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["Run", "Status", "Started", "Error"]);
            for run in runs {
                table.add_row(vec![
                    run.id.to_string(),
                    format!("{:?}", run.status),
                    run.started_at.to_rfc3339(),
                    run.error.unwrap_or_default(),
                ]);
            }
            println!("{table}");
            Ok(())
        }
    }
}
