//! Scheduled-task repository trait definition.
//!
//! Storage interface for scheduled tasks and their append-only run history.

use chrono::{DateTime, Utc};
use conductor_types::error::RepositoryError;
use conductor_types::task::{ScheduledTask, TaskRun, TaskRunStatus};
use uuid::Uuid;

/// Repository trait for scheduled-task persistence.
pub trait TaskRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    /// Create a new scheduled task.
    fn create_task(
        &self,
        task: &ScheduledTask,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a task by its UUID.
    fn get_task(
        &self,
        task_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<ScheduledTask>, RepositoryError>> + Send;

    /// Replace a task row (the scheduler mutates counters and timestamps on
    /// every run).
    fn update_task(
        &self,
        task: &ScheduledTask,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// List all tasks, active or not (management surface).
    fn list_tasks(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<ScheduledTask>, RepositoryError>> + Send;

    /// List all active tasks (used to arm timers on startup).
    fn list_active_tasks(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<ScheduledTask>, RepositoryError>> + Send;

    /// List active tasks whose `next_run_at` is at or before `now`
    /// (the backstop poll query).
    fn list_due_tasks(
        &self,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<ScheduledTask>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Append a task run record.
    fn create_task_run(
        &self,
        run: &TaskRun,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Update a run's status, output, and error; terminal updates stamp
    /// `completed_at`.
    fn update_task_run(
        &self,
        run_id: &Uuid,
        status: TaskRunStatus,
        output: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// List runs for a task, newest first.
    fn list_task_runs(
        &self,
        task_id: &Uuid,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<TaskRun>, RepositoryError>> + Send;
}
