//! SQLite scheduled-task repository implementation.
//!
//! Implements `TaskRepository` from `conductor-core`. The schedule config is
//! stored as a JSON blob; `is_active` and `next_run_at` are typed columns
//! because the backstop poll queries on them every tick.

use conductor_core::repository::task::TaskRepository;
use conductor_types::error::RepositoryError;
use conductor_types::task::{ScheduleConfig, ScheduledTask, TaskRun, TaskRunStatus, TaskType};
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{parse_datetime, parse_uuid};

/// SQLite-backed implementation of `TaskRepository`.
pub struct SqliteTaskRepository {
    pool: DatabasePool,
}

impl SqliteTaskRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct TaskRow {
    id: String,
    name: String,
    task_type: String,
    schedule: String,
    workflow_id: Option<String>,
    payload: Option<String>,
    max_retries: i64,
    is_active: i64,
    next_run_at: Option<String>,
    last_run_at: Option<String>,
    run_count: i64,
    failure_count: i64,
    created_by: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TaskRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            task_type: row.try_get("task_type")?,
            schedule: row.try_get("schedule")?,
            workflow_id: row.try_get("workflow_id")?,
            payload: row.try_get("payload")?,
            max_retries: row.try_get("max_retries")?,
            is_active: row.try_get("is_active")?,
            next_run_at: row.try_get("next_run_at")?,
            last_run_at: row.try_get("last_run_at")?,
            run_count: row.try_get("run_count")?,
            failure_count: row.try_get("failure_count")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_task(self) -> Result<ScheduledTask, RepositoryError> {
        let task_type: TaskType =
            serde_json::from_value(serde_json::Value::String(self.task_type.clone()))
                .map_err(|_| {
                    RepositoryError::Query(format!("invalid task type: {}", self.task_type))
                })?;

        let schedule: ScheduleConfig = serde_json::from_str(&self.schedule)
            .map_err(|e| RepositoryError::Query(format!("invalid schedule JSON: {e}")))?;

        let payload = self
            .payload
            .as_deref()
            .map(|s| {
                serde_json::from_str(s)
                    .map_err(|e| RepositoryError::Query(format!("invalid payload JSON: {e}")))
            })
            .transpose()?;

        Ok(ScheduledTask {
            id: parse_uuid(&self.id)?,
            name: self.name,
            task_type,
            schedule,
            workflow_id: self.workflow_id.as_deref().map(parse_uuid).transpose()?,
            payload,
            max_retries: self.max_retries as u32,
            is_active: self.is_active != 0,
            next_run_at: self.next_run_at.as_deref().map(parse_datetime).transpose()?,
            last_run_at: self.last_run_at.as_deref().map(parse_datetime).transpose()?,
            run_count: self.run_count as u32,
            failure_count: self.failure_count as u32,
            created_by: self.created_by.as_deref().map(parse_uuid).transpose()?,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

struct TaskRunRow {
    id: String,
    task_id: String,
    status: String,
    output: Option<String>,
    error: Option<String>,
    started_at: String,
    completed_at: Option<String>,
}

impl TaskRunRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            task_id: row.try_get("task_id")?,
            status: row.try_get("status")?,
            output: row.try_get("output")?,
            error: row.try_get("error")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_run(self) -> Result<TaskRun, RepositoryError> {
        let status: TaskRunStatus =
            serde_json::from_value(serde_json::Value::String(self.status.clone())).map_err(
                |_| RepositoryError::Query(format!("invalid run status: {}", self.status)),
            )?;

        let output = self
            .output
            .as_deref()
            .map(|s| {
                serde_json::from_str(s)
                    .map_err(|e| RepositoryError::Query(format!("invalid output JSON: {e}")))
            })
            .transpose()?;

        Ok(TaskRun {
            id: parse_uuid(&self.id)?,
            task_id: parse_uuid(&self.task_id)?,
            status,
            output,
            error: self.error,
            started_at: parse_datetime(&self.started_at)?,
            completed_at: self.completed_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

fn status_tag<S: serde::Serialize>(status: &S) -> Result<String, RepositoryError> {
    match serde_json::to_value(status) {
        Ok(serde_json::Value::String(s)) => Ok(s),
        _ => Err(RepositoryError::Query("unserializable status".to_string())),
    }
}

fn query_err(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

fn bind_task(
    query: &'static str,
    task: &ScheduledTask,
) -> Result<sqlx::query::Query<'static, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'static>>, RepositoryError>
{
    let schedule = serde_json::to_string(&task.schedule)
        .map_err(|e| RepositoryError::Query(format!("serialize schedule: {e}")))?;
    let payload = task
        .payload
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| RepositoryError::Query(format!("serialize payload: {e}")))?;

    Ok(sqlx::query(query)
        .bind(task.id.to_string())
        .bind(task.name.clone())
        .bind(status_tag(&task.task_type)?)
        .bind(schedule)
        .bind(task.workflow_id.map(|id| id.to_string()))
        .bind(payload)
        .bind(task.max_retries as i64)
        .bind(task.is_active as i32)
        .bind(task.next_run_at.map(|t| t.to_rfc3339()))
        .bind(task.last_run_at.map(|t| t.to_rfc3339()))
        .bind(task.run_count as i64)
        .bind(task.failure_count as i64)
        .bind(task.created_by.map(|id| id.to_string()))
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339()))
}

const INSERT_TASK: &str = r#"
INSERT INTO scheduled_tasks
    (id, name, task_type, schedule, workflow_id, payload, max_retries,
     is_active, next_run_at, last_run_at, run_count, failure_count,
     created_by, created_at, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
"#;

const UPDATE_TASK: &str = r#"
UPDATE scheduled_tasks SET
    name = ?2, task_type = ?3, schedule = ?4, workflow_id = ?5, payload = ?6,
    max_retries = ?7, is_active = ?8, next_run_at = ?9, last_run_at = ?10,
    run_count = ?11, failure_count = ?12, created_by = ?13, created_at = ?14,
    updated_at = ?15
WHERE id = ?1
"#;

// ---------------------------------------------------------------------------
// Trait implementation
// ---------------------------------------------------------------------------

impl TaskRepository for SqliteTaskRepository {
    async fn create_task(&self, task: &ScheduledTask) -> Result<(), RepositoryError> {
        bind_task(INSERT_TASK, task)?
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn get_task(&self, task_id: &Uuid) -> Result<Option<ScheduledTask>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM scheduled_tasks WHERE id = ?1")
            .bind(task_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        row.map(|row| {
            TaskRow::from_row(&row)
                .map_err(query_err)
                .and_then(TaskRow::into_task)
        })
        .transpose()
    }

    async fn update_task(&self, task: &ScheduledTask) -> Result<(), RepositoryError> {
        let result = bind_task(UPDATE_TASK, task)?
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list_tasks(&self) -> Result<Vec<ScheduledTask>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM scheduled_tasks ORDER BY created_at")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;
        rows.iter()
            .map(|row| {
                TaskRow::from_row(row)
                    .map_err(query_err)
                    .and_then(TaskRow::into_task)
            })
            .collect()
    }

    async fn list_active_tasks(&self) -> Result<Vec<ScheduledTask>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM scheduled_tasks WHERE is_active = 1")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;
        rows.iter()
            .map(|row| {
                TaskRow::from_row(row)
                    .map_err(query_err)
                    .and_then(TaskRow::into_task)
            })
            .collect()
    }

    async fn list_due_tasks(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledTask>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM scheduled_tasks
            WHERE is_active = 1 AND next_run_at IS NOT NULL AND next_run_at <= ?1
            "#,
        )
        .bind(now.to_rfc3339())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;
        rows.iter()
            .map(|row| {
                TaskRow::from_row(row)
                    .map_err(query_err)
                    .and_then(TaskRow::into_task)
            })
            .collect()
    }

    async fn create_task_run(&self, run: &TaskRun) -> Result<(), RepositoryError> {
        let output = run
            .output
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RepositoryError::Query(format!("serialize output: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO task_runs (id, task_id, status, output, error, started_at, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(run.id.to_string())
        .bind(run.task_id.to_string())
        .bind(status_tag(&run.status)?)
        .bind(output)
        .bind(&run.error)
        .bind(run.started_at.to_rfc3339())
        .bind(run.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn update_task_run(
        &self,
        run_id: &Uuid,
        status: TaskRunStatus,
        output: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let completed_at =
            (!matches!(status, TaskRunStatus::Running)).then(|| Utc::now().to_rfc3339());
        let result = sqlx::query(
            r#"
            UPDATE task_runs SET
                status = ?2,
                output = COALESCE(?3, output),
                error = COALESCE(?4, error),
                completed_at = COALESCE(?5, completed_at)
            WHERE id = ?1
            "#,
        )
        .bind(run_id.to_string())
        .bind(status_tag(&status)?)
        .bind(output.map(|v| v.to_string()))
        .bind(error)
        .bind(completed_at)
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list_task_runs(
        &self,
        task_id: &Uuid,
        limit: u32,
    ) -> Result<Vec<TaskRun>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM task_runs
            WHERE task_id = ?1
            ORDER BY started_at DESC
            LIMIT ?2
            "#,
        )
        .bind(task_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;
        rows.iter()
            .map(|row| {
                TaskRunRow::from_row(row)
                    .map_err(query_err)
                    .and_then(TaskRunRow::into_run)
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
