//! SQLite workflow repository implementation.
//!
//! Implements `WorkflowRepository` from `conductor-core` using sqlx with
//! split read/write pools. Workflow definitions are stored as JSON blobs;
//! executions and step records use typed columns for the fields queried by
//! the engine and the recovery sweep.

use conductor_core::repository::workflow::WorkflowRepository;
use conductor_types::error::RepositoryError;
use conductor_types::workflow::{
    Execution, ExecutionStatus, StepRecord, StepStatus, WorkflowDefinition,
};
use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{parse_datetime, parse_uuid};

/// SQLite-backed implementation of `WorkflowRepository`.
pub struct SqliteWorkflowRepository {
    pool: DatabasePool,
}

impl SqliteWorkflowRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct ExecutionRow {
    id: String,
    workflow_id: String,
    status: String,
    trigger_id: Option<String>,
    trigger_payload: Option<String>,
    outputs: String,
    error: Option<String>,
    started_at: String,
    completed_at: Option<String>,
}

impl ExecutionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow_id: row.try_get("workflow_id")?,
            status: row.try_get("status")?,
            trigger_id: row.try_get("trigger_id")?,
            trigger_payload: row.try_get("trigger_payload")?,
            outputs: row.try_get("outputs")?,
            error: row.try_get("error")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_execution(self) -> Result<Execution, RepositoryError> {
        let status: ExecutionStatus =
            serde_json::from_value(serde_json::Value::String(self.status.clone()))
                .map_err(|_| {
                    RepositoryError::Query(format!("invalid execution status: {}", self.status))
                })?;

        let trigger_payload = self
            .trigger_payload
            .as_deref()
            .map(|s| {
                serde_json::from_str(s).map_err(|e| {
                    RepositoryError::Query(format!("invalid trigger_payload: {e}"))
                })
            })
            .transpose()?;

        let outputs: serde_json::Value = serde_json::from_str(&self.outputs)
            .map_err(|e| RepositoryError::Query(format!("invalid outputs JSON: {e}")))?;

        Ok(Execution {
            id: parse_uuid(&self.id)?,
            workflow_id: parse_uuid(&self.workflow_id)?,
            status,
            trigger_id: self.trigger_id,
            trigger_payload,
            outputs,
            error: self.error,
            started_at: parse_datetime(&self.started_at)?,
            completed_at: self.completed_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

struct StepRow {
    id: String,
    execution_id: String,
    step_id: String,
    step_name: String,
    status: String,
    attempts: i64,
    output: Option<String>,
    error: Option<String>,
    started_at: String,
    completed_at: Option<String>,
}

impl StepRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            execution_id: row.try_get("execution_id")?,
            step_id: row.try_get("step_id")?,
            step_name: row.try_get("step_name")?,
            status: row.try_get("status")?,
            attempts: row.try_get("attempts")?,
            output: row.try_get("output")?,
            error: row.try_get("error")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_record(self) -> Result<StepRecord, RepositoryError> {
        let status: StepStatus =
            serde_json::from_value(serde_json::Value::String(self.status.clone())).map_err(
                |_| RepositoryError::Query(format!("invalid step status: {}", self.status)),
            )?;

        let output = self
            .output
            .as_deref()
            .map(|s| {
                serde_json::from_str(s)
                    .map_err(|e| RepositoryError::Query(format!("invalid step output: {e}")))
            })
            .transpose()?;

        Ok(StepRecord {
            id: parse_uuid(&self.id)?,
            execution_id: parse_uuid(&self.execution_id)?,
            step_id: self.step_id,
            step_name: self.step_name,
            status,
            attempts: self.attempts as u32,
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

// ---------------------------------------------------------------------------
// Trait implementation
// ---------------------------------------------------------------------------

impl WorkflowRepository for SqliteWorkflowRepository {
    async fn save_definition(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        let definition_json = serde_json::to_string(def)
            .map_err(|e| RepositoryError::Query(format!("serialize definition: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO workflows (id, name, owner_id, enabled, definition, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                owner_id = excluded.owner_id,
                enabled = excluded.enabled,
                definition = excluded.definition,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(def.id.to_string())
        .bind(&def.name)
        .bind(def.owner_id.to_string())
        .bind(def.enabled as i32)
        .bind(definition_json)
        .bind(def.created_at.to_rfc3339())
        .bind(def.updated_at.to_rfc3339())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn get_definition(
        &self,
        id: &Uuid,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let row = sqlx::query("SELECT definition FROM workflows WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        row.map(|row| {
            let definition: String = row.try_get("definition").map_err(query_err)?;
            serde_json::from_str(&definition)
                .map_err(|e| RepositoryError::Query(format!("invalid definition JSON: {e}")))
        })
        .transpose()
    }

    async fn list_definitions(
        &self,
        owner_id: Option<&Uuid>,
    ) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let rows = match owner_id {
            Some(owner) => {
                sqlx::query("SELECT definition FROM workflows WHERE owner_id = ?1 ORDER BY name")
                    .bind(owner.to_string())
                    .fetch_all(&self.pool.reader)
                    .await
            }
            None => {
                sqlx::query("SELECT definition FROM workflows ORDER BY name")
                    .fetch_all(&self.pool.reader)
                    .await
            }
        }
        .map_err(query_err)?;

        rows.into_iter()
            .map(|row| {
                let definition: String = row.try_get("definition").map_err(query_err)?;
                serde_json::from_str(&definition)
                    .map_err(|e| RepositoryError::Query(format!("invalid definition JSON: {e}")))
            })
            .collect()
    }

    async fn delete_definition(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        let trigger_payload = execution
            .trigger_payload
            .as_ref()
            .map(|v| serde_json::to_string(v))
            .transpose()
            .map_err(|e| RepositoryError::Query(format!("serialize trigger_payload: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO workflow_executions
                (id, workflow_id, status, trigger_id, trigger_payload, outputs, error, started_at, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(execution.id.to_string())
        .bind(execution.workflow_id.to_string())
        .bind(status_tag(&execution.status)?)
        .bind(&execution.trigger_id)
        .bind(trigger_payload)
        .bind(execution.outputs.to_string())
        .bind(&execution.error)
        .bind(execution.started_at.to_rfc3339())
        .bind(execution.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn update_execution_status(
        &self,
        execution_id: &Uuid,
        status: ExecutionStatus,
        error: Option<&str>,
        outputs: Option<&serde_json::Value>,
    ) -> Result<(), RepositoryError> {
        let completed_at = status.is_terminal().then(|| Utc::now().to_rfc3339());
        let result = sqlx::query(
            r#"
            UPDATE workflow_executions SET
                status = ?2,
                error = COALESCE(?3, error),
                outputs = COALESCE(?4, outputs),
                completed_at = COALESCE(?5, completed_at)
            WHERE id = ?1
            "#,
        )
        .bind(execution_id.to_string())
        .bind(status_tag(&status)?)
        .bind(error)
        .bind(outputs.map(|v| v.to_string()))
        .bind(completed_at)
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn get_execution(
        &self,
        execution_id: &Uuid,
    ) -> Result<Option<Execution>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_executions WHERE id = ?1")
            .bind(execution_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        row.map(|row| {
            ExecutionRow::from_row(&row)
                .map_err(query_err)
                .and_then(ExecutionRow::into_execution)
        })
        .transpose()
    }

    async fn list_executions(
        &self,
        workflow_id: &Uuid,
        limit: u32,
    ) -> Result<Vec<Execution>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM workflow_executions
            WHERE workflow_id = ?1
            ORDER BY started_at DESC
            LIMIT ?2
            "#,
        )
        .bind(workflow_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter()
            .map(|row| {
                ExecutionRow::from_row(row)
                    .map_err(query_err)
                    .and_then(ExecutionRow::into_execution)
            })
            .collect()
    }

    async fn list_running_executions(&self) -> Result<Vec<Execution>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM workflow_executions WHERE status = 'RUNNING'")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        rows.iter()
            .map(|row| {
                ExecutionRow::from_row(row)
                    .map_err(query_err)
                    .and_then(ExecutionRow::into_execution)
            })
            .collect()
    }

    async fn create_step_record(&self, record: &StepRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO workflow_steps
                (id, execution_id, step_id, step_name, status, attempts, output, error, started_at, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.execution_id.to_string())
        .bind(&record.step_id)
        .bind(&record.step_name)
        .bind(status_tag(&record.status)?)
        .bind(record.attempts as i64)
        .bind(record.output.as_ref().map(|v| v.to_string()))
        .bind(&record.error)
        .bind(record.started_at.to_rfc3339())
        .bind(record.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn update_step_record(
        &self,
        record_id: &Uuid,
        status: StepStatus,
        attempts: u32,
        output: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let completed_at =
            (!matches!(status, StepStatus::Running)).then(|| Utc::now().to_rfc3339());
        let result = sqlx::query(
            r#"
            UPDATE workflow_steps SET
                status = ?2,
                attempts = ?3,
                output = COALESCE(?4, output),
                error = COALESCE(?5, error),
                completed_at = COALESCE(?6, completed_at)
            WHERE id = ?1
            "#,
        )
        .bind(record_id.to_string())
        .bind(status_tag(&status)?)
        .bind(attempts as i64)
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

    async fn list_step_records(
        &self,
        execution_id: &Uuid,
    ) -> Result<Vec<StepRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_steps WHERE execution_id = ?1 ORDER BY started_at ASC, id ASC",
        )
        .bind(execution_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter()
            .map(|row| {
                StepRow::from_row(row)
                    .map_err(query_err)
                    .and_then(StepRow::into_record)
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_types::workflow::{StepDefinition, StepType};
    use serde_json::json;

    async fn repo() -> (tempfile::TempDir, SqliteWorkflowRepository) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("wf.db").display());
        let pool = DatabasePool::new(&url).await.unwrap();
        (dir, SqliteWorkflowRepository::new(pool))
    }

    fn definition() -> WorkflowDefinition {
        WorkflowDefinition {
            id: Uuid::now_v7(),
            name: "digest".to_string(),
            description: Some("daily digest".to_string()),
            owner_id: Uuid::now_v7(),
            enabled: true,
            triggers: vec![],
            steps: vec![StepDefinition {
                id: "a".to_string(),
                name: "A".to_string(),
                step_type: StepType::Delay,
                config: json!({ "delay_ms": 5 }),
                on_success: None,
                on_failure: None,
                retry: None,
            }],
            variables: Default::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn execution(workflow_id: Uuid) -> Execution {
        Execution {
            id: Uuid::now_v7(),
            workflow_id,
            status: ExecutionStatus::Running,
            trigger_id: Some("task-1".to_string()),
            trigger_payload: Some(json!({ "k": "v" })),
            outputs: json!({}),
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn test_definition_upsert_roundtrip() {
        let (_dir, repo) = repo().await;
        let mut def = definition();
        repo.save_definition(&def).await.unwrap();

        let stored = repo.get_definition(&def.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "digest");
        assert_eq!(stored.steps.len(), 1);

        def.enabled = false;
        repo.save_definition(&def).await.unwrap();
        let stored = repo.get_definition(&def.id).await.unwrap().unwrap();
        assert!(!stored.enabled);

        assert_eq!(repo.list_definitions(Some(&def.owner_id)).await.unwrap().len(), 1);
        assert!(repo.delete_definition(&def.id).await.unwrap());
        assert!(repo.get_definition(&def.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_execution_lifecycle() {
        let (_dir, repo) = repo().await;
        let def = definition();
        repo.save_definition(&def).await.unwrap();

        let execution = execution(def.id);
        repo.create_execution(&execution).await.unwrap();

        let running = repo.list_running_executions().await.unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].trigger_id.as_deref(), Some("task-1"));

        repo.update_execution_status(
            &execution.id,
            ExecutionStatus::Completed,
            None,
            Some(&json!({ "a": { "delayed_ms": 5 } })),
        )
        .await
        .unwrap();

        let stored = repo.get_execution(&execution.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Completed);
        assert!(stored.completed_at.is_some());
        assert_eq!(stored.outputs["a"]["delayed_ms"], json!(5));
        assert!(repo.list_running_executions().await.unwrap().is_empty());

        let listed = repo.list_executions(&def.id, 10).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_update_unknown_execution_not_found() {
        let (_dir, repo) = repo().await;
        let err = repo
            .update_execution_status(&Uuid::now_v7(), ExecutionStatus::Failed, Some("e"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_step_records_roundtrip() {
        let (_dir, repo) = repo().await;
        let def = definition();
        repo.save_definition(&def).await.unwrap();
        let execution = execution(def.id);
        repo.create_execution(&execution).await.unwrap();

        let record = StepRecord {
            id: Uuid::now_v7(),
            execution_id: execution.id,
            step_id: "a".to_string(),
            step_name: "A".to_string(),
            status: StepStatus::Running,
            attempts: 0,
            output: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        };
        repo.create_step_record(&record).await.unwrap();

        repo.update_step_record(
            &record.id,
            StepStatus::Completed,
            2,
            Some(&json!({ "ok": true })),
            None,
        )
        .await
        .unwrap();

        let records = repo.list_step_records(&execution.id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, StepStatus::Completed);
        assert_eq!(records[0].attempts, 2);
        assert_eq!(records[0].output, Some(json!({ "ok": true })));
        assert!(records[0].completed_at.is_some());
    }
}
