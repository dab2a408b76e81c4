//! In-memory repository implementations.
//!
//! Mutex-guarded hash maps implementing the repository traits. Used by the
//! engine and scheduler test suites and by embedded setups that don't need
//! durability. No lock is held across an await point.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use conductor_types::error::RepositoryError;
use conductor_types::task::{ScheduledTask, TaskRun, TaskRunStatus};
use conductor_types::workflow::{
    Execution, ExecutionStatus, StepRecord, StepStatus, WorkflowDefinition,
};
use uuid::Uuid;

use super::task::TaskRepository;
use super::workflow::WorkflowRepository;

// ---------------------------------------------------------------------------
// MemoryWorkflowRepository
// ---------------------------------------------------------------------------

/// In-memory implementation of [`WorkflowRepository`].
#[derive(Default)]
pub struct MemoryWorkflowRepository {
    definitions: Mutex<HashMap<Uuid, WorkflowDefinition>>,
    executions: Mutex<HashMap<Uuid, Execution>>,
    steps: Mutex<Vec<StepRecord>>,
}

impl MemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkflowRepository for MemoryWorkflowRepository {
    async fn save_definition(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        self.definitions
            .lock()
            .expect("definitions lock")
            .insert(def.id, def.clone());
        Ok(())
    }

    async fn get_definition(
        &self,
        id: &Uuid,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        Ok(self
            .definitions
            .lock()
            .expect("definitions lock")
            .get(id)
            .cloned())
    }

    async fn list_definitions(
        &self,
        owner_id: Option<&Uuid>,
    ) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let defs = self.definitions.lock().expect("definitions lock");
        let mut result: Vec<_> = defs
            .values()
            .filter(|d| owner_id.is_none_or(|o| &d.owner_id == o))
            .cloned()
            .collect();
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    async fn delete_definition(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        Ok(self
            .definitions
            .lock()
            .expect("definitions lock")
            .remove(id)
            .is_some())
    }

    async fn create_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        self.executions
            .lock()
            .expect("executions lock")
            .insert(execution.id, execution.clone());
        Ok(())
    }

    async fn update_execution_status(
        &self,
        execution_id: &Uuid,
        status: ExecutionStatus,
        error: Option<&str>,
        outputs: Option<&serde_json::Value>,
    ) -> Result<(), RepositoryError> {
        let mut executions = self.executions.lock().expect("executions lock");
        let execution = executions
            .get_mut(execution_id)
            .ok_or(RepositoryError::NotFound)?;
        execution.status = status;
        if let Some(e) = error {
            execution.error = Some(e.to_string());
        }
        if let Some(o) = outputs {
            execution.outputs = o.clone();
        }
        if status.is_terminal() {
            execution.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn get_execution(
        &self,
        execution_id: &Uuid,
    ) -> Result<Option<Execution>, RepositoryError> {
        Ok(self
            .executions
            .lock()
            .expect("executions lock")
            .get(execution_id)
            .cloned())
    }

    async fn list_executions(
        &self,
        workflow_id: &Uuid,
        limit: u32,
    ) -> Result<Vec<Execution>, RepositoryError> {
        let executions = self.executions.lock().expect("executions lock");
        let mut result: Vec<_> = executions
            .values()
            .filter(|e| &e.workflow_id == workflow_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        result.truncate(limit as usize);
        Ok(result)
    }

    async fn list_running_executions(&self) -> Result<Vec<Execution>, RepositoryError> {
        let executions = self.executions.lock().expect("executions lock");
        Ok(executions
            .values()
            .filter(|e| e.status == ExecutionStatus::Running)
            .cloned()
            .collect())
    }

    async fn create_step_record(&self, record: &StepRecord) -> Result<(), RepositoryError> {
        self.steps.lock().expect("steps lock").push(record.clone());
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
        let mut steps = self.steps.lock().expect("steps lock");
        let record = steps
            .iter_mut()
            .find(|s| &s.id == record_id)
            .ok_or(RepositoryError::NotFound)?;
        record.status = status;
        record.attempts = attempts;
        if let Some(o) = output {
            record.output = Some(o.clone());
        }
        if let Some(e) = error {
            record.error = Some(e.to_string());
        }
        if !matches!(status, StepStatus::Running) {
            record.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn list_step_records(
        &self,
        execution_id: &Uuid,
    ) -> Result<Vec<StepRecord>, RepositoryError> {
        let steps = self.steps.lock().expect("steps lock");
        Ok(steps
            .iter()
            .filter(|s| &s.execution_id == execution_id)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryTaskRepository
// ---------------------------------------------------------------------------

/// In-memory implementation of [`TaskRepository`].
#[derive(Default)]
pub struct MemoryTaskRepository {
    tasks: Mutex<HashMap<Uuid, ScheduledTask>>,
    runs: Mutex<Vec<TaskRun>>,
}

impl MemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskRepository for MemoryTaskRepository {
    async fn create_task(&self, task: &ScheduledTask) -> Result<(), RepositoryError> {
        self.tasks
            .lock()
            .expect("tasks lock")
            .insert(task.id, task.clone());
        Ok(())
    }

    async fn get_task(&self, task_id: &Uuid) -> Result<Option<ScheduledTask>, RepositoryError> {
        Ok(self.tasks.lock().expect("tasks lock").get(task_id).cloned())
    }

    async fn update_task(&self, task: &ScheduledTask) -> Result<(), RepositoryError> {
        let mut tasks = self.tasks.lock().expect("tasks lock");
        if !tasks.contains_key(&task.id) {
            return Err(RepositoryError::NotFound);
        }
        tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn list_tasks(&self) -> Result<Vec<ScheduledTask>, RepositoryError> {
        let tasks = self.tasks.lock().expect("tasks lock");
        let mut result: Vec<_> = tasks.values().cloned().collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(result)
    }

    async fn list_active_tasks(&self) -> Result<Vec<ScheduledTask>, RepositoryError> {
        let tasks = self.tasks.lock().expect("tasks lock");
        Ok(tasks.values().filter(|t| t.is_active).cloned().collect())
    }

    async fn list_due_tasks(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledTask>, RepositoryError> {
        let tasks = self.tasks.lock().expect("tasks lock");
        Ok(tasks
            .values()
            .filter(|t| t.is_active && t.next_run_at.is_some_and(|at| at <= now))
            .cloned()
            .collect())
    }

    async fn create_task_run(&self, run: &TaskRun) -> Result<(), RepositoryError> {
        self.runs.lock().expect("runs lock").push(run.clone());
        Ok(())
    }

    async fn update_task_run(
        &self,
        run_id: &Uuid,
        status: TaskRunStatus,
        output: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let mut runs = self.runs.lock().expect("runs lock");
        let run = runs
            .iter_mut()
            .find(|r| &r.id == run_id)
            .ok_or(RepositoryError::NotFound)?;
        run.status = status;
        if let Some(o) = output {
            run.output = Some(o.clone());
        }
        if let Some(e) = error {
            run.error = Some(e.to_string());
        }
        if !matches!(status, TaskRunStatus::Running) {
            run.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn list_task_runs(
        &self,
        task_id: &Uuid,
        limit: u32,
    ) -> Result<Vec<TaskRun>, RepositoryError> {
        let runs = self.runs.lock().expect("runs lock");
        let mut result: Vec<_> = runs
            .iter()
            .filter(|r| &r.task_id == task_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        result.truncate(limit as usize);
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
