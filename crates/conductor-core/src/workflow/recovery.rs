//! Startup reconciliation for executions orphaned by a crash.
//!
//! A process death mid-walk leaves execution and step records stranded in
//! RUNNING. On startup, before the scheduler arms any timers, this sweep
//! marks them FAILED with an explicit interruption error so callers never
//! observe a perpetually-RUNNING execution.

use conductor_types::workflow::{ExecutionStatus, StepStatus};

use crate::repository::workflow::WorkflowRepository;

use super::engine::EngineError;

/// Error recorded on executions and steps interrupted by a restart.
pub const INTERRUPTED_ERROR: &str = "interrupted by process restart";

/// Mark every RUNNING execution (and its RUNNING steps) as FAILED.
///
/// Returns the number of executions reconciled.
pub async fn sweep_interrupted<R: WorkflowRepository>(repo: &R) -> Result<u32, EngineError> {
    let orphaned = repo.list_running_executions().await?;
    let count = orphaned.len() as u32;

    for execution in orphaned {
        tracing::warn!(
            execution_id = %execution.id,
            workflow_id = %execution.workflow_id,
            "reconciling execution interrupted by restart"
        );

        let steps = repo.list_step_records(&execution.id).await?;
        for step in steps {
            if step.status == StepStatus::Running {
                repo.update_step_record(
                    &step.id,
                    StepStatus::Failed,
                    step.attempts,
                    None,
                    Some(INTERRUPTED_ERROR),
                )
                .await?;
            }
        }

        repo.update_execution_status(
            &execution.id,
            ExecutionStatus::Failed,
            Some(INTERRUPTED_ERROR),
            None,
        )
        .await?;
    }

    if count > 0 {
        tracing::info!(count, "startup sweep reconciled interrupted executions");
    }
    Ok(count)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::MemoryWorkflowRepository;
    use chrono::Utc;
    use conductor_types::workflow::{Execution, StepRecord};
    use serde_json::json;
    use uuid::Uuid;

    fn running_execution() -> Execution {
        Execution {
            id: Uuid::now_v7(),
            workflow_id: Uuid::now_v7(),
            status: ExecutionStatus::Running,
            trigger_id: None,
            trigger_payload: None,
            outputs: json!({}),
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    fn step_record(execution_id: Uuid, status: StepStatus) -> StepRecord {
        StepRecord {
            id: Uuid::now_v7(),
            execution_id,
            step_id: "s".to_string(),
            step_name: "S".to_string(),
            status,
            attempts: 1,
            output: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn test_sweep_marks_running_executions_failed() {
        let repo = MemoryWorkflowRepository::new();
        let orphan = running_execution();
        repo.create_execution(&orphan).await.unwrap();
        repo.create_step_record(&step_record(orphan.id, StepStatus::Completed))
            .await
            .unwrap();
        repo.create_step_record(&step_record(orphan.id, StepStatus::Running))
            .await
            .unwrap();

        let count = sweep_interrupted(&repo).await.unwrap();
        assert_eq!(count, 1);

        let execution = repo.get_execution(&orphan.id).await.unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.error.as_deref(), Some(INTERRUPTED_ERROR));

        let steps = repo.list_step_records(&orphan.id).await.unwrap();
        // Completed steps untouched, running steps failed.
        assert_eq!(steps[0].status, StepStatus::Completed);
        assert_eq!(steps[1].status, StepStatus::Failed);
        assert_eq!(steps[1].error.as_deref(), Some(INTERRUPTED_ERROR));
    }

    #[tokio::test]
    async fn test_sweep_ignores_terminal_executions() {
        let repo = MemoryWorkflowRepository::new();
        let mut done = running_execution();
        done.status = ExecutionStatus::Completed;
        repo.create_execution(&done).await.unwrap();

        let count = sweep_interrupted(&repo).await.unwrap();
        assert_eq!(count, 0);

        let execution = repo.get_execution(&done.id).await.unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert!(execution.error.is_none());
    }
}
