//! Workflow repository trait definition.
//!
//! Storage interface for workflow definitions, execution records, and
//! per-step records. Uses native async fn in traits (Rust 2024 edition,
//! no async_trait macro).

use conductor_types::error::RepositoryError;
use conductor_types::workflow::{
    Execution, ExecutionStatus, StepRecord, StepStatus, WorkflowDefinition,
};
use uuid::Uuid;

/// Repository trait for workflow persistence.
///
/// Covers three entity families:
/// - **Definitions:** CRUD for workflow definitions.
/// - **Executions:** create/update/query engine runs.
/// - **Steps:** create/update/query individual step records.
pub trait WorkflowRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Definitions
    // -----------------------------------------------------------------------

    /// Upsert a workflow definition (insert or replace by ID).
    fn save_definition(
        &self,
        def: &WorkflowDefinition,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a workflow definition by its UUID.
    fn get_definition(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowDefinition>, RepositoryError>> + Send;

    /// List workflow definitions, optionally filtered by owner.
    fn list_definitions(
        &self,
        owner_id: Option<&Uuid>,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowDefinition>, RepositoryError>> + Send;

    /// Delete a workflow definition by ID. Returns `true` if it existed.
    fn delete_definition(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Executions
    // -----------------------------------------------------------------------

    /// Create a new execution record.
    fn create_execution(
        &self,
        execution: &Execution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Update an execution's status (and optionally error / outputs).
    /// Terminal updates also stamp `completed_at`.
    fn update_execution_status(
        &self,
        execution_id: &Uuid,
        status: ExecutionStatus,
        error: Option<&str>,
        outputs: Option<&serde_json::Value>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get an execution by its UUID.
    fn get_execution(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Execution>, RepositoryError>> + Send;

    /// List executions for a workflow, newest first.
    fn list_executions(
        &self,
        workflow_id: &Uuid,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<Execution>, RepositoryError>> + Send;

    /// List executions still in `Running` status (startup reconciliation).
    fn list_running_executions(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Execution>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    /// Create a new step record.
    fn create_step_record(
        &self,
        record: &StepRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Update a step record's status, attempt count, and output/error.
    fn update_step_record(
        &self,
        record_id: &Uuid,
        status: StepStatus,
        attempts: u32,
        output: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// List all step records for an execution, oldest first.
    fn list_step_records(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<StepRecord>, RepositoryError>> + Send;
}
