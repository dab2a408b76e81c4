//! The workflow engine: sequential step walk with retry, branching, and
//! per-step persistence.
//!
//! `execute_workflow` creates a RUNNING execution record synchronously, then
//! runs the step walk on a supervised background task and returns the
//! execution id immediately -- callers poll `get_execution` for terminal
//! status. The supervisor guarantees the record reaches a terminal status
//! even if the walk panics or a persistence call fails mid-walk: an
//! execution is never stranded RUNNING.
//!
//! # Step walk
//!
//! Start at `steps[0]`. Each iteration: check the cancellation token, persist
//! a RUNNING step record, interpolate the step config, invoke the handler
//! through the retry wrapper. On success the result lands in
//! `step_results[step.id]` and the walk advances to `on_success` (or the next
//! step in declaration order, or stops). On failure after the final attempt
//! the walk jumps to `on_failure` when set -- the failure is handled and the
//! execution may still complete -- otherwise the execution fails. Steps of
//! one execution never run concurrently.

use std::sync::Arc;

use chrono::Utc;
use conductor_types::workflow::{
    Execution, ExecutionStatus, StepRecord, StepStatus, WorkflowDefinition,
};
use dashmap::DashMap;
use futures_util::FutureExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::repository::workflow::WorkflowRepository;

use super::context::ExecutionContext;
use super::definition::{WorkflowError, validate_definition};
use super::interpolate::interpolate_value;
use super::retry::run_with_retry;
use super::step_runner::HandlerRegistry;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Run-time backstop for the creation-time acyclicity check: a single
/// execution never walks more steps than this.
pub const MAX_STEPS_PER_EXECUTION: u32 = 1000;

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Errors from engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Unknown workflow or execution id.
    #[error("not found: {0}")]
    NotFound(Uuid),

    /// The workflow is disabled.
    #[error("workflow {0} is disabled")]
    Disabled(Uuid),

    /// Definition validation failure.
    #[error(transparent)]
    Validation(#[from] WorkflowError),

    /// Persistence failure.
    #[error("repository error: {0}")]
    Repository(String),

    /// A step failed after its final attempt with no failure branch.
    #[error("step '{step_id}' failed after {attempts} attempt(s): {error}")]
    StepFailed {
        step_id: String,
        attempts: u32,
        error: String,
    },

    /// The walk exceeded the per-execution step budget.
    #[error("step budget exceeded after {0} steps")]
    StepBudgetExceeded(u32),

    /// Walk-internal failure (e.g. a handler panic caught by the supervisor).
    #[error("internal engine error: {0}")]
    Internal(String),
}

impl From<conductor_types::error::RepositoryError> for EngineError {
    fn from(e: conductor_types::error::RepositoryError) -> Self {
        EngineError::Repository(e.to_string())
    }
}

/// How a step walk ended when it did not error.
enum WalkStatus {
    Completed,
    Cancelled,
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Definition-driven step-execution engine.
///
/// Generic over `R: WorkflowRepository` for storage flexibility. All state is
/// held in `Arc`s so the engine clones cheaply into its supervised walk
/// tasks; the cancellation-token map is explicit struct state, not a
/// module-level global, so multiple engines (e.g. in tests) never collide.
pub struct WorkflowEngine<R: WorkflowRepository> {
    repo: Arc<R>,
    registry: Arc<HandlerRegistry>,
    cancellations: Arc<DashMap<Uuid, CancellationToken>>,
}

impl<R: WorkflowRepository> Clone for WorkflowEngine<R> {
    fn clone(&self) -> Self {
        Self {
            repo: Arc::clone(&self.repo),
            registry: Arc::clone(&self.registry),
            cancellations: Arc::clone(&self.cancellations),
        }
    }
}

impl<R: WorkflowRepository + 'static> WorkflowEngine<R> {
    /// Create an engine over a repository and a handler registry.
    pub fn new(repo: R, registry: HandlerRegistry) -> Self {
        Self {
            repo: Arc::new(repo),
            registry: Arc::new(registry),
            cancellations: Arc::new(DashMap::new()),
        }
    }

    /// Access the underlying repository.
    pub fn repo(&self) -> &R {
        &self.repo
    }

    // -----------------------------------------------------------------------
    // Workflow CRUD
    // -----------------------------------------------------------------------

    /// Validate and persist a workflow definition. Assigns a fresh id and
    /// sets the owner; returns the workflow id.
    pub async fn create_workflow(
        &self,
        mut definition: WorkflowDefinition,
        owner_id: Uuid,
    ) -> Result<Uuid, EngineError> {
        definition.id = Uuid::now_v7();
        definition.owner_id = owner_id;
        let now = Utc::now();
        definition.created_at = now;
        definition.updated_at = now;

        validate_definition(&definition)?;
        for step in &definition.steps {
            if !self.registry.contains(&step.step_type) {
                return Err(EngineError::Validation(WorkflowError::ValidationError(
                    format!(
                        "no handler registered for step type {}",
                        step.step_type.as_str()
                    ),
                )));
            }
        }

        self.repo.save_definition(&definition).await?;
        tracing::info!(
            workflow_id = %definition.id,
            name = definition.name.as_str(),
            steps = definition.steps.len(),
            "workflow created"
        );
        Ok(definition.id)
    }

    /// Fetch a workflow definition.
    pub async fn get_workflow(&self, workflow_id: Uuid) -> Result<WorkflowDefinition, EngineError> {
        self.repo
            .get_definition(&workflow_id)
            .await?
            .ok_or(EngineError::NotFound(workflow_id))
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Start an execution and return its id immediately.
    ///
    /// Fails with `NotFound` for an unknown workflow and `Disabled` for an
    /// inactive one. The step walk runs on a supervised background task;
    /// poll [`get_execution`](Self::get_execution) for terminal status.
    pub async fn execute_workflow(
        &self,
        workflow_id: Uuid,
        trigger_payload: Option<Value>,
    ) -> Result<Uuid, EngineError> {
        self.execute_with_trigger(workflow_id, None, trigger_payload)
            .await
    }

    /// Start an execution attributed to a named trigger (e.g. a task id).
    pub async fn execute_with_trigger(
        &self,
        workflow_id: Uuid,
        trigger_id: Option<String>,
        trigger_payload: Option<Value>,
    ) -> Result<Uuid, EngineError> {
        let definition = self
            .repo
            .get_definition(&workflow_id)
            .await?
            .ok_or(EngineError::NotFound(workflow_id))?;
        if !definition.enabled {
            return Err(EngineError::Disabled(workflow_id));
        }

        let execution_id = Uuid::now_v7();
        let execution = Execution {
            id: execution_id,
            workflow_id,
            status: ExecutionStatus::Running,
            trigger_id: trigger_id.clone(),
            trigger_payload: trigger_payload.clone(),
            outputs: serde_json::json!({}),
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        };
        self.repo.create_execution(&execution).await?;

        let token = CancellationToken::new();
        self.cancellations.insert(execution_id, token.clone());

        let mut ctx = ExecutionContext::new(
            workflow_id,
            execution_id,
            definition.owner_id,
            &definition.variables,
            trigger_id,
            trigger_payload,
        );

        tracing::info!(
            execution_id = %execution_id,
            workflow = definition.name.as_str(),
            "starting workflow execution"
        );

        // The walk runs detached from the caller; the supervisor below is the
        // only thing allowed to decide the record's terminal status.
        let engine = self.clone();
        tokio::spawn(async move {
            let walk = engine.run_walk(&definition, execution_id, &mut ctx, &token);
            let result = std::panic::AssertUnwindSafe(walk).catch_unwind().await;
            engine.cancellations.remove(&execution_id);

            let outcome = match result {
                Ok(inner) => inner,
                Err(_) => Err(EngineError::Internal("step walk panicked".to_string())),
            };
            engine
                .finalize_execution(execution_id, &ctx, outcome)
                .await;
        });

        Ok(execution_id)
    }

    /// Drive the execution record to its terminal status. Persistence errors
    /// here are logged, never propagated -- there is no caller left.
    async fn finalize_execution(
        &self,
        execution_id: Uuid,
        ctx: &ExecutionContext,
        outcome: Result<WalkStatus, EngineError>,
    ) {
        let outputs = ctx.outputs_snapshot();
        let result = match outcome {
            Ok(WalkStatus::Completed) => {
                tracing::info!(execution_id = %execution_id, "workflow execution completed");
                self.repo
                    .update_execution_status(
                        &execution_id,
                        ExecutionStatus::Completed,
                        None,
                        Some(&outputs),
                    )
                    .await
            }
            Ok(WalkStatus::Cancelled) => {
                tracing::info!(execution_id = %execution_id, "workflow execution cancelled");
                self.repo
                    .update_execution_status(
                        &execution_id,
                        ExecutionStatus::Cancelled,
                        None,
                        Some(&outputs),
                    )
                    .await
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!(
                    execution_id = %execution_id,
                    error = message.as_str(),
                    "workflow execution failed"
                );
                self.repo
                    .update_execution_status(
                        &execution_id,
                        ExecutionStatus::Failed,
                        Some(&message),
                        Some(&outputs),
                    )
                    .await
            }
        };

        if let Err(e) = result {
            tracing::error!(
                execution_id = %execution_id,
                error = %e,
                "failed to persist terminal execution status"
            );
        }
    }

    /// The sequential step walk. At most one step of an execution is in
    /// flight at any time.
    async fn run_walk(
        &self,
        definition: &WorkflowDefinition,
        execution_id: Uuid,
        ctx: &mut ExecutionContext,
        token: &CancellationToken,
    ) -> Result<WalkStatus, EngineError> {
        let mut current = definition.steps.first().map(|s| s.id.clone());
        let mut walked = 0u32;

        while let Some(step_id) = current {
            // Cooperative cancellation point: checked before every step.
            if token.is_cancelled() {
                return Ok(WalkStatus::Cancelled);
            }

            // Unknown id means the graph is exhausted.
            let Some((index, step)) = definition
                .steps
                .iter()
                .enumerate()
                .find(|(_, s)| s.id == step_id)
            else {
                break;
            };

            walked += 1;
            if walked > MAX_STEPS_PER_EXECUTION {
                return Err(EngineError::StepBudgetExceeded(MAX_STEPS_PER_EXECUTION));
            }

            let record_id = Uuid::now_v7();
            self.repo
                .create_step_record(&StepRecord {
                    id: record_id,
                    execution_id,
                    step_id: step.id.clone(),
                    step_name: step.name.clone(),
                    status: StepStatus::Running,
                    attempts: 0,
                    output: None,
                    error: None,
                    started_at: Utc::now(),
                    completed_at: None,
                })
                .await?;

            let handler = self.registry.get(&step.step_type).ok_or_else(|| {
                EngineError::Validation(WorkflowError::ValidationError(format!(
                    "no handler registered for step type {}",
                    step.step_type.as_str()
                )))
            })?;

            let resolved_config = interpolate_value(&step.config, &ctx.scope());
            let retry_config = step.retry.clone().unwrap_or_default();

            tracing::debug!(
                execution_id = %execution_id,
                step_id = step.id.as_str(),
                step_type = step.step_type.as_str(),
                "running step"
            );

            let step_ctx: &ExecutionContext = ctx;
            let outcome = run_with_retry(&retry_config, |_attempt| {
                handler.execute(step, &resolved_config, step_ctx)
            })
            .await;

            match outcome.result {
                Ok(output) => {
                    self.repo
                        .update_step_record(
                            &record_id,
                            StepStatus::Completed,
                            outcome.attempts,
                            Some(&output),
                            None,
                        )
                        .await?;
                    ctx.set_step_result(&step.id, output);

                    current = step
                        .on_success
                        .clone()
                        .or_else(|| definition.steps.get(index + 1).map(|s| s.id.clone()));
                }
                Err(step_error) => {
                    let message = step_error.to_string();
                    self.repo
                        .update_step_record(
                            &record_id,
                            StepStatus::Failed,
                            outcome.attempts,
                            None,
                            Some(&message),
                        )
                        .await?;

                    match &step.on_failure {
                        Some(target) => {
                            tracing::warn!(
                                execution_id = %execution_id,
                                step_id = step.id.as_str(),
                                attempts = outcome.attempts,
                                error = message.as_str(),
                                "step failed, taking failure branch"
                            );
                            current = Some(target.clone());
                        }
                        None => {
                            return Err(EngineError::StepFailed {
                                step_id: step.id.clone(),
                                attempts: outcome.attempts,
                                error: message,
                            });
                        }
                    }
                }
            }
        }

        Ok(WalkStatus::Completed)
    }

    // -----------------------------------------------------------------------
    // Queries + cancellation
    // -----------------------------------------------------------------------

    /// Fetch an execution record.
    pub async fn get_execution(&self, execution_id: Uuid) -> Result<Execution, EngineError> {
        self.repo
            .get_execution(&execution_id)
            .await?
            .ok_or(EngineError::NotFound(execution_id))
    }

    /// List executions for a workflow, newest first.
    pub async fn list_executions(
        &self,
        workflow_id: Uuid,
        limit: u32,
    ) -> Result<Vec<Execution>, EngineError> {
        Ok(self.repo.list_executions(&workflow_id, limit).await?)
    }

    /// List step records for an execution, oldest first.
    pub async fn get_step_records(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<StepRecord>, EngineError> {
        Ok(self.repo.list_step_records(&execution_id).await?)
    }

    /// Mark an execution CANCELLED and signal its walk.
    ///
    /// Cancellation is advisory: a handler already mid-flight is not
    /// interrupted; the walk observes the token before its next step and
    /// stops advancing.
    pub async fn cancel_execution(&self, execution_id: Uuid) -> Result<(), EngineError> {
        let execution = self
            .repo
            .get_execution(&execution_id)
            .await?
            .ok_or(EngineError::NotFound(execution_id))?;

        if execution.status.is_terminal() {
            return Ok(());
        }

        if let Some((_, token)) = self.cancellations.remove(&execution_id) {
            token.cancel();
        }
        self.repo
            .update_execution_status(&execution_id, ExecutionStatus::Cancelled, None, None)
            .await?;
        tracing::info!(execution_id = %execution_id, "execution cancelled");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
