//! CLI workflow management subcommands.
//!
//! Provides create, run, list, status, logs, runs, and cancel operations
//! for workflow definitions and executions.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use comfy_table::{ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;

use conductor_core::workflow::definition::load_workflow_file;

use crate::state::AppState;

/// Workflow management subcommands.
#[derive(Subcommand)]
pub enum WorkflowCommand {
    /// Register a workflow from a YAML file.
    Create {
        /// Path to the workflow YAML file.
        file: PathBuf,

        /// Owner to assign (defaults to the file's owner_id).
        #[arg(long)]
        owner: Option<Uuid>,
    },

    /// Start an execution and print its id.
    Run {
        /// Workflow UUID.
        workflow_id: Uuid,

        /// Optional JSON trigger payload.
        #[arg(long)]
        payload: Option<String>,
    },

    /// List registered workflows.
    List,

    /// Show recent executions for a workflow.
    Runs {
        /// Workflow UUID.
        workflow_id: Uuid,

        /// Maximum number of executions to display.
        #[arg(long, default_value = "10")]
        limit: u32,
    },

    /// Show one execution's status and outputs.
    Status {
        /// Execution UUID.
        execution_id: Uuid,
    },

    /// Show step records for an execution.
    Logs {
        /// Execution UUID.
        execution_id: Uuid,
    },

    /// Cancel a running execution (cooperative).
    Cancel {
        /// Execution UUID.
        execution_id: Uuid,
    },
}

/// Handle a workflow subcommand.
pub async fn handle(cmd: WorkflowCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        WorkflowCommand::Create { file, owner } => handle_create(&file, owner, state, json).await,
        WorkflowCommand::Run {
            workflow_id,
            payload,
        } => handle_run(workflow_id, payload.as_deref(), state, json).await,
        WorkflowCommand::List => handle_list(state, json).await,
        WorkflowCommand::Runs { workflow_id, limit } => {
            handle_runs(workflow_id, limit, state, json).await
        }
        WorkflowCommand::Status { execution_id } => handle_status(execution_id, state, json).await,
        WorkflowCommand::Logs { execution_id } => handle_logs(execution_id, state, json).await,
        WorkflowCommand::Cancel { execution_id } => handle_cancel(execution_id, state).await,
    }
}

// ---------------------------------------------------------------------------
// Create / Run
// ---------------------------------------------------------------------------

async fn handle_create(
    file: &PathBuf,
    owner: Option<Uuid>,
    state: &AppState,
    json: bool,
) -> Result<()> {
    let definition = load_workflow_file(file)
        .with_context(|| format!("failed to load workflow from {}", file.display()))?;
    let owner = owner.unwrap_or(definition.owner_id);
    let name = definition.name.clone();

    let workflow_id = state
        .engine
        .create_workflow(definition, owner)
        .await
        .context("failed to create workflow")?;

    if json {
        println!("{}", serde_json::json!({ "workflow_id": workflow_id }));
    } else {
        println!(
            "{} workflow '{}' ({})",
            style("Created").green().bold(),
            name,
            workflow_id
        );
    }
    Ok(())
}

async fn handle_run(
    workflow_id: Uuid,
    payload: Option<&str>,
    state: &AppState,
    json: bool,
) -> Result<()> {
    let payload = payload
        .map(serde_json::from_str)
        .transpose()
        .context("--payload must be valid JSON")?;

    let execution_id = state
        .engine
        .execute_workflow(workflow_id, payload)
        .await
        .context("failed to start execution")?;

    if json {
        println!("{}", serde_json::json!({ "execution_id": execution_id }));
    } else {
        println!(
            "{} execution {}\nPoll with: condr workflow status {}",
            style("Started").green().bold(),
            execution_id,
            execution_id
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

async fn handle_list(state: &AppState, json: bool) -> Result<()> {
    use conductor_core::repository::workflow::WorkflowRepository;
    let definitions = state.engine.repo().list_definitions(None).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&definitions)?);
        return Ok(());
    }

    if definitions.is_empty() {
        println!("No workflows registered.");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["ID", "Name", "Steps", "Enabled"]);
    for def in definitions {
        table.add_row(vec![
            def.id.to_string(),
            def.name,
            def.steps.len().to_string(),
            def.enabled.to_string(),
        ]);
    }
    println!("{table}");
    Ok(())
}

async fn handle_runs(workflow_id: Uuid, limit: u32, state: &AppState, json: bool) -> Result<()> {
    let executions = state.engine.list_executions(workflow_id, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&executions)?);
        return Ok(());
    }

    if executions.is_empty() {
        println!("No executions for workflow {workflow_id}.");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Execution", "Status", "Started", "Error"]);
    for execution in executions {
        table.add_row(vec![
            execution.id.to_string(),
            format!("{:?}", execution.status),
            execution.started_at.to_rfc3339(),
            execution.error.unwrap_or_default(),
        ]);
    }
    println!("{table}");
    Ok(())
}

async fn handle_status(execution_id: Uuid, state: &AppState, json: bool) -> Result<()> {
    let execution = state.engine.get_execution(execution_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&execution)?);
        return Ok(());
    }

    println!("Execution {}", execution.id);
    println!("  workflow:  {}", execution.workflow_id);
    println!("  status:    {:?}", execution.status);
    println!("  started:   {}", execution.started_at.to_rfc3339());
    if let Some(completed) = execution.completed_at {
        println!("  completed: {}", completed.to_rfc3339());
    }
    if let Some(error) = &execution.error {
        println!("  error:     {}", style(error).red());
    }
    println!("  outputs:   {}", serde_json::to_string_pretty(&execution.outputs)?);
    Ok(())
}

async fn handle_logs(execution_id: Uuid, state: &AppState, json: bool) -> Result<()> {
    let records = state.engine.get_step_records(execution_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No step records for execution {execution_id}.");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Step", "Status", "Attempts", "Error"]);
    for record in records {
        table.add_row(vec![
            record.step_id,
            format!("{:?}", record.status),
            record.attempts.to_string(),
            record.error.unwrap_or_default(),
        ]);
    }
    println!("{table}");
    Ok(())
}

async fn handle_cancel(execution_id: Uuid, state: &AppState) -> Result<()> {
    match state.engine.cancel_execution(execution_id).await {
        Ok(()) => {
            println!("{} execution {}", style("Cancelled").yellow().bold(), execution_id);
            Ok(())
        }
        Err(e) => bail!("failed to cancel execution: {e}"),
    }
}
