//! Workflow domain types for Conductor.
//!
//! Defines the canonical representation for workflow definitions (steps,
//! triggers, retry policy) and the execution tracking types (`Execution`,
//! `StepRecord`). A definition is immutable once referenced by a running
//! execution: the engine snapshots it when the execution starts.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// A stored workflow definition: triggers, steps, and seed variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// UUIDv7 assigned on first save.
    pub id: Uuid,
    /// Human-readable workflow name.
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// User that owns this workflow.
    pub owner_id: Uuid,
    /// Disabled workflows reject execution requests.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Trigger configurations (type tag + opaque config).
    #[serde(default)]
    pub triggers: Vec<TriggerDefinition>,
    /// Ordered list of step definitions. Declaration order is the fallthrough
    /// order when a step has no `on_success` pointer.
    pub steps: Vec<StepDefinition>,
    /// Initial variables seeded into every execution context.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub variables: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

/// How a workflow can be triggered. The config payload is opaque to the
/// engine; it is interpreted by whatever wires the trigger source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerDefinition {
    /// Identifier unique within the workflow (e.g. "morning-cron").
    pub id: String,
    /// Trigger type tag (e.g. "schedule", "manual", "webhook").
    #[serde(rename = "type")]
    pub trigger_type: String,
    /// Opaque trigger configuration.
    #[serde(default)]
    pub config: Value,
}

// ---------------------------------------------------------------------------
// Step Definition
// ---------------------------------------------------------------------------

/// A single step in a workflow.
///
/// `on_success` / `on_failure` are step-id pointers forming the branch graph;
/// when `on_success` is absent the walk falls through to the next step in
/// declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// User-defined step ID (e.g. "gather-news"). Unique within a workflow.
    pub id: String,
    /// Human-readable step name.
    pub name: String,
    /// The kind of step.
    #[serde(rename = "type")]
    pub step_type: StepType,
    /// Step-specific configuration map. Accepted keys depend on the type
    /// (e.g. `url`/`method` for HTTP_REQUEST, `condition` for CONDITIONAL).
    /// String values may contain `{{path.to.value}}` interpolation tokens.
    #[serde(default)]
    pub config: Value,
    /// Step to jump to on success (default: next in declaration order).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success: Option<String>,
    /// Step to jump to after the final failed attempt. When set, the failure
    /// is handled and the execution continues down this branch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<String>,
    /// Retry configuration for this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
}

/// The closed set of step types. Each maps to exactly one registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepType {
    LlmPrompt,
    HttpRequest,
    CodeExecution,
    ToolExecution,
    Conditional,
    Delay,
    Notification,
    MemoryOperation,
}

impl StepType {
    /// The persisted tag for this type (e.g. `LLM_PROMPT`).
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::LlmPrompt => "LLM_PROMPT",
            StepType::HttpRequest => "HTTP_REQUEST",
            StepType::CodeExecution => "CODE_EXECUTION",
            StepType::ToolExecution => "TOOL_EXECUTION",
            StepType::Conditional => "CONDITIONAL",
            StepType::Delay => "DELAY",
            StepType::Notification => "NOTIFICATION",
            StepType::MemoryOperation => "MEMORY_OPERATION",
        }
    }
}

// ---------------------------------------------------------------------------
// Retry Configuration
// ---------------------------------------------------------------------------

/// Retry policy for a workflow step.
///
/// A step is attempted `max_retries + 1` times. Between attempts the engine
/// sleeps `delay_ms`, then multiplies the delay by `backoff_multiplier`
/// (1.0 = constant delay).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default = "default_backoff")]
    pub backoff_multiplier: f64,
}

fn default_backoff() -> f64 {
    1.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            delay_ms: 0,
            backoff_multiplier: 1.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Execution tracking
// ---------------------------------------------------------------------------

/// Overall status of one engine run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

/// Status of an individual step attempt record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Running,
    Completed,
    Failed,
}

/// Persistent record of one engine run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    /// UUIDv7 execution ID.
    pub id: Uuid,
    /// ID of the workflow definition being executed.
    pub workflow_id: Uuid,
    pub status: ExecutionStatus,
    /// Identifier of the trigger that started this run (e.g. a task id),
    /// if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_id: Option<String>,
    /// JSON payload from the trigger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_payload: Option<Value>,
    /// Snapshot of accumulated step results, keyed by step id.
    pub outputs: Value,
    /// Error message if the run failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Record of one attempted step within an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// UUIDv7 record ID.
    pub id: Uuid,
    /// Parent execution ID.
    pub execution_id: Uuid,
    /// Step ID matching `StepDefinition.id`.
    pub step_id: String,
    /// Step name (denormalized for display).
    pub step_name: String,
    pub status: StepStatus,
    /// Number of handler invocations made for this step (1 + retries used).
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
