//! Per-execution context with step result tracking.
//!
//! `ExecutionContext` is the transient state that flows through one engine
//! run: seed variables, the trigger payload, and accumulated step results.
//! It lives for exactly one execution and is discarded once the final status
//! is persisted.

use std::collections::HashMap;

use serde_json::{Map, Value, json};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Mutable state for one workflow execution.
///
/// `variables` is seeded from the workflow's initial variables, the entries
/// of an object-shaped trigger payload, and the owning user's id under
/// `user_id`. `step_results` accumulates as steps complete.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub workflow_id: Uuid,
    pub execution_id: Uuid,
    pub trigger_id: Option<String>,
    pub trigger_payload: Option<Value>,
    pub variables: HashMap<String, Value>,
    pub step_results: HashMap<String, Value>,
}

impl ExecutionContext {
    /// Build a context for a new execution.
    pub fn new(
        workflow_id: Uuid,
        execution_id: Uuid,
        owner_id: Uuid,
        initial_variables: &HashMap<String, Value>,
        trigger_id: Option<String>,
        trigger_payload: Option<Value>,
    ) -> Self {
        let mut variables = initial_variables.clone();
        if let Some(Value::Object(payload)) = &trigger_payload {
            for (key, value) in payload {
                variables.insert(key.clone(), value.clone());
            }
        }
        variables.insert("user_id".to_string(), json!(owner_id.to_string()));

        Self {
            workflow_id,
            execution_id,
            trigger_id,
            trigger_payload,
            variables,
            step_results: HashMap::new(),
        }
    }

    /// Store the result of a completed step.
    pub fn set_step_result(&mut self, step_id: &str, result: Value) {
        self.step_results.insert(step_id.to_string(), result);
    }

    /// The owning user's id, when the seed variables carry one.
    pub fn user_id(&self) -> Option<Uuid> {
        self.variables
            .get("user_id")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
    }

    /// Build the JSON lookup root for interpolation and condition evaluation.
    ///
    /// Variables are spread at the top level, so `{{a.b}}` resolves against
    /// `variables.a.b` directly. Named keys are layered on top:
    ///
    /// ```json
    /// {
    ///   "<variable>": ...,
    ///   "variables": { ... },
    ///   "steps": { "<step_id>": <result>, ... },
    ///   "trigger": <payload or {}>,
    ///   "workflow_id": "...",
    ///   "execution_id": "..."
    /// }
    /// ```
    pub fn scope(&self) -> Value {
        let mut root = Map::new();
        for (key, value) in &self.variables {
            root.insert(key.clone(), value.clone());
        }

        root.insert(
            "variables".to_string(),
            Value::Object(self.variables.clone().into_iter().collect()),
        );
        root.insert(
            "steps".to_string(),
            Value::Object(self.step_results.clone().into_iter().collect()),
        );
        root.insert(
            "trigger".to_string(),
            self.trigger_payload.clone().unwrap_or(json!({})),
        );
        root.insert("workflow_id".to_string(), json!(self.workflow_id.to_string()));
        root.insert(
            "execution_id".to_string(),
            json!(self.execution_id.to_string()),
        );

        Value::Object(root)
    }

    /// Snapshot of accumulated step results for the execution record.
    pub fn outputs_snapshot(&self) -> Value {
        Value::Object(self.step_results.clone().into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
