//! Workflow definition parsing and creation-time validation.
//!
//! Validates structural constraints (unique step ids, branch targets, per-type
//! required config keys) and checks the branch graph for cycles before a
//! definition is ever persisted -- malformed `on_success`/`on_failure`
//! pointers are rejected here instead of being trusted at run time.
//! Also converts between YAML files and `WorkflowDefinition` for the CLI.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use conductor_types::workflow::{StepDefinition, StepType, WorkflowDefinition};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from workflow definition handling.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// YAML/JSON parse failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// A branch pointer references an unknown step id.
    #[error("unknown branch target: {0}")]
    UnknownTarget(String),

    /// The branch graph contains a cycle.
    #[error("cycle detected: {0}")]
    CycleDetected(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated `WorkflowDefinition`.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDefinition, WorkflowError> {
    let def: WorkflowDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

/// Serialize a `WorkflowDefinition` to a YAML string.
pub fn serialize_workflow_yaml(def: &WorkflowDefinition) -> Result<String, WorkflowError> {
    serde_yaml_ng::to_string(def).map_err(|e| WorkflowError::ParseError(e.to_string()))
}

/// Load and validate a workflow definition from a YAML file.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition, WorkflowError> {
    let content = std::fs::read_to_string(path)?;
    parse_workflow_yaml(&content)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `WorkflowDefinition`.
///
/// Checks:
/// - Name is non-empty and contains only alphanumeric characters and hyphens
/// - At least one step exists
/// - All step IDs are unique
/// - `on_success` / `on_failure` pointers reference existing step IDs
/// - Per-type required config keys are present
/// - The branch graph (success pointers, declaration-order fallthrough,
///   failure pointers) is acyclic
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), WorkflowError> {
    if def.name.is_empty() {
        return Err(WorkflowError::ValidationError(
            "workflow name must not be empty".to_string(),
        ));
    }
    if !def.name.chars().all(|c| c.is_alphanumeric() || c == '-') {
        return Err(WorkflowError::ValidationError(format!(
            "workflow name '{}' contains invalid characters (only alphanumeric and hyphens allowed)",
            def.name
        )));
    }

    if def.steps.is_empty() {
        return Err(WorkflowError::ValidationError(
            "workflow must have at least one step".to_string(),
        ));
    }

    let mut seen_ids = HashSet::new();
    for step in &def.steps {
        if !seen_ids.insert(step.id.as_str()) {
            return Err(WorkflowError::ValidationError(format!(
                "duplicate step ID: '{}'",
                step.id
            )));
        }
    }

    for step in &def.steps {
        for target in [step.on_success.as_deref(), step.on_failure.as_deref()]
            .into_iter()
            .flatten()
        {
            if !seen_ids.contains(target) {
                return Err(WorkflowError::UnknownTarget(format!(
                    "step '{}' points to unknown step '{}'",
                    step.id, target
                )));
            }
        }
        validate_step_config(step)?;
    }

    validate_branch_graph(&def.steps)
}

/// Required config keys per step type.
fn required_keys(step_type: StepType) -> &'static [&'static str] {
    match step_type {
        StepType::LlmPrompt => &["prompt"],
        StepType::HttpRequest => &["url", "method"],
        StepType::CodeExecution => &["source"],
        StepType::ToolExecution => &["tool_id"],
        StepType::Conditional => &["condition"],
        StepType::Delay => &["delay_ms"],
        StepType::Notification => &["title"],
        StepType::MemoryOperation => &["operation"],
    }
}

fn validate_step_config(step: &StepDefinition) -> Result<(), WorkflowError> {
    let config = step.config.as_object().ok_or_else(|| {
        WorkflowError::ValidationError(format!("step '{}' config must be an object", step.id))
    })?;
    for key in required_keys(step.step_type) {
        if !config.contains_key(*key) {
            return Err(WorkflowError::ValidationError(format!(
                "step '{}' ({}) is missing required config key '{}'",
                step.id,
                step.step_type.as_str(),
                key
            )));
        }
    }
    Ok(())
}

/// Check the branch graph for cycles.
///
/// Edges: each step's `on_success` (or its declaration-order successor when
/// `on_success` is absent) and its `on_failure`. A walk can only follow these
/// edges, so acyclicity here bounds every execution.
fn validate_branch_graph(steps: &[StepDefinition]) -> Result<(), WorkflowError> {
    let id_to_idx: HashMap<&str, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();

    let mut graph = DiGraph::<&str, ()>::new();
    let node_indices: Vec<_> = steps.iter().map(|s| graph.add_node(s.id.as_str())).collect();

    for (i, step) in steps.iter().enumerate() {
        let successor = match &step.on_success {
            Some(target) => Some(id_to_idx[target.as_str()]),
            None => (i + 1 < steps.len()).then_some(i + 1),
        };
        if let Some(next) = successor {
            graph.add_edge(node_indices[i], node_indices[next], ());
        }
        if let Some(target) = &step.on_failure {
            graph.add_edge(node_indices[i], node_indices[id_to_idx[target.as_str()]], ());
        }
    }

    toposort(&graph, None).map_err(|cycle| {
        let step_id = graph[cycle.node_id()];
        WorkflowError::CycleDetected(format!("cycle involving step '{step_id}'"))
    })?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn make_step(id: &str, step_type: StepType, config: serde_json::Value) -> StepDefinition {
        StepDefinition {
            id: id.to_string(),
            name: id.to_string(),
            step_type,
            config,
            on_success: None,
            on_failure: None,
            retry: None,
        }
    }

    fn delay_step(id: &str) -> StepDefinition {
        make_step(id, StepType::Delay, json!({ "delay_ms": 10 }))
    }

    fn make_definition(steps: Vec<StepDefinition>) -> WorkflowDefinition {
        WorkflowDefinition {
            id: Uuid::now_v7(),
            name: "test-workflow".to_string(),
            description: None,
            owner_id: Uuid::now_v7(),
            enabled: true,
            triggers: vec![],
            steps,
            variables: Default::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    // -----------------------------------------------------------------------
    // Structural checks
    // -----------------------------------------------------------------------

    #[test]
    fn test_valid_definition_passes() {
        let def = make_definition(vec![delay_step("a"), delay_step("b")]);
        assert!(validate_definition(&def).is_ok());
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut def = make_definition(vec![delay_step("a")]);
        def.name = String::new();
        assert!(validate_definition(&def).is_err());
    }

    #[test]
    fn test_invalid_name_characters_rejected() {
        let mut def = make_definition(vec![delay_step("a")]);
        def.name = "bad name!".to_string();
        assert!(validate_definition(&def).is_err());
    }

    #[test]
    fn test_empty_steps_rejected() {
        let def = make_definition(vec![]);
        let err = validate_definition(&def).unwrap_err();
        assert!(err.to_string().contains("at least one step"));
    }

    #[test]
    fn test_duplicate_step_ids_rejected() {
        let def = make_definition(vec![delay_step("a"), delay_step("a")]);
        let err = validate_definition(&def).unwrap_err();
        assert!(err.to_string().contains("duplicate step ID"));
    }

    #[test]
    fn test_unknown_branch_target_rejected() {
        let mut step = delay_step("a");
        step.on_success = Some("nope".to_string());
        let def = make_definition(vec![step]);
        let err = validate_definition(&def).unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownTarget(_)));
    }

    // -----------------------------------------------------------------------
    // Required config keys
    // -----------------------------------------------------------------------

    #[test]
    fn test_missing_required_config_key_rejected() {
        let def = make_definition(vec![make_step("h", StepType::HttpRequest, json!({
            "url": "https://example.com"
        }))]);
        let err = validate_definition(&def).unwrap_err();
        assert!(err.to_string().contains("'method'"), "got: {err}");
    }

    #[test]
    fn test_non_object_config_rejected() {
        let def = make_definition(vec![make_step("d", StepType::Delay, json!(42))]);
        let err = validate_definition(&def).unwrap_err();
        assert!(err.to_string().contains("must be an object"));
    }

    #[test]
    fn test_all_types_required_keys() {
        let cases = [
            (StepType::LlmPrompt, json!({ "prompt": "p" })),
            (StepType::HttpRequest, json!({ "url": "u", "method": "GET" })),
            (StepType::CodeExecution, json!({ "source": "1" })),
            (StepType::ToolExecution, json!({ "tool_id": "t" })),
            (StepType::Conditional, json!({ "condition": "true" })),
            (StepType::Delay, json!({ "delay_ms": 1 })),
            (StepType::Notification, json!({ "title": "t" })),
            (StepType::MemoryOperation, json!({ "operation": "remember" })),
        ];
        for (step_type, config) in cases {
            let def = make_definition(vec![make_step("s", step_type, config)]);
            assert!(validate_definition(&def).is_ok(), "{step_type:?} should pass");

            let def = make_definition(vec![make_step("s", step_type, json!({}))]);
            assert!(
                validate_definition(&def).is_err(),
                "{step_type:?} should require keys"
            );
        }
    }

    // -----------------------------------------------------------------------
    // Branch graph
    // -----------------------------------------------------------------------

    #[test]
    fn test_on_success_cycle_rejected() {
        let mut a = delay_step("a");
        a.on_success = Some("b".to_string());
        let mut b = delay_step("b");
        b.on_success = Some("a".to_string());
        let def = make_definition(vec![a, b]);
        let err = validate_definition(&def).unwrap_err();
        assert!(matches!(err, WorkflowError::CycleDetected(_)));
    }

    #[test]
    fn test_fallthrough_cycle_rejected() {
        // b falls through to c; c jumps back to a; a jumps to b.
        let mut a = delay_step("a");
        a.on_success = Some("b".to_string());
        let b = delay_step("b");
        let mut c = delay_step("c");
        c.on_success = Some("a".to_string());
        let def = make_definition(vec![a, b, c]);
        let err = validate_definition(&def).unwrap_err();
        assert!(matches!(err, WorkflowError::CycleDetected(_)));
    }

    #[test]
    fn test_on_failure_back_edge_rejected() {
        // Retry-loop shape: b's failure branch jumps back to a.
        let a = delay_step("a");
        let mut b = delay_step("b");
        b.on_failure = Some("a".to_string());
        let def = make_definition(vec![a, b]);
        let err = validate_definition(&def).unwrap_err();
        assert!(matches!(err, WorkflowError::CycleDetected(_)));
    }

    #[test]
    fn test_forward_branches_accepted() {
        // Diamond: a -> (on_success c, on_failure b), b -> c, c end.
        let mut a = delay_step("a");
        a.on_success = Some("c".to_string());
        a.on_failure = Some("b".to_string());
        let b = delay_step("b");
        let c = delay_step("c");
        let def = make_definition(vec![a, b, c]);
        assert!(validate_definition(&def).is_ok());
    }

    // -----------------------------------------------------------------------
    // YAML
    // -----------------------------------------------------------------------

    #[test]
    fn test_yaml_roundtrip() {
        let def = make_definition(vec![delay_step("a")]);
        let yaml = serialize_workflow_yaml(&def).unwrap();
        let parsed = parse_workflow_yaml(&yaml).unwrap();
        assert_eq!(parsed.name, def.name);
        assert_eq!(parsed.steps.len(), 1);
    }

    #[test]
    fn test_yaml_parse_validates() {
        let yaml = r#"
id: "01938e90-0000-7000-8000-000000000001"
name: bad
owner_id: "01938e90-0000-7000-8000-000000000002"
steps:
  - id: a
    name: A
    type: DELAY
    config: {}
created_at: "2026-01-01T00:00:00Z"
updated_at: "2026-01-01T00:00:00Z"
"#;
        let err = parse_workflow_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("delay_ms"));
    }
}
