//! Collaborator ports consumed by step handlers.
//!
//! The engine treats the LLM provider, tool registry, notification service,
//! memory manager, outbound HTTP, and code runtime as black boxes behind
//! these traits. The traits are object-safe (boxed futures) so handlers can
//! hold them as `Arc<dyn ...>` -- the same pattern the infra layer uses to
//! implement them (dependency inversion: trait here, implementation there).

use std::collections::HashMap;
use std::sync::Arc;

use conductor_types::collab::{
    HttpCall, HttpCallResult, LlmCompletion, LlmMessage, LlmOptions, Notification,
    ToolInvocation, ToolOutcome, ToolStatus,
};
use futures_util::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors surfaced by collaborator implementations.
#[derive(Debug, Error)]
pub enum CollabError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("collaborator request failed: {0}")]
    RequestFailed(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// LLM completion provider.
pub trait LlmProvider: Send + Sync {
    fn complete(
        &self,
        messages: Vec<LlmMessage>,
        options: LlmOptions,
    ) -> BoxFuture<'_, Result<LlmCompletion, CollabError>>;
}

/// Registry of named tools executable by TOOL_EXECUTION steps.
pub trait ToolRegistry: Send + Sync {
    fn execute(&self, invocation: ToolInvocation)
    -> BoxFuture<'_, Result<ToolOutcome, CollabError>>;
}

/// Sink for NOTIFICATION steps.
pub trait NotificationService: Send + Sync {
    fn create(&self, notification: Notification) -> BoxFuture<'_, Result<Value, CollabError>>;
}

/// Memory service behind MEMORY_OPERATION steps.
///
/// The operation name and parameter shape are opaque to the engine; the
/// implementation decides which operations it supports (e.g. `remember`,
/// `note`, `daily_log`, `search`, `forget`).
pub trait MemoryManager: Send + Sync {
    fn perform(
        &self,
        operation: &str,
        params: Value,
        user_id: Option<Uuid>,
    ) -> BoxFuture<'_, Result<Value, CollabError>>;
}

/// Outbound HTTP executor behind HTTP_REQUEST steps. Implementations must
/// enforce a hard per-request timeout independent of step retry policy.
pub trait HttpClient: Send + Sync {
    fn call(&self, request: HttpCall) -> BoxFuture<'_, Result<HttpCallResult, CollabError>>;
}

/// Code runtime behind CODE_EXECUTION steps.
pub trait CodeRunner: Send + Sync {
    fn run(
        &self,
        language: &str,
        source: &str,
        input: Value,
    ) -> BoxFuture<'_, Result<Value, CollabError>>;
}

// ---------------------------------------------------------------------------
// Collaborators bundle
// ---------------------------------------------------------------------------

/// The full set of collaborator references handed to the default handler
/// registry. Assembled once at startup.
#[derive(Clone)]
pub struct Collaborators {
    pub llm: Arc<dyn LlmProvider>,
    pub tools: Arc<dyn ToolRegistry>,
    pub notifications: Arc<dyn NotificationService>,
    pub memory: Arc<dyn MemoryManager>,
    pub http: Arc<dyn HttpClient>,
    pub code: Arc<dyn CodeRunner>,
}

// ---------------------------------------------------------------------------
// StaticToolRegistry
// ---------------------------------------------------------------------------

/// Boxed async tool function: input value in, output value out.
pub type ToolFn =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, CollabError>> + Send + Sync>;

/// In-memory tool registry populated at startup. Not extensible at runtime
/// from untrusted input -- registration happens before the engine starts.
#[derive(Default)]
pub struct StaticToolRegistry {
    tools: HashMap<String, ToolFn>,
}

impl StaticToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under an id. Later registrations replace earlier ones.
    pub fn register(&mut self, tool_id: impl Into<String>, tool: ToolFn) {
        self.tools.insert(tool_id.into(), tool);
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl ToolRegistry for StaticToolRegistry {
    fn execute(
        &self,
        invocation: ToolInvocation,
    ) -> BoxFuture<'_, Result<ToolOutcome, CollabError>> {
        let tool = self.tools.get(&invocation.tool_id).cloned();
        Box::pin(async move {
            let Some(tool) = tool else {
                return Ok(ToolOutcome {
                    status: ToolStatus::Error,
                    output: Value::Null,
                    error: Some(format!("unknown tool: {}", invocation.tool_id)),
                });
            };
            match tool(invocation.input).await {
                Ok(output) => Ok(ToolOutcome {
                    status: ToolStatus::Success,
                    output,
                    error: None,
                }),
                Err(e) => Ok(ToolOutcome {
                    status: ToolStatus::Error,
                    output: Value::Null,
                    error: Some(e.to_string()),
                }),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// NullCodeRunner
// ---------------------------------------------------------------------------

/// Code runner used when no runtime is wired in. Always errors.
#[derive(Default)]
pub struct NullCodeRunner;

impl CodeRunner for NullCodeRunner {
    fn run(
        &self,
        language: &str,
        _source: &str,
        _input: Value,
    ) -> BoxFuture<'_, Result<Value, CollabError>> {
        let language = language.to_string();
        Box::pin(async move {
            Err(CollabError::Unsupported(format!(
                "no code runtime configured for language '{language}'"
            )))
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
