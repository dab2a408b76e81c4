//! Step handler registry and the built-in handlers for all 8 step types.
//!
//! Each step type maps to exactly one handler with the uniform signature
//! `(step, resolved config, context) -> result | error`. Handlers talk to
//! external collaborators through the ports in [`crate::collab`]; the
//! dispatch, retry, and persistence logic in the engine is identical across
//! types.
//!
//! The registry is extensible at startup (`register`), never at runtime from
//! untrusted input.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use conductor_types::collab::{HttpCall, LlmMessage, LlmOptions, Notification, ToolInvocation};
use conductor_types::workflow::{StepDefinition, StepType};
use futures_util::future::BoxFuture;
use serde_json::{Value, json};

use crate::collab::{CollabError, Collaborators};

use super::condition::{ConditionError, evaluate_condition};
use super::context::ExecutionContext;

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// Errors from a single step execution attempt.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// A required config key is absent.
    #[error("missing required config key '{0}'")]
    MissingConfig(&'static str),

    /// A config value has the wrong shape.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// The handler ran and failed.
    #[error("step execution failed: {0}")]
    ExecutionFailed(String),

    /// Condition text failed to parse or evaluate.
    #[error(transparent)]
    Condition(#[from] ConditionError),

    /// A CONDITIONAL step evaluated to false; routes the walk to
    /// `on_failure` (the else-branch).
    #[error("condition evaluated to false")]
    ConditionNotMet,

    /// A collaborator call failed.
    #[error(transparent)]
    Collab(#[from] CollabError),
}

// ---------------------------------------------------------------------------
// StepHandler + registry
// ---------------------------------------------------------------------------

/// Executes one step type. `config` is the step's config map with all
/// `{{...}}` tokens already resolved.
pub trait StepHandler: Send + Sync {
    fn execute<'a>(
        &'a self,
        step: &'a StepDefinition,
        config: &'a Value,
        ctx: &'a ExecutionContext,
    ) -> BoxFuture<'a, Result<Value, StepError>>;
}

/// Map from step-type tag to its handler.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<StepType, Arc<dyn StepHandler>>,
}

impl HandlerRegistry {
    /// An empty registry. Mostly useful in tests; production code starts
    /// from [`HandlerRegistry::with_defaults`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the 8 built-in handlers wired to the given
    /// collaborators.
    pub fn with_defaults(collab: Collaborators) -> Self {
        let mut registry = Self::new();
        registry.register(
            StepType::LlmPrompt,
            Arc::new(LlmPromptHandler {
                llm: Arc::clone(&collab.llm),
            }),
        );
        registry.register(
            StepType::HttpRequest,
            Arc::new(HttpRequestHandler {
                http: Arc::clone(&collab.http),
            }),
        );
        registry.register(
            StepType::CodeExecution,
            Arc::new(CodeExecutionHandler {
                code: Arc::clone(&collab.code),
            }),
        );
        registry.register(
            StepType::ToolExecution,
            Arc::new(ToolExecutionHandler {
                tools: Arc::clone(&collab.tools),
            }),
        );
        registry.register(StepType::Conditional, Arc::new(ConditionalHandler));
        registry.register(StepType::Delay, Arc::new(DelayHandler));
        registry.register(
            StepType::Notification,
            Arc::new(NotificationHandler {
                notifications: Arc::clone(&collab.notifications),
            }),
        );
        registry.register(
            StepType::MemoryOperation,
            Arc::new(MemoryOperationHandler {
                memory: Arc::clone(&collab.memory),
            }),
        );
        registry
    }

    /// Register (or replace) the handler for a step type.
    pub fn register(&mut self, step_type: StepType, handler: Arc<dyn StepHandler>) {
        self.handlers.insert(step_type, handler);
    }

    pub fn get(&self, step_type: &StepType) -> Option<&Arc<dyn StepHandler>> {
        self.handlers.get(step_type)
    }

    pub fn contains(&self, step_type: &StepType) -> bool {
        self.handlers.contains_key(step_type)
    }
}

// ---------------------------------------------------------------------------
// Config accessors
// ---------------------------------------------------------------------------

fn require_str<'a>(config: &'a Value, key: &'static str) -> Result<&'a str, StepError> {
    match config.get(key) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(StepError::InvalidConfig(format!(
            "'{key}' must be a string, got {other}"
        ))),
        None => Err(StepError::MissingConfig(key)),
    }
}

fn opt_str<'a>(config: &'a Value, key: &str) -> Option<&'a str> {
    config.get(key).and_then(Value::as_str)
}

fn require_u64(config: &Value, key: &'static str) -> Result<u64, StepError> {
    match config.get(key) {
        Some(value) => value.as_u64().ok_or_else(|| {
            StepError::InvalidConfig(format!("'{key}' must be a non-negative integer"))
        }),
        None => Err(StepError::MissingConfig(key)),
    }
}

// ---------------------------------------------------------------------------
// Built-in handlers
// ---------------------------------------------------------------------------

/// LLM_PROMPT: send a prompt to the LLM provider.
/// Config: `prompt` (required), `system`, `model`, `temperature`, `max_tokens`.
pub struct LlmPromptHandler {
    llm: Arc<dyn crate::collab::LlmProvider>,
}

impl StepHandler for LlmPromptHandler {
    fn execute<'a>(
        &'a self,
        _step: &'a StepDefinition,
        config: &'a Value,
        _ctx: &'a ExecutionContext,
    ) -> BoxFuture<'a, Result<Value, StepError>> {
        Box::pin(async move {
            let prompt = require_str(config, "prompt")?;
            let mut messages = Vec::new();
            if let Some(system) = opt_str(config, "system") {
                messages.push(LlmMessage::system(system));
            }
            messages.push(LlmMessage::user(prompt));

            let options = LlmOptions {
                model: opt_str(config, "model").map(String::from),
                temperature: config.get("temperature").and_then(Value::as_f64),
                max_tokens: config
                    .get("max_tokens")
                    .and_then(Value::as_u64)
                    .map(|n| n as u32),
            };

            let completion = self.llm.complete(messages, options).await?;
            Ok(json!({
                "content": completion.content,
                "tokens_used": completion.tokens_used,
            }))
        })
    }
}

/// HTTP_REQUEST: issue an outbound HTTP request.
/// Config: `url` + `method` (required), `headers`, `body`.
/// The hard request timeout lives in the `HttpClient` implementation,
/// independent of step retry policy.
pub struct HttpRequestHandler {
    http: Arc<dyn crate::collab::HttpClient>,
}

impl StepHandler for HttpRequestHandler {
    fn execute<'a>(
        &'a self,
        _step: &'a StepDefinition,
        config: &'a Value,
        _ctx: &'a ExecutionContext,
    ) -> BoxFuture<'a, Result<Value, StepError>> {
        Box::pin(async move {
            let url = require_str(config, "url")?;
            let method = require_str(config, "method")?;

            let headers = match config.get("headers") {
                Some(Value::Object(map)) => map
                    .iter()
                    .map(|(k, v)| {
                        (
                            k.clone(),
                            v.as_str().map(String::from).unwrap_or_else(|| v.to_string()),
                        )
                    })
                    .collect(),
                Some(other) => {
                    return Err(StepError::InvalidConfig(format!(
                        "'headers' must be an object, got {other}"
                    )));
                }
                None => HashMap::new(),
            };

            let body = match config.get("body") {
                None | Some(Value::Null) => None,
                Some(Value::String(s)) => Some(s.clone()),
                Some(other) => Some(other.to_string()),
            };

            let result = self
                .http
                .call(HttpCall {
                    method: method.to_string(),
                    url: url.to_string(),
                    headers,
                    body,
                })
                .await?;

            Ok(json!({
                "status": result.status,
                "headers": result.headers,
                "body": result.body,
            }))
        })
    }
}

/// CODE_EXECUTION: run a source snippet through the code runtime.
/// Config: `source` (required), `language` (default "javascript"), `input`.
pub struct CodeExecutionHandler {
    code: Arc<dyn crate::collab::CodeRunner>,
}

impl StepHandler for CodeExecutionHandler {
    fn execute<'a>(
        &'a self,
        _step: &'a StepDefinition,
        config: &'a Value,
        _ctx: &'a ExecutionContext,
    ) -> BoxFuture<'a, Result<Value, StepError>> {
        Box::pin(async move {
            let source = require_str(config, "source")?;
            let language = opt_str(config, "language").unwrap_or("javascript");
            let input = config.get("input").cloned().unwrap_or(Value::Null);

            let output = self.code.run(language, source, input).await?;
            Ok(json!({ "output": output }))
        })
    }
}

/// TOOL_EXECUTION: execute a registered tool.
/// Config: `tool_id` (required), `input`.
pub struct ToolExecutionHandler {
    tools: Arc<dyn crate::collab::ToolRegistry>,
}

impl StepHandler for ToolExecutionHandler {
    fn execute<'a>(
        &'a self,
        _step: &'a StepDefinition,
        config: &'a Value,
        ctx: &'a ExecutionContext,
    ) -> BoxFuture<'a, Result<Value, StepError>> {
        Box::pin(async move {
            let tool_id = require_str(config, "tool_id")?;
            let input = config.get("input").cloned().unwrap_or(Value::Null);

            let outcome = self
                .tools
                .execute(ToolInvocation {
                    tool_id: tool_id.to_string(),
                    input,
                    user_id: ctx.user_id(),
                })
                .await?;

            if let Some(error) = outcome.error {
                return Err(StepError::ExecutionFailed(format!(
                    "tool '{tool_id}' failed: {error}"
                )));
            }
            Ok(json!({ "status": outcome.status, "output": outcome.output }))
        })
    }
}

/// CONDITIONAL: evaluate a boolean expression against the execution scope.
/// Config: `condition` (required). A false result is a step failure, which
/// routes the walk to `on_failure` -- the else-branch.
pub struct ConditionalHandler;

impl StepHandler for ConditionalHandler {
    fn execute<'a>(
        &'a self,
        _step: &'a StepDefinition,
        config: &'a Value,
        ctx: &'a ExecutionContext,
    ) -> BoxFuture<'a, Result<Value, StepError>> {
        Box::pin(async move {
            let condition = require_str(config, "condition")?;
            let result = evaluate_condition(condition, &ctx.scope())?;
            if !result {
                return Err(StepError::ConditionNotMet);
            }
            Ok(json!({ "condition": condition, "result": true }))
        })
    }
}

/// DELAY: suspend the walk for `delay_ms` milliseconds.
pub struct DelayHandler;

impl StepHandler for DelayHandler {
    fn execute<'a>(
        &'a self,
        _step: &'a StepDefinition,
        config: &'a Value,
        _ctx: &'a ExecutionContext,
    ) -> BoxFuture<'a, Result<Value, StepError>> {
        Box::pin(async move {
            let delay_ms = require_u64(config, "delay_ms")?;
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok(json!({ "delayed_ms": delay_ms }))
        })
    }
}

/// NOTIFICATION: deliver a notification to the owning user.
/// Config: `title` (required), `content`, `kind` (default "workflow").
pub struct NotificationHandler {
    notifications: Arc<dyn crate::collab::NotificationService>,
}

impl StepHandler for NotificationHandler {
    fn execute<'a>(
        &'a self,
        _step: &'a StepDefinition,
        config: &'a Value,
        ctx: &'a ExecutionContext,
    ) -> BoxFuture<'a, Result<Value, StepError>> {
        Box::pin(async move {
            let title = require_str(config, "title")?;
            let notification = Notification {
                user_id: ctx.user_id(),
                kind: opt_str(config, "kind").unwrap_or("workflow").to_string(),
                title: title.to_string(),
                content: opt_str(config, "content").unwrap_or_default().to_string(),
            };
            let receipt = self.notifications.create(notification).await?;
            Ok(json!({ "delivered": true, "receipt": receipt }))
        })
    }
}

/// MEMORY_OPERATION: dispatch an operation to the memory manager.
/// Config: `operation` (required), `params`.
pub struct MemoryOperationHandler {
    memory: Arc<dyn crate::collab::MemoryManager>,
}

impl StepHandler for MemoryOperationHandler {
    fn execute<'a>(
        &'a self,
        _step: &'a StepDefinition,
        config: &'a Value,
        ctx: &'a ExecutionContext,
    ) -> BoxFuture<'a, Result<Value, StepError>> {
        Box::pin(async move {
            let operation = require_str(config, "operation")?;
            let params = config.get("params").cloned().unwrap_or(json!({}));
            let output = self.memory.perform(operation, params, ctx.user_id()).await?;
            Ok(json!({ "operation": operation, "output": output }))
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{
        CodeRunner, HttpClient, LlmProvider, MemoryManager, NotificationService,
        NullCodeRunner, StaticToolRegistry,
    };
    use conductor_types::collab::{HttpCallResult, LlmCompletion};
    use std::collections::HashMap as StdHashMap;
    use uuid::Uuid;

    struct FakeLlm;
    impl LlmProvider for FakeLlm {
        fn complete(
            &self,
            messages: Vec<LlmMessage>,
            _options: LlmOptions,
        ) -> BoxFuture<'_, Result<LlmCompletion, CollabError>> {
            Box::pin(async move {
                Ok(LlmCompletion {
                    content: format!("echo: {}", messages.last().unwrap().content),
                    tokens_used: 7,
                })
            })
        }
    }

    struct FakeHttp;
    impl HttpClient for FakeHttp {
        fn call(&self, request: HttpCall) -> BoxFuture<'_, Result<HttpCallResult, CollabError>> {
            Box::pin(async move {
                Ok(HttpCallResult {
                    status: 200,
                    headers: StdHashMap::new(),
                    body: format!("{} {}", request.method, request.url),
                })
            })
        }
    }

    struct FakeNotifications;
    impl NotificationService for FakeNotifications {
        fn create(&self, notification: Notification) -> BoxFuture<'_, Result<Value, CollabError>> {
            Box::pin(async move { Ok(json!({ "title": notification.title })) })
        }
    }

    struct FakeMemory;
    impl MemoryManager for FakeMemory {
        fn perform(
            &self,
            operation: &str,
            params: Value,
            _user_id: Option<Uuid>,
        ) -> BoxFuture<'_, Result<Value, CollabError>> {
            let operation = operation.to_string();
            Box::pin(async move { Ok(json!({ "op": operation, "params": params })) })
        }
    }

    struct FakeCode;
    impl CodeRunner for FakeCode {
        fn run(
            &self,
            language: &str,
            _source: &str,
            _input: Value,
        ) -> BoxFuture<'_, Result<Value, CollabError>> {
            let language = language.to_string();
            Box::pin(async move { Ok(json!({ "ran": language })) })
        }
    }

    fn collaborators() -> Collaborators {
        let mut tools = StaticToolRegistry::new();
        tools.register(
            "echo",
            Arc::new(|input| Box::pin(async move { Ok(json!({ "echoed": input })) })),
        );
        Collaborators {
            llm: Arc::new(FakeLlm),
            tools: Arc::new(tools),
            notifications: Arc::new(FakeNotifications),
            memory: Arc::new(FakeMemory),
            http: Arc::new(FakeHttp),
            code: Arc::new(FakeCode),
        }
    }

    fn step(step_type: StepType) -> StepDefinition {
        StepDefinition {
            id: "s".to_string(),
            name: "S".to_string(),
            step_type,
            config: json!({}),
            on_success: None,
            on_failure: None,
            retry: None,
        }
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            Uuid::now_v7(),
            &StdHashMap::new(),
            None,
            None,
        )
    }

    async fn run(
        registry: &HandlerRegistry,
        step_type: StepType,
        config: Value,
    ) -> Result<Value, StepError> {
        let handler = registry.get(&step_type).expect("handler registered");
        handler.execute(&step(step_type), &config, &ctx()).await
    }

    #[test]
    fn test_registry_contains_all_builtin_types() {
        let registry = HandlerRegistry::with_defaults(collaborators());
        for step_type in [
            StepType::LlmPrompt,
            StepType::HttpRequest,
            StepType::CodeExecution,
            StepType::ToolExecution,
            StepType::Conditional,
            StepType::Delay,
            StepType::Notification,
            StepType::MemoryOperation,
        ] {
            assert!(registry.contains(&step_type), "missing {step_type:?}");
        }
    }

    #[tokio::test]
    async fn test_llm_prompt_handler() {
        let registry = HandlerRegistry::with_defaults(collaborators());
        let output = run(
            &registry,
            StepType::LlmPrompt,
            json!({ "prompt": "hello", "system": "be brief" }),
        )
        .await
        .unwrap();
        assert_eq!(output["content"], json!("echo: hello"));
        assert_eq!(output["tokens_used"], json!(7));
    }

    #[tokio::test]
    async fn test_llm_prompt_requires_prompt() {
        let registry = HandlerRegistry::with_defaults(collaborators());
        let err = run(&registry, StepType::LlmPrompt, json!({})).await.unwrap_err();
        assert!(matches!(err, StepError::MissingConfig("prompt")));
    }

    #[tokio::test]
    async fn test_http_request_handler() {
        let registry = HandlerRegistry::with_defaults(collaborators());
        let output = run(
            &registry,
            StepType::HttpRequest,
            json!({ "url": "https://example.com", "method": "GET" }),
        )
        .await
        .unwrap();
        assert_eq!(output["status"], json!(200));
        assert_eq!(output["body"], json!("GET https://example.com"));
    }

    #[tokio::test]
    async fn test_http_request_requires_url_and_method() {
        let registry = HandlerRegistry::with_defaults(collaborators());
        let err = run(&registry, StepType::HttpRequest, json!({ "method": "GET" }))
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::MissingConfig("url")));

        let err = run(
            &registry,
            StepType::HttpRequest,
            json!({ "url": "https://example.com" }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StepError::MissingConfig("method")));
    }

    #[tokio::test]
    async fn test_tool_execution_handler() {
        let registry = HandlerRegistry::with_defaults(collaborators());
        let output = run(
            &registry,
            StepType::ToolExecution,
            json!({ "tool_id": "echo", "input": { "x": 1 } }),
        )
        .await
        .unwrap();
        assert_eq!(output["output"]["echoed"]["x"], json!(1));
    }

    #[tokio::test]
    async fn test_tool_execution_unknown_tool_fails_step() {
        let registry = HandlerRegistry::with_defaults(collaborators());
        let err = run(
            &registry,
            StepType::ToolExecution,
            json!({ "tool_id": "missing" }),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[tokio::test]
    async fn test_conditional_true_and_false() {
        let registry = HandlerRegistry::with_defaults(collaborators());
        let output = run(
            &registry,
            StepType::Conditional,
            json!({ "condition": "1 == 1" }),
        )
        .await
        .unwrap();
        assert_eq!(output["result"], json!(true));

        let err = run(
            &registry,
            StepType::Conditional,
            json!({ "condition": "1 == 2" }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StepError::ConditionNotMet));
    }

    #[tokio::test]
    async fn test_conditional_parse_error_surfaces() {
        let registry = HandlerRegistry::with_defaults(collaborators());
        let err = run(
            &registry,
            StepType::Conditional,
            json!({ "condition": "a &" }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StepError::Condition(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_handler_sleeps() {
        let registry = HandlerRegistry::with_defaults(collaborators());
        let start = tokio::time::Instant::now();
        let output = run(&registry, StepType::Delay, json!({ "delay_ms": 250 }))
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(250));
        assert_eq!(output["delayed_ms"], json!(250));
    }

    #[tokio::test]
    async fn test_delay_requires_delay_ms() {
        let registry = HandlerRegistry::with_defaults(collaborators());
        let err = run(&registry, StepType::Delay, json!({})).await.unwrap_err();
        assert!(matches!(err, StepError::MissingConfig("delay_ms")));
    }

    #[tokio::test]
    async fn test_notification_handler() {
        let registry = HandlerRegistry::with_defaults(collaborators());
        let output = run(
            &registry,
            StepType::Notification,
            json!({ "title": "Done", "content": "All good" }),
        )
        .await
        .unwrap();
        assert_eq!(output["delivered"], json!(true));
        assert_eq!(output["receipt"]["title"], json!("Done"));
    }

    #[tokio::test]
    async fn test_memory_operation_handler() {
        let registry = HandlerRegistry::with_defaults(collaborators());
        let output = run(
            &registry,
            StepType::MemoryOperation,
            json!({ "operation": "remember", "params": { "content": "milk" } }),
        )
        .await
        .unwrap();
        assert_eq!(output["operation"], json!("remember"));
        assert_eq!(output["output"]["params"]["content"], json!("milk"));
    }

    #[tokio::test]
    async fn test_code_execution_null_runner_errors() {
        let mut collab = collaborators();
        collab.code = Arc::new(NullCodeRunner);
        let registry = HandlerRegistry::with_defaults(collab);
        let err = run(
            &registry,
            StepType::CodeExecution,
            json!({ "source": "1 + 1" }),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("no code runtime"));
    }

    #[tokio::test]
    async fn test_registry_extension_replaces_handler() {
        struct AlwaysOk;
        impl StepHandler for AlwaysOk {
            fn execute<'a>(
                &'a self,
                _step: &'a StepDefinition,
                _config: &'a Value,
                _ctx: &'a ExecutionContext,
            ) -> BoxFuture<'a, Result<Value, StepError>> {
                Box::pin(async { Ok(json!("custom")) })
            }
        }

        let mut registry = HandlerRegistry::with_defaults(collaborators());
        registry.register(StepType::CodeExecution, Arc::new(AlwaysOk));
        let output = run(&registry, StepType::CodeExecution, json!({}))
            .await
            .unwrap();
        assert_eq!(output, json!("custom"));
    }
}
