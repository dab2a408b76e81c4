//! Application state: one wired instance of everything, per process.

use std::sync::Arc;

use anyhow::Result;
use secrecy::SecretString;

use conductor_core::collab::{Collaborators, NullCodeRunner, StaticToolRegistry};
use conductor_core::scheduler::scheduler::Scheduler;
use conductor_core::workflow::engine::WorkflowEngine;
use conductor_core::workflow::step_runner::HandlerRegistry;
use conductor_infra::http::client::ReqwestHttpClient;
use conductor_infra::llm::anthropic::AnthropicProvider;
use conductor_infra::sqlite::memory::SqliteMemoryManager;
use conductor_infra::sqlite::notification::SqliteNotificationService;
use conductor_infra::sqlite::pool::DatabasePool;
use conductor_infra::sqlite::task::SqliteTaskRepository;
use conductor_infra::sqlite::workflow::SqliteWorkflowRepository;

/// Wired engine + scheduler over the SQLite backend.
///
/// Only one scheduler instance may run per database -- duplicate firings
/// occur otherwise. The CLI constructs exactly one `AppState` per process.
pub struct AppState {
    pub pool: DatabasePool,
    pub engine: WorkflowEngine<SqliteWorkflowRepository>,
    pub scheduler: Scheduler<SqliteTaskRepository, SqliteWorkflowRepository>,
}

impl AppState {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = DatabasePool::new(database_url).await?;

        let api_key = std::env::var("ANTHROPIC_API_KEY").unwrap_or_else(|_| {
            tracing::warn!("ANTHROPIC_API_KEY not set; LLM_PROMPT steps will fail");
            String::new()
        });

        // The tool registry is populated at startup only; nothing is
        // registered at runtime from stored definitions.
        let tools = StaticToolRegistry::new();

        let collaborators = Collaborators {
            llm: Arc::new(AnthropicProvider::new(SecretString::from(api_key))),
            tools: Arc::new(tools),
            notifications: Arc::new(SqliteNotificationService::new(pool.clone())),
            memory: Arc::new(SqliteMemoryManager::new(pool.clone())),
            http: Arc::new(ReqwestHttpClient::new()),
            code: Arc::new(NullCodeRunner),
        };

        let registry = HandlerRegistry::with_defaults(collaborators);
        let engine = WorkflowEngine::new(SqliteWorkflowRepository::new(pool.clone()), registry);
        let scheduler = Scheduler::new(SqliteTaskRepository::new(pool.clone()), engine.clone());

        Ok(Self {
            pool,
            engine,
            scheduler,
        })
    }
}
