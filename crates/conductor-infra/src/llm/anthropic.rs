//! Anthropic-backed implementation of the `LlmProvider` port.
//!
//! Non-streaming Messages API calls over `reqwest`. The API key is held in a
//! `SecretString` so it never lands in debug output.

use conductor_core::collab::{CollabError, LlmProvider};
use conductor_types::collab::{LlmCompletion, LlmMessage, LlmOptions, LlmRole};
use futures_util::future::BoxFuture;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Anthropic Messages API provider.
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: SecretString,
    default_model: String,
}

impl AnthropicProvider {
    pub fn new(api_key: SecretString) -> Self {
        Self::with_model(api_key, DEFAULT_MODEL.to_string())
    }

    pub fn with_model(api_key: SecretString, default_model: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            api_key,
            default_model,
        }
    }

    /// Build the Messages API request body. System messages become the
    /// top-level `system` field; the rest keep their roles.
    fn build_body(&self, messages: &[LlmMessage], options: &LlmOptions) -> Value {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == LlmRole::System)
            .map(|m| m.content.as_str())
            .collect();

        let chat: Vec<Value> = messages
            .iter()
            .filter(|m| m.role != LlmRole::System)
            .map(|m| {
                json!({
                    "role": match m.role {
                        LlmRole::Assistant => "assistant",
                        _ => "user",
                    },
                    "content": m.content,
                })
            })
            .collect();

        let mut body = json!({
            "model": options.model.as_deref().unwrap_or(&self.default_model),
            "max_tokens": options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": chat,
        });
        if !system.is_empty() {
            body["system"] = json!(system.join("\n\n"));
        }
        if let Some(temperature) = options.temperature {
            body["temperature"] = json!(temperature);
        }
        body
    }
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

impl LlmProvider for AnthropicProvider {
    fn complete(
        &self,
        messages: Vec<LlmMessage>,
        options: LlmOptions,
    ) -> BoxFuture<'_, Result<LlmCompletion, CollabError>> {
        Box::pin(async move {
            let body = self.build_body(&messages, &options);

            let response = self
                .client
                .post(API_URL)
                .header("x-api-key", self.api_key.expose_secret())
                .header("anthropic-version", API_VERSION)
                .json(&body)
                .send()
                .await
                .map_err(|e| CollabError::Unavailable(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let detail = response.text().await.unwrap_or_default();
                return Err(CollabError::RequestFailed(format!(
                    "Anthropic API returned {status}: {detail}"
                )));
            }

            let parsed: MessagesResponse = response
                .json()
                .await
                .map_err(|e| CollabError::RequestFailed(format!("invalid API response: {e}")))?;

            let content = parsed
                .content
                .iter()
                .map(|block| block.text.as_str())
                .collect::<Vec<_>>()
                .join("");

            tracing::debug!(
                tokens_in = parsed.usage.input_tokens,
                tokens_out = parsed.usage.output_tokens,
                "LLM completion finished"
            );
            Ok(LlmCompletion {
                content,
                tokens_used: parsed.usage.input_tokens + parsed.usage.output_tokens,
            })
        })
    }
}
