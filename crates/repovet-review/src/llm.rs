use std::time::Duration;

use async_trait::async_trait;
use repovet_core::{retry_with_backoff, LlmConfig, RepovetError, Result, RetryPolicy};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A message in a chat conversation with the LLM.
///
/// # Examples
///
/// ```
/// use repovet_review::llm::{ChatMessage, Role};
///
/// let msg = ChatMessage::user("Review this code");
/// assert!(matches!(msg.role, Role::User));
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    /// Role of the message sender.
    pub role: Role,
    /// Text content of the message.
    pub content: String,
}

impl ChatMessage {
    /// System-role message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// User-role message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Role in the chat conversation.
///
/// # Examples
///
/// ```
/// use repovet_review::llm::Role;
///
/// let role = Role::System;
/// assert_eq!(serde_json::to_string(&role).unwrap(), "\"system\"");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System-level instructions.
    System,
    /// User input.
    User,
}

/// Per-call generation options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvokeOptions {
    /// Overrides the registry temperature.
    pub temperature: Option<f64>,
}

/// Generative-model collaborator.
///
/// `model` is a registry alias (or literal provider model id). Implementations
/// retry transient failures internally and return a terminal error once the
/// retry budget is spent.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    /// Submit one system + user prompt pair and return the completion text.
    async fn invoke(
        &self,
        model: &str,
        system: &str,
        user: &str,
        options: &InvokeOptions,
    ) -> Result<String>;
}

/// OpenAI-compatible chat completions client.
///
/// Works with any provider that exposes `{base_url}/chat/completions`:
/// OpenRouter, OpenAI, Ollama, vLLM, LiteLLM, etc.
///
/// # Examples
///
/// ```
/// use repovet_core::LlmConfig;
/// use repovet_review::llm::LlmClient;
///
/// let config = LlmConfig {
///     api_key: Some("test-key".into()),
///     ..LlmConfig::default()
/// };
/// let client = LlmClient::new(&config).unwrap();
/// ```
pub struct LlmClient {
    client: reqwest::Client,
    config: LlmConfig,
    retry: RetryPolicy,
}

impl LlmClient {
    /// Create a new LLM client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RepovetError::Config`] if the HTTP client cannot be built.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RepovetError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            config: config.clone(),
            retry: config.retry_policy(),
        })
    }

    /// Replace the retry schedule.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn chat_once(
        &self,
        url: &str,
        body: &serde_json::Value,
        model: &str,
    ) -> Result<String> {
        let mut request = self.client.post(url);
        if let Some(api_key) = &self.config.api_key {
            request = request.header("Authorization", format!("Bearer {api_key}"));
        }

        let response = request
            .json(body)
            .send()
            .await
            .map_err(|e| RepovetError::Network(format!("request to {model} failed: {e}")))?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let text = response
            .text()
            .await
            .map_err(|e| RepovetError::Network(format!("failed to read response from {model}: {e}")))?;

        if !status.is_success() {
            return Err(classify_failure(Some(status.as_u16()), &text, retry_after, model));
        }
        extract_content(&text, model)
    }
}

#[async_trait]
impl ModelInvoker for LlmClient {
    async fn invoke(
        &self,
        model: &str,
        system: &str,
        user: &str,
        options: &InvokeOptions,
    ) -> Result<String> {
        let resolved = self.config.resolve(model);
        let url = format!("{}/chat/completions", resolved.base_url.trim_end_matches('/'));

        let temperature = options.temperature.unwrap_or(resolved.temperature);
        let body = request_body(&resolved.model, temperature, system, user);

        debug!(alias = model, model = %resolved.model, prompt_chars = user.len(), "invoking model");
        let label = format!("model {model}");
        retry_with_backoff(&self.retry, &label, || self.chat_once(&url, &body, model)).await
    }
}

fn request_body(model_id: &str, temperature: f64, system: &str, user: &str) -> serde_json::Value {
    serde_json::json!({
        "model": model_id,
        "messages": [ChatMessage::system(system), ChatMessage::user(user)],
        "temperature": temperature,
    })
}

/// Map a provider failure to the error taxonomy.
///
/// Rate limits, overload and "model not found" (providers report it while a
/// model is being rotated) are retryable; auth failures and other 4xx are not.
///
/// # Examples
///
/// ```
/// use repovet_core::RepovetError;
/// use repovet_review::llm::classify_failure;
///
/// let err = classify_failure(Some(503), "upstream overloaded", None, "qwen-plus");
/// assert!(matches!(err, RepovetError::ModelUnavailable(_)));
/// assert!(err.is_retryable());
///
/// let err = classify_failure(Some(400), "bad request", None, "qwen-plus");
/// assert!(!err.is_retryable());
/// ```
pub fn classify_failure(
    status: Option<u16>,
    body: &str,
    retry_after_secs: Option<u64>,
    model: &str,
) -> RepovetError {
    let lower = body.to_lowercase();
    let excerpt = repovet_core::truncate_chars(body.trim(), 300);

    if status == Some(429) || lower.contains("rate limit") || lower.contains("rate_limit") {
        return RepovetError::RateLimited {
            message: format!("{model}: {excerpt}"),
            retry_after_secs,
        };
    }
    if lower.contains("overloaded") || lower.contains("model_not_found") {
        return RepovetError::ModelUnavailable(format!("{model}: {excerpt}"));
    }
    match status {
        Some(401) | Some(403) => {
            RepovetError::Auth(format!("model provider rejected the API key ({excerpt})"))
        }
        Some(status) if status >= 500 => RepovetError::Http {
            status,
            message: format!("{model}: {excerpt}"),
        },
        Some(status) => RepovetError::Llm(format!("LLM API error {status} for {model}: {excerpt}")),
        None => RepovetError::Llm(format!("{model} returned an error: {excerpt}")),
    }
}

fn extract_content(text: &str, model: &str) -> Result<String> {
    let body: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| RepovetError::Llm(format!("failed to parse response from {model}: {e}")))?;

    // Some gateways answer 200 with an error object.
    if let Some(error) = body.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        let status = error
            .get("code")
            .and_then(|c| c.as_u64())
            .and_then(|c| u16::try_from(c).ok());
        return Err(classify_failure(status, &message, None, model));
    }

    body.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| RepovetError::Llm(format!("unexpected response structure from {model}: {body}")))
}
