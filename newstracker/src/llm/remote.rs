use anyhow::{Context, Result};
use common::LlmConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{LlmProvider, LlmRequest, LlmResponse, UsageMetadata};

const SYSTEM_PROMPT: &str = "You are a helpful assistant that summarizes news articles.";
const DEFAULT_API_URL: &str = "http://localhost:11434/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
/// Longest slice of an error body carried into the error message
const ERROR_BODY_LIMIT: usize = 300;

/// Chat-completions client for OpenAI-compatible endpoints.
///
/// Article analyses and batch summaries are both parsed as JSON, so by default every
/// request asks the server for a JSON object (`response_format`). Servers that reject
/// the field can be used with `with_json_mode(false)`.
pub struct RemoteLlmProvider {
    endpoint: String,
    api_key: String,
    model: String,
    timeout: Duration,
    max_tokens: usize,
    temperature: f32,
    json_mode: bool,
    client: reqwest::Client,
}

impl RemoteLlmProvider {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
            timeout: Duration::from_secs(30),
            max_tokens: 1000,
            temperature: 0.7,
            json_mode: true,
            client: reqwest::Client::new(),
        }
    }

    /// Provider for the `[llm]` section, unset keys falling back to a local endpoint and defaults.
    pub fn from_config(config: &LlmConfig, api_key: impl Into<String>) -> Self {
        let provider = Self::new(
            config.api_url.as_deref().unwrap_or(DEFAULT_API_URL),
            api_key,
            config.model.as_deref().unwrap_or(DEFAULT_MODEL),
        );
        let timeout_secs = config.timeout_seconds.unwrap_or(30);
        let max_tokens = config.max_tokens.unwrap_or(1000);
        provider.with_defaults(timeout_secs, max_tokens, 0.7)
    }

    /// Defaults for requests that leave timeout, token limit or temperature unset.
    pub fn with_defaults(mut self, timeout_secs: u64, max_tokens: usize, temperature: f32) -> Self {
        self.timeout = Duration::from_secs(timeout_secs);
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    pub fn with_json_mode(mut self, json_mode: bool) -> Self {
        self.json_mode = json_mode;
        self
    }

    fn chat_request<'a>(&'a self, request: &'a LlmRequest) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage { role: "system", content: SYSTEM_PROMPT },
                ChatMessage { role: "user", content: &request.prompt },
            ],
            max_tokens: request.max_tokens.unwrap_or(self.max_tokens),
            temperature: request.temperature.unwrap_or(self.temperature),
            response_format: self.json_mode.then_some(ResponseFormat { kind: "json_object" }),
        }
    }

    /// POST one chat request and decode the completion. Non-2xx statuses are errors.
    async fn exchange(&self, body: &ChatRequest<'_>) -> Result<ChatCompletion> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .context("LLM HTTP request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let excerpt: String = text.chars().take(ERROR_BODY_LIMIT).collect();
            anyhow::bail!("LLM API error {}: {}", status, excerpt);
        }

        response.json().await.context("Failed to parse LLM response")
    }
}

#[async_trait::async_trait]
impl LlmProvider for RemoteLlmProvider {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse> {
        let timeout = request.timeout_seconds.map(Duration::from_secs).unwrap_or(self.timeout);
        let body = self.chat_request(&request);

        // the deadline covers the response body too, not just the headers
        let completion = tokio::time::timeout(timeout, self.exchange(&body))
            .await
            .with_context(|| format!("LLM request timed out after {}s", timeout.as_secs()))??;

        completion.into_response(&self.model)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: usize,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatCompletion {
    /// First choice's text. A missing or blank message is an error so callers fall back.
    fn into_response(self, requested_model: &str) -> Result<LlmResponse> {
        let content = self
            .choices
            .into_iter()
            .next()
            .context("LLM response has no choices")?
            .message
            .content
            .filter(|c| !c.trim().is_empty())
            .context("LLM returned an empty completion")?;

        Ok(LlmResponse {
            content,
            usage: self.usage.unwrap_or_default(),
            model: self.model.unwrap_or_else(|| requested_model.to_string()),
        })
    }
}
