//! Completion backends.
//!
//! The orchestrator talks to the model through the [`CompletionBackend`]
//! seam so tests and demos can substitute scripted backends.
//! [`HttpBackend`] is the production implementation: a non-streaming
//! OpenAI-compatible `chat/completions` client with conditional retry.

use async_trait::async_trait;
use log::{debug, warn};
use std::time::Duration;

use crate::retry::{RetryConfig, is_retryable_error, retry_with_backoff_conditional};
use crate::types::{ChatMessage, ChatRequest, ChatResponse, LlmOptions};
use crate::{Error, Result};

/// A source of assistant completions.
///
/// Given a model-visible history (system prompt first) and the wire-format
/// tool list (always exactly the virtual `run_typescript` tool in this
/// runtime), produce one assistant message.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Request one completion.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[serde_json::Value],
    ) -> Result<ChatMessage>;
}

/// HTTP completion backend for OpenAI-compatible servers.
///
/// # Example
///
/// ```no_run
/// use toolscript::{HttpBackend, LlmOptions};
///
/// # fn example() -> toolscript::Result<()> {
/// let options = LlmOptions::builder()
///     .model("qwen2.5-32b-instruct")
///     .base_url("http://localhost:1234/v1")
///     .build()?;
/// let backend = HttpBackend::new(options)?;
/// # let _ = backend;
/// # Ok(())
/// # }
/// ```
pub struct HttpBackend {
    options: LlmOptions,
    http: reqwest::Client,
    retry: RetryConfig,
}

impl HttpBackend {
    /// Creates a backend with default retry behavior.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(options: LlmOptions) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(options.timeout()))
            .build()
            .map_err(Error::Http)?;
        Ok(Self {
            options,
            http,
            retry: RetryConfig::default(),
        })
    }

    /// Overrides the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn request_once(
        &self,
        messages: &[ChatMessage],
        tools: &[serde_json::Value],
    ) -> Result<ChatMessage> {
        let request = ChatRequest {
            model: self.options.model().to_string(),
            messages: messages.to_vec(),
            stream: false,
            max_tokens: self.options.max_tokens(),
            temperature: Some(self.options.temperature()),
            tools: if tools.is_empty() {
                None
            } else {
                Some(tools.to_vec())
            },
        };

        let url = format!("{}/chat/completions", self.options.base_url());
        debug!("requesting completion from {url}");
        let response = self
            .http
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.options.api_key()),
            )
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(Error::Http)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Error::api(format!("API error {status}: {body}")));
        }

        let completion: ChatResponse = response.json().await.map_err(Error::Http)?;
        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| Error::api("completion returned no choices"))
    }
}

#[async_trait]
impl CompletionBackend for HttpBackend {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[serde_json::Value],
    ) -> Result<ChatMessage> {
        retry_with_backoff_conditional(self.retry.clone(), || async {
            self.request_once(messages, tools).await.inspect_err(|err| {
                if is_retryable_error(err) {
                    warn!("completion attempt failed: {err}");
                }
            })
        })
        .await
    }
}
