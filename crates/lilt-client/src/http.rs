//! HTTP generation client for OpenAI-compatible chat APIs.
//!
//! Speaks the `/chat/completions` dialect: one user message per call, an
//! explicit `max_tokens` ceiling, and a `finish_reason` that distinguishes a
//! finished completion (`stop`) from a truncated one (`length`). Truncation
//! is reported as [`CallOutcome::TokenLimitExceeded`] with whatever partial
//! text the backend returned.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::{
    CallOutcome, CallUsage, ClientError, Completion, GenerationClient, GenerationRequest, Result,
    TransportErrorKind, estimate_tokens,
};

/// Default per-call timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Configuration for [`HttpGenerationClient`].
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Base URL of the API, without the `/chat/completions` suffix.
    pub base_url: String,
    /// Model identifier sent with every request.
    pub model: String,
    /// Bearer token for the `Authorization` header.
    pub api_key: String,
    /// Per-call timeout in seconds.
    pub timeout_secs: u64,
    /// Default sampling temperature; a request-level temperature wins.
    pub temperature: Option<f32>,
}

impl HttpClientConfig {
    /// Creates a new configuration with the default timeout.
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            api_key: api_key.into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            temperature: None,
        }
    }

    /// Sets the per-call timeout in seconds.
    #[must_use]
    pub const fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Sets the default sampling temperature.
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// [`GenerationClient`] backed by an OpenAI-compatible HTTP API.
#[derive(Debug, Clone)]
pub struct HttpGenerationClient {
    config: HttpClientConfig,
    client: reqwest::Client,
}

impl HttpGenerationClient {
    /// Creates a new client from the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::BuildFailed`] if the underlying HTTP client
    /// cannot be constructed.
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ClientError::BuildFailed(e.to_string()))?;

        Ok(Self { config, client })
    }

    /// Returns the full chat-completions endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    /// Returns the configured model identifier.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.config.model
    }
}

#[async_trait]
impl GenerationClient for HttpGenerationClient {
    #[instrument(skip_all, fields(model = %self.config.model, token_cap = request.token_cap))]
    async fn call(&self, request: GenerationRequest) -> Result<CallOutcome> {
        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": [{ "role": "user", "content": request.prompt }],
            "max_tokens": request.token_cap,
        });
        if let Some(temperature) = request.temperature.or(self.config.temperature) {
            body["temperature"] = serde_json::json!(temperature);
        }

        debug!(
            prompt_chars = request.prompt.chars().count(),
            "Sending generation request"
        );

        let start = Instant::now();
        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Generation request rejected");
            return Err(ClientError::transport(
                classify_status(status.as_u16()),
                format!("HTTP {status}: {message}"),
            ));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| ClientError::MalformedResponse(e.to_string()))?;

        let prompt_estimate = estimate_tokens(&request.prompt);
        let outcome = parse_completion(&json, prompt_estimate)?;

        debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            truncated = outcome.is_truncated(),
            tokens = outcome.usage().total(),
            "Generation request finished"
        );

        Ok(outcome)
    }
}

/// Maps a reqwest error to a transport error.
fn classify_reqwest_error(error: reqwest::Error) -> ClientError {
    let kind = if error.is_timeout() {
        TransportErrorKind::Timeout
    } else {
        TransportErrorKind::Network
    };
    ClientError::transport(kind, error.to_string())
}

/// Maps an HTTP status code to a transport error kind.
const fn classify_status(status: u16) -> TransportErrorKind {
    match status {
        401 | 403 => TransportErrorKind::Authentication,
        429 => TransportErrorKind::RateLimit,
        500..=599 => TransportErrorKind::Server,
        _ => TransportErrorKind::Other,
    }
}

/// Extracts a [`CallOutcome`] from a chat-completions response body.
///
/// `prompt_estimate` is used when the backend omits usage figures.
fn parse_completion(json: &Value, prompt_estimate: u32) -> Result<CallOutcome> {
    let choice = json
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| ClientError::MalformedResponse("missing choices".to_string()))?;

    let text = choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .ok_or_else(|| ClientError::MalformedResponse("missing message content".to_string()))?
        .to_string();

    let finish_reason = choice.get("finish_reason").and_then(Value::as_str);

    let usage = json.get("usage").map_or_else(
        || CallUsage::new(prompt_estimate, estimate_tokens(&text)),
        |u| {
            CallUsage::new(
                read_u32(u, "prompt_tokens").unwrap_or(prompt_estimate),
                read_u32(u, "completion_tokens").unwrap_or_else(|| estimate_tokens(&text)),
            )
        },
    );

    if finish_reason == Some("length") {
        let partial = if text.trim().is_empty() { None } else { Some(text) };
        return Ok(CallOutcome::TokenLimitExceeded { partial, usage });
    }

    Ok(CallOutcome::Completed(Completion { text, usage }))
}

/// Reads a `u32` field from a JSON object, saturating out-of-range values.
fn read_u32(value: &Value, field: &str) -> Option<u32> {
    value
        .get(field)
        .and_then(Value::as_u64)
        .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
}
