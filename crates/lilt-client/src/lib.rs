//! Lilt Generation Client
//!
//! LLM call abstraction for the Lilt lesson pipeline.
//!
//! This crate defines the [`GenerationClient`] trait, the single seam through
//! which the pipeline reaches the external LLM service, together with the
//! request/outcome types shared by all implementations. Two implementations
//! are provided: [`HttpGenerationClient`] for OpenAI-compatible chat APIs and
//! [`ScriptedClient`] for tests and offline runs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod http;
pub mod scripted;

pub use http::{HttpClientConfig, HttpGenerationClient};
pub use scripted::{RecordedCall, ScriptedClient};

/// A specialized `Result` type for generation client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur while talking to the generation backend.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The call failed before a completion was produced.
    #[error("transport error ({kind}): {message}")]
    Transport {
        /// Classification of the failure.
        kind: TransportErrorKind,
        /// Detailed message from the transport layer.
        message: String,
    },

    /// The backend answered with a body the client could not interpret.
    #[error("malformed response from backend: {0}")]
    MalformedResponse(String),

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    BuildFailed(String),

    /// A scripted client ran out of queued outcomes.
    #[error("scripted client has no outcome queued for call #{index}")]
    ScriptExhausted {
        /// Zero-based index of the unscripted call.
        index: usize,
    },
}

impl ClientError {
    /// Creates a new `Transport` error.
    #[must_use]
    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self::Transport {
            kind,
            message: message.into(),
        }
    }

    /// Returns the transport classification of this error.
    ///
    /// Non-transport variants map to [`TransportErrorKind::Other`]; callers
    /// that only need a coarse kind (retry policy, usage accounting) can rely
    /// on this without matching every variant.
    #[must_use]
    pub const fn kind(&self) -> TransportErrorKind {
        match self {
            Self::Transport { kind, .. } => *kind,
            Self::MalformedResponse(_) | Self::BuildFailed(_) | Self::ScriptExhausted { .. } => {
                TransportErrorKind::Other
            }
        }
    }

    /// Returns `true` if this error was caused by a call timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Transport {
                kind: TransportErrorKind::Timeout,
                ..
            }
        )
    }
}

/// Categories of transport failures for structured error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    /// Authentication failure (invalid API key, expired credentials).
    Authentication,
    /// Rate limit or quota exceeded.
    RateLimit,
    /// Server error (5xx responses).
    Server,
    /// Network connectivity issues.
    Network,
    /// The call exceeded its deadline.
    Timeout,
    /// Other unclassified errors.
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Server => write!(f, "server"),
            Self::Network => write!(f, "network"),
            Self::Timeout => write!(f, "timeout"),
            Self::Other => write!(f, "other"),
        }
    }
}

impl TransportErrorKind {
    /// Returns a suggestion message for this error kind.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::Authentication => "Check your API key or credentials",
            Self::RateLimit => "Wait and retry, or reduce request frequency",
            Self::Server => "Retry later; the LLM service may be experiencing issues",
            Self::Network => "Check your network connection",
            Self::Timeout => "Increase the call timeout or shorten the prompt",
            Self::Other => "Check the LLM provider's status page",
        }
    }
}

/// Token counts reported (or estimated) for one generation call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallUsage {
    /// Tokens consumed by the prompt.
    pub prompt_tokens: u32,
    /// Tokens produced by the model.
    pub completion_tokens: u32,
}

impl CallUsage {
    /// Creates a new usage record.
    #[must_use]
    pub const fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    /// Total tokens consumed by the call.
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Adds another usage record to this one.
    pub fn add(&mut self, other: &Self) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

/// A single generation request: one prompt, one output ceiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    /// The complete prompt text.
    pub prompt: String,
    /// Maximum tokens the model may generate for this call.
    pub token_cap: u32,
    /// Sampling temperature, if the backend supports it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl GenerationRequest {
    /// Creates a new request with the given prompt and token cap.
    #[must_use]
    pub fn new(prompt: impl Into<String>, token_cap: u32) -> Self {
        Self {
            prompt: prompt.into(),
            token_cap,
            temperature: None,
        }
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// A completed (untruncated) model response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    /// The full generated text.
    pub text: String,
    /// Token accounting for the call.
    pub usage: CallUsage,
}

/// Result of one generation call that reached the backend.
///
/// Transport failures are not an outcome; they surface as
/// [`ClientError::Transport`] so callers distinguish "the model answered
/// badly" from "the call never completed".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CallOutcome {
    /// The model finished within the token cap.
    Completed(Completion),
    /// The model hit the token cap before finishing.
    TokenLimitExceeded {
        /// Whatever text was produced before truncation, if any.
        partial: Option<String>,
        /// Token accounting for the truncated call.
        usage: CallUsage,
    },
}

impl CallOutcome {
    /// Returns the token accounting for this call.
    #[must_use]
    pub const fn usage(&self) -> CallUsage {
        match self {
            Self::Completed(completion) => completion.usage,
            Self::TokenLimitExceeded { usage, .. } => *usage,
        }
    }

    /// Returns `true` if the model output was truncated at the cap.
    #[must_use]
    pub const fn is_truncated(&self) -> bool {
        matches!(self, Self::TokenLimitExceeded { .. })
    }
}

/// Estimates the token count of a text using the 4-chars-per-token heuristic.
///
/// Used for prompt-size estimates and as a fallback when a backend omits
/// usage figures.
#[must_use]
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    if chars == 0 {
        return 0;
    }
    u32::try_from(chars.div_ceil(4)).unwrap_or(u32::MAX)
}

/// The single seam between the lesson pipeline and the LLM service.
///
/// Implementations perform exactly one generation per [`call`] and must
/// surface the three-way contract faithfully: a finished completion, a
/// truncated completion, or a transport error. They never retry internally;
/// retry policy lives with the caller.
///
/// [`call`]: GenerationClient::call
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Performs one generation call with an explicit output-token ceiling.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] when the call fails before a
    /// completion is produced (network, auth, quota, timeout), and
    /// [`ClientError::MalformedResponse`] when the backend's reply cannot be
    /// interpreted.
    async fn call(&self, request: GenerationRequest) -> Result<CallOutcome>;
}
