//! Scripted in-memory generation client for tests and offline runs.
//!
//! The scripted client replays a queue of prepared outcomes, one per call,
//! and records every prompt and token cap it receives so tests can assert on
//! what the pipeline actually sent.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    CallOutcome, CallUsage, ClientError, Completion, GenerationClient, GenerationRequest, Result,
    TransportErrorKind, estimate_tokens,
};

/// One call as seen by the scripted client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    /// The prompt the caller sent.
    pub prompt: String,
    /// The token cap the caller requested.
    pub token_cap: u32,
}

/// A [`GenerationClient`] that replays scripted outcomes.
///
/// Outcomes are consumed in FIFO order; a call past the end of the script
/// fails with [`ClientError::ScriptExhausted`] rather than inventing output.
///
/// # Example
///
/// ```
/// use lilt_client::{GenerationClient, GenerationRequest, ScriptedClient};
///
/// let client = ScriptedClient::new().with_completion(r#"{"questions": []}"#);
/// let outcome = tokio_test::block_on(client.call(GenerationRequest::new("prompt", 200)));
/// assert!(outcome.is_ok());
/// ```
#[derive(Debug, Default)]
pub struct ScriptedClient {
    script: Mutex<VecDeque<Result<CallOutcome>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedClient {
    /// Creates a client with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a finished completion with estimated usage.
    #[must_use]
    pub fn with_completion(self, text: impl Into<String>) -> Self {
        let text = text.into();
        let usage = CallUsage::new(0, estimate_tokens(&text));
        self.with_outcome(Ok(CallOutcome::Completed(Completion { text, usage })))
    }

    /// Queues a truncated completion carrying the given partial text.
    #[must_use]
    pub fn with_truncation(self, partial: Option<&str>) -> Self {
        let usage = CallUsage::new(0, partial.map_or(0, estimate_tokens));
        self.with_outcome(Ok(CallOutcome::TokenLimitExceeded {
            partial: partial.map(ToString::to_string),
            usage,
        }))
    }

    /// Queues a transport failure.
    #[must_use]
    pub fn with_transport_error(self, kind: TransportErrorKind, message: impl Into<String>) -> Self {
        self.with_outcome(Err(ClientError::transport(kind, message)))
    }

    /// Queues an arbitrary outcome.
    #[must_use]
    pub fn with_outcome(self, outcome: Result<CallOutcome>) -> Self {
        if let Ok(mut script) = self.script.try_lock() {
            script.push_back(outcome);
        }
        self
    }

    /// Returns all calls recorded so far.
    pub async fn recorded_calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().await.clone()
    }

    /// Returns the number of outcomes still queued.
    pub async fn remaining(&self) -> usize {
        self.script.lock().await.len()
    }
}

#[async_trait]
impl GenerationClient for ScriptedClient {
    async fn call(&self, request: GenerationRequest) -> Result<CallOutcome> {
        let index = {
            let mut calls = self.calls.lock().await;
            calls.push(RecordedCall {
                prompt: request.prompt.clone(),
                token_cap: request.token_cap,
            });
            calls.len() - 1
        };

        let scripted = self.script.lock().await.pop_front();
        match scripted {
            Some(Ok(outcome)) => Ok(fill_prompt_estimate(outcome, &request.prompt)),
            Some(Err(error)) => Err(error),
            None => Err(ClientError::ScriptExhausted { index }),
        }
    }
}

/// Substitutes a prompt-token estimate when the scripted usage left it at 0.
fn fill_prompt_estimate(outcome: CallOutcome, prompt: &str) -> CallOutcome {
    let estimate = estimate_tokens(prompt);
    match outcome {
        CallOutcome::Completed(mut completion) => {
            if completion.usage.prompt_tokens == 0 {
                completion.usage.prompt_tokens = estimate;
            }
            CallOutcome::Completed(completion)
        }
        CallOutcome::TokenLimitExceeded { partial, mut usage } => {
            if usage.prompt_tokens == 0 {
                usage.prompt_tokens = estimate;
            }
            CallOutcome::TokenLimitExceeded { partial, usage }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_outcomes_in_order() {
        let client = ScriptedClient::new()
            .with_completion("first")
            .with_truncation(Some("second"));

        let first = client.call(GenerationRequest::new("p1", 100)).await.unwrap();
        assert!(matches!(
            first,
            CallOutcome::Completed(ref completion) if completion.text == "first"
        ));

        let second = client.call(GenerationRequest::new("p2", 100)).await.unwrap();
        assert!(second.is_truncated());
    }

    #[tokio::test]
    async fn records_prompts_and_caps() {
        let client = ScriptedClient::new().with_completion("out");
        client
            .call(GenerationRequest::new("the prompt", 321))
            .await
            .unwrap();

        let calls = client.recorded_calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].prompt, "the prompt");
        assert_eq!(calls[0].token_cap, 321);
    }

    #[tokio::test]
    async fn errors_when_script_exhausted() {
        let client = ScriptedClient::new();
        let result = client.call(GenerationRequest::new("p", 10)).await;
        assert!(matches!(
            result,
            Err(ClientError::ScriptExhausted { index: 0 })
        ));
    }

    #[tokio::test]
    async fn surfaces_scripted_transport_errors() {
        let client = ScriptedClient::new()
            .with_transport_error(TransportErrorKind::RateLimit, "too many requests");

        let result = client.call(GenerationRequest::new("p", 10)).await;
        assert!(matches!(
            result,
            Err(ClientError::Transport {
                kind: TransportErrorKind::RateLimit,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn fills_prompt_estimate_on_replay() {
        let client = ScriptedClient::new().with_completion("abcd");
        let outcome = client
            .call(GenerationRequest::new("twelve chars", 50))
            .await
            .unwrap();

        assert_eq!(outcome.usage().prompt_tokens, estimate_tokens("twelve chars"));
    }

    #[tokio::test]
    async fn remaining_counts_down() {
        let client = ScriptedClient::new()
            .with_completion("a")
            .with_completion("b");
        assert_eq!(client.remaining().await, 2);

        client.call(GenerationRequest::new("p", 10)).await.unwrap();
        assert_eq!(client.remaining().await, 1);
    }
}
