//! Bounded retry around generation and validation for a single section.
//!
//! One [`RetryController`] drives one section from `Pending` to a terminal
//! status: it builds the attempt prompt, performs the generation call with
//! a per-call deadline, validates the reply, and either attaches content,
//! narrows scope for another attempt, or gives up with a typed failure.
//! Transport failures abort immediately; content failures spend attempts up
//! to the section's ceiling. No path substitutes fallback content.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use lilt_client::{
    CallOutcome, CallUsage, ClientError, Completion, GenerationClient, GenerationRequest,
    TransportErrorKind, estimate_tokens,
};
use serde_json::{Value, json};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::context::SharedContext;
use crate::error::{FailureKind, GenerationError, Result};
use crate::lesson::{Attempt, AttemptOutcome, Section, SectionContent, SectionName};
use crate::prompt::{AttemptScope, PromptBuilder};
use crate::usage::{CallDisposition, CallRecord, UsageMonitor};
use crate::validate::{SectionValidator, Verdict, salvage_json};

/// Where the retry loop currently stands for its section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// No attempt has started yet.
    NotStarted,
    /// A generation call is in flight.
    Attempting,
    /// A reply is being validated.
    Validating,
    /// Content was attached; the section is done.
    Succeeded,
    /// The last attempt failed and another one will run with narrowed scope.
    Retrying,
    /// The section gave up.
    FailedExhausted,
}

impl RetryState {
    /// Returns the snake_case label for this state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Attempting => "attempting",
            Self::Validating => "validating",
            Self::Succeeded => "succeeded",
            Self::Retrying => "retrying",
            Self::FailedExhausted => "failed_exhausted",
        }
    }
}

impl std::fmt::Display for RetryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fixed parameters of one attempt, kept for its final record.
struct AttemptFrame {
    attempt: u32,
    token_cap: u32,
    prompt_estimate: u32,
    started_at: DateTime<Utc>,
}

impl AttemptFrame {
    fn finalize(&self, outcome: AttemptOutcome, tokens_consumed: u32) -> Attempt {
        Attempt::with_timestamps(
            self.attempt,
            self.token_cap,
            self.prompt_estimate,
            outcome,
            tokens_consumed,
            self.started_at,
            Utc::now(),
        )
    }
}

/// Drives one section through generation, validation, and bounded retry.
///
/// Created per section by the orchestrator; borrows the shared context as
/// it stood when the section started, so a section never sees context
/// written after its turn began.
pub struct RetryController<'a> {
    client: &'a dyn GenerationClient,
    config: &'a PipelineConfig,
    context: &'a SharedContext,
    monitor: &'a UsageMonitor,
    state: RetryState,
}

impl<'a> RetryController<'a> {
    /// Creates a controller in the `NotStarted` state.
    #[must_use]
    pub const fn new(
        client: &'a dyn GenerationClient,
        config: &'a PipelineConfig,
        context: &'a SharedContext,
        monitor: &'a UsageMonitor,
    ) -> Self {
        Self {
            client,
            config,
            context,
            monitor,
            state: RetryState::NotStarted,
        }
    }

    /// Returns the controller's current state.
    #[must_use]
    pub const fn state(&self) -> RetryState {
        self.state
    }

    /// Runs the section to a terminal status and returns its content.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::SectionFailed` carrying a [`GenerationError`]
    /// when the section exhausts its attempts or hits a transport failure,
    /// and `PipelineError::InvalidStateTransition` if the section was
    /// already terminal.
    pub async fn drive(&mut self, section: &mut Section) -> Result<SectionContent> {
        let policy = self.config.retry.policy(section.name);
        let builder = PromptBuilder::new(self.context);
        let validator = SectionValidator::new(self.context);

        let mut reasons_log: Vec<String> = Vec::new();
        let mut last_kind = FailureKind::Validation;

        for attempt in 1..=policy.max_attempts {
            section.begin_attempt()?;
            self.state = RetryState::Attempting;

            let scope = AttemptScope::for_attempt(
                section.name,
                self.context.cefr_level,
                attempt,
                self.config,
            );
            debug!(
                section = %section.name,
                attempt,
                token_cap = scope.token_cap,
                items = scope.item_count,
                "starting generation attempt"
            );

            let started_at = Utc::now();
            let (prompt_estimate, call_result) = self
                .execute_calls(section.name, &builder, &scope, attempt)
                .await;
            let frame = AttemptFrame {
                attempt,
                token_cap: scope.token_cap,
                prompt_estimate,
                started_at,
            };

            match call_result {
                Err(error) => {
                    warn!(
                        section = %section.name,
                        attempt,
                        kind = %error.kind(),
                        "transport failure, aborting section"
                    );
                    let outcome = AttemptOutcome::TransportError {
                        kind: error.kind(),
                        message: error.to_string(),
                    };
                    self.reject_attempt(section, &frame, outcome, 0).await;
                    section.fail()?;
                    self.state = RetryState::FailedExhausted;
                    return Err(GenerationError::from_client(section.name, &error, attempt).into());
                }
                Ok(CallOutcome::Completed(completion)) => {
                    self.state = RetryState::Validating;
                    match validator.validate(section.name, &scope, &completion.text) {
                        Verdict::Accepted(content) => {
                            return self
                                .succeed_attempt(section, &frame, completion.usage.total(), content)
                                .await;
                        }
                        Verdict::Rejected(problems) => {
                            warn!(
                                section = %section.name,
                                attempt,
                                reasons = problems.len(),
                                "attempt failed validation"
                            );
                            last_kind = FailureKind::Validation;
                            log_reasons(&mut reasons_log, attempt, &problems);
                            let outcome = AttemptOutcome::Invalid { reasons: problems };
                            self.reject_attempt(section, &frame, outcome, completion.usage.total())
                                .await;
                        }
                    }
                }
                Ok(CallOutcome::TokenLimitExceeded { partial, usage }) => {
                    self.state = RetryState::Validating;
                    let partial_verdict = match partial.as_deref() {
                        Some(text) if policy.accept_partial => {
                            Some(validator.validate_partial(section.name, &scope, text))
                        }
                        _ => None,
                    };
                    match partial_verdict {
                        Some(Verdict::Accepted(content)) => {
                            info!(
                                section = %section.name,
                                attempt,
                                "accepted usable partial after truncation"
                            );
                            return self
                                .succeed_attempt(section, &frame, usage.total(), content)
                                .await;
                        }
                        Some(Verdict::Rejected(problems)) => {
                            warn!(
                                section = %section.name,
                                attempt,
                                "truncated output had no sufficient partial"
                            );
                            last_kind = FailureKind::TokenLimit;
                            log_reasons(&mut reasons_log, attempt, &problems);
                            let outcome = AttemptOutcome::TokenLimitExceeded { reasons: problems };
                            self.reject_attempt(section, &frame, outcome, usage.total()).await;
                        }
                        None => {
                            let reason = if policy.accept_partial {
                                format!(
                                    "output truncated at {} tokens with no partial text to salvage",
                                    scope.token_cap
                                )
                            } else {
                                format!("output truncated at {} tokens", scope.token_cap)
                            };
                            warn!(section = %section.name, attempt, "output truncated at the token cap");
                            last_kind = FailureKind::TokenLimit;
                            log_reasons(&mut reasons_log, attempt, std::slice::from_ref(&reason));
                            let outcome =
                                AttemptOutcome::TokenLimitExceeded { reasons: vec![reason] };
                            self.reject_attempt(section, &frame, outcome, usage.total()).await;
                        }
                    }
                }
            }

            if attempt < policy.max_attempts {
                self.state = RetryState::Retrying;
            }
        }

        warn!(
            section = %section.name,
            attempts = policy.max_attempts,
            "section exhausted its attempts"
        );
        section.fail()?;
        self.state = RetryState::FailedExhausted;
        Err(GenerationError::new(section.name, last_kind, reasons_log, policy.max_attempts).into())
    }

    /// Finalizes a valid attempt and attaches its content.
    async fn succeed_attempt(
        &mut self,
        section: &mut Section,
        frame: &AttemptFrame,
        tokens_consumed: u32,
        content: SectionContent,
    ) -> Result<SectionContent> {
        self.monitor
            .record_attempt(section.name, &AttemptOutcome::Valid)
            .await;
        section.record_attempt(frame.finalize(AttemptOutcome::Valid, tokens_consumed));
        section.succeed(content.clone())?;
        self.state = RetryState::Succeeded;
        info!(section = %section.name, attempts = frame.attempt, "section valid");
        Ok(content)
    }

    /// Finalizes a failed attempt.
    async fn reject_attempt(
        &self,
        section: &mut Section,
        frame: &AttemptFrame,
        outcome: AttemptOutcome,
        tokens_consumed: u32,
    ) {
        self.monitor.record_attempt(section.name, &outcome).await;
        section.record_attempt(frame.finalize(outcome, tokens_consumed));
    }

    /// Performs the attempt's generation call(s) and records each one.
    ///
    /// Returns the prompt-token estimate alongside the (possibly merged)
    /// call result.
    async fn execute_calls(
        &self,
        section: SectionName,
        builder: &PromptBuilder<'_>,
        scope: &AttemptScope,
        attempt: u32,
    ) -> (u32, lilt_client::Result<CallOutcome>) {
        if section == SectionName::Vocabulary && self.config.vocabulary_workers > 1 {
            return self.vocabulary_fanout(builder, scope, attempt).await;
        }

        let prompt = builder.build(section, scope);
        let prompt_estimate = estimate_tokens(&prompt);
        let result = self.call_with_deadline(prompt, scope.token_cap).await;
        self.record_call(section, attempt, scope.token_cap, &result).await;
        (prompt_estimate, result)
    }

    /// Fans the vocabulary attempt out across bounded workers.
    ///
    /// Each worker teaches an assigned slice of the candidate words; the
    /// replies are merged into one outcome before validation. Any transport
    /// failure fails the whole attempt.
    async fn vocabulary_fanout(
        &self,
        builder: &PromptBuilder<'_>,
        scope: &AttemptScope,
        attempt: u32,
    ) -> (u32, lilt_client::Result<CallOutcome>) {
        let batches = partition_words(
            &self.context.vocabulary_words(),
            scope.item_count,
            self.config.vocabulary_workers,
        );
        debug!(
            workers = self.config.vocabulary_workers,
            batches = batches.len(),
            "fanning vocabulary generation out"
        );

        let prompts: Vec<String> = batches
            .iter()
            .map(|batch| builder.build_vocabulary_batch(scope, batch.count, &batch.words))
            .collect();
        let prompt_estimate = prompts
            .iter()
            .fold(0u32, |acc, prompt| acc.saturating_add(estimate_tokens(prompt)));

        let semaphore = Arc::new(Semaphore::new(self.config.vocabulary_workers));
        let calls = prompts.into_iter().map(|prompt| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore.acquire().await.ok();
                self.call_with_deadline(prompt, scope.token_cap).await
            }
        });
        let results = join_all(calls).await;

        for result in &results {
            self.record_call(SectionName::Vocabulary, attempt, scope.token_cap, result)
                .await;
        }

        (prompt_estimate, merge_vocabulary_replies(results))
    }

    /// Appends one usage record for a finished call.
    async fn record_call(
        &self,
        section: SectionName,
        attempt: u32,
        token_cap: u32,
        result: &lilt_client::Result<CallOutcome>,
    ) {
        let record = match result {
            Ok(outcome) => CallRecord::new(
                section,
                attempt,
                token_cap,
                outcome.usage(),
                disposition_of(outcome),
            ),
            Err(_) => CallRecord::new(
                section,
                attempt,
                token_cap,
                CallUsage::default(),
                CallDisposition::TransportError,
            ),
        };
        self.monitor.record_call(record).await;
    }

    /// Runs one client call under the configured per-call deadline.
    ///
    /// A missed deadline is reported as a transport timeout, so it takes
    /// the same abort path as any other transport failure.
    async fn call_with_deadline(
        &self,
        prompt: String,
        token_cap: u32,
    ) -> lilt_client::Result<CallOutcome> {
        let deadline = Duration::from_secs(self.config.call_timeout_secs);
        let request = GenerationRequest::new(prompt, token_cap);
        match tokio::time::timeout(deadline, self.client.call(request)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::transport(
                TransportErrorKind::Timeout,
                format!(
                    "generation call exceeded its {}s deadline",
                    self.config.call_timeout_secs
                ),
            )),
        }
    }
}

const fn disposition_of(outcome: &CallOutcome) -> CallDisposition {
    match outcome {
        CallOutcome::Completed(_) => CallDisposition::Completed,
        CallOutcome::TokenLimitExceeded { .. } => CallDisposition::Truncated,
    }
}

fn log_reasons(log: &mut Vec<String>, attempt: u32, problems: &[String]) {
    for problem in problems {
        log.push(format!("attempt {attempt}: {problem}"));
    }
}

/// One worker's share of the vocabulary attempt.
struct WordBatch {
    count: u32,
    words: Vec<String>,
}

/// Splits the requested word count and candidate words across workers.
fn partition_words(candidates: &[String], item_count: u32, workers: usize) -> Vec<WordBatch> {
    let total = usize::try_from(item_count).unwrap_or(usize::MAX);
    let worker_count = workers.clamp(1, total.max(1));
    let base = total / worker_count;
    let extra = total % worker_count;

    let mut batches = Vec::with_capacity(worker_count);
    let mut cursor = 0usize;
    for index in 0..worker_count {
        let count = base + usize::from(index < extra);
        if count == 0 {
            continue;
        }
        let end = (cursor + count).min(candidates.len());
        let words = candidates.get(cursor..end).map_or_else(Vec::new, <[String]>::to_vec);
        cursor = end;
        batches.push(WordBatch {
            count: u32::try_from(count).unwrap_or(u32::MAX),
            words,
        });
    }
    batches
}

/// Merges per-worker vocabulary replies into a single call outcome.
///
/// Word arrays are concatenated in worker order; usage figures are summed.
/// If any worker was truncated the merge is reported as truncated, so the
/// partial-acceptance policy decides what happens next.
fn merge_vocabulary_replies(
    results: Vec<lilt_client::Result<CallOutcome>>,
) -> lilt_client::Result<CallOutcome> {
    let mut words: Vec<Value> = Vec::new();
    let mut usage = CallUsage::default();
    let mut truncated = false;

    for result in results {
        match result? {
            CallOutcome::Completed(completion) => {
                usage.add(&completion.usage);
                collect_words(&completion.text, &mut words);
            }
            CallOutcome::TokenLimitExceeded {
                partial,
                usage: call_usage,
            } => {
                truncated = true;
                usage.add(&call_usage);
                if let Some(text) = partial {
                    collect_words(&text, &mut words);
                }
            }
        }
    }

    let text = json!({ "words": words }).to_string();
    if truncated {
        Ok(CallOutcome::TokenLimitExceeded {
            partial: Some(text),
            usage,
        })
    } else {
        Ok(CallOutcome::Completed(Completion { text, usage }))
    }
}

/// Pulls the `words` array out of one worker reply, salvaging truncation.
fn collect_words(reply: &str, into: &mut Vec<Value>) {
    if let Some(Value::Object(mut map)) = salvage_json(reply) {
        if let Some(Value::Array(items)) = map.remove("words") {
            into.extend(items);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::context::{ContextExtractor, VocabularyEntry};
    use crate::lesson::{CefrLevel, GenerateLessonRequest, LessonType, SectionStatus};
    use async_trait::async_trait;
    use lilt_client::ScriptedClient;

    const ARTICLE: &str = "The ocean climate is changing quickly. Ocean temperatures rise \
        every decade. Scientists measure the ocean with satellites and floats. Climate \
        research depends on accurate temperature measurements.";

    fn context() -> SharedContext {
        let request =
            GenerateLessonRequest::new(ARTICLE, LessonType::Discussion, CefrLevel::B1, "English");
        let mut context = ContextExtractor::extract(&request);
        context.extend_vocabulary(vec![
            VocabularyEntry::taught("ocean", "the large body of salt water", 4),
            VocabularyEntry::taught("climate", "weather patterns over long periods", 4),
        ]);
        context
    }

    fn warmup_reply() -> String {
        json!({
            "questions": [
                "What do you already know about the ocean?",
                "How often do you think about the climate?",
                "Why might ocean temperatures matter to everyone?",
            ]
        })
        .to_string()
    }

    fn grammar_reply(examples: usize, exercises: usize) -> String {
        let example_list: Vec<String> = (0..examples)
            .map(|i| format!("The ocean warms a little more each year, example {i}."))
            .collect();
        let exercise_list: Vec<Value> = (0..exercises)
            .map(|i| {
                json!({
                    "prompt": format!("Complete sentence {i}: the climate ___ slowly."),
                    "answer": "changes"
                })
            })
            .collect();
        json!({
            "topic": "Present simple for facts",
            "form": "Subject + base verb, with -s for third person singular.",
            "usage": "Use the present simple to state facts and regular, repeated events in the world.",
            "examples": example_list,
            "exercises": exercise_list
        })
        .to_string()
    }

    fn vocabulary_words_reply(words: &[&str], examples_per_word: usize) -> String {
        let items: Vec<Value> = words
            .iter()
            .map(|word| {
                let examples: Vec<String> = [
                    format!("The {word} matters to the warming ocean story."),
                    format!("Scientists discuss the {word} in climate reports."),
                    format!("Our class read about the {word} this week."),
                    format!("The {word} appears often in ocean research news."),
                ]
                .into_iter()
                .take(examples_per_word)
                .collect();
                json!({
                    "word": word,
                    "meaning": format!("about the {word}"),
                    "examples": examples
                })
            })
            .collect();
        json!({ "words": items }).to_string()
    }

    #[tokio::test]
    async fn test_valid_first_attempt_succeeds() {
        let context = context();
        let config = PipelineConfig::default();
        let monitor = UsageMonitor::new();
        let client = ScriptedClient::new().with_completion(warmup_reply());

        let mut controller = RetryController::new(&client, &config, &context, &monitor);
        assert_eq!(controller.state(), RetryState::NotStarted);

        let mut section = Section::new(SectionName::Warmup);
        let content = controller.drive(&mut section).await.unwrap();

        assert!(matches!(content, SectionContent::Warmup(_)));
        assert_eq!(controller.state(), RetryState::Succeeded);
        assert_eq!(section.status, SectionStatus::Valid);
        assert_eq!(section.attempts.len(), 1);
        assert!(section.attempts[0].outcome.is_valid());

        let report = monitor.report().await;
        assert_eq!(report.total_calls, 1);
        assert_eq!(report.sections[&SectionName::Warmup].attempts, 1);
    }

    #[tokio::test]
    async fn test_transport_error_aborts_immediately() {
        let context = context();
        let config = PipelineConfig::default();
        let monitor = UsageMonitor::new();
        let client = ScriptedClient::new()
            .with_transport_error(TransportErrorKind::RateLimit, "quota exhausted");

        let mut controller = RetryController::new(&client, &config, &context, &monitor);
        let mut section = Section::new(SectionName::Discussion);
        let err = controller.drive(&mut section).await.unwrap_err();

        let failure = err.failure().cloned().unwrap();
        assert_eq!(failure.section_name, SectionName::Discussion);
        assert_eq!(failure.kind, FailureKind::Transport);
        assert_eq!(failure.attempts_exhausted, 1);

        assert_eq!(controller.state(), RetryState::FailedExhausted);
        assert_eq!(section.status, SectionStatus::FailedExhausted);
        assert_eq!(section.attempts.len(), 1);

        let report = monitor.report().await;
        assert_eq!(report.errors.transport, 1);
        assert_eq!(report.sections[&SectionName::Discussion].transport_errors, 1);
    }

    #[tokio::test]
    async fn test_truncated_grammar_retries_with_narrowed_cap() {
        let context = context();
        let config = PipelineConfig::default();
        let monitor = UsageMonitor::new();
        // First attempt is cut off mid-object; second succeeds at the
        // narrowed scope of 3 examples and 3 exercises.
        let client = ScriptedClient::new()
            .with_truncation(Some(r#"{"topic": "Present simple", "form": "Subject +"#))
            .with_completion(grammar_reply(3, 3));

        let mut controller = RetryController::new(&client, &config, &context, &monitor);
        let mut section = Section::new(SectionName::Grammar);
        let content = controller.drive(&mut section).await.unwrap();

        assert!(matches!(content, SectionContent::Grammar(_)));
        assert_eq!(section.attempts.len(), 2);
        assert!(matches!(
            section.attempts[0].outcome,
            AttemptOutcome::TokenLimitExceeded { .. }
        ));
        assert!(section.attempts[1].outcome.is_valid());

        let calls = client.recorded_calls().await;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].token_cap, 800);
        assert_eq!(calls[1].token_cap, 600);

        let report = monitor.report().await;
        assert_eq!(report.sections[&SectionName::Grammar].truncations, 1);
        assert_eq!(report.sections[&SectionName::Grammar].attempts, 2);
    }

    #[tokio::test]
    async fn test_sufficient_partial_vocabulary_accepted_first_attempt() {
        let context = context();
        let config = PipelineConfig::default();
        let monitor = UsageMonitor::new();
        // 8 words requested; truncation leaves 4 words with 2 examples each,
        // which meets the accept-if-sufficient policy.
        let partial = vocabulary_words_reply(&["ocean", "climate", "research", "decade"], 2);
        let client = ScriptedClient::new().with_truncation(Some(&partial));

        let mut controller = RetryController::new(&client, &config, &context, &monitor);
        let mut section = Section::new(SectionName::Vocabulary);
        let content = controller.drive(&mut section).await.unwrap();

        assert!(matches!(
            &content,
            SectionContent::Vocabulary(data) if data.words.len() == 4
        ));
        assert_eq!(section.status, SectionStatus::Valid);
        assert_eq!(section.attempts.len(), 1);
        assert!(section.attempts[0].outcome.is_valid());

        let report = monitor.report().await;
        assert_eq!(report.sections[&SectionName::Vocabulary].truncations, 1);
        assert_eq!(report.errors.total(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_validation_reports_attempts_and_reasons() {
        let context = context();
        let config = PipelineConfig::default();
        let monitor = UsageMonitor::new();
        // Both attempts answer with words that were never taught.
        let bad_reply = json!({
            "items": [
                {"word": "thorough", "ipa": "/x/", "tip": "a tip"},
                {"word": "strengths", "ipa": "/x/", "tip": "a tip"},
            ]
        })
        .to_string();
        let client = ScriptedClient::new()
            .with_completion(bad_reply.clone())
            .with_completion(bad_reply);

        let mut controller = RetryController::new(&client, &config, &context, &monitor);
        let mut section = Section::new(SectionName::Pronunciation);
        let err = controller.drive(&mut section).await.unwrap_err();

        let failure = err.failure().cloned().unwrap();
        assert_eq!(failure.section_name, SectionName::Pronunciation);
        assert_eq!(failure.kind, FailureKind::Validation);
        assert_eq!(failure.attempts_exhausted, 2);
        assert!(failure.reasons.iter().any(|r| r.starts_with("attempt 1:")));
        assert!(failure.reasons.iter().any(|r| r.starts_with("attempt 2:")));

        assert_eq!(section.status, SectionStatus::FailedExhausted);
        assert_eq!(section.attempts.len(), 2);
        assert_eq!(client.remaining().await, 0);

        let report = monitor.report().await;
        assert_eq!(report.errors.validation, 2);
    }

    #[tokio::test]
    async fn test_vocabulary_fanout_merges_worker_batches() {
        let context = context();
        let config = PipelineConfig {
            vocabulary_workers: 2,
            ..PipelineConfig::default()
        };
        let monitor = UsageMonitor::new();

        // Two workers, four words each; the merge must produce all eight.
        let first = vocabulary_words_reply(&["ocean", "climate", "research", "decade"], 4);
        let second = vocabulary_words_reply(&["measure", "changing", "accurate", "floats"], 4);
        let client = ScriptedClient::new()
            .with_completion(first)
            .with_completion(second);

        let mut controller = RetryController::new(&client, &config, &context, &monitor);
        let mut section = Section::new(SectionName::Vocabulary);
        let content = controller.drive(&mut section).await.unwrap();

        assert!(matches!(
            &content,
            SectionContent::Vocabulary(data) if data.words.len() == 8
        ));
        assert_eq!(section.attempts.len(), 1);

        let calls = client.recorded_calls().await;
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|call| call.token_cap == 900));
        assert!(calls.iter().all(|call| call.prompt.contains("Teach exactly 4 words")));

        let report = monitor.report().await;
        assert_eq!(report.sections[&SectionName::Vocabulary].calls, 2);
        assert_eq!(report.sections[&SectionName::Vocabulary].attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_deadline_maps_to_timeout_failure() {
        struct StallClient;

        #[async_trait]
        impl GenerationClient for StallClient {
            async fn call(&self, _request: GenerationRequest) -> lilt_client::Result<CallOutcome> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(CallOutcome::Completed(Completion {
                    text: String::new(),
                    usage: CallUsage::default(),
                }))
            }
        }

        let context = context();
        let config = PipelineConfig {
            call_timeout_secs: 1,
            ..PipelineConfig::default()
        };
        let monitor = UsageMonitor::new();
        let client = StallClient;

        let mut controller = RetryController::new(&client, &config, &context, &monitor);
        let mut section = Section::new(SectionName::Warmup);
        let err = controller.drive(&mut section).await.unwrap_err();

        let failure = err.failure().cloned().unwrap();
        assert_eq!(failure.kind, FailureKind::Timeout);
        assert_eq!(failure.attempts_exhausted, 1);
        assert_eq!(section.status, SectionStatus::FailedExhausted);

        let report = monitor.report().await;
        assert_eq!(report.errors.timeout, 1);
    }

    #[test]
    fn test_partition_words_balances_counts() {
        let candidates: Vec<String> = ["a", "b", "c", "d", "e", "f"]
            .iter()
            .map(ToString::to_string)
            .collect();

        let batches = partition_words(&candidates, 8, 2);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].count, 4);
        assert_eq!(batches[1].count, 4);
        assert_eq!(batches[0].words, vec!["a", "b", "c", "d"]);
        // Candidates ran short; the second batch gets what is left.
        assert_eq!(batches[1].words, vec!["e", "f"]);

        let batches = partition_words(&candidates, 5, 3);
        let counts: Vec<u32> = batches.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![2, 2, 1]);
    }

    #[test]
    fn test_merge_vocabulary_replies_reports_truncation() {
        let complete = vocabulary_words_reply(&["ocean"], 2);
        let results = vec![
            Ok(CallOutcome::Completed(Completion {
                text: complete,
                usage: CallUsage::new(10, 20),
            })),
            Ok(CallOutcome::TokenLimitExceeded {
                partial: Some(vocabulary_words_reply(&["climate"], 2)),
                usage: CallUsage::new(10, 30),
            }),
        ];

        let merged = merge_vocabulary_replies(results).unwrap();
        assert!(merged.is_truncated());
        assert_eq!(merged.usage().total(), 70);
        let CallOutcome::TokenLimitExceeded { partial, .. } = merged else {
            return;
        };
        let value: Value = serde_json::from_str(&partial.unwrap()).unwrap();
        assert_eq!(value["words"].as_array().unwrap().len(), 2);
    }
}
