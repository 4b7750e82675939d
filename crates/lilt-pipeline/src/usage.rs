//! Token and attempt accounting for lesson generation runs.
//!
//! The [`UsageMonitor`] is a read-side observer: the retry loop appends one
//! record per generation call and one per finalized attempt, and the monitor
//! aggregates them into a [`TokenReport`]. Recording is append-only behind a
//! lock, so concurrent vocabulary sub-steps can record without losing counts.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lilt_client::{CallUsage, TransportErrorKind};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::lesson::{AttemptOutcome, SectionName};

/// A shared handle to a [`UsageMonitor`].
pub type SharedUsageMonitor = Arc<UsageMonitor>;

// ============================================================================
// CallRecord
// ============================================================================

/// How a single generation call ended, from the client's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDisposition {
    /// The call completed under its token cap.
    Completed,
    /// The model output was truncated at the token cap.
    Truncated,
    /// The call failed before producing output.
    TransportError,
}

/// Record of one generation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    /// The section the call was made for.
    pub section: SectionName,

    /// The attempt number (1-indexed) the call belonged to.
    pub attempt: u32,

    /// The generation-token ceiling the call carried.
    pub token_cap: u32,

    /// Prompt and completion tokens consumed.
    pub usage: CallUsage,

    /// How the call ended.
    pub disposition: CallDisposition,

    /// When the record was made.
    pub recorded_at: DateTime<Utc>,
}

impl CallRecord {
    /// Creates a record with the current timestamp.
    #[must_use]
    pub fn new(
        section: SectionName,
        attempt: u32,
        token_cap: u32,
        usage: CallUsage,
        disposition: CallDisposition,
    ) -> Self {
        Self {
            section,
            attempt,
            token_cap,
            usage,
            disposition,
            recorded_at: Utc::now(),
        }
    }
}

// ============================================================================
// TokenReport
// ============================================================================

/// Per-section slice of the aggregate report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionUsage {
    /// Generation calls made for the section.
    pub calls: u32,
    /// Attempts spent on the section.
    pub attempts: u32,
    /// Prompt tokens consumed.
    pub prompt_tokens: u32,
    /// Completion tokens consumed.
    pub completion_tokens: u32,
    /// Calls that hit the token cap.
    pub truncations: u32,
    /// Calls that failed at the transport layer.
    pub transport_errors: u32,
}

impl SectionUsage {
    /// Returns prompt plus completion tokens for the section.
    #[must_use]
    pub const fn total_tokens(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

/// Attempt failure counts by kind across the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorCounts {
    /// Attempts rejected by a section validator.
    pub validation: u32,
    /// Attempts ended by truncation with no usable partial.
    pub token_limit: u32,
    /// Attempts ended by a transport failure.
    pub transport: u32,
    /// Attempts ended by a call timeout.
    pub timeout: u32,
}

impl ErrorCounts {
    /// Counts one finalized attempt outcome.
    fn record(&mut self, outcome: &AttemptOutcome) {
        match outcome {
            AttemptOutcome::Valid => {}
            AttemptOutcome::Invalid { .. } => {
                self.validation = self.validation.saturating_add(1);
            }
            AttemptOutcome::TokenLimitExceeded { .. } => {
                self.token_limit = self.token_limit.saturating_add(1);
            }
            AttemptOutcome::TransportError { kind, .. } => {
                if matches!(kind, TransportErrorKind::Timeout) {
                    self.timeout = self.timeout.saturating_add(1);
                } else {
                    self.transport = self.transport.saturating_add(1);
                }
            }
        }
    }

    /// Returns the total number of failed attempts.
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.validation
            .saturating_add(self.token_limit)
            .saturating_add(self.transport)
            .saturating_add(self.timeout)
    }
}

/// Aggregate token and attempt accounting for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenReport {
    /// Prompt plus completion tokens across all calls.
    pub total_tokens: u32,

    /// Prompt tokens across all calls.
    pub prompt_tokens: u32,

    /// Completion tokens across all calls.
    pub completion_tokens: u32,

    /// Generation calls made across all sections.
    pub total_calls: u32,

    /// Attempts spent across all sections.
    pub total_attempts: u32,

    /// Per-section accounting, in pipeline order.
    pub sections: BTreeMap<SectionName, SectionUsage>,

    /// Failed-attempt counts by kind.
    pub errors: ErrorCounts,
}

// ============================================================================
// UsageMonitor
// ============================================================================

/// Append-only run accounting.
///
/// One monitor lives for the duration of a single lesson generation run and
/// is shared (via [`SharedUsageMonitor`]) with every section step. It never
/// mutates pipeline state; it only observes.
#[derive(Debug, Default)]
pub struct UsageMonitor {
    inner: RwLock<MonitorState>,
}

#[derive(Debug, Default)]
struct MonitorState {
    calls: Vec<CallRecord>,
    attempts: BTreeMap<SectionName, u32>,
    errors: ErrorCounts,
}

impl UsageMonitor {
    /// Creates an empty monitor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one generation-call record.
    pub async fn record_call(&self, record: CallRecord) {
        let mut state = self.inner.write().await;
        state.calls.push(record);
    }

    /// Counts one finalized attempt for the section.
    pub async fn record_attempt(&self, section: SectionName, outcome: &AttemptOutcome) {
        let mut state = self.inner.write().await;
        let count = state.attempts.entry(section).or_insert(0);
        *count = count.saturating_add(1);
        state.errors.record(outcome);
    }

    /// Returns a copy of every call recorded so far.
    pub async fn calls(&self) -> Vec<CallRecord> {
        self.inner.read().await.calls.clone()
    }

    /// Builds the aggregate report from everything recorded so far.
    pub async fn report(&self) -> TokenReport {
        let state = self.inner.read().await;

        let mut report = TokenReport::default();
        for record in &state.calls {
            let section = report.sections.entry(record.section).or_default();
            section.calls = section.calls.saturating_add(1);
            section.prompt_tokens = section.prompt_tokens.saturating_add(record.usage.prompt_tokens);
            section.completion_tokens = section
                .completion_tokens
                .saturating_add(record.usage.completion_tokens);
            match record.disposition {
                CallDisposition::Completed => {}
                CallDisposition::Truncated => {
                    section.truncations = section.truncations.saturating_add(1);
                }
                CallDisposition::TransportError => {
                    section.transport_errors = section.transport_errors.saturating_add(1);
                }
            }

            report.total_calls = report.total_calls.saturating_add(1);
            report.prompt_tokens = report.prompt_tokens.saturating_add(record.usage.prompt_tokens);
            report.completion_tokens = report
                .completion_tokens
                .saturating_add(record.usage.completion_tokens);
        }

        for (section, attempts) in &state.attempts {
            report.sections.entry(*section).or_default().attempts = *attempts;
            report.total_attempts = report.total_attempts.saturating_add(*attempts);
        }

        report.total_tokens = report.prompt_tokens.saturating_add(report.completion_tokens);
        report.errors = state.errors;
        report
    }
}

// ============================================================================
// Tests
// ============================================================================
