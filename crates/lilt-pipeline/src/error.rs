//! Error types for the Lilt lesson pipeline.
//!
//! This module defines the error hierarchy for all pipeline operations,
//! including configuration loading, source text ingestion, context
//! extraction, section generation, and lesson assembly.

use std::path::PathBuf;

use lilt_client::{ClientError, TransportErrorKind};
use serde::{Deserialize, Serialize};

use crate::lesson::SectionName;

/// A specialized `Result` type for Lilt pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur during lesson generation.
///
/// Error variants are organized by subsystem and include actionable suggestions
/// where possible to help users resolve issues.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your lilt.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Source Text Errors
    // ========================================================================
    /// Source text file was not found at the specified path.
    #[error("Source text not found: '{path}'\n\nSuggestion: Check the path passed to --source or create the file")]
    SourceNotFound {
        /// Path where the source text was expected.
        path: PathBuf,
    },

    /// Source text file exceeds the 512KB size limit.
    #[error("Source text exceeds size limit (512KB): '{path}' is {size_kb}KB\n\nSuggestion: Trim the text to the passage the lesson should be built from")]
    SourceTooLarge {
        /// Path to the oversized source text.
        path: PathBuf,
        /// Actual size in kilobytes.
        size_kb: u64,
    },

    /// Source text file contains non-UTF-8 content.
    #[error(
        "Source text has invalid encoding: '{path}'\n\nSuggestion: Convert the file to UTF-8 encoding"
    )]
    SourceEncodingError {
        /// Path to the source text with encoding issues.
        path: PathBuf,
    },

    // ========================================================================
    // Context Errors
    // ========================================================================
    /// A section was about to run before the shared context it reads was built.
    #[error("Shared context is missing '{field}' required by the {section} section\n\nSuggestion: Check the section plan; '{field}' must be produced before {section} runs")]
    ContextMissing {
        /// The section whose read requirements were not met.
        section: SectionName,
        /// The missing context field.
        field: String,
    },

    // ========================================================================
    // Generation Errors
    // ========================================================================
    /// A section exhausted its attempts or hit a fatal transport failure.
    #[error("{0}")]
    SectionFailed(#[from] GenerationError),

    // ========================================================================
    // Run Control Errors
    // ========================================================================
    /// The whole run exceeded its wall-clock budget.
    #[error("Lesson generation timed out after {timeout_secs}s\n\nSuggestion: Raise runTimeoutSecs in lilt.json or shorten the source text")]
    RunTimeout {
        /// The timeout duration in seconds.
        timeout_secs: u64,
    },

    // ========================================================================
    // Assembly Errors
    // ========================================================================
    /// Assembly was requested while one or more sections lack validated content.
    #[error("Cannot assemble lesson: {missing} did not succeed\n\nSuggestion: Inspect the section failure that aborted the run")]
    AssemblyIncomplete {
        /// Comma-separated names of the sections without content.
        missing: String,
    },

    // ========================================================================
    // General I/O Errors
    // ========================================================================
    /// General I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ========================================================================
    // State Machine Errors
    // ========================================================================
    /// Invalid section state transition attempted.
    #[error("Invalid state transition: cannot go from {from} to {to}")]
    InvalidStateTransition {
        /// The current state.
        from: String,
        /// The attempted target state.
        to: String,
    },

    /// Content payload attached to the wrong section.
    #[error("Cannot attach {content} content to the {section} section")]
    ContentMismatch {
        /// The section the content was attached to.
        section: SectionName,
        /// The section the content actually belongs to.
        content: SectionName,
    },
}

/// Categories of section failure for structured error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Output failed its section contract (wrong counts, too short, off-theme).
    Validation,
    /// Output was truncated at the token cap with no usable partial.
    TokenLimit,
    /// Network, authentication, or quota failure reaching the model.
    Transport,
    /// A single generation call exceeded its time budget.
    Timeout,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::TokenLimit => write!(f, "token_limit"),
            Self::Transport => write!(f, "transport"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

impl FailureKind {
    /// Returns a suggestion message for this failure kind.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::Validation => {
                "Retry the request, shorten the source text, or choose a lower CEFR level"
            }
            Self::TokenLimit => {
                "Raise the section's token caps in lilt.json or request fewer items"
            }
            Self::Transport => "Check network connectivity, API key, and provider quota",
            Self::Timeout => "Raise callTimeoutSecs in lilt.json or retry later",
        }
    }

    /// Returns `true` if attempts with this failure kind may be retried
    /// with a narrowed scope.
    ///
    /// Transport and timeout failures abort the section immediately; only
    /// content-level failures go back through the retry loop.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Validation | Self::TokenLimit)
    }

    /// Maps a client transport classification onto a failure kind.
    #[must_use]
    pub const fn from_transport(kind: TransportErrorKind) -> Self {
        match kind {
            TransportErrorKind::Timeout => Self::Timeout,
            TransportErrorKind::Authentication
            | TransportErrorKind::RateLimit
            | TransportErrorKind::Server
            | TransportErrorKind::Network
            | TransportErrorKind::Other => Self::Transport,
        }
    }
}

/// The failure contract returned when a section cannot be generated.
///
/// Carries enough detail (failure kind, per-attempt reasons, attempt count)
/// for the caller to decide whether to retry the whole request, shorten the
/// source text, or change level/type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationError {
    /// The section that failed.
    pub section_name: SectionName,
    /// What category of failure ended the section.
    pub kind: FailureKind,
    /// Human-readable reasons, one or more per failed attempt.
    pub reasons: Vec<String>,
    /// How many attempts were spent before giving up.
    pub attempts_exhausted: u32,
}

impl GenerationError {
    /// Creates a failure record for the given section.
    #[must_use]
    pub const fn new(
        section_name: SectionName,
        kind: FailureKind,
        reasons: Vec<String>,
        attempts_exhausted: u32,
    ) -> Self {
        Self {
            section_name,
            kind,
            reasons,
            attempts_exhausted,
        }
    }

    /// Creates a validation-exhaustion failure.
    #[must_use]
    pub const fn validation(
        section_name: SectionName,
        reasons: Vec<String>,
        attempts_exhausted: u32,
    ) -> Self {
        Self::new(section_name, FailureKind::Validation, reasons, attempts_exhausted)
    }

    /// Creates a failure from a client transport error.
    ///
    /// Timeouts keep their own kind; everything else maps to transport.
    #[must_use]
    pub fn from_client(section_name: SectionName, error: &ClientError, attempts: u32) -> Self {
        Self::new(
            section_name,
            FailureKind::from_transport(error.kind()),
            vec![error.to_string()],
            attempts,
        )
    }
}

impl std::fmt::Display for GenerationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Section '{}' failed ({}) after {} attempt(s)",
            self.section_name, self.kind, self.attempts_exhausted
        )?;
        if !self.reasons.is_empty() {
            write!(f, ": {}", self.reasons.join("; "))?;
        }
        write!(f, "\n\nSuggestion: {}", self.kind.suggestion())
    }
}

impl std::error::Error for GenerationError {}

impl PipelineError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `SourceNotFound` error.
    #[must_use]
    pub fn source_not_found(path: impl Into<PathBuf>) -> Self {
        Self::SourceNotFound { path: path.into() }
    }

    /// Creates a new `SourceTooLarge` error.
    #[must_use]
    pub fn source_too_large(path: impl Into<PathBuf>, size_kb: u64) -> Self {
        Self::SourceTooLarge {
            path: path.into(),
            size_kb,
        }
    }

    /// Creates a new `SourceEncodingError`.
    #[must_use]
    pub fn source_encoding(path: impl Into<PathBuf>) -> Self {
        Self::SourceEncodingError { path: path.into() }
    }

    /// Creates a new `ContextMissing` error.
    #[must_use]
    pub fn context_missing(section: SectionName, field: impl Into<String>) -> Self {
        Self::ContextMissing {
            section,
            field: field.into(),
        }
    }

    /// Creates a new `RunTimeout` error.
    #[must_use]
    pub const fn run_timeout(timeout_secs: u64) -> Self {
        Self::RunTimeout { timeout_secs }
    }

    /// Creates a new `AssemblyIncomplete` error from the missing section names.
    #[must_use]
    pub fn assembly_incomplete(missing: impl Into<String>) -> Self {
        Self::AssemblyIncomplete {
            missing: missing.into(),
        }
    }

    /// Creates a new `InvalidStateTransition` error.
    #[must_use]
    pub fn invalid_transition(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Creates a new `ContentMismatch` error.
    #[must_use]
    pub const fn content_mismatch(section: SectionName, content: SectionName) -> Self {
        Self::ContentMismatch { section, content }
    }

    /// Returns `true` if this error carries a section failure contract.
    #[must_use]
    pub const fn is_section_failure(&self) -> bool {
        matches!(self, Self::SectionFailed(_))
    }

    /// Returns the section failure contract, if this error carries one.
    #[must_use]
    pub const fn failure(&self) -> Option<&GenerationError> {
        match self {
            Self::SectionFailed(failure) => Some(failure),
            _ => None,
        }
    }
}
