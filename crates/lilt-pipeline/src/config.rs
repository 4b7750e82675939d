//! Configuration types for the lesson generation pipeline.
//!
//! This module provides all configuration structures used to control
//! generation: retry policies and token-cap schedules per section,
//! requested item counts, CEFR calibration profiles, and timeouts.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::lesson::{CefrLevel, SectionName};

/// The default config file name.
const CONFIG_FILE_NAME: &str = "lilt.json";

/// Token cap used when a policy's schedule is empty.
const FALLBACK_TOKEN_CAP: u32 = 500;

/// Default number of concurrent vocabulary workers.
const fn default_vocabulary_workers() -> usize {
    1
}

/// Default timeout in seconds for a single model call.
const fn default_call_timeout_secs() -> u64 {
    120
}

/// Default timeout in seconds for a whole generation run. Zero disables it.
const fn default_run_timeout_secs() -> u64 {
    600
}

/// Main configuration for the lesson generation pipeline.
///
/// Controls retry behavior, requested section sizes, fan-out, and
/// timeouts. Everything has a sensible default, so an empty `lilt.json`
/// (or none at all) yields a working pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Number of concurrent workers for vocabulary generation.
    ///
    /// At 1, all vocabulary words are generated in a single batched call.
    /// Higher values enable per-word calls bounded by a semaphore.
    #[serde(default = "default_vocabulary_workers")]
    pub vocabulary_workers: usize,

    /// Timeout for a single model call, in seconds.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    /// Timeout for a whole generation run, in seconds. Zero disables it.
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,

    /// Per-section retry policies.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Requested item counts for full-scope generation.
    #[serde(default)]
    pub counts: SectionCounts,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            vocabulary_workers: default_vocabulary_workers(),
            call_timeout_secs: default_call_timeout_secs(),
            run_timeout_secs: default_run_timeout_secs(),
            retry: RetryConfig::default(),
            counts: SectionCounts::default(),
        }
    }
}

impl PipelineConfig {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `lilt.json` in the current directory. If found, loads and
    /// validates the configuration. If not found, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            PipelineError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads configuration from a specific directory.
    ///
    /// Looks for `lilt.json` in the given directory. If found, loads and
    /// validates the configuration. If not found, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE_NAME);
        Self::load_from_file(&config_path)
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns default configuration.
    /// If the file exists but contains invalid JSON, returns an error.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::ConfigParseError` if the file exists but
    /// contains invalid JSON or invalid enum values.
    ///
    /// Returns `PipelineError::ConfigValidationError` if the configuration
    /// values are invalid (e.g., zero attempts, empty cap schedules).
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(PipelineError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| PipelineError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// Checks that all required fields have valid values:
    /// - `vocabulary_workers` must be greater than 0
    /// - `call_timeout_secs` must be greater than 0
    /// - every retry policy needs at least one attempt and one token cap
    /// - every requested count must be greater than 0
    ///
    /// `run_timeout_secs` may be 0, which disables the run timeout.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::ConfigValidationError` if any check fails.
    pub fn validate(&self) -> Result<()> {
        if self.vocabulary_workers == 0 {
            return Err(PipelineError::config_validation(
                "vocabularyWorkers must be greater than 0",
                "Set vocabularyWorkers to 1 for batched generation, or higher for per-word calls",
            ));
        }

        if self.call_timeout_secs == 0 {
            return Err(PipelineError::config_validation(
                "callTimeoutSecs must be greater than 0",
                "Set callTimeoutSecs to a positive number of seconds (default: 120)",
            ));
        }

        self.retry.validate()?;
        self.counts.validate()?;

        Ok(())
    }
}

// ============================================================================
// Retry policies
// ============================================================================

/// Retry policy for one section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionPolicy {
    /// Maximum number of generation attempts before the section fails.
    #[serde(default = "SectionPolicy::default_max_attempts")]
    pub max_attempts: u32,

    /// Completion token caps, one per attempt. Later attempts past the end
    /// of the schedule reuse the last cap.
    #[serde(default = "SectionPolicy::default_token_caps")]
    pub token_caps: Vec<u32>,

    /// Whether a truncated response may still be accepted when enough
    /// usable items survive.
    #[serde(default)]
    pub accept_partial: bool,
}

impl SectionPolicy {
    /// Creates a policy from its parts.
    #[must_use]
    pub const fn new(max_attempts: u32, token_caps: Vec<u32>, accept_partial: bool) -> Self {
        Self {
            max_attempts,
            token_caps,
            accept_partial,
        }
    }

    /// Returns the token cap for a 1-based attempt number.
    ///
    /// Attempts past the end of the schedule reuse the last cap.
    #[must_use]
    pub fn cap_for_attempt(&self, attempt: u32) -> u32 {
        let index = usize::try_from(attempt.saturating_sub(1)).unwrap_or(usize::MAX);
        self.token_caps
            .get(index)
            .or_else(|| self.token_caps.last())
            .copied()
            .unwrap_or(FALLBACK_TOKEN_CAP)
    }

    const fn default_max_attempts() -> u32 {
        2
    }

    fn default_token_caps() -> Vec<u32> {
        vec![FALLBACK_TOKEN_CAP, 400]
    }
}

impl Default for SectionPolicy {
    fn default() -> Self {
        Self::new(
            Self::default_max_attempts(),
            Self::default_token_caps(),
            false,
        )
    }
}

/// Per-section retry policies.
///
/// Sections absent from the map fall back to the built-in policy for that
/// section, so a config file only needs to list the policies it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Policy overrides keyed by section name.
    #[serde(default)]
    pub policies: BTreeMap<SectionName, SectionPolicy>,
}

impl RetryConfig {
    /// Returns the effective policy for a section.
    #[must_use]
    pub fn policy(&self, section: SectionName) -> SectionPolicy {
        self.policies
            .get(&section)
            .cloned()
            .unwrap_or_else(|| builtin_policy(section))
    }

    fn validate(&self) -> Result<()> {
        for (section, policy) in &self.policies {
            if policy.max_attempts == 0 {
                return Err(PipelineError::config_validation(
                    format!("retry policy for '{section}' has maxAttempts of 0"),
                    "Set maxAttempts to at least 1 for every section",
                ));
            }
            if policy.token_caps.is_empty() {
                return Err(PipelineError::config_validation(
                    format!("retry policy for '{section}' has an empty tokenCaps schedule"),
                    "Provide at least one token cap per section",
                ));
            }
            if policy.token_caps.iter().any(|cap| *cap == 0) {
                return Err(PipelineError::config_validation(
                    format!("retry policy for '{section}' contains a zero token cap"),
                    "Every tokenCaps entry must be greater than 0",
                ));
            }
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policies = SectionName::all()
            .iter()
            .map(|section| (*section, builtin_policy(*section)))
            .collect();
        Self { policies }
    }
}

/// The built-in retry policy for a section.
///
/// Content-heavy sections (vocabulary, reading, grammar) get a third
/// attempt; grammar, reading, and title never accept partial output.
fn builtin_policy(section: SectionName) -> SectionPolicy {
    match section {
        SectionName::Vocabulary => SectionPolicy::new(3, vec![900, 700, 500], true),
        SectionName::Reading | SectionName::Grammar => {
            SectionPolicy::new(3, vec![800, 600, 450], false)
        }
        SectionName::Comprehension | SectionName::Pronunciation => {
            SectionPolicy::new(2, vec![500, 400], true)
        }
        SectionName::Discussion => SectionPolicy::new(2, vec![400, 300], true),
        SectionName::Warmup | SectionName::Wrapup => SectionPolicy::new(2, vec![300, 250], true),
        SectionName::Dialogue => SectionPolicy::new(2, vec![700, 500], true),
        SectionName::Title => SectionPolicy::new(2, vec![60, 60], false),
    }
}

// ============================================================================
// Requested counts
// ============================================================================

/// Requested item counts for full-scope generation.
///
/// Retries may narrow these counts; the values here are what attempt 1
/// asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionCounts {
    /// Vocabulary words to teach.
    #[serde(default = "SectionCounts::default_vocabulary_words")]
    pub vocabulary_words: u32,

    /// Warmup questions.
    #[serde(default = "SectionCounts::default_warmup_questions")]
    pub warmup_questions: u32,

    /// Comprehension questions about the reading passage.
    #[serde(default = "SectionCounts::default_comprehension_questions")]
    pub comprehension_questions: u32,

    /// Open discussion questions.
    #[serde(default = "SectionCounts::default_discussion_questions")]
    pub discussion_questions: u32,

    /// Example sentences for the grammar point.
    #[serde(default = "SectionCounts::default_grammar_examples")]
    pub grammar_examples: u32,

    /// Grammar practice exercises.
    #[serde(default = "SectionCounts::default_grammar_exercises")]
    pub grammar_exercises: u32,

    /// Pronunciation practice items.
    #[serde(default = "SectionCounts::default_pronunciation_items")]
    pub pronunciation_items: u32,

    /// Dialogue lines (speaker turns).
    #[serde(default = "SectionCounts::default_dialogue_lines")]
    pub dialogue_lines: u32,

    /// Wrap-up reflection questions.
    #[serde(default = "SectionCounts::default_wrapup_questions")]
    pub wrapup_questions: u32,
}

impl SectionCounts {
    /// Requested item count for list-shaped sections.
    ///
    /// Reading and title produce prose, not item lists, and return `None`.
    /// Grammar reports its exercise count; its example count is separate.
    #[must_use]
    pub const fn items_for(&self, section: SectionName) -> Option<u32> {
        match section {
            SectionName::Warmup => Some(self.warmup_questions),
            SectionName::Vocabulary => Some(self.vocabulary_words),
            SectionName::Comprehension => Some(self.comprehension_questions),
            SectionName::Discussion => Some(self.discussion_questions),
            SectionName::Grammar => Some(self.grammar_exercises),
            SectionName::Pronunciation => Some(self.pronunciation_items),
            SectionName::Dialogue => Some(self.dialogue_lines),
            SectionName::Wrapup => Some(self.wrapup_questions),
            SectionName::Reading | SectionName::Title => None,
        }
    }

    fn validate(&self) -> Result<()> {
        let fields = [
            ("vocabularyWords", self.vocabulary_words),
            ("warmupQuestions", self.warmup_questions),
            ("comprehensionQuestions", self.comprehension_questions),
            ("discussionQuestions", self.discussion_questions),
            ("grammarExamples", self.grammar_examples),
            ("grammarExercises", self.grammar_exercises),
            ("pronunciationItems", self.pronunciation_items),
            ("dialogueLines", self.dialogue_lines),
            ("wrapupQuestions", self.wrapup_questions),
        ];
        for (name, value) in fields {
            if value == 0 {
                return Err(PipelineError::config_validation(
                    format!("{name} must be greater than 0"),
                    format!("Set {name} to a positive count"),
                ));
            }
        }
        Ok(())
    }

    const fn default_vocabulary_words() -> u32 {
        8
    }

    const fn default_warmup_questions() -> u32 {
        3
    }

    const fn default_comprehension_questions() -> u32 {
        4
    }

    const fn default_discussion_questions() -> u32 {
        5
    }

    const fn default_grammar_examples() -> u32 {
        5
    }

    const fn default_grammar_exercises() -> u32 {
        5
    }

    const fn default_pronunciation_items() -> u32 {
        5
    }

    const fn default_dialogue_lines() -> u32 {
        10
    }

    const fn default_wrapup_questions() -> u32 {
        3
    }
}

impl Default for SectionCounts {
    fn default() -> Self {
        Self {
            vocabulary_words: Self::default_vocabulary_words(),
            warmup_questions: Self::default_warmup_questions(),
            comprehension_questions: Self::default_comprehension_questions(),
            discussion_questions: Self::default_discussion_questions(),
            grammar_examples: Self::default_grammar_examples(),
            grammar_exercises: Self::default_grammar_exercises(),
            pronunciation_items: Self::default_pronunciation_items(),
            dialogue_lines: Self::default_dialogue_lines(),
            wrapup_questions: Self::default_wrapup_questions(),
        }
    }
}

// ============================================================================
// CEFR calibration
// ============================================================================

/// An inclusive count range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountRange {
    /// Inclusive lower bound.
    pub min: u32,
    /// Inclusive upper bound.
    pub max: u32,
}

impl CountRange {
    /// Creates a range from inclusive bounds.
    #[must_use]
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    /// Returns `true` if `count` falls inside the range.
    #[must_use]
    pub const fn contains(&self, count: u32) -> bool {
        count >= self.min && count <= self.max
    }
}

impl std::fmt::Display for CountRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}

/// Complexity calibration for one CEFR level.
///
/// The tables are compiled-in calibration data; prompts describe these
/// bands to the model and validators enforce them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CefrProfile {
    /// Example sentences requested per vocabulary word.
    pub examples_per_word: u32,

    /// Word-count band for a single example sentence.
    pub example_words: CountRange,

    /// Word-count band for a single question.
    pub question_words: CountRange,

    /// Word-count band for the whole reading passage.
    pub passage_words: CountRange,
}

impl CefrProfile {
    /// Returns the calibration profile for a CEFR level.
    #[must_use]
    pub const fn for_level(level: CefrLevel) -> Self {
        match level {
            CefrLevel::A1 => Self {
                examples_per_word: 5,
                example_words: CountRange::new(3, 8),
                question_words: CountRange::new(4, 10),
                passage_words: CountRange::new(80, 150),
            },
            CefrLevel::A2 => Self {
                examples_per_word: 5,
                example_words: CountRange::new(4, 10),
                question_words: CountRange::new(5, 12),
                passage_words: CountRange::new(100, 200),
            },
            CefrLevel::B1 => Self {
                examples_per_word: 4,
                example_words: CountRange::new(6, 14),
                question_words: CountRange::new(6, 16),
                passage_words: CountRange::new(150, 300),
            },
            CefrLevel::B2 => Self {
                examples_per_word: 3,
                example_words: CountRange::new(8, 18),
                question_words: CountRange::new(8, 20),
                passage_words: CountRange::new(200, 400),
            },
            CefrLevel::C1 => Self {
                examples_per_word: 2,
                example_words: CountRange::new(10, 25),
                question_words: CountRange::new(8, 24),
                passage_words: CountRange::new(250, 500),
            },
        }
    }
}
