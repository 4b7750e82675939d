//! Lesson data model for the Lilt pipeline.
//!
//! This module defines the section state machine, the attempt records kept
//! for every generation call, the typed content payload per section, and the
//! request/output contracts for one lesson generation run.

use chrono::{DateTime, Utc};
use lilt_client::TransportErrorKind;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::usage::TokenReport;

// ============================================================================
// CefrLevel
// ============================================================================

/// CEFR proficiency band used to calibrate generated content.
///
/// Levels are ordered from `A1` (lowest) to `C1` (highest), so they can be
/// compared to pick complexity bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CefrLevel {
    /// Beginner.
    A1,
    /// Elementary.
    A2,
    /// Intermediate.
    B1,
    /// Upper intermediate.
    B2,
    /// Advanced.
    C1,
}

impl CefrLevel {
    /// All levels, lowest first.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::A1, Self::A2, Self::B1, Self::B2, Self::C1]
    }

    /// Returns the canonical uppercase label for this level.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::A1 => "A1",
            Self::A2 => "A2",
            Self::B1 => "B1",
            Self::B2 => "B2",
            Self::C1 => "C1",
        }
    }

    /// Parses a string into a `CefrLevel`, case-insensitively.
    fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "a1" => Some(Self::A1),
            "a2" => Some(Self::A2),
            "b1" => Some(Self::B1),
            "b2" => Some(Self::B2),
            "c1" => Some(Self::C1),
            _ => None,
        }
    }
}

impl std::fmt::Display for CefrLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CefrLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_str_case_insensitive(s).ok_or_else(|| {
            format!("invalid CEFR level '{s}': expected one of 'A1', 'A2', 'B1', 'B2', 'C1'")
        })
    }
}

impl<'de> Deserialize<'de> for CefrLevel {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid CEFR level '{s}': expected one of 'A1', 'A2', 'B1', 'B2', 'C1'"
            ))
        })
    }
}

impl Serialize for CefrLevel {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

// ============================================================================
// LessonType
// ============================================================================

/// The lesson flavor requested by the caller.
///
/// Every lesson carries the core sections (warmup, vocabulary, reading,
/// comprehension, wrap-up); the type selects one focus section on top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LessonType {
    /// Conversation-driven lesson ending in open questions.
    Discussion,
    /// Lesson centered on one grammar point from the source text.
    Grammar,
    /// Lesson centered on pronunciation of source vocabulary.
    Pronunciation,
    /// Situational lesson built around a travel dialogue.
    Travel,
    /// Situational lesson built around a workplace dialogue.
    Business,
}

impl LessonType {
    /// Returns the lowercase label for this lesson type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Discussion => "discussion",
            Self::Grammar => "grammar",
            Self::Pronunciation => "pronunciation",
            Self::Travel => "travel",
            Self::Business => "business",
        }
    }

    /// Returns the focus section this lesson type adds to the core plan.
    ///
    /// Travel and business lessons share the dialogue section; the other
    /// types map to their namesake section.
    #[must_use]
    pub const fn focus_section(&self) -> SectionName {
        match self {
            Self::Discussion => SectionName::Discussion,
            Self::Grammar => SectionName::Grammar,
            Self::Pronunciation => SectionName::Pronunciation,
            Self::Travel | Self::Business => SectionName::Dialogue,
        }
    }

    /// Parses a string into a `LessonType`, case-insensitively.
    fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "discussion" => Some(Self::Discussion),
            "grammar" => Some(Self::Grammar),
            "pronunciation" => Some(Self::Pronunciation),
            "travel" => Some(Self::Travel),
            "business" => Some(Self::Business),
            _ => None,
        }
    }
}

impl std::fmt::Display for LessonType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LessonType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_str_case_insensitive(s).ok_or_else(|| {
            format!(
                "invalid lesson type '{s}': expected one of 'discussion', 'grammar', \
                 'pronunciation', 'travel', 'business'"
            )
        })
    }
}

impl<'de> Deserialize<'de> for LessonType {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid lesson type '{s}': expected one of 'discussion', 'grammar', \
                 'pronunciation', 'travel', 'business'"
            ))
        })
    }
}

impl Serialize for LessonType {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

// ============================================================================
// SectionName
// ============================================================================

/// Names of the lesson parts the pipeline can generate.
///
/// `Title` is generated last like any other section; the assembler lifts it
/// out of the section set into the lesson's `title` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionName {
    /// Opening questions to activate prior knowledge.
    Warmup,
    /// Key words with meanings and example sentences.
    Vocabulary,
    /// A level-adjusted passage built from the source text.
    Reading,
    /// Questions checking understanding of the passage.
    Comprehension,
    /// Open discussion questions.
    Discussion,
    /// One grammar point with examples and exercises.
    Grammar,
    /// Pronunciation practice items.
    Pronunciation,
    /// A two-party dialogue, optionally with a gap-fill variant.
    Dialogue,
    /// Closing reflection questions.
    Wrapup,
    /// A short descriptive lesson title.
    Title,
}

impl SectionName {
    /// All section names in lesson display order, `Title` last.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Warmup,
            Self::Vocabulary,
            Self::Reading,
            Self::Comprehension,
            Self::Discussion,
            Self::Grammar,
            Self::Pronunciation,
            Self::Dialogue,
            Self::Wrapup,
            Self::Title,
        ]
    }

    /// Returns the snake_case label for this section.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Warmup => "warmup",
            Self::Vocabulary => "vocabulary",
            Self::Reading => "reading",
            Self::Comprehension => "comprehension",
            Self::Discussion => "discussion",
            Self::Grammar => "grammar",
            Self::Pronunciation => "pronunciation",
            Self::Dialogue => "dialogue",
            Self::Wrapup => "wrapup",
            Self::Title => "title",
        }
    }
}

impl std::fmt::Display for SectionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SectionStatus
// ============================================================================

/// Current status of one section's generation.
///
/// The status transitions through these states:
/// - `Pending` -> `InProgress`
/// - From `InProgress`:
///   - `Valid` (an attempt's output passed validation; content attached)
///   - `FailedExhausted` (attempt ceiling reached or transport failure)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    /// Section has not started yet.
    #[default]
    Pending,
    /// Section is generating or validating an attempt.
    InProgress,
    /// Section output passed validation and content is attached.
    Valid,
    /// Section gave up; the pipeline aborts.
    FailedExhausted,
}

impl SectionStatus {
    /// Returns `true` if this status represents a terminal state.
    ///
    /// Terminal states are: `Valid`, `FailedExhausted`.
    ///
    /// # Examples
    ///
    /// ```
    /// use lilt_pipeline::SectionStatus;
    ///
    /// assert!(SectionStatus::Valid.is_terminal());
    /// assert!(SectionStatus::FailedExhausted.is_terminal());
    /// assert!(!SectionStatus::InProgress.is_terminal());
    /// ```
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Valid | Self::FailedExhausted)
    }

    /// Returns `true` if this status is `Valid`.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// Returns the snake_case label for this status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Valid => "valid",
            Self::FailedExhausted => "failed_exhausted",
        }
    }
}

impl std::fmt::Display for SectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// AttemptOutcome and Attempt
// ============================================================================

/// How one generation-plus-validation attempt ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Output parsed and passed every section rule.
    Valid,
    /// Output failed one or more section rules.
    Invalid {
        /// What the validator rejected.
        reasons: Vec<String>,
    },
    /// Output was cut off at the token cap and no usable partial survived.
    TokenLimitExceeded {
        /// Why the truncated text could not be used.
        reasons: Vec<String>,
    },
    /// The call failed before producing output.
    TransportError {
        /// Transport failure classification.
        kind: TransportErrorKind,
        /// Error detail from the client.
        message: String,
    },
}

impl AttemptOutcome {
    /// Returns `true` if this outcome is `Valid`.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// Returns `true` if the retry loop may spend another attempt after
    /// this outcome.
    ///
    /// Content-shape failures are retryable; transport failures are not.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Invalid { .. } | Self::TokenLimitExceeded { .. })
    }

    /// Returns the snake_case label for this outcome.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Invalid { .. } => "invalid",
            Self::TokenLimitExceeded { .. } => "token_limit_exceeded",
            Self::TransportError { .. } => "transport_error",
        }
    }
}

/// Record of a single generation call within a section.
///
/// Created when the retry loop finalizes the attempt; never mutated after.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    /// The attempt number within its section (1-indexed).
    pub index: u32,

    /// The generation-token ceiling this call carried.
    pub token_cap: u32,

    /// Estimated prompt size in tokens.
    pub prompt_tokens_estimate: u32,

    /// How the attempt ended.
    pub outcome: AttemptOutcome,

    /// Tokens actually consumed by the call (prompt plus completion).
    pub tokens_consumed: u32,

    /// When the generation call started.
    pub started_at: DateTime<Utc>,

    /// When validation of the call's output finished.
    pub finished_at: DateTime<Utc>,
}

impl Attempt {
    /// Creates an `Attempt` record with the current time for both timestamps.
    #[must_use]
    pub fn new(
        index: u32,
        token_cap: u32,
        prompt_tokens_estimate: u32,
        outcome: AttemptOutcome,
        tokens_consumed: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            index,
            token_cap,
            prompt_tokens_estimate,
            outcome,
            tokens_consumed,
            started_at: now,
            finished_at: now,
        }
    }

    /// Creates an `Attempt` record with explicit timestamps.
    #[must_use]
    pub const fn with_timestamps(
        index: u32,
        token_cap: u32,
        prompt_tokens_estimate: u32,
        outcome: AttemptOutcome,
        tokens_consumed: u32,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        Self {
            index,
            token_cap,
            prompt_tokens_estimate,
            outcome,
            tokens_consumed,
            started_at,
            finished_at,
        }
    }
}

// ============================================================================
// Section content payloads
// ============================================================================

/// An ordered list of questions, used by the warmup, comprehension,
/// discussion, and wrap-up sections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionSet {
    /// The questions, in presentation order.
    pub questions: Vec<String>,
}

impl QuestionSet {
    /// Creates a question set from the given questions.
    #[must_use]
    pub const fn new(questions: Vec<String>) -> Self {
        Self { questions }
    }
}

/// One vocabulary word with its meaning and example sentences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabularyItem {
    /// The word or short phrase being taught.
    pub word: String,
    /// A level-appropriate definition.
    pub meaning: String,
    /// Example sentences using the word.
    pub examples: Vec<String>,
}

/// The vocabulary section: a list of taught words.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabularySection {
    /// The taught words, in presentation order.
    pub words: Vec<VocabularyItem>,
}

/// The reading section: a passage with the vocabulary it embeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingSection {
    /// The level-adjusted passage; taught words appear as `**word**`.
    pub passage: String,
    /// The taught words the passage uses, lowercased.
    pub vocabulary_used: Vec<String>,
}

/// One gap-fill grammar exercise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrammarExercise {
    /// The exercise sentence, with a blank to fill.
    pub prompt: String,
    /// The expected answer for the blank.
    pub answer: String,
}

/// The grammar section: one grammar point with examples and exercises.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrammarSection {
    /// The grammar point's name.
    pub topic: String,
    /// How the form is constructed.
    pub form: String,
    /// When and why the form is used.
    pub usage: String,
    /// Example sentences demonstrating the form.
    pub examples: Vec<String>,
    /// Practice exercises with answers.
    pub exercises: Vec<GrammarExercise>,
}

/// One pronunciation practice item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PronunciationItem {
    /// The word to practice.
    pub word: String,
    /// IPA transcription.
    pub ipa: String,
    /// A short articulation tip.
    pub tip: String,
}

/// The pronunciation section: practice items drawn from the vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PronunciationSection {
    /// The practice items, in presentation order.
    pub items: Vec<PronunciationItem>,
}

/// One line of a dialogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueLine {
    /// Who speaks the line.
    pub speaker: String,
    /// What they say.
    pub text: String,
}

/// A gap-fill variant of a dialogue.
///
/// Blanks appear as `___` in the line text; `answer_key` holds the removed
/// words in blank order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GapFill {
    /// The dialogue lines with blanks.
    pub lines: Vec<DialogueLine>,
    /// The removed words, one per blank, in order.
    pub answer_key: Vec<String>,
}

/// The dialogue section: a two-party exchange, optionally with a gap-fill
/// variant for classroom use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogueSection {
    /// The full dialogue, speakers alternating.
    pub lines: Vec<DialogueLine>,
    /// The gap-fill variant, if one was generated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gap_fill: Option<GapFill>,
}

/// The title section: a short descriptive lesson title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleSection {
    /// The generated title text.
    pub title: String,
}

/// Typed content payload for one section.
///
/// The tag mirrors [`SectionName`], so serialized content always names the
/// section it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "section", rename_all = "snake_case")]
pub enum SectionContent {
    /// Warmup questions.
    Warmup(QuestionSet),
    /// Taught vocabulary.
    Vocabulary(VocabularySection),
    /// Reading passage.
    Reading(ReadingSection),
    /// Comprehension questions.
    Comprehension(QuestionSet),
    /// Discussion questions.
    Discussion(QuestionSet),
    /// Grammar point.
    Grammar(GrammarSection),
    /// Pronunciation practice.
    Pronunciation(PronunciationSection),
    /// Dialogue.
    Dialogue(DialogueSection),
    /// Wrap-up questions.
    Wrapup(QuestionSet),
    /// Lesson title.
    Title(TitleSection),
}

impl SectionContent {
    /// Returns the section this content belongs to.
    #[must_use]
    pub const fn name(&self) -> SectionName {
        match self {
            Self::Warmup(_) => SectionName::Warmup,
            Self::Vocabulary(_) => SectionName::Vocabulary,
            Self::Reading(_) => SectionName::Reading,
            Self::Comprehension(_) => SectionName::Comprehension,
            Self::Discussion(_) => SectionName::Discussion,
            Self::Grammar(_) => SectionName::Grammar,
            Self::Pronunciation(_) => SectionName::Pronunciation,
            Self::Dialogue(_) => SectionName::Dialogue,
            Self::Wrapup(_) => SectionName::Wrapup,
            Self::Title(_) => SectionName::Title,
        }
    }
}

// ============================================================================
// Section
// ============================================================================

/// One lesson part moving through the generation state machine.
///
/// Content is attached only by [`Section::succeed`], so a section carries
/// content exactly when its status is `Valid`.
///
/// # Examples
///
/// ```
/// use lilt_pipeline::{Section, SectionName, SectionStatus};
///
/// let section = Section::new(SectionName::Vocabulary);
/// assert_eq!(section.status, SectionStatus::Pending);
/// assert!(section.attempts.is_empty());
/// assert!(section.content.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    /// Which lesson part this is.
    pub name: SectionName,

    /// Where the section is in its state machine.
    pub status: SectionStatus,

    /// Every attempt spent on this section, oldest first.
    pub attempts: Vec<Attempt>,

    /// The validated content, present only when `status` is `Valid`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<SectionContent>,
}

impl Section {
    /// Creates a new `Section` in the `Pending` status.
    #[must_use]
    pub const fn new(name: SectionName) -> Self {
        Self {
            name,
            status: SectionStatus::Pending,
            attempts: Vec::new(),
            content: None,
        }
    }

    /// Marks the section as actively generating.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::InvalidStateTransition` if the section has
    /// already reached a terminal status.
    pub fn begin_attempt(&mut self) -> Result<()> {
        match self.status {
            SectionStatus::Pending | SectionStatus::InProgress => {
                self.status = SectionStatus::InProgress;
                Ok(())
            }
            terminal => Err(PipelineError::invalid_transition(
                terminal,
                SectionStatus::InProgress,
            )),
        }
    }

    /// Appends a finalized attempt record.
    pub fn record_attempt(&mut self, attempt: Attempt) {
        self.attempts.push(attempt);
    }

    /// Attaches validated content and moves the section to `Valid`.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::InvalidStateTransition` if the section is not
    /// `InProgress`, or `PipelineError::ContentMismatch` if the payload
    /// belongs to a different section.
    pub fn succeed(&mut self, content: SectionContent) -> Result<()> {
        if self.status != SectionStatus::InProgress {
            return Err(PipelineError::invalid_transition(
                self.status,
                SectionStatus::Valid,
            ));
        }
        if content.name() != self.name {
            return Err(PipelineError::content_mismatch(self.name, content.name()));
        }
        self.status = SectionStatus::Valid;
        self.content = Some(content);
        Ok(())
    }

    /// Moves the section to `FailedExhausted`.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::InvalidStateTransition` if the section is not
    /// `InProgress`.
    pub fn fail(&mut self) -> Result<()> {
        if self.status != SectionStatus::InProgress {
            return Err(PipelineError::invalid_transition(
                self.status,
                SectionStatus::FailedExhausted,
            ));
        }
        self.status = SectionStatus::FailedExhausted;
        Ok(())
    }

    /// Returns how many attempts this section has spent.
    #[must_use]
    pub fn attempt_count(&self) -> u32 {
        u32::try_from(self.attempts.len()).unwrap_or(u32::MAX)
    }

    /// Returns the most recent attempt, if any.
    #[must_use]
    pub fn last_attempt(&self) -> Option<&Attempt> {
        self.attempts.last()
    }

    /// Returns `true` if the section reached a terminal status.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns `true` if the section holds validated content.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.status.is_valid()
    }
}

// ============================================================================
// Request contract
// ============================================================================

/// Caller-supplied metadata about where the source text came from.
///
/// Passed through to the lesson untouched; never interpreted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMetadata {
    /// Original document title, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Domain the text was extracted from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// URL the text was extracted from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,

    /// Banner image URL for display layers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner_image: Option<String>,
}

/// One lesson generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateLessonRequest {
    /// The raw source text; non-empty, pre-validated upstream.
    pub source_text: String,

    /// The lesson flavor to generate.
    pub lesson_type: LessonType,

    /// The learner's CEFR level.
    pub cefr_level: CefrLevel,

    /// The language being taught (e.g., "English").
    pub target_language: String,

    /// Pass-through metadata about the source document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_metadata: Option<SourceMetadata>,
}

impl GenerateLessonRequest {
    /// Creates a request without source metadata.
    #[must_use]
    pub fn new(
        source_text: impl Into<String>,
        lesson_type: LessonType,
        cefr_level: CefrLevel,
        target_language: impl Into<String>,
    ) -> Self {
        Self {
            source_text: source_text.into(),
            lesson_type,
            cefr_level,
            target_language: target_language.into(),
            source_metadata: None,
        }
    }

    /// Attaches pass-through source metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: SourceMetadata) -> Self {
        self.source_metadata = Some(metadata);
        self
    }
}

// ============================================================================
// Lesson output
// ============================================================================

/// The section contents of a finished lesson.
///
/// Core sections are always present; the focus sections are present exactly
/// when the lesson type calls for them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonSections {
    /// Warmup questions.
    pub warmup: QuestionSet,

    /// Taught vocabulary.
    pub vocabulary: VocabularySection,

    /// Reading passage.
    pub reading: ReadingSection,

    /// Comprehension questions.
    pub comprehension: QuestionSet,

    /// Discussion questions (discussion lessons).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discussion: Option<QuestionSet>,

    /// Grammar point (grammar lessons).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grammar: Option<GrammarSection>,

    /// Pronunciation practice (pronunciation lessons).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pronunciation: Option<PronunciationSection>,

    /// Dialogue (travel and business lessons).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialogue: Option<DialogueSection>,

    /// Wrap-up questions.
    pub wrapup: QuestionSet,
}

/// Metadata attached to a finished lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonMetadata {
    /// The learner level the lesson was calibrated for.
    pub cefr_level: CefrLevel,

    /// The lesson flavor that was generated.
    pub lesson_type: LessonType,

    /// The language being taught.
    pub target_language: String,

    /// Token and attempt accounting for the run.
    pub token_report: TokenReport,

    /// When the lesson was assembled.
    pub generated_at: DateTime<Utc>,

    /// Pass-through metadata about the source document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_metadata: Option<SourceMetadata>,
}

/// A complete, validated lesson.
///
/// Produced only when every planned section reached `Valid`; there is no
/// partially-filled variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    /// The lesson title.
    pub title: String,

    /// All section contents.
    pub sections: LessonSections,

    /// Run metadata and token accounting.
    pub metadata: LessonMetadata,
}

// ============================================================================
// Tests
// ============================================================================
