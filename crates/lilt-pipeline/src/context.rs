//! Source text ingestion and shared context for the Lilt pipeline.
//!
//! This module provides [`SourceText`] loading with size and encoding
//! validation, the per-request [`SharedContext`] accumulator that later
//! sections read, and the [`ContextExtractor`] that seeds the context from
//! cheap local text analysis without spending any token budget.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::lesson::{CefrLevel, GenerateLessonRequest, LessonType, SourceMetadata};

/// Maximum allowed source text file size in bytes (512KB).
pub const MAX_SOURCE_SIZE: u64 = 512 * 1024;

/// Maximum number of themes kept in the context.
pub const MAX_THEMES: usize = 8;

/// Maximum number of candidate vocabulary words seeded by extraction.
pub const MAX_CANDIDATE_VOCABULARY: usize = 16;

/// Maximum summary length in characters.
pub const MAX_SUMMARY_CHARS: usize = 400;

/// Minimum character length for a word to qualify as a theme.
const MIN_THEME_CHARS: usize = 4;

/// Minimum character length for a word to qualify as candidate vocabulary.
const MIN_VOCABULARY_CHARS: usize = 5;

/// Common English function words excluded from themes and vocabulary.
const STOPWORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "are", "as", "at", "be", "because", "been",
    "before", "being", "between", "but", "by", "can", "could", "did", "do", "does", "during",
    "each", "for", "from", "had", "has", "have", "he", "her", "his", "how", "if", "in", "into",
    "is", "it", "its", "just", "may", "might", "more", "most", "no", "not", "of", "on", "only",
    "or", "our", "over", "she", "should", "some", "such", "than", "that", "the", "their", "them",
    "then", "there", "these", "they", "this", "those", "through", "to", "very", "was", "we",
    "were", "what", "when", "where", "which", "while", "who", "will", "with", "would", "you",
    "your",
];

// ============================================================================
// SourceText
// ============================================================================

/// In-memory representation of a loaded source text file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceText {
    /// Path to the source text file.
    pub path: PathBuf,

    /// Raw text content.
    pub content: String,

    /// Size of the file in bytes.
    pub size_bytes: usize,
}

impl SourceText {
    /// Loads source text from the given file path.
    ///
    /// Validates that:
    /// - The file exists
    /// - The file size is within the 512KB limit
    /// - The content is valid UTF-8
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::SourceNotFound` if the file doesn't exist.
    /// Returns `PipelineError::SourceTooLarge` if the file exceeds 512KB.
    /// Returns `PipelineError::SourceEncodingError` if the file is not valid UTF-8.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let metadata = std::fs::metadata(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PipelineError::source_not_found(path)
            } else {
                PipelineError::Io(e)
            }
        })?;

        let file_size = metadata.len();
        if file_size > MAX_SOURCE_SIZE {
            return Err(PipelineError::source_too_large(path, file_size / 1024));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::InvalidData {
                PipelineError::source_encoding(path)
            } else {
                PipelineError::Io(e)
            }
        })?;

        let canonical_path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());

        // Safe to convert: file_size is validated to be <= 512KB.
        #[allow(clippy::cast_possible_truncation)]
        let size_bytes = file_size as usize;

        Ok(Self {
            path: canonical_path,
            content,
            size_bytes,
        })
    }

    /// Wraps text that was supplied directly rather than read from a file.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::SourceTooLarge` if the text exceeds the same
    /// 512KB limit enforced for files.
    pub fn from_string(content: impl Into<String>) -> Result<Self> {
        let content = content.into();
        let size_bytes = content.len();
        let size = u64::try_from(size_bytes).unwrap_or(u64::MAX);
        if size > MAX_SOURCE_SIZE {
            return Err(PipelineError::source_too_large(Path::new("<inline>"), size / 1024));
        }

        Ok(Self {
            path: PathBuf::new(),
            content,
            size_bytes,
        })
    }
}

// ============================================================================
// SharedContext
// ============================================================================

/// One word in the context's vocabulary accumulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VocabularyEntry {
    /// The word itself, as it appears in the source.
    pub word: String,

    /// A definition, present once the vocabulary section taught the word.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meaning: Option<String>,

    /// How many example sentences exist for the word.
    #[serde(default)]
    pub example_count: u32,
}

impl VocabularyEntry {
    /// Creates an untaught candidate entry.
    #[must_use]
    pub fn candidate(word: impl Into<String>) -> Self {
        Self {
            word: word.into(),
            meaning: None,
            example_count: 0,
        }
    }

    /// Creates a taught entry with its meaning and example count.
    #[must_use]
    pub fn taught(word: impl Into<String>, meaning: impl Into<String>, example_count: u32) -> Self {
        Self {
            word: word.into(),
            meaning: Some(meaning.into()),
            example_count,
        }
    }
}

/// Accumulating per-request state that later sections read.
///
/// A context is owned by one generation run. Only the orchestrator mutates
/// it, and only between section steps, so a section sees exactly the state
/// left by the sections scheduled before it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedContext {
    /// The raw source text. Never mutated after creation.
    pub source_text: String,

    /// A short summary of the source, seeded by extraction.
    pub summary: String,

    /// Recurring topics in the source, append-only, capped at [`MAX_THEMES`].
    pub themes: Vec<String>,

    /// Vocabulary accumulator; grows as sections complete, never shrinks.
    pub vocabulary: Vec<VocabularyEntry>,

    /// The lesson flavor being generated.
    pub lesson_type: LessonType,

    /// The learner's CEFR level.
    pub cefr_level: CefrLevel,

    /// The language being taught.
    pub target_language: String,

    /// The reading passage, set once the reading section succeeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reading_passage: Option<String>,

    /// The lesson title, set by the title section late in the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Pass-through metadata about the source document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_metadata: Option<SourceMetadata>,
}

/// A piece of shared context a section can declare as required input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextField {
    /// The source summary.
    Summary,
    /// The extracted themes.
    Themes,
    /// The vocabulary accumulator.
    Vocabulary,
    /// The reading passage.
    ReadingPassage,
}

impl ContextField {
    /// Returns the snake_case label for this field.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::Themes => "themes",
            Self::Vocabulary => "vocabulary",
            Self::ReadingPassage => "reading_passage",
        }
    }
}

impl std::fmt::Display for ContextField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SharedContext {
    /// Creates an empty context for the given request.
    #[must_use]
    pub fn new(request: &GenerateLessonRequest) -> Self {
        Self {
            source_text: request.source_text.clone(),
            summary: String::new(),
            themes: Vec::new(),
            vocabulary: Vec::new(),
            lesson_type: request.lesson_type,
            cefr_level: request.cefr_level,
            target_language: request.target_language.clone(),
            reading_passage: None,
            title: None,
            source_metadata: request.source_metadata.clone(),
        }
    }

    /// Returns `true` if the given context field has content.
    #[must_use]
    pub fn has(&self, field: ContextField) -> bool {
        match field {
            ContextField::Summary => !self.summary.trim().is_empty(),
            ContextField::Themes => !self.themes.is_empty(),
            ContextField::Vocabulary => !self.vocabulary.is_empty(),
            ContextField::ReadingPassage => self
                .reading_passage
                .as_deref()
                .is_some_and(|p| !p.trim().is_empty()),
        }
    }

    /// Appends a theme, ignoring duplicates (case-insensitive) and anything
    /// past the [`MAX_THEMES`] cap.
    pub fn add_theme(&mut self, theme: impl Into<String>) {
        let theme = theme.into();
        if self.themes.len() >= MAX_THEMES {
            return;
        }
        let lowered = theme.to_lowercase();
        if self.themes.iter().any(|t| t.to_lowercase() == lowered) {
            return;
        }
        self.themes.push(theme);
    }

    /// Merges vocabulary entries into the accumulator.
    ///
    /// Existing words (matched case-insensitively) are enriched in place;
    /// new words are appended. The accumulator never shrinks.
    pub fn extend_vocabulary(&mut self, entries: impl IntoIterator<Item = VocabularyEntry>) {
        for entry in entries {
            let lowered = entry.word.to_lowercase();
            if let Some(existing) = self
                .vocabulary
                .iter_mut()
                .find(|v| v.word.to_lowercase() == lowered)
            {
                if entry.meaning.is_some() {
                    existing.meaning = entry.meaning;
                }
                if entry.example_count > existing.example_count {
                    existing.example_count = entry.example_count;
                }
            } else {
                self.vocabulary.push(entry);
            }
        }
    }

    /// Returns every vocabulary word, lowercased.
    #[must_use]
    pub fn vocabulary_words(&self) -> Vec<String> {
        self.vocabulary
            .iter()
            .map(|v| v.word.to_lowercase())
            .collect()
    }

    /// Replaces the summary, ignoring empty refinements.
    pub fn refine_summary(&mut self, summary: impl Into<String>) {
        let summary = summary.into();
        if !summary.trim().is_empty() {
            self.summary = summary;
        }
    }

    /// Stores the reading passage for sections that build on it.
    pub fn set_reading_passage(&mut self, passage: impl Into<String>) {
        self.reading_passage = Some(passage.into());
    }

    /// Sets the lesson title.
    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = Some(title.into());
    }

    /// Returns a prefix of the source text at most `max_chars` characters
    /// long, cut on a character boundary.
    #[must_use]
    pub fn excerpt(&self, max_chars: usize) -> &str {
        truncate_chars(&self.source_text, max_chars)
    }
}

// ============================================================================
// ContextExtractor
// ============================================================================

/// Seeds a [`SharedContext`] from raw source text.
///
/// Extraction is pure local analysis: sentence splitting for the summary,
/// word frequencies for themes and candidate vocabulary. It never calls the
/// model and never fails; degenerate input just yields an emptier context.
pub struct ContextExtractor;

impl ContextExtractor {
    /// Builds the initial context for a request.
    #[must_use]
    pub fn extract(request: &GenerateLessonRequest) -> SharedContext {
        let mut context = SharedContext::new(request);

        let text = normalize_whitespace(&request.source_text);
        context.summary = build_summary(&text);

        let words = tokenize_words(&text);
        let frequencies = word_frequencies(&words);

        for theme in rank_themes(&frequencies) {
            context.add_theme(theme);
        }
        context.extend_vocabulary(
            rank_candidates(&frequencies)
                .into_iter()
                .map(VocabularyEntry::candidate),
        );

        context
    }
}

/// Collapses all whitespace runs into single spaces.
fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Returns a prefix of `text` at most `max_chars` characters long, cut on a
/// character boundary.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Splits text into sentences on terminal punctuation followed by whitespace.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut iter = text.char_indices().peekable();

    while let Some((idx, ch)) = iter.next() {
        if matches!(ch, '.' | '!' | '?') {
            let at_boundary = iter.peek().map_or(true, |(_, next)| next.is_whitespace());
            if at_boundary {
                let end = idx + ch.len_utf8();
                let sentence = text[start..end].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                start = end;
            }
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Builds a summary from leading sentences, staying under
/// [`MAX_SUMMARY_CHARS`]. Falls back to a plain character truncation when
/// the text has no sentence that fits.
fn build_summary(text: &str) -> String {
    let mut summary = String::new();
    for sentence in split_sentences(text) {
        let separator = usize::from(!summary.is_empty());
        if summary.chars().count() + separator + sentence.chars().count() > MAX_SUMMARY_CHARS {
            break;
        }
        if !summary.is_empty() {
            summary.push(' ');
        }
        summary.push_str(sentence);
    }

    if summary.is_empty() {
        summary = truncate_chars(text, MAX_SUMMARY_CHARS).trim().to_string();
    }
    summary
}

/// Splits text into lowercase words, keeping internal apostrophes.
fn tokenize_words(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphabetic() || c == '\''))
        .map(|w| w.trim_matches('\'').to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Returns `true` if the word is a common function word.
fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word)
}

/// Counts occurrences of each word.
fn word_frequencies(words: &[String]) -> BTreeMap<String, u32> {
    let mut frequencies = BTreeMap::new();
    for word in words {
        let count: &mut u32 = frequencies.entry(word.clone()).or_insert(0);
        *count = count.saturating_add(1);
    }
    frequencies
}

/// Picks up to [`MAX_THEMES`] themes: the most frequent content words,
/// ties broken alphabetically for determinism.
fn rank_themes(frequencies: &BTreeMap<String, u32>) -> Vec<String> {
    let mut candidates: Vec<(&String, u32)> = frequencies
        .iter()
        .filter(|(word, _)| word.chars().count() >= MIN_THEME_CHARS && !is_stopword(word))
        .map(|(word, count)| (word, *count))
        .collect();
    candidates.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    candidates
        .into_iter()
        .take(MAX_THEMES)
        .map(|(word, _)| word.clone())
        .collect()
}

/// Picks up to [`MAX_CANDIDATE_VOCABULARY`] candidate words: frequent,
/// longer content words, ties broken by length then alphabetically.
fn rank_candidates(frequencies: &BTreeMap<String, u32>) -> Vec<String> {
    let mut candidates: Vec<(&String, u32)> = frequencies
        .iter()
        .filter(|(word, _)| word.chars().count() >= MIN_VOCABULARY_CHARS && !is_stopword(word))
        .map(|(word, count)| (word, *count))
        .collect();
    candidates.sort_by(|a, b| {
        b.1.cmp(&a.1)
            .then_with(|| b.0.chars().count().cmp(&a.0.chars().count()))
            .then_with(|| a.0.cmp(b.0))
    });
    candidates
        .into_iter()
        .take(MAX_CANDIDATE_VOCABULARY)
        .map(|(word, _)| word.clone())
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
