//! Prompt construction for lesson section generation.
//!
//! This module provides [`AttemptScope`], the per-attempt sizing of a
//! section request, and [`PromptBuilder`], which renders a section prompt
//! from the shared context. Building is deterministic: identical context
//! and scope always produce identical prompt text, so retries differ only
//! where the scope narrowed.

use std::fmt::Write;

use crate::config::{CefrProfile, PipelineConfig};
use crate::context::SharedContext;
use crate::lesson::{CefrLevel, LessonType, SectionName};

/// Items removed from the requested count on each retry.
const RETRY_ITEM_SHRINK: u32 = 2;

/// Smallest item count a narrowed scope may request.
const ITEM_FLOOR: u32 = 2;

/// Smallest exercise/example count a narrowed grammar scope may request.
const GRAMMAR_ITEM_FLOOR: u32 = 3;

/// Source excerpt budgets in characters, one per attempt. Later attempts
/// reuse the last entry.
const EXCERPT_SCHEDULE: &[usize] = &[1200, 800, 500];

/// The sizing of one generation attempt.
///
/// Attempt 1 carries the configured full scope; each retry narrows the
/// item count and the source excerpt so the reply fits a smaller cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptScope {
    /// 1-based attempt number.
    pub attempt: u32,

    /// Requested item count, narrowed on retries. Zero for prose-shaped
    /// sections (reading, title).
    pub item_count: u32,

    /// Secondary count: examples per word for vocabulary (CEFR-fixed),
    /// narrowed example count for grammar, zero elsewhere.
    pub example_count: u32,

    /// Source excerpt budget in characters.
    pub excerpt_chars: usize,

    /// Completion token cap for this attempt.
    pub token_cap: u32,
}

impl AttemptScope {
    /// Computes the scope for a section's 1-based attempt number.
    #[must_use]
    pub fn for_attempt(
        section: SectionName,
        level: CefrLevel,
        attempt: u32,
        config: &PipelineConfig,
    ) -> Self {
        let policy = config.retry.policy(section);
        let item_count = config
            .counts
            .items_for(section)
            .map_or(0, |full| narrowed_count(full, attempt, item_floor(section)));
        let example_count = match section {
            SectionName::Vocabulary => CefrProfile::for_level(level).examples_per_word,
            SectionName::Grammar => {
                narrowed_count(config.counts.grammar_examples, attempt, GRAMMAR_ITEM_FLOOR)
            }
            _ => 0,
        };

        Self {
            attempt,
            item_count,
            example_count,
            excerpt_chars: excerpt_chars_for(attempt),
            token_cap: policy.cap_for_attempt(attempt),
        }
    }
}

/// The floor a section's item count narrows down to.
const fn item_floor(section: SectionName) -> u32 {
    match section {
        SectionName::Grammar => GRAMMAR_ITEM_FLOOR,
        _ => ITEM_FLOOR,
    }
}

/// Shrinks a requested count by [`RETRY_ITEM_SHRINK`] per retry, clamped
/// to the floor and never above the full count.
fn narrowed_count(full: u32, attempt: u32, floor: u32) -> u32 {
    let shrink = attempt.saturating_sub(1).saturating_mul(RETRY_ITEM_SHRINK);
    full.saturating_sub(shrink).max(floor.min(full))
}

/// Returns the excerpt budget for a 1-based attempt number.
fn excerpt_chars_for(attempt: u32) -> usize {
    let index = usize::try_from(attempt.saturating_sub(1)).unwrap_or(usize::MAX);
    EXCERPT_SCHEDULE
        .get(index)
        .or_else(|| EXCERPT_SCHEDULE.last())
        .copied()
        .unwrap_or(500)
}

/// Renders section prompts from the shared context.
///
/// The builder reads context but never mutates it. Every prompt ends with
/// the same strict-JSON output contract so replies parse uniformly.
pub struct PromptBuilder<'a> {
    context: &'a SharedContext,
}

impl<'a> PromptBuilder<'a> {
    /// Creates a prompt builder over the given context.
    #[must_use]
    pub const fn new(context: &'a SharedContext) -> Self {
        Self { context }
    }

    /// Builds the prompt for a section at the given scope.
    #[must_use]
    pub fn build(&self, section: SectionName, scope: &AttemptScope) -> String {
        let mut output = String::new();

        self.write_preamble(&mut output, section);
        self.write_source_context(&mut output, section, scope);
        match section {
            SectionName::Warmup => self.write_warmup(&mut output, scope),
            SectionName::Vocabulary => self.write_vocabulary(&mut output, scope),
            SectionName::Reading => self.write_reading(&mut output),
            SectionName::Comprehension => self.write_comprehension(&mut output, scope),
            SectionName::Discussion => self.write_discussion(&mut output, scope),
            SectionName::Grammar => Self::write_grammar(&mut output, scope),
            SectionName::Pronunciation => self.write_pronunciation(&mut output, scope),
            SectionName::Dialogue => self.write_dialogue(&mut output, scope),
            SectionName::Wrapup => self.write_wrapup(&mut output, scope),
            SectionName::Title => self.write_title(&mut output),
        }
        Self::write_format_rules(&mut output, section, scope);

        output
    }

    /// Builds a vocabulary prompt for one worker's share of the words.
    ///
    /// Used when the vocabulary step fans out across workers: each batch
    /// teaches an assigned slice of the candidate words instead of letting
    /// the model choose freely.
    #[must_use]
    pub fn build_vocabulary_batch(
        &self,
        scope: &AttemptScope,
        word_count: u32,
        assigned: &[String],
    ) -> String {
        let mut output = String::new();

        self.write_preamble(&mut output, SectionName::Vocabulary);
        self.write_source_context(&mut output, SectionName::Vocabulary, scope);
        self.write_vocabulary_task(&mut output, scope, word_count, assigned, true);
        Self::write_format_rules(&mut output, SectionName::Vocabulary, scope);

        output
    }

    /// Writes the role line and CEFR complexity guidance.
    fn write_preamble(&self, output: &mut String, section: SectionName) {
        let _ = writeln!(
            output,
            "You are writing the {} section of a {} lesson for {} learners.",
            section, self.context.target_language, self.context.cefr_level
        );
        let _ = writeln!(output, "{}\n", level_guidance(self.context.cefr_level));
    }

    /// Writes the shared-context block a section builds on.
    fn write_source_context(&self, output: &mut String, section: SectionName, scope: &AttemptScope) {
        let _ = writeln!(output, "## Source context\n");

        if !self.context.summary.is_empty() {
            let _ = writeln!(output, "Summary: {}", self.context.summary);
        }
        if !self.context.themes.is_empty() {
            let _ = writeln!(output, "Themes: {}", self.context.themes.join(", "));
        }
        if uses_excerpt(section) {
            let excerpt = self.context.excerpt(scope.excerpt_chars);
            if !excerpt.is_empty() {
                let _ = writeln!(output, "Source excerpt:\n{excerpt}");
            }
        }
        let _ = writeln!(output);
    }

    fn write_warmup(&self, output: &mut String, scope: &AttemptScope) {
        let profile = CefrProfile::for_level(self.context.cefr_level);
        let _ = writeln!(output, "## Task\n");
        let _ = writeln!(
            output,
            "Write exactly {} warmup questions that activate what learners already know about the themes.",
            scope.item_count
        );
        let _ = writeln!(
            output,
            "Each question must end with a question mark and be {} words long.",
            profile.question_words
        );
        let _ = writeln!(
            output,
            "Avoid proper nouns unless they are central to the source content."
        );
        let _ = writeln!(output);
    }

    fn write_vocabulary(&self, output: &mut String, scope: &AttemptScope) {
        let candidates = self.context.vocabulary_words();
        self.write_vocabulary_task(output, scope, scope.item_count, &candidates, false);
    }

    /// Writes the vocabulary task block.
    ///
    /// `assigned` distinguishes a worker batch (teach exactly these words)
    /// from the whole-section prompt (prefer these candidates).
    fn write_vocabulary_task(
        &self,
        output: &mut String,
        scope: &AttemptScope,
        word_count: u32,
        words: &[String],
        assigned: bool,
    ) {
        let profile = CefrProfile::for_level(self.context.cefr_level);
        let _ = writeln!(output, "## Task\n");
        let _ = writeln!(
            output,
            "Teach exactly {word_count} words drawn from the source text."
        );
        if !words.is_empty() {
            if assigned {
                let _ = writeln!(output, "Teach these words: {}.", words.join(", "));
            } else {
                let _ = writeln!(output, "Prefer these candidates: {}.", words.join(", "));
            }
        }
        let _ = writeln!(
            output,
            "For each word give a short learner-friendly meaning and exactly {} example sentences.",
            scope.example_count
        );
        let _ = writeln!(
            output,
            "Each example must be {} words long and use the word naturally.",
            profile.example_words
        );
        if !self.context.themes.is_empty() {
            let _ = writeln!(output, "Most examples should relate to the lesson themes.");
        }
        let _ = writeln!(output);
    }

    fn write_reading(&self, output: &mut String) {
        let profile = CefrProfile::for_level(self.context.cefr_level);
        let _ = writeln!(output, "## Task\n");
        let _ = writeln!(
            output,
            "Rewrite the source excerpt as a reading passage of {} words for this level.",
            profile.passage_words
        );
        let words = self.taught_words();
        if !words.is_empty() {
            let _ = writeln!(
                output,
                "Weave in these taught words and bold each one with **double asterisks**: {}.",
                words.join(", ")
            );
        }
        let _ = writeln!(
            output,
            "List every taught word you used in the vocabularyUsed array."
        );
        let _ = writeln!(output);
    }

    fn write_comprehension(&self, output: &mut String, scope: &AttemptScope) {
        let profile = CefrProfile::for_level(self.context.cefr_level);
        let _ = writeln!(output, "## Task\n");
        let _ = writeln!(
            output,
            "Write exactly {} comprehension questions about the reading passage below.",
            scope.item_count
        );
        let _ = writeln!(
            output,
            "Each question must end with a question mark, be answerable from the passage alone, and be {} words long.",
            profile.question_words
        );
        if let Some(passage) = &self.context.reading_passage {
            let _ = writeln!(output, "\nReading passage:\n{passage}");
        }
        let _ = writeln!(output);
    }

    fn write_discussion(&self, output: &mut String, scope: &AttemptScope) {
        let profile = CefrProfile::for_level(self.context.cefr_level);
        let _ = writeln!(output, "## Task\n");
        let _ = writeln!(
            output,
            "Write exactly {} open discussion questions that connect the themes to the learners' own lives.",
            scope.item_count
        );
        let _ = writeln!(
            output,
            "Each question must end with a question mark and be {} words long.",
            profile.question_words
        );
        let _ = writeln!(output, "Avoid questions with plain yes/no answers.");
        let _ = writeln!(
            output,
            "Avoid proper nouns unless they are central to the source content."
        );
        let _ = writeln!(output);
    }

    fn write_grammar(output: &mut String, scope: &AttemptScope) {
        let _ = writeln!(output, "## Task\n");
        let _ = writeln!(
            output,
            "Pick one grammar point that appears in the source excerpt and teach it."
        );
        let _ = writeln!(
            output,
            "Explain its form in at least one full sentence and its usage in at least two sentences."
        );
        let _ = writeln!(
            output,
            "Give exactly {} example sentences drawn from or inspired by the source.",
            scope.example_count
        );
        let _ = writeln!(
            output,
            "Write exactly {} practice exercises, each with a prompt and its answer.",
            scope.item_count
        );
        let _ = writeln!(output);
    }

    fn write_pronunciation(&self, output: &mut String, scope: &AttemptScope) {
        let _ = writeln!(output, "## Task\n");
        let _ = writeln!(
            output,
            "Choose exactly {} of the taught words that learners at this level find hard to pronounce.",
            scope.item_count
        );
        let words = self.taught_words();
        if !words.is_empty() {
            let _ = writeln!(output, "Taught words: {}.", words.join(", "));
        }
        let _ = writeln!(
            output,
            "For each word give its IPA transcription and one short practical tip."
        );
        let _ = writeln!(output);
    }

    fn write_dialogue(&self, output: &mut String, scope: &AttemptScope) {
        let setting = match self.context.lesson_type {
            LessonType::Travel => "travel situation drawn from the themes",
            LessonType::Business => "workplace situation drawn from the themes",
            _ => "everyday situation drawn from the themes",
        };
        let _ = writeln!(output, "## Task\n");
        let _ = writeln!(output, "Write a two-person dialogue set in a {setting}.");
        let _ = writeln!(
            output,
            "Use exactly {} lines, strictly alternating between the two speakers.",
            scope.item_count
        );
        let words = self.taught_words();
        if !words.is_empty() {
            let _ = writeln!(
                output,
                "Work at least one of these taught words in naturally: {}.",
                words.join(", ")
            );
        }
        let _ = writeln!(
            output,
            "Add a gap-fill variant: repeat the dialogue with a key word in some lines replaced by ___ and list the removed words in order in answerKey."
        );
        let _ = writeln!(output);
    }

    fn write_wrapup(&self, output: &mut String, scope: &AttemptScope) {
        let profile = CefrProfile::for_level(self.context.cefr_level);
        let _ = writeln!(output, "## Task\n");
        let _ = writeln!(
            output,
            "Write exactly {} short reflection questions that help learners review what they practiced in this lesson.",
            scope.item_count
        );
        let _ = writeln!(
            output,
            "Each question must end with a question mark and be {} words long.",
            profile.question_words
        );
        let _ = writeln!(output);
    }

    fn write_title(&self, output: &mut String) {
        let _ = writeln!(output, "## Task\n");
        let _ = writeln!(
            output,
            "Write one short, descriptive lesson title in {}, at most 8 words, without quotes.",
            self.context.target_language
        );
        if let Some(original) = self
            .context
            .source_metadata
            .as_ref()
            .and_then(|m| m.title.as_deref())
        {
            let _ = writeln!(
                output,
                "The source document is titled '{original}'; keep its focus but describe the lesson."
            );
        }
        let _ = writeln!(output);
    }

    /// Writes the strict-JSON output contract.
    fn write_format_rules(output: &mut String, section: SectionName, scope: &AttemptScope) {
        let _ = writeln!(output, "## Output format\n");
        let _ = writeln!(
            output,
            "Respond with strict JSON only, no markdown fences, no commentary:"
        );
        let _ = writeln!(output, "{}", json_schema(section));
        let _ = writeln!(
            output,
            "Stay concise: the entire reply must fit within {} completion tokens.",
            scope.token_cap
        );
    }

    /// Words already taught by the vocabulary section; falls back to the
    /// raw candidate list before any section ran.
    fn taught_words(&self) -> Vec<String> {
        let taught: Vec<String> = self
            .context
            .vocabulary
            .iter()
            .filter(|v| v.meaning.is_some())
            .map(|v| v.word.clone())
            .collect();
        if taught.is_empty() {
            self.context.vocabulary_words()
        } else {
            taught
        }
    }
}

/// Whether a section's prompt carries a raw source excerpt.
///
/// Comprehension reads the generated passage instead; the remaining
/// sections work from the summary and themes alone.
const fn uses_excerpt(section: SectionName) -> bool {
    matches!(
        section,
        SectionName::Vocabulary | SectionName::Reading | SectionName::Grammar
    )
}

/// The JSON shape requested from the model for a section.
const fn json_schema(section: SectionName) -> &'static str {
    match section {
        SectionName::Warmup
        | SectionName::Comprehension
        | SectionName::Discussion
        | SectionName::Wrapup => r#"{"questions": ["..."]}"#,
        SectionName::Vocabulary => {
            r#"{"words": [{"word": "...", "meaning": "...", "examples": ["..."]}]}"#
        }
        SectionName::Reading => r#"{"passage": "...", "vocabularyUsed": ["..."]}"#,
        SectionName::Grammar => {
            r#"{"topic": "...", "form": "...", "usage": "...", "examples": ["..."], "exercises": [{"prompt": "...", "answer": "..."}]}"#
        }
        SectionName::Pronunciation => r#"{"items": [{"word": "...", "ipa": "...", "tip": "..."}]}"#,
        SectionName::Dialogue => {
            r#"{"lines": [{"speaker": "...", "text": "..."}], "gapFill": {"lines": [{"speaker": "...", "text": "..."}], "answerKey": ["..."]}}"#
        }
        SectionName::Title => r#"{"title": "..."}"#,
    }
}

/// One-line complexity guidance per CEFR level.
const fn level_guidance(level: CefrLevel) -> &'static str {
    match level {
        CefrLevel::A1 => {
            "Use very short sentences, present tense, and the most common everyday words."
        }
        CefrLevel::A2 => "Use short sentences and common words; simple past and future are fine.",
        CefrLevel::B1 => {
            "Use clear sentences of moderate length; common idioms are fine when the context explains them."
        }
        CefrLevel::B2 => "Use varied sentence structures and some abstract vocabulary.",
        CefrLevel::C1 => "Use natural, sophisticated language with nuanced vocabulary.",
    }
}
