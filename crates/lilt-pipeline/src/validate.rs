//! Section validation rules for generated content.
//!
//! This module checks model replies against the requested shape and the
//! CEFR calibration for the lesson's level. Validation is pure: it reads
//! the reply text and the shared context, performs no I/O, and always
//! terminates with either accepted content or a list of reasons.
//!
//! Truncated replies are first run through [`salvage_json`]-style repair
//! (closing open containers at the last complete value) so that partial
//! output can still be judged on its usable items.

use std::collections::BTreeSet;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::{CefrProfile, CountRange};
use crate::context::SharedContext;
use crate::lesson::{
    DialogueSection, GrammarSection, PronunciationSection, QuestionSet, ReadingSection,
    SectionContent, SectionName, TitleSection, VocabularySection,
};
use crate::prompt::AttemptScope;

/// Minimum character length for a grammar form explanation.
const GRAMMAR_FORM_MIN_CHARS: usize = 20;

/// Minimum character length for a grammar usage explanation.
const GRAMMAR_USAGE_MIN_CHARS: usize = 30;

/// Percentage of examples that must mention a theme or vocabulary word.
const THEME_REFERENCE_PERCENT: usize = 60;

/// Minimum usable examples a vocabulary word needs to survive a partial.
const PARTIAL_MIN_EXAMPLES: usize = 2;

/// Maximum word count for a lesson title.
const TITLE_MAX_WORDS: u32 = 8;

/// Salvage candidates tried from the end of a truncated reply.
const MAX_SALVAGE_ATTEMPTS: usize = 32;

/// The outcome of validating one reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Content passed every rule and is ready to attach to its section.
    Accepted(SectionContent),

    /// Content failed; each reason names one broken rule.
    Rejected(Vec<String>),
}

impl Verdict {
    /// Returns `true` for [`Verdict::Accepted`].
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    /// Returns the rejection reasons, if any.
    #[must_use]
    pub fn reasons(&self) -> Option<&[String]> {
        match self {
            Self::Accepted(_) => None,
            Self::Rejected(reasons) => Some(reasons),
        }
    }
}

/// How strictly a reply is judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Every rule at the requested scope must hold.
    Full,
    /// Enough usable items must survive; the rest is trimmed away.
    Partial,
}

/// Validates section replies against shape, CEFR bands, and context rules.
pub struct SectionValidator<'a> {
    context: &'a SharedContext,
    source_lower: String,
}

impl<'a> SectionValidator<'a> {
    /// Creates a validator over the given context.
    #[must_use]
    pub fn new(context: &'a SharedContext) -> Self {
        Self {
            source_lower: context.source_text.to_lowercase(),
            context,
        }
    }

    /// Validates a reply at full strictness.
    #[must_use]
    pub fn validate(&self, section: SectionName, scope: &AttemptScope, raw: &str) -> Verdict {
        self.check(section, scope, raw, Mode::Full)
    }

    /// Judges a truncated reply under the accept-if-sufficient policy.
    ///
    /// Sections that never accept partial content (grammar, reading,
    /// title) are rejected outright.
    #[must_use]
    pub fn validate_partial(&self, section: SectionName, scope: &AttemptScope, raw: &str) -> Verdict {
        self.check(section, scope, raw, Mode::Partial)
    }

    fn check(&self, section: SectionName, scope: &AttemptScope, raw: &str, mode: Mode) -> Verdict {
        if mode == Mode::Partial && !accepts_partial(section) {
            return Verdict::Rejected(vec![format!(
                "{section} content cannot be accepted partially"
            )]);
        }

        let Some(value) = salvage_json(raw) else {
            return Verdict::Rejected(vec!["response is not parseable JSON".to_string()]);
        };

        match section {
            SectionName::Warmup => wrap(
                self.check_questions(section, scope, value, mode),
                SectionContent::Warmup,
            ),
            SectionName::Comprehension => wrap(
                self.check_questions(section, scope, value, mode),
                SectionContent::Comprehension,
            ),
            SectionName::Discussion => wrap(
                self.check_questions(section, scope, value, mode),
                SectionContent::Discussion,
            ),
            SectionName::Wrapup => wrap(
                self.check_questions(section, scope, value, mode),
                SectionContent::Wrapup,
            ),
            SectionName::Vocabulary => wrap(
                self.check_vocabulary(scope, value, mode),
                SectionContent::Vocabulary,
            ),
            SectionName::Reading => wrap(self.check_reading(value), SectionContent::Reading),
            SectionName::Grammar => wrap(
                self.check_grammar(scope, value),
                SectionContent::Grammar,
            ),
            SectionName::Pronunciation => wrap(
                self.check_pronunciation(scope, value, mode),
                SectionContent::Pronunciation,
            ),
            SectionName::Dialogue => wrap(
                self.check_dialogue(scope, value, mode),
                SectionContent::Dialogue,
            ),
            SectionName::Title => wrap(Self::check_title(value), SectionContent::Title),
        }
    }

    // ------------------------------------------------------------------------
    // Per-section rules
    // ------------------------------------------------------------------------

    fn check_questions(
        &self,
        section: SectionName,
        scope: &AttemptScope,
        value: Value,
        mode: Mode,
    ) -> Result<QuestionSet, Vec<String>> {
        let set: QuestionSet = parse(section, value)?;
        let profile = CefrProfile::for_level(self.context.cefr_level);
        let requested = to_usize(scope.item_count);

        let mut reasons = Vec::new();
        let mut kept = Vec::new();
        for (index, question) in set.questions.iter().enumerate() {
            let problems = self.question_problems(index, question, profile.question_words);
            if problems.is_empty() {
                kept.push(question.clone());
            } else {
                reasons.extend(problems);
            }
        }

        match mode {
            Mode::Full => {
                if set.questions.len() != requested {
                    reasons.push(format!(
                        "expected exactly {} questions, got {}",
                        scope.item_count,
                        set.questions.len()
                    ));
                }
                if reasons.is_empty() {
                    Ok(set)
                } else {
                    Err(reasons)
                }
            }
            Mode::Partial => {
                if kept.len() >= requested.div_ceil(2) && !kept.is_empty() {
                    Ok(QuestionSet::new(kept))
                } else {
                    reasons.push(format!(
                        "only {} usable questions out of {} requested",
                        kept.len(),
                        scope.item_count
                    ));
                    Err(reasons)
                }
            }
        }
    }

    /// Rule violations for one question, with its 1-based position.
    fn question_problems(&self, index: usize, question: &str, band: CountRange) -> Vec<String> {
        let position = index + 1;
        let trimmed = question.trim();

        let mut problems = Vec::new();
        if trimmed.is_empty() {
            problems.push(format!("question {position} is empty"));
            return problems;
        }
        if !trimmed.ends_with('?') {
            problems.push(format!(
                "question {position} does not end with a question mark"
            ));
        }
        let words = word_count(trimmed);
        if !band.contains(words) {
            problems.push(format!(
                "question {position} is {words} words long, outside the {band} band for this level"
            ));
        }
        for noun in self.unexplained_proper_nouns(trimmed) {
            problems.push(format!(
                "question {position} names '{noun}', which is not part of the source content"
            ));
        }
        problems
    }

    fn check_vocabulary(
        &self,
        scope: &AttemptScope,
        value: Value,
        mode: Mode,
    ) -> Result<VocabularySection, Vec<String>> {
        let data: VocabularySection = parse(SectionName::Vocabulary, value)?;
        let profile = CefrProfile::for_level(self.context.cefr_level);
        let requested = to_usize(scope.item_count);
        let minimum_examples = to_usize(scope.example_count);

        match mode {
            Mode::Full => {
                let mut reasons = Vec::new();
                if data.words.len() != requested {
                    reasons.push(format!(
                        "expected exactly {} words, got {}",
                        scope.item_count,
                        data.words.len()
                    ));
                }
                for item in &data.words {
                    if item.word.trim().is_empty() {
                        reasons.push("a vocabulary entry has an empty word".to_string());
                        continue;
                    }
                    if item.meaning.trim().is_empty() {
                        reasons.push(format!("word '{}' has an empty meaning", item.word));
                    }
                    if item.examples.len() < minimum_examples {
                        reasons.push(format!(
                            "word '{}' has {} examples, fewer than the {} required",
                            item.word,
                            item.examples.len(),
                            scope.example_count
                        ));
                    }
                    for (index, example) in item.examples.iter().enumerate() {
                        let words = word_count(example);
                        if !profile.example_words.contains(words) {
                            reasons.push(format!(
                                "example {} for '{}' is {} words long, outside the {} band",
                                index + 1,
                                item.word,
                                words,
                                profile.example_words
                            ));
                        }
                    }
                }
                let (referencing, total) = self.count_context_references(
                    data.words.iter().flat_map(|w| w.examples.iter()),
                );
                if total > 0 && referencing * 100 < total * THEME_REFERENCE_PERCENT {
                    reasons.push(format!(
                        "only {referencing} of {total} examples reference the lesson themes or vocabulary (minimum {THEME_REFERENCE_PERCENT}%)"
                    ));
                }
                if reasons.is_empty() {
                    Ok(data)
                } else {
                    Err(reasons)
                }
            }
            Mode::Partial => {
                let mut kept = Vec::new();
                for item in &data.words {
                    if item.word.trim().is_empty() || item.meaning.trim().is_empty() {
                        continue;
                    }
                    let usable: Vec<String> = item
                        .examples
                        .iter()
                        .filter(|example| {
                            !example.trim().is_empty()
                                && profile.example_words.contains(word_count(example))
                        })
                        .cloned()
                        .collect();
                    if usable.len() >= PARTIAL_MIN_EXAMPLES {
                        let mut survivor = item.clone();
                        survivor.examples = usable;
                        kept.push(survivor);
                    }
                }

                let (referencing, total) = self
                    .count_context_references(kept.iter().flat_map(|w| w.examples.iter()));
                if kept.len() >= requested.div_ceil(2)
                    && (total == 0 || referencing * 100 >= total * THEME_REFERENCE_PERCENT)
                {
                    Ok(VocabularySection { words: kept })
                } else {
                    Err(vec![format!(
                        "only {} usable words out of {} requested (a word needs at least {} complete examples)",
                        kept.len(),
                        scope.item_count,
                        PARTIAL_MIN_EXAMPLES
                    )])
                }
            }
        }
    }

    fn check_reading(&self, value: Value) -> Result<ReadingSection, Vec<String>> {
        let data: ReadingSection = parse(SectionName::Reading, value)?;
        let profile = CefrProfile::for_level(self.context.cefr_level);

        let mut reasons = Vec::new();
        let words = word_count(&data.passage);
        if !profile.passage_words.contains(words) {
            reasons.push(format!(
                "passage is {} words long, outside the {} band for this level",
                words, profile.passage_words
            ));
        }

        let taught: BTreeSet<String> = self.context.vocabulary_words().into_iter().collect();
        let bolded = extract_bold_terms(&data.passage);
        if bolded.is_empty() {
            reasons.push("passage does not bold any taught vocabulary".to_string());
        }
        for term in &bolded {
            if !taught.contains(term) {
                reasons.push(format!(
                    "passage bolds '{term}', which is not a taught vocabulary word"
                ));
            }
        }

        if data.vocabulary_used.is_empty() && !bolded.is_empty() {
            reasons.push("vocabularyUsed is empty although the passage bolds taught words".to_string());
        }
        let bolded_set: BTreeSet<&str> = bolded.iter().map(String::as_str).collect();
        for used in &data.vocabulary_used {
            let lowered = used.to_lowercase();
            if !taught.contains(&lowered) {
                reasons.push(format!(
                    "vocabularyUsed lists '{used}', which is not a taught vocabulary word"
                ));
            } else if !bolded_set.contains(lowered.as_str()) {
                reasons.push(format!(
                    "vocabularyUsed lists '{used}' but the passage never bolds it"
                ));
            }
        }

        if reasons.is_empty() {
            Ok(data)
        } else {
            Err(reasons)
        }
    }

    fn check_grammar(
        &self,
        scope: &AttemptScope,
        value: Value,
    ) -> Result<GrammarSection, Vec<String>> {
        let data: GrammarSection = parse(SectionName::Grammar, value)?;

        let mut reasons = Vec::new();
        if data.topic.trim().is_empty() {
            reasons.push("grammar topic is empty".to_string());
        }
        let form_len = data.form.trim().chars().count();
        if form_len < GRAMMAR_FORM_MIN_CHARS {
            reasons.push(format!(
                "form explanation is {form_len} characters, shorter than the {GRAMMAR_FORM_MIN_CHARS} required"
            ));
        }
        let usage_len = data.usage.trim().chars().count();
        if usage_len < GRAMMAR_USAGE_MIN_CHARS {
            reasons.push(format!(
                "usage explanation is {usage_len} characters, shorter than the {GRAMMAR_USAGE_MIN_CHARS} required"
            ));
        }

        let minimum_examples = to_usize(scope.example_count);
        if data.examples.len() < minimum_examples {
            reasons.push(format!(
                "expected at least {} examples, got {}",
                scope.example_count,
                data.examples.len()
            ));
        }
        let requested_exercises = to_usize(scope.item_count);
        if data.exercises.len() != requested_exercises {
            reasons.push(format!(
                "expected exactly {} exercises, got {}",
                scope.item_count,
                data.exercises.len()
            ));
        }
        for (index, exercise) in data.exercises.iter().enumerate() {
            if exercise.prompt.trim().is_empty() {
                reasons.push(format!("exercise {} has an empty prompt", index + 1));
            }
            if exercise.answer.trim().is_empty() {
                reasons.push(format!("exercise {} has an empty answer", index + 1));
            }
        }

        let (referencing, total) = self.count_context_references(data.examples.iter());
        if total > 0 && referencing * 100 < total * THEME_REFERENCE_PERCENT {
            reasons.push(format!(
                "only {referencing} of {total} grammar examples reference the lesson themes or vocabulary (minimum {THEME_REFERENCE_PERCENT}%)"
            ));
        }

        if reasons.is_empty() {
            Ok(data)
        } else {
            Err(reasons)
        }
    }

    fn check_pronunciation(
        &self,
        scope: &AttemptScope,
        value: Value,
        mode: Mode,
    ) -> Result<PronunciationSection, Vec<String>> {
        let data: PronunciationSection = parse(SectionName::Pronunciation, value)?;
        let taught: BTreeSet<String> = self.context.vocabulary_words().into_iter().collect();
        let requested = to_usize(scope.item_count);

        let mut reasons = Vec::new();
        let mut kept = Vec::new();
        for item in &data.items {
            let mut problems = Vec::new();
            if !taught.contains(&item.word.to_lowercase()) {
                problems.push(format!(
                    "item '{}' is not a taught vocabulary word",
                    item.word
                ));
            }
            if item.ipa.trim().is_empty() {
                problems.push(format!("item '{}' has an empty IPA transcription", item.word));
            }
            if item.tip.trim().is_empty() {
                problems.push(format!("item '{}' has an empty tip", item.word));
            }
            if problems.is_empty() {
                kept.push(item.clone());
            } else {
                reasons.extend(problems);
            }
        }

        match mode {
            Mode::Full => {
                if data.items.len() != requested {
                    reasons.push(format!(
                        "expected exactly {} pronunciation items, got {}",
                        scope.item_count,
                        data.items.len()
                    ));
                }
                if reasons.is_empty() {
                    Ok(data)
                } else {
                    Err(reasons)
                }
            }
            Mode::Partial => {
                if kept.len() >= requested.div_ceil(2) && !kept.is_empty() {
                    Ok(PronunciationSection { items: kept })
                } else {
                    reasons.push(format!(
                        "only {} usable pronunciation items out of {} requested",
                        kept.len(),
                        scope.item_count
                    ));
                    Err(reasons)
                }
            }
        }
    }

    fn check_dialogue(
        &self,
        scope: &AttemptScope,
        value: Value,
        mode: Mode,
    ) -> Result<DialogueSection, Vec<String>> {
        let mut data: DialogueSection = parse(SectionName::Dialogue, value)?;
        if mode == Mode::Partial {
            data.lines
                .retain(|line| !line.speaker.trim().is_empty() && !line.text.trim().is_empty());
        }

        let mut reasons = Vec::new();
        let required = to_usize(scope.item_count);
        let minimum = match mode {
            Mode::Full => required,
            Mode::Partial => required.div_ceil(2),
        };
        if data.lines.len() < minimum {
            reasons.push(format!(
                "dialogue has {} lines, fewer than the {} required",
                data.lines.len(),
                minimum
            ));
        }

        if mode == Mode::Full {
            for (index, line) in data.lines.iter().enumerate() {
                if line.speaker.trim().is_empty() {
                    reasons.push(format!("line {} has no speaker", index + 1));
                }
                if line.text.trim().is_empty() {
                    reasons.push(format!("line {} has no text", index + 1));
                }
            }
        }

        let speakers: BTreeSet<&str> = data
            .lines
            .iter()
            .map(|line| line.speaker.as_str())
            .collect();
        if speakers.len() != 2 {
            reasons.push(format!(
                "dialogue needs exactly two speakers, found {}",
                speakers.len()
            ));
        }
        for (index, pair) in data.lines.windows(2).enumerate() {
            if pair[0].speaker == pair[1].speaker {
                reasons.push(format!(
                    "lines {} and {} are consecutive turns by the same speaker",
                    index + 1,
                    index + 2
                ));
            }
        }

        if !data
            .lines
            .iter()
            .any(|line| self.references_vocabulary(&line.text))
        {
            reasons.push("dialogue does not use any taught vocabulary word".to_string());
        }

        if let Some(gap_fill) = &data.gap_fill {
            let blanks: usize = gap_fill
                .lines
                .iter()
                .map(|line| line.text.matches("___").count())
                .sum();
            let consistent = blanks == gap_fill.answer_key.len()
                && gap_fill.answer_key.iter().all(|a| !a.trim().is_empty());
            if !consistent {
                if mode == Mode::Partial {
                    data.gap_fill = None;
                } else {
                    reasons.push(format!(
                        "gap-fill has {} blanks but {} answers",
                        blanks,
                        gap_fill.answer_key.len()
                    ));
                }
            }
        }

        if reasons.is_empty() {
            Ok(data)
        } else {
            Err(reasons)
        }
    }

    fn check_title(value: Value) -> Result<TitleSection, Vec<String>> {
        let data: TitleSection = parse(SectionName::Title, value)?;

        let mut reasons = Vec::new();
        let trimmed = data.title.trim();
        if trimmed.is_empty() {
            reasons.push("title is empty".to_string());
        } else {
            let words = word_count(trimmed);
            if words > TITLE_MAX_WORDS {
                reasons.push(format!(
                    "title is {words} words long, longer than the {TITLE_MAX_WORDS} allowed"
                ));
            }
        }

        if reasons.is_empty() {
            Ok(data)
        } else {
            Err(reasons)
        }
    }

    // ------------------------------------------------------------------------
    // Context-aware helpers
    // ------------------------------------------------------------------------

    /// Counts how many of the texts mention a theme or vocabulary word.
    fn count_context_references<'t>(
        &self,
        texts: impl Iterator<Item = &'t String>,
    ) -> (usize, usize) {
        let mut referencing = 0;
        let mut total = 0;
        for text in texts {
            total += 1;
            if self.references_context(text) {
                referencing += 1;
            }
        }
        (referencing, total)
    }

    fn references_context(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.context
            .themes
            .iter()
            .any(|theme| lower.contains(&theme.to_lowercase()))
            || self.references_vocabulary(text)
    }

    fn references_vocabulary(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.context
            .vocabulary
            .iter()
            .any(|entry| lower.contains(&entry.word.to_lowercase()))
    }

    /// Capitalized mid-sentence tokens that never appear in the source.
    fn unexplained_proper_nouns(&self, text: &str) -> Vec<String> {
        let mut nouns = Vec::new();
        for (position, token) in text.split_whitespace().enumerate() {
            if position == 0 {
                continue;
            }
            let cleaned = token.trim_matches(|c: char| !c.is_alphanumeric());
            let mut chars = cleaned.chars();
            let Some(first) = chars.next() else {
                continue;
            };
            if !first.is_uppercase() || chars.next().is_none() {
                continue;
            }
            if cleaned.starts_with("I'") {
                continue;
            }
            let lowered = cleaned.to_lowercase();
            if self.source_lower.contains(&lowered) {
                continue;
            }
            if self
                .context
                .themes
                .iter()
                .any(|theme| theme.to_lowercase() == lowered)
            {
                continue;
            }
            nouns.push(cleaned.to_string());
        }
        nouns
    }
}

/// Whether a section may accept trimmed partial content.
const fn accepts_partial(section: SectionName) -> bool {
    !matches!(
        section,
        SectionName::Grammar | SectionName::Reading | SectionName::Title
    )
}

fn wrap<T>(result: Result<T, Vec<String>>, into_content: impl FnOnce(T) -> SectionContent) -> Verdict {
    match result {
        Ok(content) => Verdict::Accepted(into_content(content)),
        Err(reasons) => Verdict::Rejected(reasons),
    }
}

fn parse<T: DeserializeOwned>(section: SectionName, value: Value) -> Result<T, Vec<String>> {
    serde_json::from_value(value)
        .map_err(|e| vec![format!("response does not match the {section} schema: {e}")])
}

fn to_usize(count: u32) -> usize {
    usize::try_from(count).unwrap_or(usize::MAX)
}

fn word_count(text: &str) -> u32 {
    u32::try_from(text.split_whitespace().count()).unwrap_or(u32::MAX)
}

/// Extracts `**bolded**` terms from a passage, lowercased and trimmed.
fn extract_bold_terms(passage: &str) -> Vec<String> {
    let Ok(re) = Regex::new(r"\*\*([^*]+)\*\*") else {
        return Vec::new();
    };

    re.captures_iter(passage)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_lowercase())
        .collect()
}

/// Strips a surrounding markdown code fence, tolerating a missing closer.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let body = rest.split_once('\n').map_or(rest, |(_, tail)| tail);
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Best-effort recovery of a JSON document from truncated model output.
///
/// Tries the reply as-is first. On failure, scans for positions where a
/// value just completed, then retries progressively shorter prefixes with
/// the open containers closed. Dangling keys and trailing commas fall
/// after the last complete value, so they are cut away naturally.
pub(crate) fn salvage_json(text: &str) -> Option<Value> {
    let body = strip_code_fences(text);
    if let Ok(value) = serde_json::from_str(body) {
        return Some(value);
    }

    let start = body.find(['{', '['])?;
    let body = &body[start..];

    let mut closers: Vec<char> = Vec::new();
    let mut candidates: Vec<(usize, String)> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in body.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
                candidates.push((idx, closers.iter().rev().collect()));
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => closers.push('}'),
            '[' => closers.push(']'),
            '}' | ']' => {
                closers.pop();
                candidates.push((idx, closers.iter().rev().collect()));
            }
            c if c.is_ascii_alphanumeric() => {
                candidates.push((idx, closers.iter().rev().collect()));
            }
            _ => {}
        }
    }

    for (idx, suffix) in candidates.iter().rev().take(MAX_SALVAGE_ATTEMPTS) {
        // Candidate positions are always at ASCII characters.
        let candidate = format!("{}{}", &body[..=*idx], suffix);
        if let Ok(value) = serde_json::from_str(&candidate) {
            return Some(value);
        }
    }
    None
}
