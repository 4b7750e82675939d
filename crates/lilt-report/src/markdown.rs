//! Markdown rendering for lessons and run reports.
//!
//! [`LessonRenderer`] produces a printable lesson document. Answer keys are
//! collected at the bottom of the document so the exercise blocks stay clean
//! for handouts. [`RunReportRenderer`] produces the report a caller reads
//! after a generation run: a summary table, per-section outcomes, token
//! usage, and error detail.

use std::fmt::Write;

use chrono::{DateTime, Utc};
use lilt_pipeline::{
    Attempt, AttemptOutcome, DialogueSection, GrammarSection, Lesson, PronunciationSection,
    RunRecord, Section, SectionName, SectionUsage,
};

/// Maximum length of a failure reason or transport message in the report.
const MAX_REASON_DISPLAY_LENGTH: usize = 160;

// ============================================================================
// LessonRenderer
// ============================================================================

/// Renders a finished [`Lesson`] as a Markdown document.
///
/// Sections appear in teaching order: warm-up, vocabulary, reading,
/// comprehension, the focus section, wrap-up. Grammar answers and dialogue
/// gap answers are moved into a final answer key.
pub struct LessonRenderer<'a> {
    lesson: &'a Lesson,
}

impl<'a> LessonRenderer<'a> {
    /// Creates a renderer for the given lesson.
    #[must_use]
    pub const fn new(lesson: &'a Lesson) -> Self {
        Self { lesson }
    }

    /// Renders the complete lesson document.
    #[must_use]
    pub fn render(&self) -> String {
        let mut output = String::new();

        self.write_header(&mut output);
        write_question_block(&mut output, "Warm-up", &self.lesson.sections.warmup.questions);
        self.write_vocabulary(&mut output);
        self.write_reading(&mut output);
        write_question_block(
            &mut output,
            "Comprehension",
            &self.lesson.sections.comprehension.questions,
        );
        self.write_focus(&mut output);
        write_question_block(&mut output, "Wrap-up", &self.lesson.sections.wrapup.questions);
        self.write_answer_key(&mut output);
        write_footer(&mut output, &self.lesson.metadata.generated_at);

        output
    }

    fn write_header(&self, output: &mut String) {
        let metadata = &self.lesson.metadata;

        let _ = writeln!(output, "# {}", escape_markdown(&self.lesson.title));
        let _ = writeln!(output);
        let _ = writeln!(
            output,
            "*{} {} lesson in {}.*",
            metadata.cefr_level,
            metadata.lesson_type,
            escape_markdown(&metadata.target_language)
        );
        let _ = writeln!(output);
    }

    fn write_vocabulary(&self, output: &mut String) {
        let _ = writeln!(output, "## Vocabulary");
        let _ = writeln!(output);

        for item in &self.lesson.sections.vocabulary.words {
            let _ = writeln!(
                output,
                "**{}**: {}",
                escape_markdown(&item.word),
                escape_markdown(&item.meaning)
            );
            let _ = writeln!(output);
            for example in &item.examples {
                let _ = writeln!(output, "- {}", escape_markdown(example));
            }
            let _ = writeln!(output);
        }
    }

    fn write_reading(&self, output: &mut String) {
        let reading = &self.lesson.sections.reading;

        let _ = writeln!(output, "## Reading");
        let _ = writeln!(output);
        // The passage carries its own markup; taught words arrive pre-bolded.
        let _ = writeln!(output, "{}", reading.passage);
        let _ = writeln!(output);

        if !reading.vocabulary_used.is_empty() {
            let _ = writeln!(
                output,
                "*Taught words used: {}.*",
                reading.vocabulary_used.join(", ")
            );
            let _ = writeln!(output);
        }
    }

    fn write_focus(&self, output: &mut String) {
        let sections = &self.lesson.sections;

        if let Some(discussion) = &sections.discussion {
            write_question_block(output, "Discussion", &discussion.questions);
        }
        if let Some(grammar) = &sections.grammar {
            write_grammar(output, grammar);
        }
        if let Some(pronunciation) = &sections.pronunciation {
            write_pronunciation(output, pronunciation);
        }
        if let Some(dialogue) = &sections.dialogue {
            write_dialogue(output, dialogue);
        }
    }

    fn write_answer_key(&self, output: &mut String) {
        let sections = &self.lesson.sections;
        let exercises = sections
            .grammar
            .as_ref()
            .map(|grammar| grammar.exercises.as_slice())
            .unwrap_or_default();
        let gap_answers = sections
            .dialogue
            .as_ref()
            .and_then(|dialogue| dialogue.gap_fill.as_ref())
            .map(|gap_fill| gap_fill.answer_key.as_slice())
            .unwrap_or_default();

        if exercises.is_empty() && gap_answers.is_empty() {
            return;
        }

        let _ = writeln!(output, "---");
        let _ = writeln!(output);
        let _ = writeln!(output, "## Answer Key");
        let _ = writeln!(output);

        if !exercises.is_empty() {
            let _ = writeln!(output, "### Grammar practice");
            let _ = writeln!(output);
            for (index, exercise) in exercises.iter().enumerate() {
                let _ = writeln!(
                    output,
                    "{}. `{}`",
                    index + 1,
                    escape_markdown_inline_code(&exercise.answer)
                );
            }
            let _ = writeln!(output);
        }

        if !gap_answers.is_empty() {
            let _ = writeln!(output, "### Dialogue gaps");
            let _ = writeln!(output);
            for (index, answer) in gap_answers.iter().enumerate() {
                let _ = writeln!(
                    output,
                    "{}. `{}`",
                    index + 1,
                    escape_markdown_inline_code(answer)
                );
            }
            let _ = writeln!(output);
        }
    }
}

fn write_question_block(output: &mut String, heading: &str, questions: &[String]) {
    let _ = writeln!(output, "## {heading}");
    let _ = writeln!(output);
    for (index, question) in questions.iter().enumerate() {
        let _ = writeln!(output, "{}. {}", index + 1, escape_markdown(question));
    }
    let _ = writeln!(output);
}

fn write_grammar(output: &mut String, grammar: &GrammarSection) {
    let _ = writeln!(output, "## Grammar");
    let _ = writeln!(output);
    let _ = writeln!(output, "### {}", escape_markdown(&grammar.topic));
    let _ = writeln!(output);
    let _ = writeln!(output, "**Form**: {}", escape_markdown(&grammar.form));
    let _ = writeln!(output);
    let _ = writeln!(output, "**Usage**: {}", escape_markdown(&grammar.usage));
    let _ = writeln!(output);

    let _ = writeln!(output, "**Examples**:");
    let _ = writeln!(output);
    for example in &grammar.examples {
        let _ = writeln!(output, "- {}", escape_markdown(example));
    }
    let _ = writeln!(output);

    // Answers are listed in the answer key, not next to the prompts.
    let _ = writeln!(output, "**Practice**:");
    let _ = writeln!(output);
    for (index, exercise) in grammar.exercises.iter().enumerate() {
        let _ = writeln!(output, "{}. {}", index + 1, escape_markdown(&exercise.prompt));
    }
    let _ = writeln!(output);
}

fn write_pronunciation(output: &mut String, pronunciation: &PronunciationSection) {
    let _ = writeln!(output, "## Pronunciation");
    let _ = writeln!(output);
    let _ = writeln!(output, "| Word | IPA | Tip |");
    let _ = writeln!(output, "|------|-----|-----|");
    for item in &pronunciation.items {
        let _ = writeln!(
            output,
            "| {} | {} | {} |",
            escape_markdown(&item.word),
            escape_markdown(&item.ipa),
            escape_markdown(&item.tip)
        );
    }
    let _ = writeln!(output);
}

fn write_dialogue(output: &mut String, dialogue: &DialogueSection) {
    let _ = writeln!(output, "## Dialogue");
    let _ = writeln!(output);
    for line in &dialogue.lines {
        let _ = writeln!(
            output,
            "**{}**: {}",
            escape_markdown(&line.speaker),
            escape_markdown(&line.text)
        );
        let _ = writeln!(output);
    }

    if let Some(gap_fill) = &dialogue.gap_fill {
        let _ = writeln!(output, "### Practice version");
        let _ = writeln!(output);
        for line in &gap_fill.lines {
            let _ = writeln!(
                output,
                "**{}**: {}",
                escape_markdown(&line.speaker),
                escape_markdown(&line.text)
            );
            let _ = writeln!(output);
        }
    }
}

// ============================================================================
// RunReportRenderer
// ============================================================================

/// Renders a [`RunRecord`] as a Markdown run report.
///
/// The report covers both outcomes: for a generated lesson it shows what the
/// run cost, and for a failed run it shows exactly where and why generation
/// gave up.
pub struct RunReportRenderer<'a> {
    record: &'a RunRecord,
}

impl<'a> RunReportRenderer<'a> {
    /// Creates a renderer for the given run record.
    #[must_use]
    pub const fn new(record: &'a RunRecord) -> Self {
        Self { record }
    }

    /// Renders the complete run report.
    #[must_use]
    pub fn render(&self) -> String {
        let mut output = String::new();

        self.write_title(&mut output);
        self.write_summary(&mut output);
        self.write_sections(&mut output);
        self.write_usage(&mut output);
        self.write_error_detail(&mut output);
        write_footer(&mut output, &Utc::now());

        output
    }

    fn write_title(&self, output: &mut String) {
        match &self.record.lesson {
            Some(lesson) => {
                let _ = writeln!(
                    output,
                    "# Lilt Run Report: {}",
                    escape_markdown(&lesson.title)
                );
            }
            None => {
                let _ = writeln!(output, "# Lilt Run Report");
            }
        }
        let _ = writeln!(output);
    }

    fn write_summary(&self, output: &mut String) {
        let report = &self.record.token_report;
        let valid = self
            .record
            .sections
            .iter()
            .filter(|section| section.is_valid())
            .count();
        let outcome = if self.record.lesson.is_some() {
            "Lesson generated"
        } else {
            "Failed"
        };

        let _ = writeln!(output, "## Summary");
        let _ = writeln!(output);
        let _ = writeln!(output, "| Metric | Value |");
        let _ = writeln!(output, "|--------|-------|");
        let _ = writeln!(output, "| Outcome | {outcome} |");
        let _ = writeln!(output, "| Sections driven | {} |", self.record.sections.len());
        let _ = writeln!(output, "| Sections valid | {valid} |");
        let _ = writeln!(output, "| Attempts spent | {} |", report.total_attempts);
        let _ = writeln!(output, "| Generation calls | {} |", report.total_calls);
        let _ = writeln!(output, "| Total tokens | {} |", report.total_tokens);
        let _ = writeln!(output, "| Failed attempts | {} |", report.errors.total());
        let _ = writeln!(
            output,
            "| Duration | {} |",
            format_duration(run_duration_seconds(&self.record.sections))
        );
        if self.record.used_supplied_title() {
            let _ = writeln!(output, "| Lesson title | supplied by caller |");
        }
        let _ = writeln!(output);
    }

    fn write_sections(&self, output: &mut String) {
        let _ = writeln!(output, "## Sections");
        let _ = writeln!(output);

        if self.record.sections.is_empty() {
            let _ = writeln!(output, "*No sections were driven.*");
            let _ = writeln!(output);
            return;
        }

        let _ = writeln!(output, "| Section | Status | Attempts | Last outcome | Tokens |");
        let _ = writeln!(output, "|---------|--------|----------|--------------|--------|");
        for section in &self.record.sections {
            let tokens = self
                .record
                .token_report
                .sections
                .get(&section.name)
                .map_or(0, SectionUsage::total_tokens);
            let last = section
                .last_attempt()
                .map_or("-", |attempt| attempt.outcome.label());
            let _ = writeln!(
                output,
                "| {} | {} | {} | {last} | {tokens} |",
                section.name,
                section.status,
                section.attempt_count()
            );
        }
        let _ = writeln!(output);
    }

    fn write_usage(&self, output: &mut String) {
        let report = &self.record.token_report;

        let _ = writeln!(output, "## Usage");
        let _ = writeln!(output);
        let _ = writeln!(
            output,
            "| Section | Calls | Attempts | Prompt tokens | Completion tokens | Truncated calls |"
        );
        let _ = writeln!(
            output,
            "|---------|-------|----------|---------------|-------------------|-----------------|"
        );
        for (name, usage) in &report.sections {
            let _ = writeln!(
                output,
                "| {name} | {} | {} | {} | {} | {} |",
                usage.calls,
                usage.attempts,
                usage.prompt_tokens,
                usage.completion_tokens,
                usage.truncations
            );
        }
        let truncated = report
            .sections
            .values()
            .fold(0u32, |total, usage| total.saturating_add(usage.truncations));
        let _ = writeln!(
            output,
            "| **Total** | {} | {} | {} | {} | {truncated} |",
            report.total_calls, report.total_attempts, report.prompt_tokens, report.completion_tokens
        );
        let _ = writeln!(output);

        let _ = writeln!(output, "### Failed attempts");
        let _ = writeln!(output);
        if report.errors.total() == 0 {
            let _ = writeln!(output, "*No failed attempts.*");
        } else {
            let _ = writeln!(output, "| Kind | Count |");
            let _ = writeln!(output, "|------|-------|");
            let _ = writeln!(output, "| Validation | {} |", report.errors.validation);
            let _ = writeln!(output, "| Token limit | {} |", report.errors.token_limit);
            let _ = writeln!(output, "| Transport | {} |", report.errors.transport);
            let _ = writeln!(output, "| Timeout | {} |", report.errors.timeout);
        }
        let _ = writeln!(output);
    }

    fn write_error_detail(&self, output: &mut String) {
        let _ = writeln!(output, "## Errors");
        let _ = writeln!(output);

        // The failed section's attempts are already covered by the run
        // error's reason list, so the walk below skips it.
        let failed_section = self
            .record
            .error
            .as_ref()
            .and_then(|error| error.failure())
            .map(|failure| failure.section_name);

        if let Some(error) = &self.record.error {
            if let Some(failure) = error.failure() {
                let _ = writeln!(
                    output,
                    "**Run error**: section `{}` gave up ({}) after {} attempt(s).",
                    failure.section_name, failure.kind, failure.attempts_exhausted
                );
                let _ = writeln!(output);
                for reason in &failure.reasons {
                    let _ = writeln!(
                        output,
                        "- {}",
                        escape_markdown(&truncate_message(reason, MAX_REASON_DISPLAY_LENGTH))
                    );
                }
                if !failure.reasons.is_empty() {
                    let _ = writeln!(output);
                }
            } else {
                let _ = writeln!(
                    output,
                    "**Run error**: {}",
                    escape_markdown(&error.to_string())
                );
                let _ = writeln!(output);
            }
        }

        let mut failures = String::new();
        for section in &self.record.sections {
            if Some(section.name) == failed_section {
                continue;
            }
            for attempt in &section.attempts {
                write_attempt_failure(&mut failures, section.name, attempt);
            }
        }

        if failures.is_empty() {
            if self.record.error.is_none() {
                let _ = writeln!(output, "*No errors recorded.*");
                let _ = writeln!(output);
            }
        } else {
            let _ = writeln!(output, "**Attempt failures**:");
            let _ = writeln!(output);
            output.push_str(&failures);
            let _ = writeln!(output);
        }
    }
}

fn write_attempt_failure(output: &mut String, section: SectionName, attempt: &Attempt) {
    match &attempt.outcome {
        AttemptOutcome::Valid => {}
        AttemptOutcome::Invalid { reasons } | AttemptOutcome::TokenLimitExceeded { reasons } => {
            let _ = writeln!(
                output,
                "- `{section}` attempt {} (cap {} tokens): {}",
                attempt.index,
                attempt.token_cap,
                attempt.outcome.label()
            );
            for reason in reasons {
                let _ = writeln!(
                    output,
                    "  - {}",
                    escape_markdown(&truncate_message(reason, MAX_REASON_DISPLAY_LENGTH))
                );
            }
        }
        AttemptOutcome::TransportError { kind, message } => {
            let _ = writeln!(
                output,
                "- `{section}` attempt {} (cap {} tokens): {}",
                attempt.index,
                attempt.token_cap,
                attempt.outcome.label()
            );
            let _ = writeln!(
                output,
                "  - {kind}: {}",
                escape_markdown(&truncate_message(message, MAX_REASON_DISPLAY_LENGTH))
            );
        }
    }
}

// ============================================================================
// Shared helpers
// ============================================================================

fn write_footer(output: &mut String, timestamp: &DateTime<Utc>) {
    let _ = writeln!(output, "---");
    let _ = writeln!(output);
    let _ = writeln!(output, "*Generated by Lilt at {}*", format_timestamp(timestamp));
}

/// Formats a duration in seconds as a human-readable string.
///
/// - 65 seconds -> "1m 5s"
/// - 3661 seconds -> "1h 1m 1s"
/// - 45 seconds -> "45s"
fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    let mut parts = Vec::new();

    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    if secs > 0 || parts.is_empty() {
        parts.push(format!("{secs}s"));
    }

    parts.join(" ")
}

/// Formats a timestamp to a human-readable string.
///
/// Format: "YYYY-MM-DD HH:MM:SS UTC"
fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Wall-clock span from the first attempt started to the last one finished.
fn run_duration_seconds(sections: &[Section]) -> u64 {
    let started = sections
        .iter()
        .flat_map(|section| &section.attempts)
        .map(|attempt| attempt.started_at)
        .min();
    let finished = sections
        .iter()
        .flat_map(|section| &section.attempts)
        .map(|attempt| attempt.finished_at)
        .max();

    match (started, finished) {
        (Some(start), Some(end)) => u64::try_from((end - start).num_seconds()).unwrap_or(0),
        _ => 0,
    }
}

/// Escapes special Markdown characters in text.
///
/// This prevents generated content from being interpreted as Markdown
/// formatting.
fn escape_markdown(text: &str) -> String {
    let mut result = String::with_capacity(text.len());

    for ch in text.chars() {
        match ch {
            '*' | '_' | '`' | '#' | '[' | ']' | '(' | ')' | '!' | '\\' | '<' | '>' | '|' => {
                result.push('\\');
                result.push(ch);
            }
            '\n' => {
                // Replace newlines with <br> for table cells
                result.push_str("<br>");
            }
            _ => result.push(ch),
        }
    }

    result
}

/// Escapes backticks in text intended for inline code.
fn escape_markdown_inline_code(text: &str) -> String {
    text.replace('`', "'")
}

/// Truncates a message to a maximum length, adding an ellipsis if needed.
/// Uses character boundaries to avoid slicing multibyte UTF-8 characters.
fn truncate_message(message: &str, max_length: usize) -> String {
    // Take only the first line to keep list items on one row
    let first_line = message.lines().next().unwrap_or("");

    if first_line.len() <= max_length {
        first_line.to_string()
    } else {
        let truncate_at = first_line
            .char_indices()
            .take_while(|(idx, _)| *idx < max_length)
            .last()
            .map_or(0, |(idx, c)| idx + c.len_utf8());
        format!("{}...", &first_line[..truncate_at])
    }
}

// ============================================================================
// Tests
// ============================================================================
