//! All-or-nothing assembly of validated sections into a [`Lesson`].
//!
//! Assembly is a pure merge: it reads the validated content off each
//! section, lifts the title section's text into `Lesson.title`, and attaches
//! run metadata. It performs no generation and no validation of its own. A
//! missing required section is a typed error; given the retry layer's
//! all-or-nothing policy it should never happen on a successful run.

use chrono::Utc;
use tracing::debug;

use crate::context::SharedContext;
use crate::error::{PipelineError, Result};
use crate::lesson::{
    DialogueSection, GrammarSection, Lesson, LessonMetadata, LessonSections, PronunciationSection,
    QuestionSet, ReadingSection, Section, SectionContent, SectionName, VocabularySection,
};
use crate::usage::TokenReport;

/// Merges a run's validated sections into a complete lesson.
pub struct LessonAssembler;

impl LessonAssembler {
    /// Builds the lesson from the run's sections and final accounting.
    ///
    /// The title is taken from the title section's content, or from the
    /// context's title when the run resolved one another way. Required
    /// sections are the four core ones, the lesson type's focus section,
    /// the wrap-up, and a title.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::AssemblyIncomplete` naming every required
    /// piece that has no validated content.
    pub fn assemble(
        sections: &[Section],
        context: &SharedContext,
        token_report: TokenReport,
    ) -> Result<Lesson> {
        let mut parts = CollectedParts::default();
        for section in sections {
            parts.take(section);
        }

        let focus = context.lesson_type.focus_section();
        let title = parts.title.clone().or_else(|| context.title.clone());

        let mut missing: Vec<&str> = Vec::new();
        if parts.warmup.is_none() {
            missing.push(SectionName::Warmup.as_str());
        }
        if parts.vocabulary.is_none() {
            missing.push(SectionName::Vocabulary.as_str());
        }
        if parts.reading.is_none() {
            missing.push(SectionName::Reading.as_str());
        }
        if parts.comprehension.is_none() {
            missing.push(SectionName::Comprehension.as_str());
        }
        if !parts.has_focus(focus) {
            missing.push(focus.as_str());
        }
        if parts.wrapup.is_none() {
            missing.push(SectionName::Wrapup.as_str());
        }
        if title.is_none() {
            missing.push(SectionName::Title.as_str());
        }
        if !missing.is_empty() {
            return Err(PipelineError::assembly_incomplete(missing.join(", ")));
        }

        debug!(focus = %focus, "assembling lesson");

        // The checks above guarantee every required part is present.
        let (Some(warmup), Some(vocabulary), Some(reading), Some(comprehension), Some(wrapup), Some(title)) = (
            parts.warmup,
            parts.vocabulary,
            parts.reading,
            parts.comprehension,
            parts.wrapup,
            title,
        ) else {
            return Err(PipelineError::assembly_incomplete(
                SectionName::all()
                    .iter()
                    .map(SectionName::as_str)
                    .collect::<Vec<_>>()
                    .join(", "),
            ));
        };

        Ok(Lesson {
            title,
            sections: LessonSections {
                warmup,
                vocabulary,
                reading,
                comprehension,
                discussion: parts.discussion,
                grammar: parts.grammar,
                pronunciation: parts.pronunciation,
                dialogue: parts.dialogue,
                wrapup,
            },
            metadata: LessonMetadata {
                cefr_level: context.cefr_level,
                lesson_type: context.lesson_type,
                target_language: context.target_language.clone(),
                token_report,
                generated_at: Utc::now(),
                source_metadata: context.source_metadata.clone(),
            },
        })
    }
}

/// Validated contents sorted into their lesson slots.
#[derive(Default)]
struct CollectedParts {
    warmup: Option<QuestionSet>,
    vocabulary: Option<VocabularySection>,
    reading: Option<ReadingSection>,
    comprehension: Option<QuestionSet>,
    discussion: Option<QuestionSet>,
    grammar: Option<GrammarSection>,
    pronunciation: Option<PronunciationSection>,
    dialogue: Option<DialogueSection>,
    wrapup: Option<QuestionSet>,
    title: Option<String>,
}

impl CollectedParts {
    fn take(&mut self, section: &Section) {
        match &section.content {
            Some(SectionContent::Warmup(data)) => self.warmup = Some(data.clone()),
            Some(SectionContent::Vocabulary(data)) => self.vocabulary = Some(data.clone()),
            Some(SectionContent::Reading(data)) => self.reading = Some(data.clone()),
            Some(SectionContent::Comprehension(data)) => self.comprehension = Some(data.clone()),
            Some(SectionContent::Discussion(data)) => self.discussion = Some(data.clone()),
            Some(SectionContent::Grammar(data)) => self.grammar = Some(data.clone()),
            Some(SectionContent::Pronunciation(data)) => self.pronunciation = Some(data.clone()),
            Some(SectionContent::Dialogue(data)) => self.dialogue = Some(data.clone()),
            Some(SectionContent::Wrapup(data)) => self.wrapup = Some(data.clone()),
            Some(SectionContent::Title(data)) => self.title = Some(data.title.clone()),
            None => {}
        }
    }

    const fn has_focus(&self, focus: SectionName) -> bool {
        match focus {
            SectionName::Discussion => self.discussion.is_some(),
            SectionName::Grammar => self.grammar.is_some(),
            SectionName::Pronunciation => self.pronunciation.is_some(),
            SectionName::Dialogue => self.dialogue.is_some(),
            _ => true,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::lesson::{
        CefrLevel, GenerateLessonRequest, LessonType, SectionStatus, SourceMetadata, TitleSection,
        VocabularyItem,
    };

    fn valid_section(name: SectionName, content: SectionContent) -> Section {
        Section {
            name,
            status: SectionStatus::Valid,
            attempts: Vec::new(),
            content: Some(content),
        }
    }

    fn question_set() -> QuestionSet {
        QuestionSet::new(vec!["What did you learn?".to_string()])
    }

    fn core_sections() -> Vec<Section> {
        vec![
            valid_section(SectionName::Warmup, SectionContent::Warmup(question_set())),
            valid_section(
                SectionName::Vocabulary,
                SectionContent::Vocabulary(VocabularySection {
                    words: vec![VocabularyItem {
                        word: "ocean".to_string(),
                        meaning: "a large body of salt water".to_string(),
                        examples: vec!["The ocean is deep.".to_string()],
                    }],
                }),
            ),
            valid_section(
                SectionName::Reading,
                SectionContent::Reading(ReadingSection {
                    passage: "The **ocean** is warming.".to_string(),
                    vocabulary_used: vec!["ocean".to_string()],
                }),
            ),
            valid_section(
                SectionName::Comprehension,
                SectionContent::Comprehension(question_set()),
            ),
            valid_section(SectionName::Wrapup, SectionContent::Wrapup(question_set())),
        ]
    }

    fn context(lesson_type: LessonType) -> SharedContext {
        let request =
            GenerateLessonRequest::new("The ocean is warming.", lesson_type, CefrLevel::B1, "English");
        SharedContext::new(&request)
    }

    #[test]
    fn test_assemble_discussion_lesson() {
        let mut sections = core_sections();
        sections.push(valid_section(
            SectionName::Discussion,
            SectionContent::Discussion(question_set()),
        ));
        sections.push(valid_section(
            SectionName::Title,
            SectionContent::Title(TitleSection {
                title: "Our Warming Ocean".to_string(),
            }),
        ));

        let context = context(LessonType::Discussion);
        let lesson =
            LessonAssembler::assemble(&sections, &context, TokenReport::default()).unwrap();

        assert_eq!(lesson.title, "Our Warming Ocean");
        assert!(lesson.sections.discussion.is_some());
        assert!(lesson.sections.grammar.is_none());
        assert_eq!(lesson.metadata.cefr_level, CefrLevel::B1);
        assert_eq!(lesson.metadata.lesson_type, LessonType::Discussion);
        assert_eq!(lesson.metadata.target_language, "English");
    }

    #[test]
    fn test_assemble_fails_on_missing_required_section() {
        let mut sections = core_sections();
        sections.retain(|s| s.name != SectionName::Reading);
        sections.push(valid_section(
            SectionName::Discussion,
            SectionContent::Discussion(question_set()),
        ));
        sections.push(valid_section(
            SectionName::Title,
            SectionContent::Title(TitleSection {
                title: "Our Warming Ocean".to_string(),
            }),
        ));

        let context = context(LessonType::Discussion);
        let err =
            LessonAssembler::assemble(&sections, &context, TokenReport::default()).unwrap_err();

        assert!(matches!(
            &err,
            PipelineError::AssemblyIncomplete { missing } if missing.contains("reading")
        ));
    }

    #[test]
    fn test_assemble_requires_the_focus_section() {
        let mut sections = core_sections();
        // A grammar lesson with a discussion section is still incomplete.
        sections.push(valid_section(
            SectionName::Discussion,
            SectionContent::Discussion(question_set()),
        ));
        sections.push(valid_section(
            SectionName::Title,
            SectionContent::Title(TitleSection {
                title: "Our Warming Ocean".to_string(),
            }),
        ));

        let context = context(LessonType::Grammar);
        let err =
            LessonAssembler::assemble(&sections, &context, TokenReport::default()).unwrap_err();

        assert!(matches!(
            &err,
            PipelineError::AssemblyIncomplete { missing } if missing.contains("grammar")
        ));
    }

    #[test]
    fn test_assemble_uses_title_resolved_in_context() {
        let mut sections = core_sections();
        sections.push(valid_section(
            SectionName::Discussion,
            SectionContent::Discussion(question_set()),
        ));

        let mut context = context(LessonType::Discussion);
        context.set_title("Title From The Caller");

        let lesson =
            LessonAssembler::assemble(&sections, &context, TokenReport::default()).unwrap();
        assert_eq!(lesson.title, "Title From The Caller");
    }

    #[test]
    fn test_assemble_without_any_title_fails() {
        let mut sections = core_sections();
        sections.push(valid_section(
            SectionName::Discussion,
            SectionContent::Discussion(question_set()),
        ));

        let context = context(LessonType::Discussion);
        let err =
            LessonAssembler::assemble(&sections, &context, TokenReport::default()).unwrap_err();

        assert!(matches!(
            &err,
            PipelineError::AssemblyIncomplete { missing } if missing.contains("title")
        ));
    }

    #[test]
    fn test_assemble_passes_source_metadata_through() {
        let mut sections = core_sections();
        sections.push(valid_section(
            SectionName::Dialogue,
            SectionContent::Dialogue(DialogueSection {
                lines: Vec::new(),
                gap_fill: None,
            }),
        ));
        sections.push(valid_section(
            SectionName::Title,
            SectionContent::Title(TitleSection {
                title: "Checking In".to_string(),
            }),
        ));

        let request = GenerateLessonRequest::new(
            "At the hotel desk.",
            LessonType::Travel,
            CefrLevel::A2,
            "English",
        )
        .with_metadata(SourceMetadata {
            title: Some("Hotel Basics".to_string()),
            domain: Some("example.com".to_string()),
            source_url: None,
            banner_image: None,
        });
        let context = SharedContext::new(&request);

        let lesson =
            LessonAssembler::assemble(&sections, &context, TokenReport::default()).unwrap();
        let metadata = lesson.metadata.source_metadata.unwrap();
        assert_eq!(metadata.title.as_deref(), Some("Hotel Basics"));
        assert_eq!(metadata.domain.as_deref(), Some("example.com"));
    }
}
