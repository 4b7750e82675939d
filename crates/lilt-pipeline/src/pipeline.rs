//! Sequential orchestration of a whole lesson-generation run.
//!
//! The orchestrator turns a [`GenerateLessonRequest`] into a [`Lesson`] by
//! walking an explicit section plan: the four core sections, the lesson
//! type's focus section, the wrap-up, and finally the title over the full
//! accumulated context. Each step declares which [`ContextField`]s it
//! reads, so a section can never run before the context it builds on
//! exists. After a section succeeds its content is folded back into the
//! [`SharedContext`] before the next section starts.
//!
//! The run either ends with a complete lesson or with a typed error naming
//! the failing section; there is no partially generated lesson.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use lilt_client::GenerationClient;

use crate::assemble::LessonAssembler;
use crate::config::PipelineConfig;
use crate::context::{ContextExtractor, ContextField, SharedContext, VocabularyEntry};
use crate::error::{FailureKind, GenerationError, PipelineError, Result};
use crate::lesson::{
    GenerateLessonRequest, Lesson, LessonType, Section, SectionContent, SectionName, SectionStatus,
};
use crate::progress::{ProgressBroadcaster, ProgressEvent, ProgressTracker};
use crate::retry::RetryController;
use crate::usage::{TokenReport, UsageMonitor};

// ============================================================================
// RunRecord
// ============================================================================

/// Everything one pipeline run produced.
///
/// The record keeps the per-section attempt histories and the token report
/// even when the run failed, so a run report can be rendered either way.
#[derive(Debug)]
pub struct RunRecord {
    /// Driven sections in plan order, including a failed final one.
    pub sections: Vec<Section>,

    /// Aggregated token and attempt accounting.
    pub token_report: TokenReport,

    /// The assembled lesson, on success.
    pub lesson: Option<Lesson>,

    /// The failure that ended the run, if it failed.
    pub error: Option<PipelineError>,
}

impl RunRecord {
    /// Collapses the record into the lesson-or-error contract.
    pub fn finish(self) -> Result<Lesson> {
        match (self.lesson, self.error) {
            (Some(lesson), _) => Ok(lesson),
            (None, Some(error)) => Err(error),
            (None, None) => Err(PipelineError::assembly_incomplete("lesson")),
        }
    }

    /// Returns `true` if the supplied source title stood in for a failed
    /// title generation.
    #[must_use]
    pub fn used_supplied_title(&self) -> bool {
        self.lesson.is_some()
            && self
                .sections
                .iter()
                .any(|s| s.name == SectionName::Title && s.status == SectionStatus::FailedExhausted)
    }
}

// ============================================================================
// PipelineOrchestrator
// ============================================================================

/// Runs generation requests against a [`GenerationClient`].
///
/// One orchestrator can serve many requests; each run owns its context and
/// accounting. Progress events for every run go out through the shared
/// broadcaster.
pub struct PipelineOrchestrator {
    client: Arc<dyn GenerationClient>,
    config: PipelineConfig,
    broadcaster: ProgressBroadcaster,
}

impl PipelineOrchestrator {
    /// Creates an orchestrator with a default progress broadcaster.
    #[must_use]
    pub fn new(client: Arc<dyn GenerationClient>, config: PipelineConfig) -> Self {
        Self {
            client,
            config,
            broadcaster: ProgressBroadcaster::default(),
        }
    }

    /// Replaces the progress broadcaster.
    #[must_use]
    pub fn with_broadcaster(mut self, broadcaster: ProgressBroadcaster) -> Self {
        self.broadcaster = broadcaster;
        self
    }

    /// Subscribes to this orchestrator's progress events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.broadcaster.subscribe()
    }

    /// Returns the section plan for a lesson type, title last.
    #[must_use]
    pub fn plan(lesson_type: LessonType) -> Vec<SectionName> {
        vec![
            SectionName::Warmup,
            SectionName::Vocabulary,
            SectionName::Reading,
            SectionName::Comprehension,
            lesson_type.focus_section(),
            SectionName::Wrapup,
            SectionName::Title,
        ]
    }

    /// Returns the context fields a section reads.
    ///
    /// A section only runs once every declared field has content, which
    /// rules out forward references at the plan level: nothing can consume
    /// vocabulary or the reading passage before the producing section ran.
    #[must_use]
    pub const fn read_set(section: SectionName) -> &'static [ContextField] {
        match section {
            SectionName::Warmup | SectionName::Vocabulary | SectionName::Wrapup
            | SectionName::Title => &[ContextField::Summary],
            SectionName::Reading
            | SectionName::Discussion
            | SectionName::Grammar
            | SectionName::Pronunciation
            | SectionName::Dialogue => &[ContextField::Vocabulary],
            SectionName::Comprehension => &[ContextField::ReadingPassage],
        }
    }

    /// Runs the pipeline and returns the lesson-or-error contract.
    pub async fn run(&self, request: GenerateLessonRequest) -> Result<Lesson> {
        self.run_recorded(request).await.finish()
    }

    /// Runs the pipeline and returns the full run record.
    #[instrument(
        skip_all,
        fields(lesson_type = %request.lesson_type, level = %request.cefr_level)
    )]
    pub async fn run_recorded(&self, request: GenerateLessonRequest) -> RunRecord {
        let plan = Self::plan(request.lesson_type);
        let mut tracker = ProgressTracker::new(plan.len());
        let monitor = UsageMonitor::new();
        let mut sections: Vec<Section> = Vec::with_capacity(plan.len());

        self.broadcaster.send(tracker.extracting());
        let mut context = ContextExtractor::extract(&request);
        self.broadcaster.send(tracker.context_ready());
        info!(
            themes = context.themes.len(),
            candidates = context.vocabulary.len(),
            "shared context extracted"
        );

        let deadline = match self.config.run_timeout_secs {
            0 => None,
            secs => Some(Instant::now() + Duration::from_secs(secs)),
        };

        for name in plan {
            if let Err(error) = Self::check_read_set(&context, name) {
                self.broadcaster.send(tracker.failed(Some(name)));
                return self.seal(sections, monitor, None, Some(error)).await;
            }

            let mut section = Section::new(name);
            self.broadcaster.send(tracker.section_started(name));

            let mut controller =
                RetryController::new(self.client.as_ref(), &self.config, &context, &monitor);
            let driven = match deadline {
                Some(at) => tokio::time::timeout_at(at, controller.drive(&mut section)).await,
                None => Ok(controller.drive(&mut section).await),
            };

            match driven {
                Err(_elapsed) => {
                    let error = Self::expire_section(&mut section, self.config.run_timeout_secs);
                    warn!(section = %name, "run timeout expired, cancelling the active section");
                    sections.push(section);
                    self.broadcaster.send(tracker.failed(Some(name)));
                    return self.seal(sections, monitor, None, Some(error)).await;
                }
                Ok(Err(error)) => {
                    let supplied = context
                        .source_metadata
                        .as_ref()
                        .and_then(|metadata| metadata.title.clone());
                    if name == SectionName::Title && error.is_section_failure() {
                        if let Some(title) = supplied {
                            warn!("title generation failed, falling back to the supplied source title");
                            context.set_title(title);
                            sections.push(section);
                            self.broadcaster.send(tracker.section_completed(name));
                            continue;
                        }
                    }
                    sections.push(section);
                    self.broadcaster.send(tracker.failed(Some(name)));
                    return self.seal(sections, monitor, None, Some(error)).await;
                }
                Ok(Ok(content)) => {
                    Self::absorb(&mut context, &content);
                    sections.push(section);
                    self.broadcaster.send(tracker.section_completed(name));
                }
            }
        }

        self.broadcaster.send(tracker.assembling());
        let token_report = monitor.report().await;
        match LessonAssembler::assemble(&sections, &context, token_report.clone()) {
            Ok(lesson) => {
                self.broadcaster.send(tracker.completed());
                info!(
                    total_tokens = token_report.total_tokens,
                    total_attempts = token_report.total_attempts,
                    "lesson generation complete"
                );
                RunRecord {
                    sections,
                    token_report,
                    lesson: Some(lesson),
                    error: None,
                }
            }
            Err(error) => {
                self.broadcaster.send(tracker.failed(None));
                RunRecord {
                    sections,
                    token_report,
                    lesson: None,
                    error: Some(error),
                }
            }
        }
    }

    /// Finalizes a failed run's record.
    async fn seal(
        &self,
        sections: Vec<Section>,
        monitor: UsageMonitor,
        lesson: Option<Lesson>,
        error: Option<PipelineError>,
    ) -> RunRecord {
        RunRecord {
            sections,
            token_report: monitor.report().await,
            lesson,
            error,
        }
    }

    /// Marks the active section failed when the run deadline expires.
    fn expire_section(section: &mut Section, timeout_secs: u64) -> PipelineError {
        if section.status == SectionStatus::Pending {
            if let Err(error) = section.begin_attempt() {
                return error;
            }
        }
        if let Err(error) = section.fail() {
            return error;
        }
        GenerationError::new(
            section.name,
            FailureKind::Timeout,
            vec![format!(
                "run exceeded its {timeout_secs}s budget during the {} section",
                section.name
            )],
            section.attempt_count(),
        )
        .into()
    }

    fn check_read_set(context: &SharedContext, section: SectionName) -> Result<()> {
        for field in Self::read_set(section) {
            if !context.has(*field) {
                return Err(PipelineError::context_missing(section, field.as_str()));
            }
        }
        Ok(())
    }

    /// Folds a validated section's content back into the shared context.
    fn absorb(context: &mut SharedContext, content: &SectionContent) {
        match content {
            SectionContent::Vocabulary(data) => {
                context.extend_vocabulary(data.words.iter().map(|item| {
                    VocabularyEntry::taught(
                        item.word.clone(),
                        item.meaning.clone(),
                        u32::try_from(item.examples.len()).unwrap_or(u32::MAX),
                    )
                }));
            }
            SectionContent::Reading(data) => {
                context.set_reading_passage(data.passage.clone());
            }
            SectionContent::Title(data) => {
                context.set_title(data.title.clone());
            }
            SectionContent::Warmup(_)
            | SectionContent::Comprehension(_)
            | SectionContent::Discussion(_)
            | SectionContent::Grammar(_)
            | SectionContent::Pronunciation(_)
            | SectionContent::Dialogue(_)
            | SectionContent::Wrapup(_) => {}
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
