//! Lilt lesson-generation pipeline
//!
//! Turns raw source text into a complete, CEFR-calibrated language lesson
//! through a sequence of validated generation steps: shared-context
//! extraction, per-section prompt building, bounded retry around the
//! generation client, deterministic validation, and all-or-nothing
//! assembly. Progress and usage are observable throughout a run.

pub mod assemble;
pub mod config;
pub mod context;
pub mod error;
pub mod lesson;
pub mod pipeline;
pub mod progress;
pub mod prompt;
pub mod retry;
pub mod usage;
pub mod validate;

// Client types that appear in this crate's public API.
pub use lilt_client::{CallUsage, TransportErrorKind};

pub use assemble::LessonAssembler;
pub use config::{
    CefrProfile, CountRange, PipelineConfig, RetryConfig, SectionCounts, SectionPolicy,
};
pub use context::{
    ContextExtractor, ContextField, SharedContext, SourceText, VocabularyEntry, MAX_SOURCE_SIZE,
};
pub use error::{FailureKind, GenerationError, PipelineError, Result};
pub use lesson::{
    Attempt, AttemptOutcome, CefrLevel, DialogueLine, DialogueSection, GapFill,
    GenerateLessonRequest, GrammarExercise, GrammarSection, Lesson, LessonMetadata,
    LessonSections, LessonType, PronunciationItem, PronunciationSection, QuestionSet,
    ReadingSection, Section, SectionContent, SectionName, SectionStatus, SourceMetadata,
    TitleSection, VocabularyItem, VocabularySection,
};
pub use pipeline::{PipelineOrchestrator, RunRecord};
pub use progress::{PipelinePhase, ProgressBroadcaster, ProgressEvent, ProgressTracker};
pub use prompt::{AttemptScope, PromptBuilder};
pub use retry::{RetryController, RetryState};
pub use usage::{
    CallDisposition, CallRecord, ErrorCounts, SectionUsage, SharedUsageMonitor, TokenReport,
    UsageMonitor,
};
pub use validate::{SectionValidator, Verdict};
