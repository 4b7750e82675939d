//! Progress events and broadcasting for observing a generation run.
//!
//! The orchestrator emits one [`ProgressEvent`] before and after every
//! section step, plus run-level events for extraction, assembly, and the
//! terminal outcome. Percentages are derived from completed steps over the
//! plan length and are clamped so the stream is monotonically
//! non-decreasing, ending at 100 on success.
//!
//! # Example
//!
//! ```
//! use lilt_pipeline::{ProgressBroadcaster, ProgressTracker, SectionName};
//!
//! # async fn example() {
//! let broadcaster = ProgressBroadcaster::new(100);
//! let mut receiver = broadcaster.subscribe();
//!
//! let mut tracker = ProgressTracker::new(2);
//! broadcaster.send(tracker.section_started(SectionName::Warmup));
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("{}% {}", event.progress_percent, event.step);
//! }
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::lesson::SectionName;

// ============================================================================
// Phase and event
// ============================================================================

/// The coarse stage a run is in when an event is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    /// Deriving the shared context from the source text.
    Extracting,
    /// A section's generation call is running.
    Generating,
    /// A section's reply passed validation.
    Validating,
    /// Merging validated sections into the lesson.
    Assembling,
    /// The run produced a complete lesson.
    Completed,
    /// The run ended without a lesson.
    Failed,
}

impl PipelinePhase {
    /// Returns the snake_case label for this phase.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Extracting => "extracting",
            Self::Generating => "generating",
            Self::Validating => "validating",
            Self::Assembling => "assembling",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One point in the ordered progress stream of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// Human-readable description of the step.
    pub step: String,

    /// Run completion in percent, 0 through 100, never decreasing.
    pub progress_percent: u8,

    /// The stage the run is in.
    pub phase: PipelinePhase,

    /// The section the event concerns, when it concerns one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<SectionName>,
}

// ============================================================================
// Tracker
// ============================================================================

/// Builds the progress stream for one run.
///
/// The tracker counts completed steps (context extraction, each planned
/// section, assembly) against the plan length. Reported percentages only
/// ever move forward; a failure event keeps the percentage where the run
/// stopped.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total_steps: usize,
    completed_steps: usize,
    percent: u8,
}

impl ProgressTracker {
    /// Creates a tracker for a plan with the given number of sections.
    ///
    /// Context extraction and assembly count as one step each on top of
    /// the sections.
    #[must_use]
    pub const fn new(section_count: usize) -> Self {
        Self {
            total_steps: section_count.saturating_add(2),
            completed_steps: 0,
            percent: 0,
        }
    }

    /// Returns the last reported percentage.
    #[must_use]
    pub const fn percent(&self) -> u8 {
        self.percent
    }

    /// Emits the run-start event for context extraction.
    pub fn extracting(&mut self) -> ProgressEvent {
        self.event("extracting shared context", PipelinePhase::Extracting, None)
    }

    /// Marks context extraction complete.
    pub fn context_ready(&mut self) -> ProgressEvent {
        self.complete_step();
        self.event("shared context ready", PipelinePhase::Extracting, None)
    }

    /// Emits the before-event for a section step.
    pub fn section_started(&mut self, section: SectionName) -> ProgressEvent {
        self.event(
            format!("generating {section} section"),
            PipelinePhase::Generating,
            Some(section),
        )
    }

    /// Marks a section step complete after its content validated.
    pub fn section_completed(&mut self, section: SectionName) -> ProgressEvent {
        self.complete_step();
        self.event(
            format!("{section} section validated"),
            PipelinePhase::Validating,
            Some(section),
        )
    }

    /// Emits the assembly event once every planned section is done.
    pub fn assembling(&mut self) -> ProgressEvent {
        self.event("assembling lesson", PipelinePhase::Assembling, None)
    }

    /// Emits the terminal success event at 100 percent.
    pub fn completed(&mut self) -> ProgressEvent {
        self.completed_steps = self.total_steps;
        self.percent = 100;
        self.event("lesson complete", PipelinePhase::Completed, None)
    }

    /// Emits the terminal failure event, keeping the current percentage.
    pub fn failed(&mut self, section: Option<SectionName>) -> ProgressEvent {
        let step = section.map_or_else(
            || "run failed".to_string(),
            |name| format!("run failed in the {name} section"),
        );
        self.event(step, PipelinePhase::Failed, section)
    }

    fn complete_step(&mut self) {
        self.completed_steps = self.completed_steps.saturating_add(1).min(self.total_steps);
        let raw = self.completed_steps.saturating_mul(100) / self.total_steps;
        let raw = u8::try_from(raw).unwrap_or(100);
        // Clamped so a recomputed percentage can never move backwards.
        self.percent = self.percent.max(raw).min(100);
    }

    fn event(
        &self,
        step: impl Into<String>,
        phase: PipelinePhase,
        section: Option<SectionName>,
    ) -> ProgressEvent {
        ProgressEvent {
            step: step.into(),
            progress_percent: self.percent,
            phase,
            section,
        }
    }
}

// ============================================================================
// Broadcaster
// ============================================================================

/// Broadcasts progress events to every subscriber of a run.
///
/// Uses a tokio broadcast channel for pub-sub distribution. Events are not
/// persisted for late subscribers.
#[derive(Debug, Clone)]
pub struct ProgressBroadcaster {
    sender: broadcast::Sender<ProgressEvent>,
}

impl ProgressBroadcaster {
    /// Creates a broadcaster with the given per-subscriber buffer capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new subscriber for receiving events.
    ///
    /// Each subscriber maintains its own buffer. A subscriber that falls
    /// behind receives a `Lagged` error and misses events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    /// Broadcasts an event to all subscribers.
    ///
    /// Returns the number of receivers the event was delivered to. Err from
    /// the channel only means there are no receivers.
    pub fn send(&self, event: ProgressEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

// ============================================================================
// Tests
// ============================================================================
