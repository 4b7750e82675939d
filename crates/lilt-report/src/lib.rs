//! Output rendering for Lilt lesson runs.
//!
//! This crate turns the pipeline's two artifacts into files a caller can
//! hand to a person or a program:
//!
//! - [`LessonRenderer`] renders a finished [`lilt_pipeline::Lesson`] into a
//!   printable Markdown document, with answer keys separated from the
//!   exercises they belong to.
//! - [`RunReportRenderer`] renders a [`lilt_pipeline::RunRecord`] into a
//!   Markdown run report: what was generated, how many attempts each
//!   section took, what the run cost in tokens, and what went wrong.
//! - [`JsonExporter`] serializes either artifact as compact or
//!   pretty-printed JSON, in memory or straight to a file.
//!
//! Rendering never mutates the artifact it is given; every renderer wraps
//! a shared reference.

use thiserror::Error;

pub mod json;
mod markdown;

pub use json::JsonExporter;
pub use markdown::{LessonRenderer, RunReportRenderer};

/// Errors that can occur while producing report output.
#[derive(Debug, Error)]
pub enum ReportError {
    /// JSON serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Writing the output file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for report operations.
pub type Result<T> = std::result::Result<T, ReportError>;
