//! JSON export for lesson-run artifacts.
//!
//! [`JsonExporter`] serializes any of the pipeline's output types, most
//! commonly a `Lesson` or a `RunRecord`, as compact single-line JSON for
//! programmatic consumers or pretty-printed JSON for people.
//!
//! # Example
//!
//! ```rust
//! use lilt_report::JsonExporter;
//!
//! let lesson = serde_json::json!({ "title": "Our Warming Ocean" });
//! let exporter = JsonExporter::new(&lesson);
//!
//! let compact = exporter.compact().unwrap();
//! assert!(!compact.contains('\n'));
//!
//! let pretty = exporter.pretty().unwrap();
//! assert!(pretty.contains('\n'));
//! ```

use std::fs::File;
use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::{ReportError, Result};

/// Serializes a borrowed value as JSON.
///
/// Wraps a reference to any [`Serialize`] value and writes it out compact,
/// pretty-printed, or straight to a file.
pub struct JsonExporter<'a, T> {
    value: &'a T,
}

impl<'a, T: Serialize> JsonExporter<'a, T> {
    /// Creates an exporter for the given value.
    #[must_use]
    pub const fn new(value: &'a T) -> Self {
        Self { value }
    }

    /// Serializes the value as compact single-line JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Serialization`] if serialization fails.
    pub fn compact(&self) -> Result<String> {
        serde_json::to_string(self.value).map_err(ReportError::from)
    }

    /// Serializes the value as pretty-printed JSON with 2-space indentation.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Serialization`] if serialization fails.
    pub fn pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self.value).map_err(ReportError::from)
    }

    /// Writes the serialized value to a file, creating or overwriting it.
    ///
    /// Parent directories must exist.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Serialization`] if serialization fails, or
    /// [`ReportError::Io`] if the file cannot be created or written.
    pub fn write_to_file(&self, path: &Path, pretty: bool) -> Result<()> {
        let json = if pretty { self.pretty()? } else { self.compact()? };

        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;

        Ok(())
    }
}
