//! Jobs handed to the queue and the options that travel with them

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::task::FileKind;
use crate::error::{Error, Result};

/// Lower bound for `max_summary_length`
pub const MIN_SUMMARY_LENGTH: usize = 50;
/// Upper bound for `max_summary_length`
pub const MAX_SUMMARY_LENGTH: usize = 1000;

/// Summary strategy
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SummaryType {
    /// Sentence scoring by position, length and content-word density
    #[default]
    Extractive,
    /// Keyword-frequency sentence selection
    Abstractive,
}

/// Per-document processing options
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessingOptions {
    pub generate_summary: bool,
    /// Characters, 50-1000
    pub max_summary_length: usize,
    pub summary_type: SummaryType,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            generate_summary: true,
            max_summary_length: 200,
            summary_type: SummaryType::Extractive,
        }
    }
}

impl ProcessingOptions {
    /// Reject out-of-range values
    pub fn validate(&self) -> Result<()> {
        if !(MIN_SUMMARY_LENGTH..=MAX_SUMMARY_LENGTH).contains(&self.max_summary_length) {
            return Err(Error::InvalidOptions(format!(
                "maxSummaryLength must be between {} and {}, got {}",
                MIN_SUMMARY_LENGTH, MAX_SUMMARY_LENGTH, self.max_summary_length
            )));
        }
        Ok(())
    }
}

/// Options as sent by a client. Fields left out take the server's defaults.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OptionOverrides {
    pub generate_summary: Option<bool>,
    pub max_summary_length: Option<usize>,
    pub summary_type: Option<SummaryType>,
}

impl OptionOverrides {
    pub fn resolve(self, defaults: &ProcessingOptions) -> ProcessingOptions {
        ProcessingOptions {
            generate_summary: self.generate_summary.unwrap_or(defaults.generate_summary),
            max_summary_length: self.max_summary_length.unwrap_or(defaults.max_summary_length),
            summary_type: self.summary_type.unwrap_or(defaults.summary_type),
        }
    }
}

/// A unit of work for the job queue. Immutable once built.
#[derive(Debug, Clone)]
pub struct QueueJob {
    task_id: Uuid,
    file_path: PathBuf,
    file_name: String,
    file_type: String,
    kind: FileKind,
    options: ProcessingOptions,
}

impl QueueJob {
    pub fn new(
        task_id: Uuid,
        file_path: impl Into<PathBuf>,
        file_name: impl Into<String>,
        file_type: impl Into<String>,
        kind: FileKind,
        options: ProcessingOptions,
    ) -> Self {
        Self {
            task_id,
            file_path: file_path.into(),
            file_name: file_name.into(),
            file_type: file_type.into(),
            kind,
            options,
        }
    }

    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn file_type(&self) -> &str {
        &self.file_type
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn options(&self) -> &ProcessingOptions {
        &self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_defaults_and_parsing() {
        let opts: ProcessingOptions =
            serde_json::from_str(r#"{"maxSummaryLength": 300, "summaryType": "abstractive"}"#)
                .unwrap();
        assert!(opts.generate_summary);
        assert_eq!(opts.max_summary_length, 300);
        assert_eq!(opts.summary_type, SummaryType::Abstractive);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_overrides_fall_back_to_server_defaults() {
        let defaults = ProcessingOptions {
            max_summary_length: 600,
            ..ProcessingOptions::default()
        };

        let overrides: OptionOverrides = serde_json::from_str(r#"{"generateSummary": true}"#).unwrap();
        let opts = overrides.resolve(&defaults);
        assert!(opts.generate_summary);
        assert_eq!(opts.max_summary_length, 600);
        assert_eq!(opts.summary_type, SummaryType::Extractive);

        let overrides: OptionOverrides =
            serde_json::from_str(r#"{"maxSummaryLength": 80, "summaryType": "abstractive"}"#).unwrap();
        let opts = overrides.resolve(&defaults);
        assert_eq!(opts.max_summary_length, 80);
        assert_eq!(opts.summary_type, SummaryType::Abstractive);
    }

    #[test]
    fn test_summary_length_bounds() {
        let mut opts = ProcessingOptions::default();
        opts.max_summary_length = 49;
        assert!(matches!(opts.validate(), Err(Error::InvalidOptions(_))));
        opts.max_summary_length = 1001;
        assert!(opts.validate().is_err());
        opts.max_summary_length = 50;
        assert!(opts.validate().is_ok());
        opts.max_summary_length = 1000;
        assert!(opts.validate().is_ok());
    }
}
