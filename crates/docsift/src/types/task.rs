//! Task records and their status lifecycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use super::result::ProcessingResult;
use crate::error::{Error, Result};

/// Task status
///
/// Ordered: a task only ever moves to a status with a higher rank.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Completed and failed tasks never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Processing => 1,
            TaskStatus::Completed | TaskStatus::Failed => 2,
        }
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    /// Processing -> Processing is allowed so progress can be updated.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (TaskStatus::Processing, TaskStatus::Processing) => true,
            _ => next.rank() > self.rank(),
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Processing => write!(f, "processing"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Kind of document, derived from the file extension
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Pdf,
    Image,
}

impl FileKind {
    /// Extensions accepted by the pipeline
    pub const SUPPORTED_EXTENSIONS: [&'static str; 4] = ["png", "jpg", "jpeg", "pdf"];

    /// Detect kind from an extension; `None` for anything unsupported
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "png" | "jpg" | "jpeg" => Some(Self::Image),
            _ => None,
        }
    }

    /// Detect kind from a file name, failing with `UnsupportedFileType`
    pub fn from_file_name(file_name: &str) -> Result<Self> {
        let ext = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        Self::from_extension(&ext).ok_or_else(|| {
            let shown = if ext.is_empty() { "<none>".to_string() } else { ext };
            Error::UnsupportedFileType(format!(
                "{} (supported: {})",
                shown,
                Self::SUPPORTED_EXTENSIONS.join(", ")
            ))
        })
    }

    /// Best-effort MIME type for a file name
    pub fn mime_for(file_name: &str) -> String {
        mime_guess::from_path(file_name)
            .first()
            .map(|m| m.essence_str().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string())
    }
}

/// A document-processing task
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    pub status: TaskStatus,
    pub file_name: String,
    pub file_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// 0-100, never decreases
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ProcessingResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Task {
    pub fn new(id: Uuid, file_name: impl Into<String>, file_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: TaskStatus::Pending,
            file_name: file_name.into(),
            file_type: file_type.into(),
            created_at: now,
            updated_at: now,
            progress: 0,
            result: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_are_monotonic() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(!Processing.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Processing));
    }

    #[test]
    fn test_file_kind_detection() {
        assert_eq!(FileKind::from_file_name("scan.PDF").unwrap(), FileKind::Pdf);
        assert_eq!(FileKind::from_file_name("photo.jpeg").unwrap(), FileKind::Image);
        assert_eq!(FileKind::from_file_name("a.b.png").unwrap(), FileKind::Image);
        assert!(matches!(
            FileKind::from_file_name("report.docx"),
            Err(Error::UnsupportedFileType(_))
        ));
        assert!(FileKind::from_file_name("README").is_err());
    }

    #[test]
    fn test_snapshot_field_names() {
        let task = Task::new(Uuid::new_v4(), "scan.pdf", "application/pdf");
        let value = serde_json::to_value(&task).unwrap();
        let obj = value.as_object().unwrap();
        for key in ["id", "status", "fileName", "fileType", "createdAt", "updatedAt", "progress"] {
            assert!(obj.contains_key(key), "missing {}", key);
        }
        assert!(!obj.contains_key("result"));
        assert!(!obj.contains_key("error"));
        assert_eq!(obj["status"], "pending");
    }
}
