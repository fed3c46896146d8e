//! Error types for the document pipeline

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::types::TaskStatus;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Matches absolute filesystem paths (unix or windows style)
static PATH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:[A-Za-z]:)?(?:[/\\][\w.\-]+){2,}[/\\]?").expect("path pattern is valid")
});

/// Broad error category, used for status mapping and health accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or unsupported input; the caller's responsibility
    Validation,
    /// Unknown task id
    NotFound,
    /// Extraction, conversion, OCR or summarization failed
    Processing,
    /// Filesystem, queue or host dependency problem
    System,
}

/// Pipeline errors
#[derive(Debug, Error)]
pub enum Error {
    /// File extension outside the supported set
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    /// Processing options out of range
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    /// Task does not exist
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    /// Attempted a backwards or post-terminal status change
    #[error("Invalid status transition for task {id}: {from} -> {to}")]
    InvalidTransition {
        id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// Direct text extraction failed
    #[error("Text extraction failed: {0}")]
    Extraction(String),

    /// Page-image conversion failed
    #[error("Page conversion failed: {0}")]
    Conversion(String),

    /// OCR failed
    #[error("OCR failed: {0}")]
    Ocr(String),

    /// Summary generation failed
    #[error("Summarization failed: {0}")]
    Summarization(String),

    /// A bounded operation ran past its budget
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    /// Required host tool is not installed
    #[error("Missing system dependency: {0}")]
    MissingDependency(String),

    /// Queue no longer accepts work
    #[error("Job queue is shut down")]
    QueueClosed,

    /// Work abandoned because the process is shutting down
    #[error("{0} cancelled: shutting down")]
    Cancelled(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an extraction error
    pub fn extraction(message: impl Into<String>) -> Self {
        Self::Extraction(message.into())
    }

    /// Create a conversion error
    pub fn conversion(message: impl Into<String>) -> Self {
        Self::Conversion(message.into())
    }

    /// Create an OCR error
    pub fn ocr(message: impl Into<String>) -> Self {
        Self::Ocr(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            secs,
        }
    }

    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnsupportedFileType(_)
            | Error::InvalidOptions(_)
            | Error::InvalidTransition { .. } => ErrorKind::Validation,
            Error::TaskNotFound(_) => ErrorKind::NotFound,
            Error::Extraction(_)
            | Error::Conversion(_)
            | Error::Ocr(_)
            | Error::Summarization(_)
            | Error::Timeout { .. } => ErrorKind::Processing,
            Error::MissingDependency(_)
            | Error::QueueClosed
            | Error::Cancelled(_)
            | Error::Config(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::Internal(_) => ErrorKind::System,
        }
    }

    /// Message safe to store on a task: no filesystem paths.
    pub fn sanitized_message(&self) -> String {
        sanitize_message(&self.to_string())
    }
}

/// Replace absolute paths in a message with a placeholder
pub fn sanitize_message(message: &str) -> String {
    PATH_PATTERN.replace_all(message, "<path>").into_owned()
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_type) = match (&self, self.kind()) {
            (Error::MissingDependency(_), _) => {
                (StatusCode::SERVICE_UNAVAILABLE, "missing_dependency")
            }
            (Error::QueueClosed, _) => (StatusCode::SERVICE_UNAVAILABLE, "queue_closed"),
            (_, ErrorKind::Validation) => (StatusCode::BAD_REQUEST, "validation_error"),
            (_, ErrorKind::NotFound) => (StatusCode::NOT_FOUND, "not_found"),
            (_, ErrorKind::Processing) => (StatusCode::INTERNAL_SERVER_ERROR, "processing_error"),
            (_, ErrorKind::System) => (StatusCode::INTERNAL_SERVER_ERROR, "system_error"),
        };

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": self.sanitized_message(),
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_paths() {
        let msg = sanitize_message("pdftoppm error: cannot open /tmp/docsift/abc/input.pdf");
        assert_eq!(msg, "pdftoppm error: cannot open <path>");

        let msg = sanitize_message(r"failed reading C:\Users\me\scan.pdf");
        assert_eq!(msg, "failed reading <path>");
    }

    #[test]
    fn test_sanitize_keeps_mime_and_plain_text() {
        let msg = sanitize_message("unsupported image/gif upload and/or bad size");
        assert_eq!(msg, "unsupported image/gif upload and/or bad size");
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::UnsupportedFileType("docx".into()).kind(), ErrorKind::Validation);
        assert_eq!(Error::TaskNotFound(Uuid::new_v4()).kind(), ErrorKind::NotFound);
        assert_eq!(Error::timeout("OCR", 5).kind(), ErrorKind::Processing);
        assert_eq!(Error::MissingDependency("tesseract".into()).kind(), ErrorKind::System);
    }

    #[test]
    fn test_missing_dependency_status() {
        let resp = Error::MissingDependency("pdftoppm".into()).into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        let resp = Error::TaskNotFound(Uuid::new_v4()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
