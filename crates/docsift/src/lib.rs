//! docsift: asynchronous document text extraction
//!
//! Documents (PDF, PNG, JPEG) are queued as tasks and processed by a bounded
//! job queue. PDFs with a text layer are read directly; scanned pages fall back
//! to page-image conversion plus OCR. Results carry per-page text, an optional
//! summary and extraction metadata. Temp artifacts and buffer memory are
//! tracked and reclaimed, and the whole pipeline shuts down in order.

pub mod config;
pub mod error;
pub mod extraction;
pub mod monitoring;
pub mod orchestrator;
pub mod processing;
pub mod resources;
pub mod server;
pub mod shutdown;
pub mod summary;
pub mod tasks;
pub mod types;

pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use orchestrator::{BatchItem, BatchOutcome, ProcessingOrchestrator};
pub use types::{
    FileKind, OcrMethod, ProcessingOptions, ProcessingResult, SummaryType, Task, TaskStatus,
};
