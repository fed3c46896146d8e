//! Core types for the document pipeline

pub mod job;
pub mod result;
pub mod task;

pub use job::{OptionOverrides, ProcessingOptions, QueueJob, SummaryType, MAX_SUMMARY_LENGTH, MIN_SUMMARY_LENGTH};
pub use result::{OcrMethod, PageSummary, ProcessingResult, ResultMetadata, SystemDependencies};
pub use task::{FileKind, Task, TaskStatus};
