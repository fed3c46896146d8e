//! Processing orchestrator
//!
//! Entry point of the pipeline: validates a submission, creates its task, queues
//! the job, and (through [`DocumentProcessor`]) runs extraction and summarization
//! and finalizes the task exactly once.

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::extraction::ExtractionEngine;
use crate::processing::{JobHandler, JobQueue, QueueStats};
use crate::resources::ResourceGuard;
use crate::summary::Summarizer;
use crate::tasks::{ProgressReporter, TaskStore};
use crate::types::{FileKind, ProcessingOptions, ProcessingResult, QueueJob, Task, TaskStatus};

/// Runs queued jobs: extraction, summary, finalization
pub struct DocumentProcessor {
    tasks: Arc<TaskStore>,
    engine: Arc<ExtractionEngine>,
    resources: Arc<ResourceGuard>,
    summarizer: Summarizer,
}

impl DocumentProcessor {
    pub fn new(tasks: Arc<TaskStore>, engine: Arc<ExtractionEngine>, resources: Arc<ResourceGuard>) -> Self {
        Self {
            tasks,
            engine,
            resources,
            summarizer: Summarizer::new(),
        }
    }

    async fn process(&self, job: &QueueJob, started: Instant) -> Result<ProcessingResult> {
        let task_id = job.task_id();
        self.tasks.update_status(task_id, TaskStatus::Processing, Some(5))?;

        let file_size = tokio::fs::metadata(job.file_path()).await?.len();
        tracing::info!("[{}] Processing {} ({} bytes)", task_id, job.file_name(), file_size);

        let progress = ProgressReporter::new(Arc::clone(&self.tasks), task_id);
        let extraction = self.engine.extract(job.file_path(), job.kind(), &progress).await?;
        progress.report(90);

        let options = job.options();
        let tldr = if options.generate_summary {
            let summarizer = self.summarizer.clone();
            let text = extraction.extracted_text.clone();
            let summary_type = options.summary_type;
            let max_length = options.max_summary_length;
            tokio::task::spawn_blocking(move || summarizer.summarize(&text, summary_type, max_length))
                .await
                .map_err(|e| Error::Summarization(e.to_string()))?
        } else {
            None
        };

        let mut metadata = extraction.metadata;
        metadata.file_size = file_size;
        metadata.processing_time = started.elapsed().as_millis() as u64;

        Ok(ProcessingResult {
            extracted_text: extraction.extracted_text,
            summary: extraction.pages,
            tldr,
            metadata,
        })
    }

    fn release_session(&self, task_id: Uuid) {
        self.resources
            .temp_files()
            .schedule_session_cleanup(&task_id.to_string());
    }
}

#[async_trait]
impl JobHandler for DocumentProcessor {
    async fn handle(&self, job: QueueJob) -> Result<()> {
        let task_id = job.task_id();
        let started = Instant::now();
        let outcome = self.process(&job, started).await;

        let finalized = match &outcome {
            Ok(result) => {
                tracing::info!(
                    "[{}] Completed {} via {} in {}ms",
                    task_id,
                    job.file_name(),
                    result.metadata.ocr_method,
                    result.metadata.processing_time
                );
                self.tasks.update_result(task_id, result.clone())
            }
            Err(e) => {
                tracing::error!(
                    "[{}] Failed {} after {}ms: {}",
                    task_id,
                    job.file_name(),
                    started.elapsed().as_millis(),
                    e
                );
                self.tasks.update_error(task_id, e.sanitized_message())
            }
        };
        if let Err(e) = finalized {
            tracing::warn!("[{}] Could not finalise task: {}", task_id, e);
        }

        self.release_session(task_id);
        outcome.map(|_| ())
    }

    fn handle_panic(&self, task_id: Uuid, message: String) {
        tracing::error!("[{}] Processing panicked: {}", task_id, message);
        if let Err(e) = self
            .tasks
            .update_error(task_id, "Internal error: document processing crashed")
        {
            tracing::warn!("[{}] Could not finalise task: {}", task_id, e);
        }
        self.release_session(task_id);
    }
}

/// One document of a batch
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub file_path: PathBuf,
    pub file_name: String,
    pub file_type: String,
    pub options: Option<ProcessingOptions>,
}

impl BatchItem {
    pub fn new(file_path: impl Into<PathBuf>, file_name: impl Into<String>, file_type: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            file_name: file_name.into(),
            file_type: file_type.into(),
            options: None,
        }
    }
}

/// Settled outcome of one batch document
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum BatchOutcome {
    Succeeded(Task),
    #[serde(rename_all = "camelCase")]
    Failed { file_name: String, error: String },
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, BatchOutcome::Succeeded(_))
    }
}

/// Top-level pipeline entry point
pub struct ProcessingOrchestrator {
    tasks: Arc<TaskStore>,
    queue: JobQueue,
    engine: Arc<ExtractionEngine>,
    resources: Arc<ResourceGuard>,
    default_options: ProcessingOptions,
}

impl ProcessingOrchestrator {
    /// Pipeline backed by the host's PDF, conversion and OCR tools
    pub fn new(config: &PipelineConfig) -> Self {
        let resources = Arc::new(ResourceGuard::new(&config.resources));
        let engine = ExtractionEngine::new(config.extraction.clone(), Arc::clone(&resources));
        Self::from_parts(config, resources, engine)
    }

    /// Pipeline around a prepared engine; `resources` must be the guard the engine uses
    pub fn from_parts(config: &PipelineConfig, resources: Arc<ResourceGuard>, engine: ExtractionEngine) -> Self {
        let tasks = Arc::new(TaskStore::new());
        let engine = Arc::new(engine);
        let processor = DocumentProcessor::new(Arc::clone(&tasks), Arc::clone(&engine), Arc::clone(&resources));
        let queue = JobQueue::new(config.queue.max_concurrent_jobs, Arc::new(processor));

        let default_options = ProcessingOptions {
            max_summary_length: config.summary.default_max_length,
            ..ProcessingOptions::default()
        };

        Self {
            tasks,
            queue,
            engine,
            resources,
            default_options,
        }
    }

    /// Validate and queue a document. Returns the task id immediately; completion
    /// is observed through [`get_task`](Self::get_task).
    pub fn submit(
        &self,
        file_path: impl AsRef<Path>,
        file_name: &str,
        file_type: &str,
        options: Option<ProcessingOptions>,
    ) -> Result<Uuid> {
        self.submit_with_id(Uuid::new_v4(), file_path, file_name, file_type, options)
    }

    /// [`submit`](Self::submit) with a caller-chosen task id
    pub fn submit_with_id(
        &self,
        task_id: Uuid,
        file_path: impl AsRef<Path>,
        file_name: &str,
        file_type: &str,
        options: Option<ProcessingOptions>,
    ) -> Result<Uuid> {
        let kind = FileKind::from_file_name(file_name)?;
        let options = options.unwrap_or_else(|| self.default_options.clone());
        options.validate()?;
        if self.queue.is_closed() {
            return Err(Error::QueueClosed);
        }

        self.tasks.create(task_id, file_name, file_type)?;
        let job = QueueJob::new(
            task_id,
            file_path.as_ref(),
            file_name,
            file_type,
            kind,
            options,
        );

        if let Err(e) = self.queue.submit(job) {
            if let Err(finalize) = self.tasks.update_error(task_id, e.sanitized_message()) {
                tracing::warn!("[{}] Could not finalise rejected task: {}", task_id, finalize);
            }
            return Err(e);
        }

        tracing::info!("[{}] Queued {} ({})", task_id, file_name, file_type);
        Ok(task_id)
    }

    /// Options applied to submissions that carry none
    pub fn default_options(&self) -> &ProcessingOptions {
        &self.default_options
    }

    pub fn get_task(&self, task_id: Uuid) -> Result<Task> {
        self.tasks.get(task_id)
    }

    pub fn list_tasks(&self) -> Vec<Task> {
        self.tasks.list()
    }

    pub async fn wait_for_task(&self, task_id: Uuid, timeout: Duration) -> Result<Task> {
        self.tasks.wait_for_terminal(task_id, timeout).await
    }

    /// Submit every item, then wait up to `wait` for each one to settle. One
    /// outcome per item, in input order; a failure never affects its siblings.
    pub async fn process_batch(&self, items: Vec<BatchItem>, wait: Duration) -> Vec<BatchOutcome> {
        let submitted: Vec<(String, Result<Uuid>)> = items
            .into_iter()
            .map(|item| {
                let result = self.submit(&item.file_path, &item.file_name, &item.file_type, item.options);
                (item.file_name, result)
            })
            .collect();

        tracing::info!("Batch of {} documents submitted", submitted.len());

        join_all(submitted.into_iter().map(|(file_name, submitted)| async move {
            let settled = match submitted {
                Ok(task_id) => self.tasks.wait_for_terminal(task_id, wait).await,
                Err(e) => Err(e),
            };

            match settled {
                Ok(task) if task.status == TaskStatus::Completed => BatchOutcome::Succeeded(task),
                Ok(task) => BatchOutcome::Failed {
                    file_name,
                    error: task.error.unwrap_or_else(|| "failed".to_string()),
                },
                Err(e) => BatchOutcome::Failed {
                    file_name,
                    error: e.sanitized_message(),
                },
            }
        }))
        .await
    }

    /// Close the queue and fail every task that was still waiting for a slot.
    /// Returns how many were failed.
    pub fn stop_accepting(&self) -> usize {
        let waiting = self.queue.close();
        for job in &waiting {
            if let Err(e) = self
                .tasks
                .update_error(job.task_id(), Error::Cancelled("processing".to_string()).to_string())
            {
                tracing::warn!("[{}] Could not finalise queued task: {}", job.task_id(), e);
            }
        }
        if !waiting.is_empty() {
            tracing::warn!("Failed {} queued tasks at shutdown", waiting.len());
        }
        waiting.len()
    }

    /// Wait for running jobs to finish
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.queue.wait_idle(timeout).await
    }

    pub fn is_accepting(&self) -> bool {
        !self.queue.is_closed() && !self.engine.is_shut_down()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn tasks(&self) -> &Arc<TaskStore> {
        &self.tasks
    }

    pub fn engine(&self) -> &Arc<ExtractionEngine> {
        &self.engine
    }

    pub fn resources(&self) -> &Arc<ResourceGuard> {
        &self.resources
    }
}
