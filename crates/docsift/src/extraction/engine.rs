//! Extraction engine
//!
//! Decides between direct PDF text extraction and the convert+OCR cascade, and
//! runs the cascade under two independent limiters: one for page conversions,
//! one for OCR calls.

use bytes::BytesMut;
use futures::future::join_all;
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use super::classifier::classify_pages;
use super::converter::{CommandLineConverter, PageConversion, PageConverter};
use super::dependencies::{DependencyDetector, DependencyReport};
use super::limiter::{Limiter, LimiterStats};
use super::ocr::{OcrEngine, OcrOutput, TesseractOcr};
use super::pdf_probe::PdfAnalysis;
use super::text::{PdfTextExtractor, TextExtractor};
use crate::config::ExtractionConfig;
use crate::error::{Error, Result};
use crate::resources::{ArtifactKind, ConversionReservation, ResourceGuard};
use crate::tasks::ProgressReporter;
use crate::types::{FileKind, OcrMethod, PageSummary, ResultMetadata, SystemDependencies};

/// Operations slower than this are logged
const SLOW_OPERATION: Duration = Duration::from_secs(60);

/// Bytes read from a page image to check its signature
const SIGNATURE_LEN: usize = 16;

/// Text and metadata produced for one document. `file_size` and
/// `processing_time` are left at zero for the caller to fill in.
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub extracted_text: String,
    pub pages: Vec<PageSummary>,
    pub metadata: ResultMetadata,
}

/// Limiter utilization, in percent
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub conversion_utilization: f64,
    pub ocr_utilization: f64,
    /// The busier of the two
    pub utilization: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConcurrencyStats {
    pub conversion: LimiterStats,
    pub ocr: LimiterStats,
}

/// Requests waiting for a limiter slot
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueInfo {
    pub pending_conversions: usize,
    pub pending_ocr: usize,
}

/// Bookkeeping for one run of the fallback cascade
struct CascadeRun {
    session: String,
    page_count: u32,
    attempted: u32,
    temp_files_created: u32,
    failures: Vec<(u32, String)>,
    dependencies: SystemDependencies,
}

pub struct ExtractionEngine {
    config: ExtractionConfig,
    conversion: Limiter,
    ocr: Limiter,
    text: Arc<dyn TextExtractor>,
    converter: Arc<dyn PageConverter>,
    ocr_engine: Arc<dyn OcrEngine>,
    dependencies: Arc<DependencyDetector>,
    resources: Arc<ResourceGuard>,
    cancel: CancellationToken,
}

impl ExtractionEngine {
    /// Engine backed by lopdf/pdf-extract and the host's conversion and OCR tools
    pub fn new(config: ExtractionConfig, resources: Arc<ResourceGuard>) -> Self {
        tracing::info!(
            "Extraction engine configured: {} conversion slots, {} OCR slots, up to {} pages per scan",
            config.conversion_concurrency,
            config.ocr_concurrency,
            config.max_pages
        );

        Self {
            conversion: Limiter::new("conversion", config.conversion_concurrency),
            ocr: Limiter::new("ocr", config.ocr_concurrency),
            text: Arc::new(PdfTextExtractor::new(config.parse_timeout())),
            converter: Arc::new(CommandLineConverter::new(config.programs.clone())),
            ocr_engine: Arc::new(TesseractOcr::new(
                config.programs.tesseract.clone(),
                config.ocr_language.clone(),
            )),
            dependencies: Arc::new(DependencyDetector::new(&config)),
            resources,
            cancel: CancellationToken::new(),
            config,
        }
    }

    pub fn with_text_extractor(mut self, text: Arc<dyn TextExtractor>) -> Self {
        self.text = text;
        self
    }

    pub fn with_converter(mut self, converter: Arc<dyn PageConverter>) -> Self {
        self.converter = converter;
        self
    }

    pub fn with_ocr_engine(mut self, ocr_engine: Arc<dyn OcrEngine>) -> Self {
        self.ocr_engine = ocr_engine;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Arc<DependencyDetector>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn dependencies(&self) -> &Arc<DependencyDetector> {
        &self.dependencies
    }

    /// Extract text from an image or PDF
    pub async fn extract(
        &self,
        path: &Path,
        kind: FileKind,
        progress: &ProgressReporter,
    ) -> Result<ExtractionOutcome> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled("extraction".to_string()));
        }
        progress.report(10);

        match kind {
            FileKind::Image => self.extract_image(path, progress).await,
            FileKind::Pdf => self.extract_pdf(path, progress).await,
        }
    }

    async fn extract_image(&self, path: &Path, progress: &ProgressReporter) -> Result<ExtractionOutcome> {
        let report = self.dependencies.check_system_dependencies().await;
        if !report.ocr {
            return Err(Error::MissingDependency(
                "tesseract not found (install tesseract-ocr)".to_string(),
            ));
        }

        let output = self.ocr_page(path, 1).await?;
        progress.report(90);

        let mut metadata = ResultMetadata::direct(0, report.system_dependencies());
        metadata.page_count = Some(1);
        metadata.confidence = Some(output.confidence);

        tracing::info!(
            "[{}] Image OCR: {} chars, {:.1}% confidence",
            progress.task_id(),
            output.text.len(),
            output.confidence
        );

        Ok(ExtractionOutcome {
            pages: vec![PageSummary {
                page_number: 1,
                page_text: output.text.clone(),
            }],
            extracted_text: output.text,
            metadata,
        })
    }

    async fn extract_pdf(&self, path: &Path, progress: &ProgressReporter) -> Result<ExtractionOutcome> {
        let task_id = progress.task_id();

        let parsed = self
            .bounded(
                "PDF text extraction",
                self.config.parse_timeout(),
                self.text.extract_pages(path),
            )
            .await;
        progress.report(30);

        let (pages, page_count) = match parsed {
            Ok(extracted) => (extracted.pages, extracted.page_count.max(1)),
            Err(Error::Cancelled(op)) => return Err(Error::Cancelled(op)),
            Err(e) => {
                tracing::warn!("[{}] Direct extraction failed: {}", task_id, e);
                let estimated = match tokio::fs::read(path).await {
                    Ok(data) => PdfAnalysis::analyze(&data).estimated_pages,
                    Err(_) => 1,
                };
                (Vec::new(), estimated)
            }
        };

        let verdict = classify_pages(&pages, self.config.min_page_chars, self.config.min_page_words);
        if verdict.has_text() {
            tracing::info!(
                "[{}] Direct extraction: {} of {} pages carry text ({} chars)",
                task_id,
                verdict.text_pages.len(),
                page_count,
                verdict.total_chars
            );
            let dependencies = self
                .dependencies
                .snapshot()
                .map(|r| r.system_dependencies())
                .unwrap_or_default();
            let mut metadata = ResultMetadata::direct(0, dependencies);
            metadata.page_count = Some(page_count);
            metadata.confidence = Some(100.0);
            return Ok(text_outcome(&pages, metadata));
        }

        tracing::info!(
            "[{}] No usable text layer on {} pages, treating as scanned",
            task_id,
            page_count
        );
        self.run_cascade(path, page_count, &pages, progress).await
    }

    /// Convert pages to images then OCR them
    async fn run_cascade(
        &self,
        pdf_path: &Path,
        page_count: u32,
        sparse: &[String],
        progress: &ProgressReporter,
    ) -> Result<ExtractionOutcome> {
        let report = self.dependencies.check_system_dependencies().await;
        if let Some(missing) = report.missing_message() {
            tracing::error!("[{}] Cannot OCR scanned PDF: {}", progress.task_id(), missing);
            return Err(Error::MissingDependency(missing));
        }

        let session = progress.task_id().to_string();
        let reservation = self.resources.memory().optimize_for_conversion(&session);
        let mut run = CascadeRun {
            session,
            page_count,
            attempted: page_count.min(self.config.max_pages).max(1),
            temp_files_created: 0,
            failures: Vec::new(),
            dependencies: report.system_dependencies(),
        };

        let conversion_started = Instant::now();
        let images = self
            .convert_pages(pdf_path, &report, &reservation, &mut run, progress)
            .await?;
        let conversion_time = conversion_started.elapsed().as_millis() as u64;

        if images.is_empty() {
            let reason = run
                .failures
                .first()
                .map(|(page, e)| format!("page {}: {}", page, e))
                .unwrap_or_default();
            return self.cascade_failed(
                sparse,
                &run,
                Error::conversion(format!("No page could be converted ({})", reason)),
            );
        }

        let ocr_started = Instant::now();
        let conversion_failures = run.failures.len();
        let done = AtomicUsize::new(0);
        let total = images.len();
        let recognized = join_all(images.iter().map(|(page, image)| {
            let done = &done;
            async move {
                let result = self.ocr_page(image, *page).await;
                let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
                progress.report_span(60, 90, finished, total);
                (*page, result)
            }
        }))
        .await;
        let ocr_time = ocr_started.elapsed().as_millis() as u64;

        let mut pages = Vec::new();
        let mut confidences = Vec::new();
        for (page, result) in recognized {
            match result {
                Ok(output) => {
                    confidences.push(output.confidence);
                    pages.push(PageSummary {
                        page_number: page,
                        page_text: output.text,
                    });
                }
                Err(Error::Cancelled(op)) => return Err(Error::Cancelled(op)),
                Err(e) => {
                    tracing::warn!("[{}] OCR failed on page {}: {}", run.session, page, e);
                    run.failures.push((page, e.sanitized_message()));
                }
            }
        }
        drop(reservation);

        if pages.iter().all(|p| p.page_text.trim().is_empty()) {
            let message = match run.failures.get(conversion_failures) {
                Some((page, e)) => format!("OCR produced no text (page {}: {})", page, e),
                None => "OCR produced no text".to_string(),
            };
            return self.cascade_failed(sparse, &run, Error::ocr(message));
        }

        let processed = pages.len() as u32;
        let mut confidence = confidences.iter().sum::<f32>() / confidences.len() as f32;
        if !run.failures.is_empty() {
            confidence *= processed as f32 / run.attempted as f32;
        }

        let mut metadata = ResultMetadata::direct(0, run.dependencies);
        metadata.page_count = Some(run.page_count);
        metadata.confidence = Some(confidence);
        metadata.is_scanned_pdf = true;
        metadata.ocr_method = OcrMethod::PdfToImage;
        metadata.conversion_time = Some(conversion_time);
        metadata.ocr_time = Some(ocr_time);
        metadata.original_page_count = Some(run.page_count);
        metadata.processed_pages = Some(processed);
        metadata.temp_files_created = Some(run.temp_files_created);
        metadata.fallback_used = Some(!run.failures.is_empty());

        tracing::info!(
            "[{}] OCR extracted {} of {} pages ({:.1}% confidence, conversion {}ms, OCR {}ms)",
            run.session,
            processed,
            run.attempted,
            confidence,
            conversion_time,
            ocr_time
        );

        Ok(ExtractionOutcome {
            extracted_text: join_pages(&pages),
            pages,
            metadata,
        })
    }

    /// Sequentially convert the first pages. Page failures are recorded in `run`;
    /// only cancellation aborts the loop.
    async fn convert_pages(
        &self,
        pdf_path: &Path,
        report: &DependencyReport,
        reservation: &ConversionReservation,
        run: &mut CascadeRun,
        progress: &ProgressReporter,
    ) -> Result<Vec<(u32, PathBuf)>> {
        let backend = report
            .preferred_backend()
            .ok_or_else(|| Error::internal("no conversion backend"))?;
        let registry = self.resources.temp_files();
        let output_dir = registry.session_dir(&run.session).await?;
        let mut images = Vec::new();

        for page in 1..=run.attempted {
            let request = PageConversion {
                pdf_path: pdf_path.to_path_buf(),
                page_number: page,
                output_dir: output_dir.clone(),
                dpi: self.config.render_dpi,
                backend,
            };

            let converted = match self.conversion.acquire().await {
                Ok(_permit) => {
                    self.bounded(
                        &format!("page {} conversion", page),
                        self.config.conversion_timeout(),
                        self.converter.convert_page(&request),
                    )
                    .await
                }
                Err(_) => Err(Error::Cancelled("page conversion".to_string())),
            };

            // Register whatever reached the disk, even on failure
            let image = request.output_path();
            let written = tokio::fs::try_exists(&image).await.unwrap_or(false);
            if written {
                registry.register(&image, ArtifactKind::PageImage, &run.session);
                run.temp_files_created += 1;
            }

            match converted {
                Ok(path) => match validate_page_image(&path, reservation).await {
                    Ok(()) => images.push((page, path)),
                    Err(e) => run.failures.push((page, e.sanitized_message())),
                },
                Err(Error::Cancelled(op)) => return Err(Error::Cancelled(op)),
                Err(e) => {
                    tracing::warn!("[{}] Conversion failed on page {}: {}", run.session, page, e);
                    run.failures.push((page, e.sanitized_message()));
                }
            }

            progress.report_span(30, 60, page as usize, run.attempted as usize);
        }

        Ok(images)
    }

    /// OCR one image under the OCR limiter
    async fn ocr_page(&self, image: &Path, page: u32) -> Result<OcrOutput> {
        let _permit = self
            .ocr
            .acquire()
            .await
            .map_err(|_| Error::Cancelled("OCR".to_string()))?;
        self.bounded(
            &format!("page {} OCR", page),
            self.config.ocr_timeout(),
            self.ocr_engine.recognize(image),
        )
        .await
    }

    /// The cascade produced nothing: keep the sparse direct text if allowed, else fail
    fn cascade_failed(&self, sparse: &[String], run: &CascadeRun, error: Error) -> Result<ExtractionOutcome> {
        let has_sparse = sparse.iter().any(|p| !p.trim().is_empty());
        if !(self.config.accept_sparse_text && has_sparse) {
            tracing::error!("[{}] Fallback cascade failed: {}", run.session, error);
            return Err(error);
        }

        tracing::warn!(
            "[{}] Fallback cascade failed ({}), keeping sparse direct text",
            run.session,
            error
        );
        let mut metadata = ResultMetadata::direct(0, run.dependencies);
        metadata.page_count = Some(run.page_count);
        metadata.is_scanned_pdf = true;
        metadata.ocr_method = OcrMethod::DirectFallback;
        metadata.original_page_count = Some(run.page_count);
        metadata.processed_pages = Some(0);
        metadata.temp_files_created = Some(run.temp_files_created);
        metadata.fallback_used = Some(true);
        Ok(text_outcome(sparse, metadata))
    }

    /// Run a step with a timeout, aborting early on shutdown
    async fn bounded<T>(
        &self,
        operation: &str,
        limit: Duration,
        step: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let started = Instant::now();
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Cancelled(operation.to_string())),
            outcome = tokio::time::timeout(limit, step) => match outcome {
                Ok(result) => {
                    let elapsed = started.elapsed();
                    if elapsed > SLOW_OPERATION {
                        tracing::warn!("Slow {}: {:.1}s", operation, elapsed.as_secs_f64());
                    }
                    result
                }
                Err(_) => {
                    tracing::error!(
                        "TIMEOUT during {} after {:.1}s (limit: {}s)",
                        operation,
                        started.elapsed().as_secs_f64(),
                        limit.as_secs()
                    );
                    Err(Error::timeout(operation, limit.as_secs()))
                }
            }
        }
    }

    pub fn pool_stats(&self) -> PoolStats {
        let conversion_utilization = self.conversion.utilization();
        let ocr_utilization = self.ocr.utilization();
        PoolStats {
            conversion_utilization,
            ocr_utilization,
            utilization: conversion_utilization.max(ocr_utilization),
        }
    }

    pub fn concurrency_stats(&self) -> ConcurrencyStats {
        ConcurrencyStats {
            conversion: self.conversion.stats(),
            ocr: self.ocr.stats(),
        }
    }

    pub fn queue_info(&self) -> QueueInfo {
        QueueInfo {
            pending_conversions: self.conversion.stats().waiting,
            pending_ocr: self.ocr.stats().waiting,
        }
    }

    /// Cancel in-flight steps and refuse new ones. Child processes are killed
    /// when their futures drop.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.conversion.close();
        self.ocr.close();
        tracing::info!("Extraction engine stopped");
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Outcome built from page texts; blank pages are left out of the summary list
fn text_outcome(pages: &[String], metadata: ResultMetadata) -> ExtractionOutcome {
    let pages: Vec<PageSummary> = pages
        .iter()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(idx, text)| PageSummary {
            page_number: idx as u32 + 1,
            page_text: text.clone(),
        })
        .collect();

    ExtractionOutcome {
        extracted_text: join_pages(&pages),
        pages,
        metadata,
    }
}

fn join_pages(pages: &[PageSummary]) -> String {
    pages
        .iter()
        .map(|p| p.page_text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Check a rendered page through a reserved buffer before handing it to OCR
async fn validate_page_image(path: &Path, reservation: &ConversionReservation) -> Result<()> {
    let mut buffer = reservation.checkout();
    let result = read_signature(path, &mut buffer).await;
    reservation.checkin(buffer);
    result
}

async fn read_signature(path: &Path, buffer: &mut BytesMut) -> Result<()> {
    let file = tokio::fs::File::open(path).await?;
    let mut head = file.take(SIGNATURE_LEN as u64);
    while buffer.len() < SIGNATURE_LEN {
        if head.read_buf(buffer).await? == 0 {
            break;
        }
    }

    if buffer.is_empty() {
        return Err(Error::conversion("converted page image is empty"));
    }
    if !is_image_signature(buffer) {
        return Err(Error::conversion("converted page is not a recognized image"));
    }
    Ok(())
}

/// PNG, JPEG, TIFF or PNM
fn is_image_signature(head: &[u8]) -> bool {
    head.starts_with(b"\x89PNG\r\n\x1a\n")
        || head.starts_with(&[0xFF, 0xD8, 0xFF])
        || head.starts_with(b"II*\0")
        || head.starts_with(b"MM\0*")
        || (head.len() >= 2 && head[0] == b'P' && (b'1'..=b'6').contains(&head[1]))
}
