//! End-to-end pipeline behaviour through the public API

use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

use docsift::config::PipelineConfig;
use docsift::extraction::{
    DependencyDetector, DependencyReport, ExtractionEngine, OcrEngine, OcrOutput, PageConversion,
    PageConverter,
};
use docsift::resources::ResourceGuard;
use docsift::{BatchItem, Error, OcrMethod, ProcessingOrchestrator, Result, Task, TaskStatus};

const REPORT_TEXT: &str = "The committee reviewed the annual budget and approved funding for the new library wing and the community garden project.";

/// Build a PDF whose pages show the given text; `None` leaves a page blank
fn build_pdf(pages: &[Option<&str>]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids = Vec::new();
    for text in pages {
        let operations = match text {
            Some(text) => vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 10.into()]),
                Operation::new("Td", vec![40.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
            None => Vec::new(),
        };
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => count,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

#[derive(Default)]
struct Gauge {
    now: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.now.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.now.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct SlowOcr {
    gauge: Gauge,
    delay: Duration,
}

#[async_trait]
impl OcrEngine for SlowOcr {
    async fn recognize(&self, _image_path: &Path) -> Result<OcrOutput> {
        self.gauge.enter();
        tokio::time::sleep(self.delay).await;
        self.gauge.leave();
        Ok(OcrOutput {
            text: "Scanned invoice total due thirty days.".to_string(),
            confidence: 88.0,
        })
    }
}

struct UnreadableOcr;

#[async_trait]
impl OcrEngine for UnreadableOcr {
    async fn recognize(&self, _image_path: &Path) -> Result<OcrOutput> {
        Err(Error::ocr("image too noisy to read"))
    }
}

#[derive(Default)]
struct PngConverter {
    gauge: Gauge,
}

#[async_trait]
impl PageConverter for PngConverter {
    async fn convert_page(&self, request: &PageConversion) -> Result<PathBuf> {
        self.gauge.enter();
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.gauge.leave();
        let path = request.output_path();
        tokio::fs::write(&path, b"\x89PNG\r\n\x1a\n0000").await?;
        Ok(path)
    }
}

struct Pipeline {
    orchestrator: ProcessingOrchestrator,
    dir: tempfile::TempDir,
}

impl Pipeline {
    fn new(
        deps: DependencyReport,
        tweak: impl FnOnce(&mut PipelineConfig),
        wire: impl FnOnce(ExtractionEngine) -> ExtractionEngine,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::default();
        config.resources.temp_dir = dir.path().join("work");
        config.resources.cleanup_delay_secs = 0;
        tweak(&mut config);

        let resources = Arc::new(ResourceGuard::new(&config.resources));
        let engine = ExtractionEngine::new(config.extraction.clone(), Arc::clone(&resources))
            .with_dependencies(Arc::new(DependencyDetector::pinned(deps)));
        let orchestrator = ProcessingOrchestrator::from_parts(&config, resources, wire(engine));
        Self { orchestrator, dir }
    }

    fn write(&self, name: &str, data: &[u8]) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    async fn run(&self, name: &str, data: &[u8]) -> Task {
        let path = self.write(name, data);
        let id = assert_ok!(self.orchestrator.submit(&path, name, "application/pdf", None));
        let task = assert_ok!(
            self.orchestrator
                .wait_for_task(id, Duration::from_secs(30))
                .await
        );
        assert_settled(&task);
        task
    }
}

fn no_tools() -> DependencyReport {
    DependencyReport::new(false, false, false, false)
}

fn all_tools() -> DependencyReport {
    DependencyReport::new(false, false, true, true)
}

/// Completed tasks carry a result and no error; failed ones the reverse
fn assert_settled(task: &Task) {
    match task.status {
        TaskStatus::Completed => {
            assert!(task.result.is_some());
            assert!(task.error.is_none());
            assert_eq!(task.progress, 100);
        }
        TaskStatus::Failed => {
            assert!(task.result.is_none());
            assert!(task.error.is_some());
        }
        other => panic!("task {} not settled: {:?}", task.id, other),
    }
}

/// Wait for the delayed session cleanup that follows every task
async fn wait_for_cleanup(pipeline: &Pipeline, task: &Task) {
    let registry = pipeline.orchestrator.resources().temp_files();
    let session = task.id.to_string();
    for _ in 0..100 {
        if registry.session_count(&session) == 0 && !registry.temp_root().join(&session).exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn text_pdf_is_extracted_directly() {
    let pipeline = Pipeline::new(no_tools(), |_| {}, |engine| engine);
    let task = pipeline.run("minutes.pdf", &build_pdf(&[Some(REPORT_TEXT)])).await;

    assert_eq!(task.status, TaskStatus::Completed);
    let result = task.result.unwrap();
    assert!(!result.metadata.is_scanned_pdf);
    assert_eq!(result.metadata.ocr_method, OcrMethod::Direct);
    assert_eq!(result.metadata.confidence, Some(100.0));
    assert!(result.extracted_text.contains("community garden"));
    assert!(result.tldr.is_some());

    let io = pipeline.orchestrator.resources().temp_files().io_stats();
    assert_eq!(io.files_created, 0);
}

#[tokio::test]
async fn mixed_pdf_prefers_direct_text() {
    let pipeline = Pipeline::new(no_tools(), |_| {}, |engine| engine);
    let pdf = build_pdf(&[Some(REPORT_TEXT), None, None]);
    let task = pipeline.run("mixed.pdf", &pdf).await;

    assert_eq!(task.status, TaskStatus::Completed);
    let result = task.result.unwrap();
    assert!(!result.metadata.is_scanned_pdf);
    assert_eq!(result.metadata.ocr_method, OcrMethod::Direct);
    assert_eq!(result.metadata.page_count, Some(3));
}

#[tokio::test]
async fn blank_pdf_without_tools_names_missing_dependency() {
    let pipeline = Pipeline::new(no_tools(), |_| {}, |engine| engine);
    let registry = Arc::clone(pipeline.orchestrator.resources().temp_files());
    let baseline = registry.count();

    let task = pipeline.run("scan.pdf", &build_pdf(&[None, None])).await;

    assert_eq!(task.status, TaskStatus::Failed);
    let error = task.error.unwrap();
    assert!(error.contains("pdftoppm"), "{}", error);
    assert!(error.contains("tesseract"), "{}", error);
    assert!(!error.contains(pipeline.dir.path().to_str().unwrap()));

    let session = task.id.to_string();
    for _ in 0..100 {
        if registry.session_count(&session) == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(registry.session_count(&session), 0);
    assert_eq!(registry.count(), baseline);
}

#[tokio::test]
async fn blank_pdf_goes_through_conversion_and_ocr() {
    let converter = Arc::new(PngConverter::default());
    let ocr = Arc::new(SlowOcr {
        gauge: Gauge::default(),
        delay: Duration::from_millis(10),
    });
    let pipeline = Pipeline::new(all_tools(), |_| {}, {
        let converter = Arc::clone(&converter);
        let ocr = Arc::clone(&ocr);
        move |engine| engine.with_converter(converter).with_ocr_engine(ocr)
    });

    let task = pipeline.run("scan.pdf", &build_pdf(&[None, None, None])).await;

    assert_eq!(task.status, TaskStatus::Completed);
    let metadata = &task.result.as_ref().unwrap().metadata;
    assert!(metadata.is_scanned_pdf);
    assert_eq!(metadata.ocr_method, OcrMethod::PdfToImage);
    assert_eq!(metadata.processed_pages, Some(3));
    assert_eq!(metadata.temp_files_created, Some(3));

    let resources = pipeline.orchestrator.resources();
    wait_for_cleanup(&pipeline, &task).await;
    assert_eq!(resources.temp_files().count(), 0);
    assert!(!resources.temp_files().temp_root().join(task.id.to_string()).exists());
    assert_eq!(resources.memory().active_sessions(), 0);
}

#[tokio::test]
async fn failed_cascade_still_removes_page_images() {
    let pipeline = Pipeline::new(all_tools(), |_| {}, |engine| {
        engine
            .with_converter(Arc::new(PngConverter::default()))
            .with_ocr_engine(Arc::new(UnreadableOcr))
    });
    let resources = Arc::clone(pipeline.orchestrator.resources());
    let baseline = resources.temp_files().count();

    let task = pipeline.run("scan.pdf", &build_pdf(&[None, None, None])).await;

    assert_eq!(task.status, TaskStatus::Failed);
    let error = task.error.clone().unwrap();
    assert!(error.contains("too noisy"), "{}", error);
    assert_eq!(resources.temp_files().io_stats().files_created, 3);

    wait_for_cleanup(&pipeline, &task).await;
    let session = task.id.to_string();
    assert_eq!(resources.temp_files().session_count(&session), 0);
    assert_eq!(resources.temp_files().count(), baseline);
    assert!(!resources.temp_files().temp_root().join(&session).exists());
    assert_eq!(resources.memory().active_sessions(), 0);
}

#[tokio::test]
async fn extraction_limits_hold_under_burst() {
    let converter = Arc::new(PngConverter::default());
    let ocr = Arc::new(SlowOcr {
        gauge: Gauge::default(),
        delay: Duration::from_millis(20),
    });
    let pipeline = Pipeline::new(
        all_tools(),
        |config| {
            config.extraction.conversion_concurrency = 2;
            config.extraction.ocr_concurrency = 3;
        },
        {
            let converter = Arc::clone(&converter);
            let ocr = Arc::clone(&ocr);
            move |engine| engine.with_converter(converter).with_ocr_engine(ocr)
        },
    );

    let pdf = build_pdf(&[None, None]);
    let mut ids = Vec::new();
    for i in 0..8 {
        let name = format!("scan-{}.pdf", i);
        let path = pipeline.write(&name, &pdf);
        ids.push(
            pipeline
                .orchestrator
                .submit(&path, &name, "application/pdf", None)
                .unwrap(),
        );
    }
    for id in ids {
        let task = pipeline
            .orchestrator
            .wait_for_task(id, Duration::from_secs(30))
            .await
            .unwrap();
        assert_settled(&task);
        assert_eq!(task.status, TaskStatus::Completed);
    }

    assert!(converter.gauge.peak() <= 2, "conversion peak {}", converter.gauge.peak());
    assert!(ocr.gauge.peak() <= 3, "ocr peak {}", ocr.gauge.peak());
}

#[tokio::test]
async fn job_queue_caps_active_jobs() {
    let ocr = Arc::new(SlowOcr {
        gauge: Gauge::default(),
        delay: Duration::from_millis(150),
    });
    let pipeline = Pipeline::new(
        all_tools(),
        |config| {
            config.queue.max_concurrent_jobs = 10;
            config.extraction.ocr_concurrency = 16;
        },
        {
            let ocr = Arc::clone(&ocr);
            move |engine| engine.with_ocr_engine(ocr)
        },
    );

    let mut ids = Vec::new();
    for i in 0..15 {
        let name = format!("photo-{}.png", i);
        let path = pipeline.write(&name, b"\x89PNG\r\n\x1a\nimage");
        ids.push(
            pipeline
                .orchestrator
                .submit(&path, &name, "image/png", None)
                .unwrap(),
        );
    }

    let stats = pipeline.orchestrator.queue_stats();
    assert_eq!(stats.active, 10);
    assert_eq!(stats.waiting, 5);

    for id in ids {
        let task = pipeline
            .orchestrator
            .wait_for_task(id, Duration::from_secs(30))
            .await
            .unwrap();
        assert_settled(&task);
        assert!(pipeline.orchestrator.queue_stats().active <= 10);
    }

    assert!(ocr.gauge.peak() <= 10);
    assert!(pipeline.orchestrator.drain(Duration::from_secs(5)).await);
    let stats = pipeline.orchestrator.queue_stats();
    assert_eq!(stats.completed, 15);
    assert_eq!(stats.active + stats.waiting, 0);
}

#[tokio::test]
async fn batch_isolates_unsupported_file() {
    let pipeline = Pipeline::new(no_tools(), |_| {}, |engine| engine);
    let pdf = build_pdf(&[Some(REPORT_TEXT)]);

    let mut items = Vec::new();
    for i in 0..4 {
        let name = format!("report-{}.pdf", i);
        items.push(BatchItem::new(pipeline.write(&name, &pdf), name, "application/pdf"));
    }
    items.insert(
        2,
        BatchItem::new(pipeline.write("notes.docx", b"PK"), "notes.docx", "application/octet-stream"),
    );

    let outcomes = pipeline
        .orchestrator
        .process_batch(items, Duration::from_secs(30))
        .await;

    assert_eq!(outcomes.len(), 5);
    assert_eq!(outcomes.iter().filter(|o| o.is_success()).count(), 4);
    assert!(!outcomes[2].is_success());
}

#[tokio::test]
async fn submissions_after_stop_are_refused() {
    let pipeline = Pipeline::new(no_tools(), |_| {}, |engine| engine);
    pipeline.orchestrator.stop_accepting();

    let path = pipeline.write("late.pdf", &build_pdf(&[Some(REPORT_TEXT)]));
    let err = assert_err!(pipeline
        .orchestrator
        .submit(&path, "late.pdf", "application/pdf", None));
    assert!(matches!(err, Error::QueueClosed));
    assert!(pipeline.orchestrator.list_tasks().is_empty());

    let unknown = assert_err!(pipeline.orchestrator.get_task(Uuid::new_v4()));
    assert!(matches!(unknown, Error::TaskNotFound(_)));
}
