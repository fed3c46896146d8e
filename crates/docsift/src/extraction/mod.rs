//! Text extraction: direct PDF parsing with a convert+OCR fallback

mod classifier;
mod converter;
mod dependencies;
mod engine;
mod limiter;
mod ocr;
mod pdf_probe;
mod text;

pub use classifier::{classify_pages, DensityVerdict, TextDensity};
pub use converter::{CommandLineConverter, PageConversion, PageConverter};
pub use dependencies::{ConversionBackend, DependencyDetector, DependencyReport};
pub use engine::{ConcurrencyStats, ExtractionEngine, ExtractionOutcome, PoolStats, QueueInfo};
pub use limiter::{Limiter, LimiterPermit, LimiterStats};
pub use ocr::{parse_tsv, OcrEngine, OcrOutput, TesseractOcr};
pub use pdf_probe::PdfAnalysis;
pub use text::{clean_text, extract_pdf_pages, ExtractedPages, PdfTextExtractor, TextExtractor};
