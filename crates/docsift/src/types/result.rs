//! Processing result returned on completed tasks

use serde::{Deserialize, Serialize};

/// How the text was obtained
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OcrMethod {
    /// Text parsed straight from the PDF, or an image OCR'd as-is
    #[serde(rename = "direct")]
    Direct,
    /// Pages rendered to images then OCR'd
    #[serde(rename = "pdf-to-image")]
    PdfToImage,
    /// Conversion/OCR failed, sparse direct text was kept
    #[serde(rename = "direct_fallback")]
    DirectFallback,
}

impl std::fmt::Display for OcrMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OcrMethod::Direct => write!(f, "direct"),
            OcrMethod::PdfToImage => write!(f, "pdf-to-image"),
            OcrMethod::DirectFallback => write!(f, "direct_fallback"),
        }
    }
}

/// Availability of the image-conversion toolchain at the time of processing
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SystemDependencies {
    /// GraphicsMagick (`gm`)
    pub graphics_lib: bool,
    /// ImageMagick (`magick`)
    pub image_lib: bool,
    /// Poppler rasterizer (`pdftoppm`)
    pub converter: bool,
}

/// Text of a single page
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PageSummary {
    /// 1-indexed
    pub page_number: u32,
    pub page_text: String,
}

/// Metadata recorded alongside the extracted text
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetadata {
    /// Input size in bytes
    pub file_size: u64,
    /// Wall time in milliseconds, task start to finalization
    pub processing_time: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    /// 0-100
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    pub is_scanned_pdf: bool,
    pub ocr_method: OcrMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversion_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_page_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_pages: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_files_created: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_used: Option<bool>,
    pub system_dependencies: SystemDependencies,
}

impl ResultMetadata {
    /// Metadata for a document whose text came out without conversion
    pub fn direct(file_size: u64, system_dependencies: SystemDependencies) -> Self {
        Self {
            file_size,
            processing_time: 0,
            page_count: None,
            confidence: None,
            is_scanned_pdf: false,
            ocr_method: OcrMethod::Direct,
            conversion_time: None,
            ocr_time: None,
            original_page_count: None,
            processed_pages: None,
            temp_files_created: None,
            fallback_used: None,
            system_dependencies,
        }
    }
}

/// Result of a completed task
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    pub extracted_text: String,
    /// Per-page text in page order
    pub summary: Vec<PageSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tldr: Option<String>,
    pub metadata: ResultMetadata,
}
