//! Direct PDF text extraction

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

use super::pdf_probe::PdfAnalysis;
use crate::error::{Error, Result};

/// Text of a parsed PDF, one entry per page in order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedPages {
    pub pages: Vec<String>,
    pub page_count: u32,
}

impl ExtractedPages {
    pub fn is_blank(&self) -> bool {
        self.pages.iter().all(|p| p.trim().is_empty())
    }
}

/// Parses embedded text out of a PDF
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_pages(&self, path: &Path) -> Result<ExtractedPages>;
}

/// lopdf per-page extraction with pdf-extract as the whole-document fallback
pub struct PdfTextExtractor {
    timeout: Duration,
}

impl PdfTextExtractor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl TextExtractor for PdfTextExtractor {
    async fn extract_pages(&self, path: &Path) -> Result<ExtractedPages> {
        let data = tokio::fs::read(path).await?;
        let handle = tokio::task::spawn_blocking(move || extract_pdf_pages(&data));

        match tokio::time::timeout(self.timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(Error::extraction(format!("PDF parser crashed: {}", e))),
            Err(_) => {
                // The blocking thread keeps running; nothing can interrupt it
                tracing::error!(
                    "PDF text extraction timeout after {}s - PDF may have complex fonts",
                    self.timeout.as_secs()
                );
                Err(Error::timeout("PDF text extraction", self.timeout.as_secs()))
            }
        }
    }
}

/// Synchronous extraction, run on the blocking pool
pub fn extract_pdf_pages(data: &[u8]) -> Result<ExtractedPages> {
    let analysis = PdfAnalysis::analyze(data);
    if analysis.is_encrypted {
        tracing::debug!("PDF carries an /Encrypt dictionary");
    }

    match lopdf::Document::load_mem(data) {
        Ok(doc) => {
            let page_ids = doc.get_pages();
            let mut pages = Vec::with_capacity(page_ids.len());

            for (page_num, page_id) in &page_ids {
                let text = match doc.extract_text(&[*page_num]) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::debug!("lopdf could not extract page {}: {}, scanning content stream", page_num, e);
                        doc.get_page_content(*page_id)
                            .map(|content| text_from_content_stream(&content))
                            .unwrap_or_default()
                    }
                };
                pages.push(clean_text(&text));
            }

            let extracted = ExtractedPages {
                page_count: page_ids.len() as u32,
                pages,
            };
            if !extracted.is_blank() {
                return Ok(extracted);
            }

            // Fonts lopdf cannot decode sometimes still work with pdf-extract
            match document_pages(data) {
                Ok(raw) if raw.iter().any(|p| !p.trim().is_empty()) => {
                    Ok(fallback_pages(raw, extracted.page_count))
                }
                _ => Ok(extracted),
            }
        }
        Err(e) => {
            tracing::warn!("lopdf failed to load PDF: {}, trying pdf-extract", e);
            let raw = document_pages(data)?;
            Ok(fallback_pages(raw, analysis.estimated_pages))
        }
    }
}

fn document_pages(data: &[u8]) -> Result<Vec<String>> {
    pdf_extract::extract_text_from_mem_by_pages(data)
        .map_err(|e| Error::extraction(format!("Failed to parse PDF: {}", e)))
}

/// Clean pdf-extract output page by page. pdf-extract stops at the first
/// page it cannot render, so missing trailing pages are kept as blanks.
fn fallback_pages(pages: Vec<String>, page_count: u32) -> ExtractedPages {
    let mut pages: Vec<String> = pages.iter().map(|p| clean_text(p)).collect();
    let page_count = page_count.max(pages.len() as u32);
    pages.resize(page_count as usize, String::new());
    ExtractedPages { pages, page_count }
}

/// Pull string operands of `Tj`/`TJ` out of a raw content stream
fn text_from_content_stream(content: &[u8]) -> String {
    let content = String::from_utf8_lossy(content);
    let mut text = String::new();
    let mut in_text_block = false;

    for line in content.lines() {
        let line = line.trim();
        match line {
            "BT" => in_text_block = true,
            "ET" => {
                in_text_block = false;
                text.push('\n');
            }
            _ if in_text_block && (line.ends_with("Tj") || line.ends_with("TJ")) => {
                if let (Some(start), Some(end)) = (line.find('('), line.rfind(')')) {
                    if start < end {
                        let decoded = line[start + 1..end]
                            .replace("\\(", "(")
                            .replace("\\)", ")")
                            .replace("\\\\", "\\");
                        text.push_str(&decoded);
                    }
                }
            }
            _ => {}
        }
    }

    text
}

/// Normalise typographic characters and drop blank lines
pub fn clean_text(text: &str) -> String {
    text.replace('\0', "")
        .replace(['\u{2010}', '\u{2011}', '\u{2013}'], "-")
        .replace('\u{2014}', "--")
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace('\u{2022}', "* ")
        .replace('\u{2026}', "...")
        .replace('\u{00A0}', " ")
        .replace('\u{FB01}', "fi")
        .replace('\u{FB02}', "fl")
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text() {
        let cleaned = clean_text("  \u{201C}Quoted\u{201D}\u{00A0}text\u{2026}  \n\n\n  next\0 line ");
        assert_eq!(cleaned, "\"Quoted\" text...\nnext line");
    }

    #[test]
    fn test_content_stream_scan() {
        let stream = b"BT\n/F1 12 Tf\n72 712 Td\n(Hello \\(world\\)) Tj\nET\nBT\n(Second) Tj\nET";
        assert_eq!(text_from_content_stream(stream), "Hello (world)\nSecond\n");
    }

    #[test]
    fn test_garbage_is_extraction_error() {
        let err = extract_pdf_pages(b"not a pdf at all").unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }

    #[test]
    fn test_fallback_keeps_pages_apart() {
        let raw = vec![
            "  Page 1 of 3\n".to_string(),
            "Page 2 of 3".to_string(),
            "\u{201C}Page 3 of 3\u{201D}".to_string(),
        ];
        let extracted = fallback_pages(raw, 3);

        assert_eq!(extracted.page_count, 3);
        assert_eq!(extracted.pages, vec!["Page 1 of 3", "Page 2 of 3", "\"Page 3 of 3\""]);

        // Each footer is sparse on its own even though together they are not
        let verdict = crate::extraction::classifier::classify_pages(&extracted.pages, 20, 10);
        assert!(!verdict.has_text());
        assert!(verdict.total_chars >= 20);
    }

    #[test]
    fn test_fallback_pads_unrendered_pages() {
        let extracted = fallback_pages(vec!["Only the first page rendered".to_string()], 4);
        assert_eq!(extracted.page_count, 4);
        assert_eq!(extracted.pages.len(), 4);
        assert!(extracted.pages[1..].iter().all(|p| p.is_empty()));
        assert!(!extracted.is_blank());
    }

    #[test]
    fn test_blank_pages() {
        let pages = ExtractedPages {
            pages: vec!["".into(), "  ".into()],
            page_count: 2,
        };
        assert!(pages.is_blank());
    }
}
