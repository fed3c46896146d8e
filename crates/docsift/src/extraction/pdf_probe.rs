//! Byte-level PDF probe
//!
//! Cheap scan of the raw file, used when the parser cannot tell us the page count
//! and to flag documents that are likely image-only before parsing.

use serde::Serialize;

/// Quick PDF analysis without full parsing
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PdfAnalysis {
    pub is_encrypted: bool,
    pub has_complex_fonts: bool,
    pub likely_scanned: bool,
    pub estimated_pages: u32,
    pub image_count: usize,
    pub text_stream_count: usize,
}

impl PdfAnalysis {
    /// Analyze PDF bytes
    pub fn analyze(data: &[u8]) -> Self {
        let is_encrypted = contains(data, b"/Encrypt");
        let has_complex_fonts = contains(data, b"/ToUnicode");

        let image_count = count_names(data, b"/Image") + count_names(data, b"/XObject");

        // BT = begin text
        let text_stream_count = data
            .windows(3)
            .filter(|w| w[0] == b'B' && w[1] == b'T' && w[2].is_ascii_whitespace())
            .count();

        let likely_scanned =
            image_count > 0 && (text_stream_count == 0 || image_count > text_stream_count * 3);

        Self {
            is_encrypted,
            has_complex_fonts,
            likely_scanned,
            estimated_pages: (count_names(data, b"/Page") as u32).max(1),
            image_count,
            text_stream_count,
        }
    }

    /// Whether the bytes look like a PDF at all
    pub fn has_pdf_header(data: &[u8]) -> bool {
        data.len() >= 5 && data[..1024.min(data.len())].windows(5).any(|w| w == b"%PDF-")
    }
}

fn contains(data: &[u8], needle: &[u8]) -> bool {
    data.windows(needle.len()).any(|w| w == needle)
}

/// Count a PDF name token, not longer names sharing its prefix (`/Page` vs `/Pages`)
fn count_names(data: &[u8], name: &[u8]) -> usize {
    let n = name.len();
    data.windows(n + 1)
        .filter(|w| &w[..n] == name && !w[n].is_ascii_alphanumeric())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_pdf() {
        let pdf = b"%PDF-1.4\n<</Type /Pages /Kids [3 0 R 4 0 R]>>\n<</Type /Page>>\n<</Type/Page/Parent 2 0 R>>\nBT /F1 12 Tf (hi) Tj ET";
        let analysis = PdfAnalysis::analyze(pdf);
        assert!(!analysis.is_encrypted);
        assert!(!analysis.likely_scanned);
        assert_eq!(analysis.estimated_pages, 2);
        assert_eq!(analysis.text_stream_count, 1);
        assert!(PdfAnalysis::has_pdf_header(pdf));
    }

    #[test]
    fn test_image_only_pdf() {
        let pdf = b"%PDF-1.7\n<</Type /XObject /Subtype /Image /Width 10>>\n<</Type /Page>>";
        let analysis = PdfAnalysis::analyze(pdf);
        assert!(analysis.likely_scanned);
        assert_eq!(analysis.estimated_pages, 1);
    }

    #[test]
    fn test_encrypted_marker_and_empty_input() {
        assert!(PdfAnalysis::analyze(b"%PDF-1.4 /Encrypt 5 0 R").is_encrypted);
        let empty = PdfAnalysis::analyze(b"");
        assert_eq!(empty.estimated_pages, 1);
        assert!(!PdfAnalysis::has_pdf_header(b"PNG"));
    }
}
