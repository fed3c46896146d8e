//! OCR via tesseract

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{Error, Result};

/// Recognized text of one image
#[derive(Debug, Clone, PartialEq)]
pub struct OcrOutput {
    pub text: String,
    /// Mean word confidence, 0-100
    pub confidence: f32,
}

#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, image_path: &Path) -> Result<OcrOutput>;
}

pub struct TesseractOcr {
    program: String,
    language: String,
}

impl TesseractOcr {
    pub fn new(program: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            language: language.into(),
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    async fn recognize(&self, image_path: &Path) -> Result<OcrOutput> {
        let output = Command::new(&self.program)
            .arg(image_path)
            .args(["stdout", "-l", &self.language, "tsv"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::ocr(format!("Failed to run tesseract: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::ocr(format!("tesseract error: {}", stderr.trim())));
        }

        Ok(parse_tsv(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Parse tesseract TSV output.
///
/// Columns: level, page_num, block_num, par_num, line_num, word_num, left, top,
/// width, height, conf, text. Word rows (level 5) carry the text; rows with a
/// negative confidence are layout-only.
pub fn parse_tsv(tsv: &str) -> OcrOutput {
    let mut lines: Vec<String> = Vec::new();
    let mut current_key: Option<(u32, u32, u32, u32)> = None;
    let mut conf_sum = 0.0f32;
    let mut conf_count = 0usize;

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 || cols[0] != "5" {
            continue;
        }

        let word = cols[11].trim();
        let conf: f32 = cols[10].trim().parse().unwrap_or(-1.0);
        if word.is_empty() || conf < 0.0 {
            continue;
        }

        conf_sum += conf;
        conf_count += 1;

        let num = |i: usize| cols[i].parse::<u32>().unwrap_or(0);
        let key = (num(1), num(2), num(3), num(4));
        match lines.last_mut() {
            Some(line) if current_key == Some(key) => {
                line.push(' ');
                line.push_str(word);
            }
            _ => {
                lines.push(word.to_string());
                current_key = Some(key);
            }
        }
    }

    OcrOutput {
        text: lines.join("\n"),
        confidence: if conf_count == 0 {
            0.0
        } else {
            (conf_sum / conf_count as f32).clamp(0.0, 100.0)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t800\t600\t-1\t
4\t1\t1\t1\t1\t0\t10\t10\t200\t20\t-1\t
5\t1\t1\t1\t1\t1\t10\t10\t50\t20\t96.5\tInvoice
5\t1\t1\t1\t1\t2\t70\t10\t50\t20\t91.5\t#1042
5\t1\t1\t1\t2\t1\t10\t40\t50\t20\t88\tTotal:
5\t1\t1\t1\t2\t2\t70\t40\t50\t20\t-1\t
5\t1\t1\t1\t2\t3\t90\t40\t50\t20\t80\t$12.00";

    #[test]
    fn test_parse_tsv_groups_lines_and_averages_confidence() {
        let out = parse_tsv(TSV);
        assert_eq!(out.text, "Invoice #1042\nTotal: $12.00");
        assert!((out.confidence - 89.0).abs() < 0.01);
    }

    #[test]
    fn test_parse_tsv_empty() {
        let out = parse_tsv("level\tpage_num\n");
        assert_eq!(out.text, "");
        assert_eq!(out.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_missing_tesseract_is_ocr_error() {
        let ocr = TesseractOcr::new("docsift-no-such-program", "eng");
        let err = ocr.recognize(Path::new("page.png")).await.unwrap_err();
        assert!(matches!(err, Error::Ocr(_)));
    }
}
