//! Text-density heuristic for scanned vs text-bearing pages

use unicode_segmentation::UnicodeSegmentation;

/// Character and word counts of one page of extracted text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextDensity {
    /// Non-whitespace characters
    pub chars: usize,
    pub words: usize,
}

impl TextDensity {
    pub fn of(text: &str) -> Self {
        Self {
            chars: text.chars().filter(|c| !c.is_whitespace()).count(),
            words: text.unicode_words().count(),
        }
    }

    /// A page is text-bearing when either count reaches its threshold.
    /// A threshold of 0 disables that check.
    pub fn meets(&self, min_chars: usize, min_words: usize) -> bool {
        (min_chars > 0 && self.chars >= min_chars) || (min_words > 0 && self.words >= min_words)
    }
}

/// Classification of a parsed PDF
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DensityVerdict {
    /// 1-indexed pages that met the threshold
    pub text_pages: Vec<u32>,
    pub total_chars: usize,
}

impl DensityVerdict {
    /// Direct extraction wins if any single page has usable text
    pub fn has_text(&self) -> bool {
        !self.text_pages.is_empty()
    }
}

pub fn classify_pages(pages: &[String], min_chars: usize, min_words: usize) -> DensityVerdict {
    let mut text_pages = Vec::new();
    let mut total_chars = 0;

    for (idx, page) in pages.iter().enumerate() {
        let density = TextDensity::of(page);
        total_chars += density.chars;
        if density.meets(min_chars, min_words) {
            text_pages.push(idx as u32 + 1);
        }
    }

    DensityVerdict {
        text_pages,
        total_chars,
    }
}
