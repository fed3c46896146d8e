//! TL;DR generation from extracted text
//!
//! Extractive mode scores sentences by position, length and content-word density.
//! Abstractive mode scores them by how many of the document's frequent keywords
//! they contain. Both select sentences greedily until the character budget is spent.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use unicode_segmentation::UnicodeSegmentation;

use crate::types::SummaryType;

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\p{L}\p{N}]+").expect("word pattern is valid"));

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "an", "and", "are", "as", "at", "be", "been", "but", "by", "can", "did", "do", "does",
        "for", "from", "had", "has", "have", "he", "her", "his", "how", "i", "if", "in", "into", "is",
        "it", "its", "may", "more", "not", "of", "on", "or", "our", "she", "so", "such", "than",
        "that", "the", "their", "them", "then", "there", "these", "they", "this", "those", "to",
        "was", "we", "were", "what", "when", "which", "who", "will", "with", "would", "you", "your",
    ]
    .into_iter()
    .collect()
});

/// Ideal sentence length range, in words
const IDEAL_WORDS: (usize, usize) = (8, 30);

struct Sentence {
    index: usize,
    text: String,
    words: Vec<String>,
}

impl Sentence {
    fn content_words(&self) -> impl Iterator<Item = &String> {
        self.words.iter().filter(|w| is_content_word(w))
    }
}

fn is_content_word(word: &str) -> bool {
    word.chars().count() > 2 && !STOPWORDS.contains(word)
}

#[derive(Debug, Clone, Default)]
pub struct Summarizer;

impl Summarizer {
    pub fn new() -> Self {
        Self
    }

    /// Summary of at most `max_length` characters, or `None` for text without sentences
    pub fn summarize(&self, text: &str, summary_type: SummaryType, max_length: usize) -> Option<String> {
        let sentences = split_sentences(text);
        if sentences.is_empty() || max_length == 0 {
            return None;
        }

        let scores = match summary_type {
            SummaryType::Extractive => score_extractive(&sentences),
            SummaryType::Abstractive => score_by_keywords(&sentences),
        };

        Some(select(&sentences, &scores, max_length))
    }
}

fn split_sentences(text: &str) -> Vec<Sentence> {
    text.unicode_sentences()
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|s| !s.is_empty())
        .enumerate()
        .map(|(index, text)| {
            let words = WORD
                .find_iter(&text.to_lowercase())
                .map(|m| m.as_str().to_string())
                .collect();
            Sentence { index, text, words }
        })
        .filter(|s| !s.words.is_empty())
        .collect()
}

fn score_extractive(sentences: &[Sentence]) -> Vec<f32> {
    let n = sentences.len() as f32;
    sentences
        .iter()
        .enumerate()
        .map(|(pos, s)| {
            let position = 1.0 - pos as f32 / n;

            let words = s.words.len();
            let length = if words < IDEAL_WORDS.0 {
                words as f32 / IDEAL_WORDS.0 as f32
            } else if words > IDEAL_WORDS.1 {
                IDEAL_WORDS.1 as f32 / words as f32
            } else {
                1.0
            };

            let density = s.content_words().count() as f32 / words as f32;

            0.4 * position + 0.3 * length + 0.3 * density
        })
        .collect()
}

fn score_by_keywords(sentences: &[Sentence]) -> Vec<f32> {
    let mut frequency: HashMap<&str, usize> = HashMap::new();
    for sentence in sentences {
        for word in sentence.content_words() {
            *frequency.entry(word.as_str()).or_default() += 1;
        }
    }
    let top = frequency.values().copied().max().unwrap_or(1) as f32;

    sentences
        .iter()
        .map(|s| {
            let total: f32 = s
                .content_words()
                .map(|w| frequency.get(w.as_str()).copied().unwrap_or(0) as f32 / top)
                .sum();
            // Normalise so long sentences do not win on length alone
            total / (s.words.len() as f32).sqrt()
        })
        .collect()
}

/// Take the best-scoring sentences that fit, then restore document order
fn select(sentences: &[Sentence], scores: &[f32], max_length: usize) -> String {
    let mut ranked: Vec<usize> = (0..sentences.len()).collect();
    ranked.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });

    let mut chosen: Vec<&Sentence> = Vec::new();
    let mut used = 0usize;
    for idx in &ranked {
        let sentence = &sentences[*idx];
        let len = sentence.text.chars().count();
        let extra = if chosen.is_empty() { len } else { len + 1 };
        if used + extra <= max_length {
            chosen.push(sentence);
            used += extra;
        }
    }

    if chosen.is_empty() {
        return truncate_at_word(&sentences[ranked[0]].text, max_length);
    }

    chosen.sort_by_key(|s| s.index);
    chosen.iter().map(|s| s.text.as_str()).collect::<Vec<_>>().join(" ")
}

/// Cut to at most `max_length` characters at a word boundary, ending in "..."
fn truncate_at_word(text: &str, max_length: usize) -> String {
    if text.chars().count() <= max_length {
        return text.to_string();
    }
    if max_length <= 3 {
        return text.chars().take(max_length).collect();
    }

    let budget = max_length - 3;
    let mut cut: String = text.chars().take(budget).collect();
    if let Some(space) = cut.rfind(' ') {
        if space > 0 {
            cut.truncate(space);
        }
    }
    format!("{}...", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "The solar farm project reached full capacity in March. \
        Engineers installed twelve thousand panels across the northern site. \
        It was sunny. \
        Panel output from the solar farm exceeded the solar forecast by nine percent. \
        Maintenance crews will inspect the solar panels every quarter.";

    #[test]
    fn test_summary_respects_length() {
        let summarizer = Summarizer::new();
        for max in [50, 80, 120, 200, 1000] {
            for kind in [SummaryType::Extractive, SummaryType::Abstractive] {
                let summary = summarizer.summarize(REPORT, kind, max).unwrap();
                assert!(!summary.is_empty());
                assert!(summary.chars().count() <= max, "{} > {}", summary.len(), max);
            }
        }
    }

    #[test]
    fn test_extractive_prefers_leading_sentence() {
        let summary = Summarizer::new()
            .summarize(REPORT, SummaryType::Extractive, 60)
            .unwrap();
        assert_eq!(summary, "The solar farm project reached full capacity in March.");
    }

    #[test]
    fn test_abstractive_prefers_keyword_rich_sentence() {
        let summary = Summarizer::new()
            .summarize(REPORT, SummaryType::Abstractive, 80)
            .unwrap();
        assert!(summary.contains("solar"));
        assert!(!summary.contains("It was sunny"));
    }

    #[test]
    fn test_selected_sentences_keep_document_order() {
        let summary = Summarizer::new()
            .summarize(REPORT, SummaryType::Extractive, 1000)
            .unwrap();
        assert!(summary.starts_with("The solar farm project"));
        assert!(summary.ends_with("every quarter."));
    }

    #[test]
    fn test_long_single_sentence_is_truncated() {
        let text = "word ".repeat(100);
        let summary = Summarizer::new()
            .summarize(&text, SummaryType::Extractive, 50)
            .unwrap();
        assert!(summary.ends_with("..."));
        assert!(summary.chars().count() <= 50);
    }

    #[test]
    fn test_empty_text_has_no_summary() {
        assert!(Summarizer::new().summarize("   \n ", SummaryType::Extractive, 200).is_none());
        assert!(Summarizer::new().summarize("... !!", SummaryType::Abstractive, 200).is_none());
    }
}
