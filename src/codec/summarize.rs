//! Extractive summarization that never lengthens its input.
//!
//! Sentences are scored by the mean document frequency of their content
//! words; the best ones are kept in their original order.

use std::collections::HashMap;

use serde::Serialize;

/// Result of summarizing a piece of text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    /// Summary text; never longer than the input in chars or in bytes.
    pub text: String,
    /// Highest-scoring sentences, best first.
    pub key_points: Vec<String>,
    /// `summary chars / input chars`, `1.0` for empty input.
    pub compression_ratio: f64,
}

const ELLIPSIS: char = '…';

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "he",
    "in", "is", "it", "its", "of", "on", "or", "she", "that", "the", "their", "there", "they",
    "this", "to", "was", "were", "will", "with",
];

fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let terminal = matches!(c, '.' | '!' | '?');
        if c == '\n' || (terminal && !matches!(chars.peek(), Some((_, '.' | '!' | '?')))) {
            let end = i.saturating_add(c.len_utf8());
            if let Some(sentence) = text.get(start..end) {
                sentences.push(sentence);
            }
            start = end;
        }
    }
    if let Some(rest) = text.get(start..) {
        sentences.push(rest);
    }
    sentences
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Summarize `text` to at most `max_sentences` sentences and `max_chars` chars.
pub fn summarize(
    text: &str,
    max_sentences: usize,
    max_chars: usize,
    max_key_points: usize,
) -> Summary {
    let input_chars = text.chars().count();
    let sentences = split_sentences(text);

    let frequencies = word_frequencies(&sentences);
    let mut ranked: Vec<(usize, f64)> = sentences
        .iter()
        .enumerate()
        .map(|(i, s)| (i, sentence_score(s, &frequencies)))
        .collect();
    // Stable sort: equal scores keep document order.
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let keep = max_sentences.max(1);
    let mut chosen: Vec<usize> = ranked.iter().take(keep).map(|(i, _)| *i).collect();
    chosen.sort_unstable();

    let joined = chosen
        .iter()
        .filter_map(|&i| sentences.get(i).copied())
        .collect::<Vec<_>>()
        .join(" ");

    let candidate = if joined.chars().count() > input_chars || joined.len() > text.len() {
        text.trim().to_owned()
    } else {
        joined
    };
    let summary_text = truncate(&candidate, max_chars.min(input_chars), text.len());

    let key_points = ranked
        .iter()
        .take(max_key_points)
        .filter_map(|(i, _)| sentences.get(*i))
        .map(|s| (*s).to_owned())
        .collect();

    let compression_ratio = if input_chars == 0 {
        1.0
    } else {
        #[allow(clippy::cast_precision_loss)]
        let ratio = summary_text.chars().count() as f64 / input_chars as f64;
        ratio.min(1.0)
    };

    Summary {
        text: summary_text,
        key_points,
        compression_ratio,
    }
}

fn word_frequencies(sentences: &[&str]) -> HashMap<String, u32> {
    let mut freq = HashMap::new();
    for sentence in sentences {
        for word in content_words(sentence) {
            let count = freq.entry(word).or_insert(0u32);
            *count = count.saturating_add(1);
        }
    }
    freq
}

fn sentence_score(sentence: &str, frequencies: &HashMap<String, u32>) -> f64 {
    let words = content_words(sentence);
    if words.is_empty() {
        return 0.0;
    }
    let total: u32 = words
        .iter()
        .map(|w| frequencies.get(w).copied().unwrap_or(0))
        .fold(0u32, u32::saturating_add);
    #[allow(clippy::cast_precision_loss)]
    let score = f64::from(total) / words.len() as f64;
    score
}

fn content_words(sentence: &str) -> Vec<String> {
    sentence
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Truncate to at most `max_chars` chars and `max_bytes` bytes, marking the
/// cut with an ellipsis when it fits.
fn truncate(text: &str, max_chars: usize, max_bytes: usize) -> String {
    if text.chars().count() <= max_chars && text.len() <= max_bytes {
        return text.to_owned();
    }
    if max_chars == 0 {
        return String::new();
    }
    let marker = ELLIPSIS.len_utf8();
    if max_bytes < marker {
        return prefix_within(text, max_chars, max_bytes);
    }
    let mut out = prefix_within(text, max_chars.saturating_sub(1), max_bytes.saturating_sub(marker));
    out.push(ELLIPSIS);
    out
}

/// Longest prefix of at most `max_chars` chars and `max_bytes` bytes.
fn prefix_within(text: &str, max_chars: usize, max_bytes: usize) -> String {
    let mut out = String::new();
    for c in text.chars().take(max_chars) {
        if out.len().saturating_add(c.len_utf8()) > max_bytes {
            break;
        }
        out.push(c);
    }
    out
}
