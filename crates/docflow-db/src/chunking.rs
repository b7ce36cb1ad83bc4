//! Token-budgeted document chunking for embedding generation.
//!
//! The chunker splits parsed text into spans sized by estimated token
//! count rather than raw characters, preferring paragraph and sentence
//! boundaries over arbitrary cuts. Only a single sentence that exceeds
//! the whole token budget is cut mid-stream, at a whitespace position
//! inside the boundary window when one exists, and always on a UTF-8
//! character boundary.
//!
//! Chunking is deterministic: the same text and configuration always
//! produce the same spans, which keeps chunk content hashes stable
//! across reprocessing.

use regex::Regex;

use docflow_core::{defaults, estimate_tokens};

/// Approximate bytes per token, used to bound hard cuts.
const CHARS_PER_TOKEN: usize = 4;

/// Configuration for the chunker.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Maximum estimated tokens per chunk.
    pub max_tokens: usize,
    /// Estimated tokens of trailing context carried into the next chunk.
    pub overlap_tokens: usize,
    /// How far back (in bytes) a hard cut searches for whitespace.
    pub boundary_window: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_tokens: defaults::CHUNK_MAX_TOKENS,
            overlap_tokens: defaults::CHUNK_OVERLAP_TOKENS,
            boundary_window: defaults::CHUNK_BOUNDARY_WINDOW,
        }
    }
}

/// A chunk span with position information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    /// The text content of the chunk.
    pub text: String,
    /// Starting byte offset in the original document.
    pub start_offset: usize,
    /// Ending byte offset in the original document.
    pub end_offset: usize,
    /// Estimated token count of `text`.
    pub token_count: usize,
}

/// Common trait for chunking strategies.
pub trait Chunker: Send + Sync {
    /// Chunk the given text into a list of spans.
    fn chunk(&self, text: &str) -> Vec<ChunkSpan>;

    /// Get the configuration used by this chunker.
    fn config(&self) -> &ChunkerConfig;
}

/// Find UTF-8 safe boundary at or before the given position.
fn find_char_boundary_before(text: &str, mut pos: usize) -> usize {
    while pos > 0 && !text.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

/// Paragraph-preferred, sentence-fallback token chunker.
#[derive(Debug, Clone)]
pub struct TokenChunker {
    config: ChunkerConfig,
}

impl TokenChunker {
    /// Create a new TokenChunker with the given configuration.
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Split text into paragraph spans (double newline separated).
    fn split_paragraphs<'a>(&self, text: &'a str) -> Vec<(usize, usize, &'a str)> {
        let para_regex = Regex::new(r"\n\s*\n|\r\n\s*\r\n").unwrap();
        let mut paragraphs = Vec::new();
        let mut last_end = 0;

        // Offsets track the trimmed region so segment spans map back
        // into the source text exactly.
        fn trimmed_span(start: usize, raw: &str) -> Option<(usize, usize, &str)> {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return None;
            }
            let lead = raw.len() - raw.trim_start().len();
            Some((start + lead, start + lead + trimmed.len(), trimmed))
        }

        for mat in para_regex.find_iter(text) {
            paragraphs.extend(trimmed_span(last_end, &text[last_end..mat.start()]));
            last_end = mat.end();
        }

        if last_end < text.len() {
            paragraphs.extend(trimmed_span(last_end, &text[last_end..]));
        }

        paragraphs
    }

    /// Split a paragraph into sentence spans (offsets relative to `text`).
    fn split_sentences(&self, base: usize, para: &str) -> Vec<(usize, usize)> {
        let sentence_regex = Regex::new(r"[.!?]+(?:\s+|$)").unwrap();
        let abbrev_regex =
            Regex::new(r"(?i)\b(?:dr|mr|mrs|ms|prof|sr|jr|inc|ltd|co|etc|vs|e\.g|i\.e)\.$")
                .unwrap();

        let mut sentences = Vec::new();
        let mut last_end = 0;

        for mat in sentence_regex.find_iter(para) {
            let end = mat.end();
            let candidate = &para[last_end..end];

            if abbrev_regex.is_match(candidate.trim()) {
                continue;
            }

            // Decimal number, not a sentence end.
            let before_punct = mat.start();
            if before_punct > 0
                && para[..before_punct]
                    .chars()
                    .last()
                    .is_some_and(|c| c.is_ascii_digit())
            {
                continue;
            }

            sentences.push((base + last_end, base + end));
            last_end = end;
        }

        if last_end < para.len() && !para[last_end..].trim().is_empty() {
            sentences.push((base + last_end, base + para.len()));
        }

        sentences
    }

    /// Hard-cut an oversized segment, preferring whitespace inside the
    /// boundary window.
    fn hard_cut(&self, text: &str, start: usize, end: usize) -> Vec<(usize, usize)> {
        let max_bytes = self.config.max_tokens * CHARS_PER_TOKEN;
        let mut pieces = Vec::new();
        let mut pos = start;

        while pos < end {
            let mut cut = (pos + max_bytes).min(end);
            cut = find_char_boundary_before(text, cut);

            if cut < end {
                // Look back for whitespace inside the window.
                let window_start = cut.saturating_sub(self.config.boundary_window).max(pos);
                if let Some(ws) = text[window_start..cut].rfind(char::is_whitespace) {
                    let candidate = window_start + ws + 1;
                    if candidate > pos {
                        cut = find_char_boundary_before(text, candidate);
                    }
                }
            }

            if cut <= pos {
                // Degenerate case, force progress on the next char boundary.
                cut = pos + 1;
                while cut < end && !text.is_char_boundary(cut) {
                    cut += 1;
                }
            }

            pieces.push((pos, cut));
            pos = cut;
        }

        pieces
    }

    /// Break text into segments no single one of which exceeds the
    /// token budget: paragraphs, then sentences, then hard cuts.
    fn segments(&self, text: &str) -> Vec<(usize, usize)> {
        let mut segments = Vec::new();

        for (start, end, para) in self.split_paragraphs(text) {
            if estimate_tokens(para) <= self.config.max_tokens {
                segments.push((start, end));
                continue;
            }

            for (s_start, s_end) in self.split_sentences(start, para) {
                let sentence = &text[s_start..s_end];
                if estimate_tokens(sentence) <= self.config.max_tokens {
                    segments.push((s_start, s_end));
                } else {
                    segments.extend(self.hard_cut(text, s_start, s_end));
                }
            }
        }

        segments
    }

    /// Trailing segments of a chunk worth up to `overlap_tokens`.
    fn overlap_tail(&self, text: &str, chunk: &[(usize, usize)]) -> Vec<(usize, usize)> {
        if self.config.overlap_tokens == 0 {
            return Vec::new();
        }

        let mut tail = Vec::new();
        let mut tokens = 0;
        for &(start, end) in chunk.iter().rev() {
            let seg_tokens = estimate_tokens(&text[start..end]);
            if tokens + seg_tokens > self.config.overlap_tokens {
                break;
            }
            tokens += seg_tokens;
            tail.push((start, end));
        }
        tail.reverse();
        // Never let the overlap swallow the whole previous chunk.
        if tail.len() == chunk.len() {
            tail.remove(0);
        }
        tail
    }

    fn emit(&self, text: &str, group: &[(usize, usize)]) -> ChunkSpan {
        let start = group[0].0;
        let end = group[group.len() - 1].1;
        let chunk_text = text[start..end].trim().to_string();
        let token_count = estimate_tokens(&chunk_text);
        ChunkSpan {
            text: chunk_text,
            start_offset: start,
            end_offset: end,
            token_count,
        }
    }
}

impl Chunker for TokenChunker {
    fn chunk(&self, text: &str) -> Vec<ChunkSpan> {
        if text.trim().is_empty() {
            return vec![];
        }

        let segments = self.segments(text);
        if segments.is_empty() {
            return vec![];
        }

        let mut chunks = Vec::new();
        let mut current: Vec<(usize, usize)> = Vec::new();
        let mut current_tokens = 0usize;

        for &(start, end) in &segments {
            let seg_tokens = estimate_tokens(&text[start..end]);

            if !current.is_empty() && current_tokens + seg_tokens > self.config.max_tokens {
                chunks.push(self.emit(text, &current));
                let tail = self.overlap_tail(text, &current);
                current_tokens = tail
                    .iter()
                    .map(|&(s, e)| estimate_tokens(&text[s..e]))
                    .sum();
                current = tail;
            }

            current.push((start, end));
            current_tokens += seg_tokens;
        }

        if !current.is_empty() {
            chunks.push(self.emit(text, &current));
        }

        chunks
    }

    fn config(&self) -> &ChunkerConfig {
        &self.config
    }
}
