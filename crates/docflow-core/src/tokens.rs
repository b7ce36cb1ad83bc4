//! Approximate token counting for chunk sizing.
//!
//! The pipeline does not need exact model tokenization; chunk bounds
//! only have to be stable and roughly proportional to model tokens.
//! Whitespace-delimited words plus a punctuation correction tracks
//! common BPE tokenizers closely enough for sizing.

/// Estimate the token count of a text span.
///
/// Deterministic: identical input always yields an identical count,
/// which keeps chunk boundaries stable across reprocessing.
pub fn estimate_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count();
    let punct = text
        .chars()
        .filter(|c| c.is_ascii_punctuation())
        .count();
    // ~1.3 tokens per word plus standalone punctuation tokens.
    words + words / 3 + punct / 2
}
