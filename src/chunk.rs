//! Line-boundary text chunker.
//!
//! Splits a scope's text into chunks bounded by `max_chars`, cutting only
//! on line boundaries. Scope text is built one rendered message (or canvas
//! block) per line, so a line is the atomic unit: a chunk boundary never
//! falls inside a message.
//!
//! # Algorithm
//!
//! 1. Split the text into line segments, each keeping its trailing `\n`.
//! 2. Accumulate segments into a buffer while the buffer stays within
//!    `max_chars`.
//! 3. When the next segment would overflow, flush the buffer as a chunk.
//! 4. A single segment longer than `max_chars` becomes its own oversized
//!    chunk — it is never split.
//!
//! # Guarantees
//!
//! - Lossless: concatenating the chunks in order reproduces the input
//!   byte-for-byte.
//! - No chunk exceeds `max_chars`, except a chunk holding one oversized
//!   segment.
//! - Deterministic: the same input and bound always produce the same
//!   sequence, which keeps retried tasks reproducible.

/// Split `text` into chunks of at most `max_chars` characters, cutting on
/// line boundaries only.
///
/// The bound counts a line's trailing newline as part of the line. Empty
/// input produces no chunks.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut buf = String::new();

    for segment in text.split_inclusive('\n') {
        if !buf.is_empty() && buf.len() + segment.len() > max_chars {
            chunks.push(std::mem::take(&mut buf));
        }
        if segment.len() > max_chars {
            // Oversized line: emit alone, never split mid-message.
            chunks.push(segment.to_string());
        } else {
            buf.push_str(segment);
        }
    }

    if !buf.is_empty() {
        chunks.push(buf);
    }

    chunks
}
