//! Paragraph-boundary text chunker.
//!
//! Splits a page's extracted text into [`TextChunk`]s that respect a
//! configurable `max_tokens` limit, on `\n\n` boundaries where possible.
//! This is the pure splitting algorithm only; structural context
//! (`parent_heading`, `bbox`, …) is filled in by the ingestion pipeline
//! once headings are known.
//!
//! # Algorithm
//!
//! 1. Convert `max_tokens` to `max_chars` using a 4 chars/token ratio.
//! 2. Split text on `\n\n` paragraph boundaries.
//! 3. Accumulate paragraphs into a buffer until adding the next paragraph
//!    would exceed `max_chars`.
//! 4. When exceeded, flush the buffer as a chunk and start a new one.
//! 5. If a single paragraph exceeds `max_chars`, hard-split at the nearest
//!    newline or space boundary.
//! 6. Guarantee at least one chunk per page (even for empty text).

use crate::models::{format_chunk_id, ChunkContext, TextChunk};

const CHARS_PER_TOKEN: usize = 4;

/// Split `text` belonging to `page` of `doc_id` into chunks, continuing the
/// chunk ordinal count from `start_ordinal` (so a multi-page document keeps
/// a single contiguous `chunkNNNN` sequence across pages).
///
/// Returns the chunks plus the next free ordinal.
pub fn chunk_page_text(
    doc_id: &str,
    page: u32,
    text: &str,
    max_tokens: usize,
    start_ordinal: u32,
) -> (Vec<TextChunk>, u32) {
    let max_chars = max_tokens * CHARS_PER_TOKEN;
    let mut ordinal = start_ordinal;

    if text.trim().is_empty() {
        return (Vec::new(), ordinal);
    }

    let paragraphs: Vec<&str> = text.split("\n\n").collect();
    let mut chunks = Vec::new();
    let mut buf = String::new();

    for para in paragraphs {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if buf.is_empty() {
            trimmed.len()
        } else {
            buf.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && !buf.is_empty() {
            chunks.push(make_chunk(doc_id, page, ordinal, &buf));
            ordinal += 1;
            buf.clear();
        }

        if trimmed.len() > max_chars {
            if !buf.is_empty() {
                chunks.push(make_chunk(doc_id, page, ordinal, &buf));
                ordinal += 1;
                buf.clear();
            }
            let mut remaining = trimmed;
            while !remaining.is_empty() {
                let split_at = snap_to_char_boundary(remaining, remaining.len().min(max_chars));
                let split_at = bump_past_zero(remaining, split_at);
                let actual = if split_at < remaining.len() {
                    remaining[..split_at]
                        .rfind('\n')
                        .or_else(|| remaining[..split_at].rfind(' '))
                        .map(|pos| pos + 1)
                        .unwrap_or(split_at)
                } else {
                    split_at
                };
                let actual = bump_past_zero(remaining, snap_to_char_boundary(remaining, actual));
                let piece = remaining[..actual].trim();
                if !piece.is_empty() {
                    chunks.push(make_chunk(doc_id, page, ordinal, piece));
                    ordinal += 1;
                }
                remaining = &remaining[actual..];
            }
        } else {
            if !buf.is_empty() {
                buf.push_str("\n\n");
            }
            buf.push_str(trimmed);
        }
    }
    if !buf.is_empty() {
        chunks.push(make_chunk(doc_id, page, ordinal, &buf));
        ordinal += 1;
    }

    (chunks, ordinal)
}

fn bump_past_zero(s: &str, idx: usize) -> usize {
    if idx == 0 && !s.is_empty() {
        s.char_indices().nth(1).map(|(i, _)| i).unwrap_or(s.len())
    } else {
        idx
    }
}

fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn make_chunk(doc_id: &str, page: u32, ordinal: u32, text: &str) -> TextChunk {
    TextChunk {
        doc_id: doc_id.to_string(),
        chunk_id: format_chunk_id(doc_id, ordinal),
        text: text.to_string(),
        word_count: text.split_whitespace().count() as u32,
        page,
        page_nums: vec![page],
        context: ChunkContext::default(),
    }
}
