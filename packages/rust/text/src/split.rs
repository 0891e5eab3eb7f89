//! Deterministic Markdown chunking.
//!
//! Splitting is hierarchical: paragraphs are packed greedily into chunks up
//! to [`CHUNK_SIZE`] bytes; a paragraph too large on its own is split at
//! sentence boundaries; a single oversized sentence falls back to a sliding
//! character window. Consecutive chunks share up to [`CHUNK_OVERLAP`] bytes
//! of context. Every chunk carries the text of the nearest preceding Markdown
//! heading as its title.

use std::sync::LazyLock;

use regex::Regex;

use docrag_shared::{Chunk, ChunkId, SiteId};

/// Maximum chunk size in bytes.
pub const CHUNK_SIZE: usize = 2000;

/// Overlap carried between consecutive chunks, in bytes.
pub const CHUNK_OVERLAP: usize = 200;

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.+)$").expect("valid regex"));

/// A contiguous run of text with the heading that governs it.
struct Piece {
    title: String,
    text: String,
}

/// Split Markdown into retrieval chunks for one page.
///
/// `page_title` is used for content that precedes the first heading. Output
/// is deterministic for identical input; positions are sequential from 0.
pub fn split(markdown: &str, site_id: SiteId, source_url: &str, page_title: &str) -> Vec<Chunk> {
    let pieces = into_pieces(markdown, page_title);

    let mut chunks: Vec<Chunk> = Vec::new();
    let mut buffer = String::new();
    let mut buffer_title = page_title.to_string();

    let flush = |buffer: &mut String, title: &str, chunks: &mut Vec<Chunk>| {
        let text = buffer.trim().to_string();
        if !text.is_empty() {
            chunks.push(Chunk {
                id: ChunkId::new(),
                site_id,
                source_url: source_url.to_string(),
                title: title.to_string(),
                position: chunks.len() as u32,
                text,
            });
        }
        buffer.clear();
    };

    for piece in pieces {
        if buffer.is_empty() {
            buffer_title = piece.title;
            buffer = piece.text;
            continue;
        }

        if buffer.len() + 2 + piece.text.len() <= CHUNK_SIZE {
            buffer.push_str("\n\n");
            buffer.push_str(&piece.text);
            continue;
        }

        let tail = overlap_tail(&buffer);
        flush(&mut buffer, &buffer_title, &mut chunks);

        buffer_title = piece.title;
        if !tail.is_empty() && tail.len() + 2 + piece.text.len() <= CHUNK_SIZE {
            buffer = format!("{tail}\n\n{}", piece.text);
        } else {
            buffer = piece.text;
        }
    }

    flush(&mut buffer, &buffer_title, &mut chunks);
    chunks
}

/// Break Markdown into size-bounded pieces, each annotated with the heading
/// in effect where it starts.
fn into_pieces(markdown: &str, page_title: &str) -> Vec<Piece> {
    let mut pieces = Vec::new();
    let mut current_title = page_title.to_string();
    let mut block = String::new();

    let flush_block = |block: &mut String, title: &str, pieces: &mut Vec<Piece>| {
        let text = block.trim();
        if !text.is_empty() {
            for part in bound_size(text) {
                pieces.push(Piece {
                    title: title.to_string(),
                    text: part,
                });
            }
        }
        block.clear();
    };

    for line in markdown.lines() {
        if line.trim().is_empty() {
            flush_block(&mut block, &current_title, &mut pieces);
            continue;
        }
        if let Some(caps) = HEADING_RE.captures(line) {
            flush_block(&mut block, &current_title, &mut pieces);
            current_title = caps[2].trim().to_string();
        }
        if !block.is_empty() {
            block.push('\n');
        }
        block.push_str(line);
    }
    flush_block(&mut block, &current_title, &mut pieces);

    pieces
}

/// Split a block into parts no larger than [`CHUNK_SIZE`]: first at sentence
/// boundaries, then by sliding window for a single oversized sentence.
fn bound_size(text: &str) -> Vec<String> {
    if text.len() <= CHUNK_SIZE {
        return vec![text.to_string()];
    }

    let mut parts: Vec<String> = Vec::new();
    let mut current = String::new();

    for sentence in split_sentences(text) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }

        if sentence.len() > CHUNK_SIZE {
            if !current.is_empty() {
                parts.push(std::mem::take(&mut current));
            }
            parts.extend(sliding_window(sentence));
            continue;
        }

        if !current.is_empty() && current.len() + 1 + sentence.len() > CHUNK_SIZE {
            parts.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(sentence);
    }

    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

/// Sentence boundaries: a `.`, `!` or `?` followed by whitespace.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut prev_was_end = false;

    for (idx, ch) in text.char_indices() {
        if prev_was_end && ch.is_whitespace() {
            out.push(&text[start..idx]);
            start = idx;
        }
        prev_was_end = matches!(ch, '.' | '!' | '?');
    }
    out.push(&text[start..]);
    out
}

/// Fixed windows of [`CHUNK_SIZE`] bytes stepping by
/// `CHUNK_SIZE - CHUNK_OVERLAP`, aligned to char boundaries.
fn sliding_window(text: &str) -> Vec<String> {
    let step = CHUNK_SIZE - CHUNK_OVERLAP;
    let mut windows = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let end = floor_char_boundary(text, (start + CHUNK_SIZE).min(text.len()));
        windows.push(text[start..end].to_string());
        if end == text.len() {
            break;
        }
        start = floor_char_boundary(text, start + step).max(start + 1);
    }
    windows
}

/// Last [`CHUNK_OVERLAP`] bytes of a chunk, aligned to a char boundary and
/// trimmed to avoid starting mid-word.
fn overlap_tail(text: &str) -> String {
    if text.len() <= CHUNK_OVERLAP {
        return text.to_string();
    }
    let cut = floor_char_boundary(text, text.len() - CHUNK_OVERLAP);
    let tail = &text[cut..];
    match tail.find(char::is_whitespace) {
        Some(ws) => tail[ws..].trim_start().to_string(),
        None => tail.to_string(),
    }
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
