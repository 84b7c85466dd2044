use sha2::{Digest, Sha256};
use siteqa_core::config::validate_chunk_params;
use siteqa_core::domain::{Chunk, Document};
use siteqa_core::error::AppError;

/// How far below the target end (as % of chunk_size) a natural boundary may sit.
pub const BOUNDARY_TOLERANCE_PCT: usize = 20;

/// Split a document's normalized text into overlapping chunks.
///
/// Sizes are in characters. Each chunk ends at the paragraph break nearest the target
/// size, else the nearest sentence end, else exactly `chunk_size` characters in. The next
/// chunk starts `overlap` characters back, nudged forward to a word start.
pub fn chunk_document(
    doc: &Document,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<Chunk>, AppError> {
    validate_chunk_params(chunk_size, overlap)?;

    let spans = split_spans(&doc.text, chunk_size, overlap);
    Ok(spans
        .into_iter()
        .enumerate()
        .map(|(i, (start, end))| {
            make_chunk(doc.source_id(), i as u32, start, end, &doc.text[start..end])
        })
        .collect())
}

fn make_chunk(source_id: &str, ordinal: u32, start: usize, end: usize, text: &str) -> Chunk {
    let text_sha256 = sha256_hex(text.as_bytes());
    let chunk_id = sha256_hex(format!("v1|{source_id}|{ordinal}|{text_sha256}").as_bytes());
    Chunk {
        chunk_id,
        source_id: source_id.to_string(),
        ordinal,
        start_offset: start,
        end_offset: end,
        text: text.to_string(),
        text_sha256,
    }
}

/// Byte spans of each chunk. Assumes parameters were validated.
pub(crate) fn split_spans(text: &str, chunk_size: usize, overlap: usize) -> Vec<(usize, usize)> {
    let chars: Vec<char> = text.chars().collect();
    let mut byte_at: Vec<usize> = text.char_indices().map(|(b, _)| b).collect();
    byte_at.push(text.len());

    let n = chars.len();
    let mut spans = Vec::new();
    if n == 0 {
        return spans;
    }

    let tolerance = (chunk_size * BOUNDARY_TOLERANCE_PCT).div_ceil(100);
    let mut start = 0usize;
    loop {
        if n - start <= chunk_size {
            spans.push((byte_at[start], byte_at[n]));
            break;
        }
        let target = start + chunk_size;
        // An end at or before start+overlap would not advance the next start.
        let lo = target.saturating_sub(tolerance).max(start + overlap + 1);
        let end = best_boundary(&chars, lo, target).unwrap_or(target);
        spans.push((byte_at[start], byte_at[end]));
        start = next_start(&chars, end, overlap);
    }
    spans
}

/// Largest paragraph boundary in `lo..=hi`, else largest sentence boundary.
fn best_boundary(chars: &[char], lo: usize, hi: usize) -> Option<usize> {
    if lo > hi {
        return None;
    }
    let is_paragraph = |p: usize| p >= 2 && chars[p - 1] == '\n' && chars[p - 2] == '\n';
    let is_sentence = |p: usize| {
        (p >= 1 && chars[p - 1] == '\n')
            || (p >= 2 && chars[p - 1].is_whitespace() && matches!(chars[p - 2], '.' | '!' | '?'))
    };
    (lo..=hi)
        .rev()
        .find(|&p| is_paragraph(p))
        .or_else(|| (lo..=hi).rev().find(|&p| is_sentence(p)))
}

fn next_start(chars: &[char], end: usize, overlap: usize) -> usize {
    let mut s = end - overlap;
    while s < end && s > 0 && !chars[s - 1].is_whitespace() && !chars[s].is_whitespace() {
        s += 1;
    }
    s
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
