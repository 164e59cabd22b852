//! Paragraph-boundary chunker.
//!
//! PDF text is far longer than an embedding request should be, so each
//! document is split on blank lines into chunks of at most
//! `max_tokens × CHARS_PER_TOKEN` characters. Oversized paragraphs are cut at
//! the last whitespace before the limit. All cuts land on `char` boundaries.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

/// Rough chars-per-token ratio used to size chunks.
const CHARS_PER_TOKEN: usize = 4;

/// Split `text` into chunks with contiguous indices starting at 0.
/// Blank input yields no chunks.
pub fn chunk_text(document_id: &str, text: &str, max_tokens: usize) -> Vec<Chunk> {
    let max_chars = (max_tokens * CHARS_PER_TOKEN).max(1);
    let mut pieces: Vec<String> = Vec::new();
    let mut buf = String::new();

    for para in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let para_len = para.chars().count();

        if para_len > max_chars {
            if !buf.is_empty() {
                pieces.push(std::mem::take(&mut buf));
            }
            pieces.extend(split_long(para, max_chars));
            continue;
        }

        let joined_len = if buf.is_empty() {
            para_len
        } else {
            buf.chars().count() + 2 + para_len
        };
        if joined_len > max_chars {
            pieces.push(std::mem::take(&mut buf));
        }
        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(para);
    }
    if !buf.is_empty() {
        pieces.push(buf);
    }

    pieces
        .into_iter()
        .enumerate()
        .map(|(i, piece)| make_chunk(document_id, i as i64, piece))
        .collect()
}

/// Cut a single paragraph into pieces of at most `max_chars` characters,
/// preferring to break after whitespace.
fn split_long(para: &str, max_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = para;

    while !rest.is_empty() {
        let limit = rest
            .char_indices()
            .nth(max_chars)
            .map(|(byte, _)| byte)
            .unwrap_or(rest.len());
        if limit == rest.len() {
            out.push(rest.trim().to_string());
            break;
        }
        let cut = rest[..limit]
            .rfind(char::is_whitespace)
            .filter(|&pos| pos > 0)
            .map(|pos| pos + rest[pos..].chars().next().map_or(1, char::len_utf8))
            .unwrap_or(limit);
        let piece = rest[..cut].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        rest = &rest[cut..];
    }
    out
}

fn make_chunk(document_id: &str, index: i64, text: String) -> Chunk {
    let hash = format!("{:x}", Sha256::digest(text.as_bytes()));
    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        text,
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = chunk_text("doc", "Photosynthesis makes glucose.", 700);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "Photosynthesis makes glucose.");
    }

    #[test]
    fn blank_text_has_no_chunks() {
        assert!(chunk_text("doc", "  \n\n  ", 700).is_empty());
    }

    #[test]
    fn paragraphs_merge_until_limit() {
        // max_tokens = 5 → 20 chars
        let text = "Cells divide.\n\nAtoms bond.\n\nLight refracts in glass.";
        let chunks = chunk_text("doc", text, 5);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
            assert!(c.text.chars().count() <= 20, "too long: {:?}", c.text);
        }
    }

    #[test]
    fn long_paragraph_is_split_on_whitespace() {
        let text = "word ".repeat(100);
        let chunks = chunk_text("doc", &text, 5);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.chars().count() <= 20);
            assert!(!c.text.starts_with(' '));
        }
    }

    #[test]
    fn multibyte_text_splits_on_char_boundaries() {
        let text = "ऊर्जा".repeat(40);
        let chunks = chunk_text("doc", &text, 2);
        let rebuilt: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn hashes_are_deterministic() {
        let a = chunk_text("doc", "Alpha\n\nBeta\n\nGamma", 2);
        let b = chunk_text("doc", "Alpha\n\nBeta\n\nGamma", 2);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.hash, y.hash);
            assert_eq!(x.text, y.text);
        }
    }
}
