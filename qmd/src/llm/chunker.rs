//! Splitting document bodies into embedding-sized chunks.
//!
//! Chunks are capped by UTF-8 byte size but addressed by character
//! position, and the splitter prefers natural boundaries (paragraph
//! breaks, sentence ends, newlines, spaces) over hard cuts.

use crate::config::MAX_CHUNK_BYTES;

/// A contiguous piece of a document body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Character offset of the chunk start in the original body.
    pub pos: usize,
    /// The chunk text. Concatenating all chunk texts reproduces the body.
    pub text: String,
}

/// Sentence terminators considered split points (two characters each).
const SENTENCE_ENDS: &[&str] = &[". ", ".\n", "? ", "?\n", "! ", "!\n"];

/// Split `body` into chunks of at most [`MAX_CHUNK_BYTES`] UTF-8 bytes.
pub fn chunk_document(body: &str) -> Vec<Chunk> {
    chunk_document_with_limit(body, MAX_CHUNK_BYTES)
}

/// Split `body` into chunks of at most `max_bytes` UTF-8 bytes each.
///
/// Bodies that already fit come back as a single chunk at position 0.
/// Otherwise the splitter walks forward one scalar at a time to the byte
/// budget, then backs up to the best natural boundary in the window:
///
/// 1. the last paragraph break (`\n\n`) past 50% of the window,
/// 2. the last sentence end past 50%,
/// 3. the last newline past 30%,
/// 4. the last space past 30%,
/// 5. a hard cut if nothing qualifies.
///
/// Output is deterministic for a given input and limit.
pub fn chunk_document_with_limit(body: &str, max_bytes: usize) -> Vec<Chunk> {
    if body.len() <= max_bytes {
        return vec![Chunk {
            pos: 0,
            text: body.to_string(),
        }];
    }

    let chars: Vec<char> = body.chars().collect();
    let total = chars.len();
    let mut chunks = Vec::new();
    let mut char_pos = 0usize;

    while char_pos < total {
        // Walk forward until the next character would blow the budget.
        let mut end_pos = char_pos;
        let mut bytes = 0usize;
        while end_pos < total {
            let ch_len = chars[end_pos].len_utf8();
            if bytes + ch_len > max_bytes {
                break;
            }
            bytes += ch_len;
            end_pos += 1;
        }

        if end_pos < total {
            let slice: String = chars[char_pos..end_pos].iter().collect();
            if let Some(boundary) = find_boundary(&slice) {
                end_pos = char_pos + boundary;
            }
        }

        // Guard against zero-width progress on pathological input.
        if end_pos <= char_pos {
            end_pos = char_pos + 1;
        }

        chunks.push(Chunk {
            pos: char_pos,
            text: chars[char_pos..end_pos].iter().collect(),
        });
        char_pos = end_pos;
    }

    chunks
}

/// Pick the best split point inside `slice`, as a character offset to
/// split *after*. Returns `None` when no candidate clears its threshold.
fn find_boundary(slice: &str) -> Option<usize> {
    let slice_chars = slice.chars().count();
    let half = slice_chars / 2;
    let third = slice_chars * 3 / 10;

    if let Some(byte_idx) = slice.rfind("\n\n") {
        let at = char_index_at(slice, byte_idx);
        if at > half {
            return Some(at + 2);
        }
    }

    let best_sentence = SENTENCE_ENDS
        .iter()
        .filter_map(|end| slice.rfind(end))
        .max();
    if let Some(byte_idx) = best_sentence {
        let at = char_index_at(slice, byte_idx);
        if at > half {
            return Some(at + 2);
        }
    }

    if let Some(byte_idx) = slice.rfind('\n') {
        let at = char_index_at(slice, byte_idx);
        if at > third {
            return Some(at + 1);
        }
    }

    if let Some(byte_idx) = slice.rfind(' ') {
        let at = char_index_at(slice, byte_idx);
        if at > third {
            return Some(at + 1);
        }
    }

    None
}

/// Character offset of the given byte offset within `s`.
fn char_index_at(s: &str, byte_idx: usize) -> usize {
    s[..byte_idx].chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassemble(chunks: &[Chunk]) -> String {
        chunks.iter().map(|c| c.text.as_str()).collect()
    }

    #[test]
    fn short_body_single_chunk() {
        let chunks = chunk_document("hello world");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].pos, 0);
        assert_eq!(chunks[0].text, "hello world");
    }

    #[test]
    fn exact_limit_single_chunk() {
        let body = "a".repeat(MAX_CHUNK_BYTES);
        let chunks = chunk_document(&body);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn one_over_limit_splits_in_two() {
        let body = format!("{} {}", "a".repeat(MAX_CHUNK_BYTES / 2), "b".repeat(MAX_CHUNK_BYTES / 2));
        assert_eq!(body.len(), MAX_CHUNK_BYTES + 1);
        let chunks = chunk_document(&body);
        assert_eq!(chunks.len(), 2);
        // Break point is the space, which is past the 30% threshold.
        assert!(chunks[0].text.ends_with(' '));
        assert_eq!(reassemble(&chunks), body);
    }

    #[test]
    fn splits_at_paragraph_break() {
        let body = format!("{}\n\n{}", "A".repeat(5000), "B".repeat(5000));
        let chunks = chunk_document(&body);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].pos, 0);
        assert_eq!(chunks[0].text, format!("{}\n\n", "A".repeat(5000)));
        assert_eq!(chunks[1].pos, 5002);
        assert_eq!(chunks[1].text, "B".repeat(5000));
        assert_eq!(reassemble(&chunks), body);
    }

    #[test]
    fn prefers_sentence_end_over_space() {
        let head = "x".repeat(4000);
        let body = format!("{head}. {}", "y ".repeat(2000));
        let chunks = chunk_document(&body);
        assert!(chunks.len() >= 2);
        assert_eq!(chunks[0].text, format!("{head}. "));
    }

    #[test]
    fn hard_cut_without_boundaries() {
        let body = "z".repeat(MAX_CHUNK_BYTES * 2 + 10);
        let chunks = chunk_document(&body);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text.len(), MAX_CHUNK_BYTES);
        assert_eq!(chunks[1].pos, MAX_CHUNK_BYTES);
        assert_eq!(reassemble(&chunks), body);
    }

    #[test]
    fn multibyte_positions_are_char_indices() {
        // Four-byte scalars: budget of 8 bytes holds two characters.
        let body = "😀".repeat(5);
        let chunks = chunk_document_with_limit(&body, 8);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].pos, 0);
        assert_eq!(chunks[1].pos, 2);
        assert_eq!(chunks[2].pos, 4);
        assert_eq!(reassemble(&chunks), body);
    }

    #[test]
    fn chunks_partition_body_exactly() {
        let body = format!(
            "{}\n\n{}\nmore text here. {}",
            "lorem ipsum ".repeat(300),
            "dolor sit amet ".repeat(300),
            "consectetur ".repeat(300)
        );
        let chunks = chunk_document(&body);
        assert_eq!(reassemble(&chunks), body);
        // Every chunk's text is found at its recorded char position.
        let chars: Vec<char> = body.chars().collect();
        for c in &chunks {
            let at: String = chars[c.pos..c.pos + c.text.chars().count()].iter().collect();
            assert_eq!(at, c.text);
        }
    }
}
