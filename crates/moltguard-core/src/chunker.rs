//! Content chunking.
//!
//! Splits arbitrary text into bounded segments with a small overlap so an
//! injection payload straddling a boundary still appears whole in at least
//! one chunk.

/// Maximum chunk length in characters.
pub const MAX_CHUNK_CHARS: usize = 4000;

/// Overlap between consecutive chunks, in characters.
pub const CHUNK_OVERLAP_CHARS: usize = 200;

/// A bounded contiguous slice of a larger content body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position in document order, starting at 0.
    pub index: usize,
    /// The chunk text.
    pub text: String,
    /// Byte offset of the chunk start in the original text.
    pub offset_start: usize,
    /// Byte offset one past the chunk end in the original text.
    pub offset_end: usize,
}

/// Splits `text` into chunks of at most [`MAX_CHUNK_CHARS`] characters with
/// [`CHUNK_OVERLAP_CHARS`] characters of overlap between neighbors.
///
/// Chunks cover the full input in document order and respect UTF-8 character
/// boundaries. Empty input yields an empty vector.
pub fn chunk_text(text: &str) -> Vec<Chunk> {
    chunk_text_with(text, MAX_CHUNK_CHARS, CHUNK_OVERLAP_CHARS)
}

/// Chunking with explicit bounds. `max_chars` must exceed `overlap_chars`.
pub fn chunk_text_with(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<Chunk> {
    debug_assert!(max_chars > overlap_chars);

    if text.is_empty() {
        return Vec::new();
    }

    // Byte offset of every char start, plus the end of the string, so chunk
    // windows can be expressed in chars but sliced in bytes.
    let mut boundaries: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    boundaries.push(text.len());
    let total_chars = boundaries.len() - 1;

    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        let end = (start + max_chars).min(total_chars);
        let offset_start = boundaries[start];
        let offset_end = boundaries[end];

        chunks.push(Chunk {
            index: chunks.len(),
            text: text[offset_start..offset_end].to_string(),
            offset_start,
            offset_end,
        });

        if end == total_chars {
            break;
        }
        start = end - overlap_chars;
    }

    chunks
}
