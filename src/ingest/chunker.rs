/// Splits extracted text into ordered chunks.
///
/// Must be deterministic for identical input. Degenerate input may produce
/// zero chunks.
pub trait Chunker: Send + Sync {
    fn chunk(&self, text: &str) -> Vec<String>;
}

/// Fixed-size window chunker with overlap
///
/// Uses character-based approximation: ~4 characters per token. Prefers to
/// end a chunk on whitespace or sentence punctuation within the last 20% of
/// the window. All slicing happens on UTF-8 character boundaries.
#[derive(Debug, Clone)]
pub struct WindowChunker {
    size_tokens: usize,
    overlap_tokens: usize,
}

impl WindowChunker {
    pub fn new(size_tokens: usize, overlap_tokens: usize) -> Self {
        let size_tokens = size_tokens.max(1);
        Self {
            size_tokens,
            overlap_tokens: overlap_tokens.min(size_tokens - 1),
        }
    }
}

impl Chunker for WindowChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        chunk_text(text, self.size_tokens, self.overlap_tokens)
    }
}

/// Largest char boundary at or before `byte_pos`
fn floor_char_boundary(text: &str, byte_pos: usize) -> usize {
    if byte_pos >= text.len() {
        return text.len();
    }
    (0..=byte_pos)
        .rev()
        .find(|&i| text.is_char_boundary(i))
        .unwrap_or(0)
}

fn chunk_text(text: &str, size_tokens: usize, overlap_tokens: usize) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let char_size = size_tokens * 4;
    let char_overlap = overlap_tokens * 4;

    let mut chunks = Vec::new();
    let mut start_byte = 0;

    while start_byte < text.len() {
        start_byte = floor_char_boundary(text, start_byte);
        let end_byte = floor_char_boundary(text, start_byte + char_size);

        let chunk_end_byte = if end_byte < text.len() {
            let search_start = floor_char_boundary(text, end_byte.saturating_sub(char_size / 5));
            let boundary = text
                .get(search_start..end_byte)
                .and_then(|window| {
                    window
                        .char_indices()
                        .rev()
                        .find(|(_, c)| c.is_whitespace() || matches!(c, '.' | '!' | '?'))
                        .map(|(offset, c)| search_start + offset + c.len_utf8())
                })
                .filter(|&b| b > start_byte);
            boundary.unwrap_or(end_byte)
        } else {
            end_byte
        };

        // Window smaller than one character; take the character whole
        let chunk_end_byte = if chunk_end_byte <= start_byte {
            text[start_byte..]
                .chars()
                .next()
                .map_or(text.len(), |c| start_byte + c.len_utf8())
        } else {
            chunk_end_byte
        };

        let piece = text[start_byte..chunk_end_byte].trim();
        if !piece.is_empty() {
            chunks.push(piece.to_string());
        }

        if chunk_end_byte >= text.len() {
            break;
        }

        let next_start = floor_char_boundary(text, chunk_end_byte.saturating_sub(char_overlap));
        start_byte = if next_start <= start_byte {
            chunk_end_byte
        } else {
            next_start
        };
    }

    chunks
}

/// Estimate token count from text
///
/// Uses approximation: 1 token ≈ 4 characters
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() + 3) / 4
}
