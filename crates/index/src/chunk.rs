//! Chunking (§4.3 step 2): split cleaned content into overlapping
//! fixed-size windows measured in characters, not bytes, so multi-byte
//! text never splits mid-codepoint.

pub const DEFAULT_CHUNK_SIZE: usize = 1024;
pub const DEFAULT_CHUNK_OVERLAP: usize = 256;

/// Split `text` into chunks of at most `size` characters, each one
/// starting `size - overlap` characters after the previous. Returns a
/// single empty-string chunk for empty input rather than an empty vec, so
/// callers always have at least one chunk to embed.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return vec![String::new()];
    }
    let stride = size.saturating_sub(overlap).max(1);

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += stride;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_yields_one_empty_chunk() {
        assert_eq!(chunk_text("", 10, 2), vec![String::new()]);
    }

    #[test]
    fn shorter_than_size_is_a_single_chunk() {
        assert_eq!(chunk_text("hello", 1024, 256), vec!["hello".to_string()]);
    }

    #[test]
    fn longer_text_splits_with_overlap() {
        let text = "a".repeat(30);
        let chunks = chunk_text(&text, 10, 4);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        assert_eq!(chunks.last().unwrap().chars().count() > 0, true);
    }

    #[test]
    fn last_chunk_reaches_the_end_of_the_text() {
        let text: String = (0..100).map(|i| char::from_u32(65 + (i % 26)).unwrap()).collect();
        let chunks = chunk_text(&text, 20, 5);
        assert!(chunks.len() > 1);
        assert!(text.ends_with(chunks.last().unwrap().chars().last().unwrap()));
    }
}
