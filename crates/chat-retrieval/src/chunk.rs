/// Split `text` into overlapping word-count windows. Token counts here are
/// approximated by whitespace-delimited words, which is stable and cheap
/// enough that exact tokenizer parity with the embedding model is not worth
/// the extra dependency.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }
    assert!(overlap < size, "chunk overlap must be smaller than chunk size");

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < words.len() {
        let end = (start + size).min(words.len());
        chunks.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start += size - overlap;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_yields_single_chunk() {
        let chunks = chunk_text("the quick brown fox", 500, 50);
        assert_eq!(chunks, vec!["the quick brown fox".to_string()]);
    }

    #[test]
    fn long_text_overlaps_between_chunks() {
        let text = (0..1000).map(|i| i.to_string()).collect::<Vec<_>>().join(" ");
        let chunks = chunk_text(&text, 500, 50);
        assert!(chunks.len() >= 2);
        let first_tail: Vec<&str> = chunks[0].split_whitespace().rev().take(50).collect();
        let second_head: Vec<&str> = chunks[1].split_whitespace().take(50).collect();
        let mut first_tail_fwd = first_tail.clone();
        first_tail_fwd.reverse();
        assert_eq!(first_tail_fwd, second_head);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_text("   ", 500, 50).is_empty());
    }
}
