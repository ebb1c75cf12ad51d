//! Small string helpers shared by the transports and the model client.

/// Cut `s` to at most `max_len` bytes, on a char boundary, marking the cut
/// with `...`.
pub(crate) fn truncate_str(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_input_is_untouched() {
        assert_eq!(truncate_str("hello", 10), "hello");
        assert_eq!(truncate_str("hello", 5), "hello");
    }

    #[test]
    fn cut_never_exceeds_limit() {
        assert_eq!(truncate_str("hello world", 5), "hello...");
        // "ż" and "ó" are two bytes each; a 3-byte budget fits only "ż".
        assert_eq!(truncate_str("żółw", 3), "ż...");
        assert_eq!(truncate_str("żółw", 1), "...");
        for limit in 0..8 {
            let cut = truncate_str("żółw", limit);
            assert!(cut.trim_end_matches("...").len() <= limit, "limit {limit}: {cut}");
        }
    }
}
