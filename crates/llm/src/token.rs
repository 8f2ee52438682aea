//! Token counting heuristics.

/// Rough token estimate for budget checks: about four characters per
/// token, rounded up. Good enough to keep combined prompts under a
/// context window without shipping a tokenizer per backend.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_zero_tokens() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn estimate_counts_chars_not_bytes() {
        // Four multibyte chars estimate the same as four ASCII chars.
        assert_eq!(estimate_tokens("日本語字"), 1);
    }
}
