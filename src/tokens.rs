//! Cheap token-count estimation.
//!
//! `ceil(code points / 4)` approximates a language model's tokenizer well
//! enough for sizing decisions (chunk ceilings, prompt budgets). It must
//! never be used where exact token counts matter.

/// Estimate the token count of `text`.
pub fn estimate(text: &str) -> i64 {
    (text.chars().count() as i64 + 3) / 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_zero() {
        assert_eq!(estimate(""), 0);
    }

    #[test]
    fn rounds_up() {
        assert_eq!(estimate("a"), 1);
        assert_eq!(estimate("abcd"), 1);
        assert_eq!(estimate("abcde"), 2);
        assert_eq!(estimate("abcdefgh"), 2);
    }

    #[test]
    fn counts_code_points_not_bytes() {
        // Four code points, twelve UTF-8 bytes.
        assert_eq!(estimate("日本語字"), 1);
    }
}
