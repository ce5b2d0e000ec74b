//! Canonical text cleaning for extracted page text.
//!
//! PDF extraction output is noisy: inconsistent Unicode forms, CRLF line
//! endings, runs of padding spaces, and hard-wrapped lines. [`clean`] runs
//! a fixed normalization pipeline so that chunking always sees the same
//! canonical form for the same raw input. Cleaning is pure and
//! deterministic, which is what makes re-running the processing stage safe.

use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

/// Normalize raw extracted text into canonical cleaned form.
///
/// Steps, in order:
/// 1. Unicode NFKC normalization so visually identical glyphs compare equal.
/// 2. CRLF → LF.
/// 3. Runs of horizontal whitespace collapse to one space; newlines are kept.
/// 4. Wrapped-line merging (see [`merge_wrapped_lines`]).
/// 5. Three or more consecutive blank-line separators collapse to one
///    paragraph break, then leading/trailing whitespace is trimmed.
pub fn clean(raw: &str) -> String {
    let text: String = raw.nfkc().collect();
    let text = text.replace("\r\n", "\n");
    let text = collapse_horizontal_whitespace(&text);
    let text = merge_wrapped_lines(&text);
    let text = collapse_blank_lines(&text);
    text.trim().to_string()
}

/// SHA-256 hex digest of a text, the content hash persisted next to it.
pub fn text_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Collapse runs of whitespace other than newlines into a single space.
fn collapse_horizontal_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_run = false;

    for ch in text.chars() {
        if ch != '\n' && ch.is_whitespace() {
            if !in_run {
                out.push(' ');
                in_run = true;
            }
        } else {
            out.push(ch);
            in_run = false;
        }
    }

    out
}

/// Undo PDF line-wrap artifacts.
///
/// A line is joined to its successor when it does not end in terminal
/// punctuation (`.`, `:`, `;`) and the next line begins with a lowercase
/// letter. This is a lossy heuristic: unusual extraction output can cause
/// unrelated lines to be joined, and the operation is not reversible.
fn merge_wrapped_lines(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut out = String::with_capacity(text.len());

    for (i, line) in lines.iter().enumerate() {
        let current = line.trim();
        let next = lines.get(i + 1).map(|l| l.trim());

        let wrapped = !current.is_empty()
            && next.is_some_and(|n| !n.is_empty())
            && !current.ends_with(['.', ':', ';'])
            && next.is_some_and(|n| n.chars().next().is_some_and(|c| c.is_ascii_lowercase()));

        out.push_str(current);
        out.push(if wrapped { ' ' } else { '\n' });
    }

    out.replace(" \n", "\n")
}

/// Collapse three or more consecutive newlines into exactly two.
fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut newlines = 0usize;

    for ch in text.chars() {
        if ch == '\n' {
            newlines += 1;
            if newlines <= 2 {
                out.push('\n');
            }
        } else {
            newlines = 0;
            out.push(ch);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleaning_is_deterministic() {
        let raw = "Intro\u{fb01}le\r\n\r\n\r\n\r\nsome   wrapped\nline continues here.\n";
        assert_eq!(clean(raw), clean(raw));
        assert_eq!(text_hash(&clean(raw)), text_hash(&clean(raw)));
    }

    #[test]
    fn nfkc_unifies_compatibility_glyphs() {
        // U+FB01 is the "fi" ligature; NFKC expands it.
        assert_eq!(clean("\u{fb01}le"), "file");
    }

    #[test]
    fn crlf_becomes_lf() {
        assert_eq!(clean("First.\r\nSecond."), "First.\nSecond.");
    }

    #[test]
    fn horizontal_whitespace_collapses_but_newlines_survive() {
        assert_eq!(clean("a \t  b.\nc."), "a b.\nc.");
    }

    #[test]
    fn wrapped_lines_are_merged() {
        let raw = "This sentence was wrapped\nacross two lines.";
        assert_eq!(clean(raw), "This sentence was wrapped across two lines.");
    }

    #[test]
    fn terminal_punctuation_blocks_the_merge() {
        let raw = "A complete sentence.\nanother line";
        assert_eq!(clean(raw), "A complete sentence.\nanother line");

        let raw = "A heading:\nvalue below";
        assert_eq!(clean(raw), "A heading:\nvalue below");
    }

    #[test]
    fn uppercase_continuation_blocks_the_merge() {
        let raw = "End of one thought\nNew sentence starts here.";
        assert_eq!(clean(raw), "End of one thought\nNew sentence starts here.");
    }

    #[test]
    fn blank_line_runs_collapse_to_one_paragraph_break() {
        let raw = "First paragraph.\n\n\n\n\nSecond paragraph.";
        assert_eq!(clean(raw), "First paragraph.\n\nSecond paragraph.");
    }

    #[test]
    fn leading_and_trailing_whitespace_trimmed() {
        assert_eq!(clean("  \n  Body.  \n\n"), "Body.");
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert_eq!(clean(""), "");
        assert_eq!(clean("   \n\n  \t "), "");
    }
}
