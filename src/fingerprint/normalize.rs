//! Text normalization for fingerprinting.
//!
//! Normalized text is what gets hashed and shingled, so two documents that
//! differ only in markdown decoration, case, punctuation, Unicode composition
//! or whitespace produce the same fingerprint.

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

static LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!?\[([^\]]*)\]\([^)]*\)").expect("valid link pattern"));

static LINE_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:#{1,6}\s+|>\s*|(?:[-*+]|\d+[.)])\s+(?:\[[ xX]\]\s*)?)")
        .expect("valid prefix pattern")
});

static FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:```|~~~)").expect("valid fence pattern"));

/// Strip markdown structure from one line, keeping its words.
fn strip_line(line: &str) -> String {
    if FENCE.is_match(line) {
        return String::new();
    }
    let line = LINE_PREFIX.replace(line, "");
    let line = LINK.replace_all(&line, "$1");
    line.replace('|', " ")
}

/// Normalize text for hashing and similarity comparison.
///
/// Normalization includes:
/// - Unicode NFC composition
/// - Removing markdown structure (headings, quotes, list markers, fences,
///   table pipes, link targets)
/// - Converting to lowercase
/// - Removing ASCII punctuation
/// - Collapsing whitespace
pub fn normalize_text(text: &str) -> String {
    let composed: String = text.nfc().collect();
    let stripped = composed
        .lines()
        .map(strip_line)
        .collect::<Vec<_>>()
        .join("\n");

    stripped
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_ascii_punctuation())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_text() {
        let input = "Hello, World! This is a TEST.   With multiple   spaces and \n newlines.";
        let expected = "hello world this is a test with multiple spaces and newlines";
        assert_eq!(normalize_text(input), expected);
    }

    #[test]
    fn test_markdown_structure_is_ignored() {
        let plain = "Reentrancy\nUse the checks effects interactions pattern\nsee guide";
        let markdown = "## Reentrancy\n\n- Use the **checks effects interactions** pattern\n> see [guide](https://example.com/g)\n";
        assert_eq!(normalize_text(plain), normalize_text(markdown));
    }

    #[test]
    fn test_fences_and_checklists() {
        let input = "```solidity\nrequire(msg.sender == owner);\n```\n- [x] audited\n1. step";
        assert_eq!(normalize_text(input), "requiremsgsender owner audited step");
    }

    #[test]
    fn test_unicode_composition_is_stable() {
        // "é" precomposed vs. "e" + combining acute accent
        assert_eq!(normalize_text("caf\u{e9}"), normalize_text("cafe\u{301}"));
    }

    #[test]
    fn test_table_pipes() {
        assert_eq!(normalize_text("| a | b |\n|---|---|"), "a b");
    }
}
