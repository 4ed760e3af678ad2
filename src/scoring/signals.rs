//! Lexical signal detectors.
//!
//! Each detector is a pure predicate over a document body. Detectors look at
//! markdown structure (fences, headings, lists) and vocabulary; none of them
//! attempt to understand the text.

use std::sync::LazyLock;

use regex::Regex;

use super::rubric::{Rubric, Signal};

/// Longest mean sentence length, in words, that still counts as clear.
const MAX_CLEAR_SENTENCE_WORDS: f64 = 30.0;

/// Vocabulary hits needed for prevention detail without a dedicated section.
const PREVENTION_VOCABULARY_HITS: usize = 3;

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("valid signal pattern")
}

static FENCE: LazyLock<Regex> = LazyLock::new(|| re(r"(?m)^\s*(?:```|~~~)"));

static HEADING: LazyLock<Regex> = LazyLock::new(|| re(r"(?m)^#{1,6}\s+\S"));

static EXPLOIT: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)\b(?:exploit(?:s|ed)?|attack(?:s|er|ers|ed)?|hack(?:s|ed)?|incident|drain(?:s|ed)?|stolen|post-mortem)\b")
});

static PREVENTION_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?im)^#{1,6}\s+.*\b(?:prevent\w*|mitigat\w*|remediat\w*|defen[cs]e\w*|protect\w*|fix(?:es)?)\b")
});

static PREVENTION_WORD: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)\b(?:prevent\w*|mitigat\w*|remediat\w*|guard\w*|validat\w*|sanitiz\w*|restrict\w*|check-effects-interactions)\b")
});

static TESTS: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?im)\bfunction\s+test\w*|\bforge\s+test\b|\bhardhat\s+test\b|\bexpectRevert\b|\bassert(?:Eq|True|False)?\s*\(|^#{1,6}\s+.*\btest(?:s|ing)?\b")
});

static DIAGRAM: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?m)^\s*```\s*mermaid|!\[[^\]]*\]\([^)]*\)|-->|──>|─>|→")
});

static CHECKLIST: LazyLock<Regex> = LazyLock::new(|| re(r"(?m)^\s*[-*]\s+\[[ xX]\]"));

static NUMBERED_STEP: LazyLock<Regex> = LazyLock::new(|| re(r"(?m)^\s*\d+[.)]\s+\S"));

static IMPERATIVE: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?im)^\s*(?:[-*+]\s+)?(?:use|add|avoid|ensure|verify|check|never|always|implement|apply|run|validate|require|restrict)\b")
});

static AUDIT: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)\b(?:audit\w*|checklist|severity|finding|reviewer)\b")
});

static SENTENCE_END: LazyLock<Regex> = LazyLock::new(|| re(r"[.!?](?:\s+|$)"));

/// Body text outside fenced code blocks.
fn prose(body: &str) -> String {
    let mut in_fence = false;
    let mut out = String::with_capacity(body.len());
    for line in body.lines() {
        if FENCE.is_match(line) {
            in_fence = !in_fence;
            continue;
        }
        if !in_fence {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

/// Mean words per sentence of prose (headings excluded). `None` without prose.
fn mean_sentence_words(body: &str) -> Option<f64> {
    let text: String = prose(body)
        .lines()
        .filter(|l| !HEADING.is_match(l))
        .collect::<Vec<_>>()
        .join(" ");

    let lengths: Vec<usize> = SENTENCE_END
        .split(&text)
        .map(|s| s.split_whitespace().count())
        .filter(|&n| n > 0)
        .collect();
    if lengths.is_empty() {
        None
    } else {
        Some(lengths.iter().sum::<usize>() as f64 / lengths.len() as f64)
    }
}

/// True when `signal` is present in `body`.
#[must_use]
pub fn detect(signal: Signal, body: &str, rubric: &Rubric) -> bool {
    match signal {
        Signal::Examples => FENCE.is_match(body),
        Signal::ExploitCases => EXPLOIT.is_match(body),
        Signal::PreventionDetail => {
            PREVENTION_HEADING.is_match(body)
                || PREVENTION_WORD.find_iter(body).count() >= PREVENTION_VOCABULARY_HITS
        }
        Signal::Tests => TESTS.is_match(body),
        Signal::Clarity => {
            HEADING.is_match(body)
                && mean_sentence_words(body).is_some_and(|m| m <= MAX_CLEAR_SENTENCE_WORDS)
        }
        Signal::Diagrams => DIAGRAM.is_match(body),
        Signal::CurrentConventions => rubric.current_patterns().iter().any(|p| p.is_match(body)),
        Signal::NoDeprecatedPatterns => !rubric.deprecated_patterns().iter().any(|p| p.is_match(body)),
        Signal::Actionable => {
            CHECKLIST.is_match(body) || NUMBERED_STEP.is_match(body) || IMPERATIVE.is_match(body)
        }
        Signal::AuditUsable => CHECKLIST.is_match(body) || AUDIT.is_match(body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScoringConfig;

    fn rubric() -> Rubric {
        Rubric::from_config(&ScoringConfig::default()).unwrap()
    }

    fn has(signal: Signal, body: &str) -> bool {
        detect(signal, body, &rubric())
    }

    #[test]
    fn test_examples() {
        assert!(has(Signal::Examples, "text\n```solidity\nx = 1;\n```\n"));
        assert!(!has(Signal::Examples, "inline `code` only"));
    }

    #[test]
    fn test_exploit_cases() {
        assert!(has(Signal::ExploitCases, "The DAO was exploited in 2016."));
        assert!(has(Signal::ExploitCases, "An attacker re-enters withdraw()."));
        assert!(!has(Signal::ExploitCases, "A guide to storage layout."));
    }

    #[test]
    fn test_prevention_detail() {
        assert!(has(Signal::PreventionDetail, "## Prevention\nUse a mutex."));
        assert!(has(
            Signal::PreventionDetail,
            "Validate input. Add a guard. Restrict callers."
        ));
        assert!(!has(Signal::PreventionDetail, "Validate input."));
    }

    #[test]
    fn test_tests_signal() {
        assert!(has(Signal::Tests, "```\nfunction testWithdraw() public {}\n```"));
        assert!(has(Signal::Tests, "Run `forge test` to check."));
        assert!(has(Signal::Tests, "## Testing\nsteps"));
        assert!(!has(Signal::Tests, "This contract holds funds."));
    }

    #[test]
    fn test_clarity() {
        assert!(has(Signal::Clarity, "# Title\nShort sentence. Another one here."));
        assert!(!has(Signal::Clarity, "Short sentence without any heading."));
        let rambling = format!("# Title\n{}.", "word ".repeat(40));
        assert!(!has(Signal::Clarity, &rambling));
    }

    #[test]
    fn test_clarity_ignores_code() {
        let body = format!("# T\nShort one.\n```\n{}\n```\n", "x ".repeat(200));
        assert!(has(Signal::Clarity, &body));
    }

    #[test]
    fn test_diagrams() {
        assert!(has(Signal::Diagrams, "```mermaid\ngraph TD\n```"));
        assert!(has(Signal::Diagrams, "![flow](flow.png)"));
        assert!(has(Signal::Diagrams, "caller --> vault --> attacker"));
        assert!(!has(Signal::Diagrams, "no pictures here"));
    }

    #[test]
    fn test_accuracy_patterns() {
        assert!(has(Signal::CurrentConventions, "pragma solidity ^0.8.20;"));
        assert!(!has(Signal::CurrentConventions, "pragma solidity ^0.6.12;"));
        assert!(has(Signal::NoDeprecatedPatterns, "pragma solidity ^0.8.20;"));
        assert!(!has(Signal::NoDeprecatedPatterns, "using SafeMath for uint256;"));
    }

    #[test]
    fn test_practicality() {
        assert!(has(Signal::Actionable, "- [ ] check owner"));
        assert!(has(Signal::Actionable, "1. Deploy the proxy"));
        assert!(has(Signal::Actionable, "Always use pull payments."));
        assert!(!has(Signal::Actionable, "History of the exploit."));

        assert!(has(Signal::AuditUsable, "Audit checklist for vaults"));
        assert!(!has(Signal::AuditUsable, "History of the exploit."));
    }
}
