//! Markdown sections and section-level coverage.

use std::collections::HashSet;

use crate::fingerprint::{normalize_text, shingle_hashes};

/// A heading and the text under it, up to the next heading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Heading text without the leading hashes; `None` for the preamble.
    pub heading: Option<String>,
    /// Raw markdown, including the heading line.
    pub text: String,
}

impl Section {
    /// True when the section has no content besides whitespace.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

fn heading_text(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|&c| c == '#').count();
    if !(1..=6).contains(&hashes) {
        return None;
    }
    let rest = &trimmed[hashes..];
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        Some(rest.trim().trim_end_matches('#').trim())
    } else {
        None
    }
}

/// Split markdown at heading lines outside code fences.
///
/// Text before the first heading becomes a preamble section (omitted when
/// blank).
#[must_use]
pub fn split_sections(body: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut current = Section {
        heading: None,
        text: String::new(),
    };
    let mut in_fence = false;

    for line in body.split_inclusive('\n') {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
        }
        let heading = if in_fence { None } else { heading_text(line) };
        if let Some(heading) = heading {
            let finished = std::mem::replace(
                &mut current,
                Section {
                    heading: Some(heading.to_string()),
                    text: String::new(),
                },
            );
            if finished.heading.is_some() || !finished.is_blank() {
                sections.push(finished);
            }
        }
        current.text.push_str(line);
    }
    if current.heading.is_some() || !current.is_blank() {
        sections.push(current);
    }
    sections
}

/// Shingle set of a section, for exact Jaccard comparison.
#[derive(Debug, Clone, Default)]
pub struct SectionShingles(HashSet<u64>);

impl SectionShingles {
    #[must_use]
    pub fn of(section: &Section, shingle_size: usize) -> Self {
        let normalized = normalize_text(&section.text);
        let tokens: Vec<&str> = normalized.split_whitespace().collect();
        Self(shingle_hashes(&tokens, shingle_size).into_iter().collect())
    }

    /// Exact Jaccard similarity. Two empty sets score 0.
    #[must_use]
    pub fn jaccard(&self, other: &Self) -> f64 {
        let union = self.0.union(&other.0).count();
        if union == 0 {
            return 0.0;
        }
        self.0.intersection(&other.0).count() as f64 / union as f64
    }
}

/// Tracks which sections are already in a canonical body.
#[derive(Debug, Clone)]
pub struct Coverage {
    threshold: f64,
    shingle_size: usize,
    included: Vec<SectionShingles>,
}

impl Coverage {
    #[must_use]
    pub fn new(threshold: f64, shingle_size: usize) -> Self {
        Self {
            threshold,
            shingle_size,
            included: Vec::new(),
        }
    }

    /// True when `section` is similar enough to an included one.
    #[must_use]
    pub fn covers(&self, section: &Section) -> bool {
        let shingles = SectionShingles::of(section, self.shingle_size);
        self.included
            .iter()
            .any(|s| s.jaccard(&shingles) >= self.threshold)
    }

    pub fn include(&mut self, section: &Section) {
        self.included
            .push(SectionShingles::of(section, self.shingle_size));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_with_preamble() {
        let body = "intro line\n# One\nfirst\n## Two\nsecond\n";
        let sections = split_sections(body);
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0].heading, None);
        assert_eq!(sections[0].text, "intro line\n");
        assert_eq!(sections[1].heading.as_deref(), Some("One"));
        assert_eq!(sections[2].text, "## Two\nsecond\n");
    }

    #[test]
    fn test_blank_preamble_omitted() {
        let sections = split_sections("\n\n# Only\nbody");
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].heading.as_deref(), Some("Only"));
    }

    #[test]
    fn test_fenced_hashes_are_not_headings() {
        let body = "# Script\n```bash\n# not a heading\necho hi\n```\n";
        let sections = split_sections(body);
        assert_eq!(sections.len(), 1);
        assert!(sections[0].text.contains("# not a heading"));
    }

    #[test]
    fn test_heading_requires_space() {
        assert_eq!(heading_text("#hashtag"), None);
        assert_eq!(heading_text("### Title ###"), Some("Title"));
        assert_eq!(heading_text("####### seven"), None);
    }

    #[test]
    fn test_sections_concatenate_to_body() {
        let body = "pre\n# A\na\n# B\nb";
        let joined: String = split_sections(body).into_iter().map(|s| s.text).collect();
        assert_eq!(joined, body);
    }

    #[test]
    fn test_coverage() {
        let included = Section {
            heading: Some("Prevention".to_string()),
            text: "## Prevention\nUse a reentrancy guard on every external call that moves funds.".to_string(),
        };
        let same = Section {
            heading: Some("How to prevent".to_string()),
            text: "## Prevention\nUse a reentrancy guard on every external call that moves funds!".to_string(),
        };
        let different = Section {
            heading: Some("History".to_string()),
            text: "## History\nThe DAO incident in 2016 drained a third of the fund.".to_string(),
        };

        let mut coverage = Coverage::new(0.5, 3);
        assert!(!coverage.covers(&same));
        coverage.include(&included);
        assert!(coverage.covers(&same));
        assert!(!coverage.covers(&different));
    }
}
