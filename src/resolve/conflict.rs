//! Contradiction detection and conflict reports.
//!
//! A conflict marker names a sub-topic and two lists of phrasings: ones that
//! affirm a claim and ones that deny it. Phrases are matched against
//! normalized text, so punctuation and case do not matter. When one member of
//! a group affirms and another denies the same sub-topic, the group cannot be
//! merged automatically.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{ConflictMarker, Precedence};
use crate::fingerprint::normalize_text;
use crate::source::{DocId, TopicKey};

/// Characters of context kept on each side of a matched phrase.
const EXCERPT_CONTEXT: usize = 60;

/// Why a group needs human review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Members make opposing claims about one sub-topic.
    ContradictoryClaims,
    /// Identical content carries different topic keys.
    HashCollision,
    /// Another group, or an unrelated registry entry, owns the topic key.
    TopicCollision,
    /// The registry kept moving and the commit retry budget ran out.
    CommitConflict,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContradictoryClaims => write!(f, "contradictory claims"),
            Self::HashCollision => write!(f, "hash collision"),
            Self::TopicCollision => write!(f, "topic collision"),
            Self::CommitConflict => write!(f, "commit conflict"),
        }
    }
}

/// A document's stance on a sub-topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Affirm,
    Deny,
}

/// One side of a contradiction, with its citation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub subtopic: String,
    pub doc_id: DocId,
    pub verdict: Verdict,
    /// Normalized text around the matched phrase
    pub excerpt: String,
}

/// Everything a reviewer needs to settle a flagged group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictReport {
    pub group_id: String,
    pub topic_key: TopicKey,
    pub kind: ConflictKind,
    pub members: Vec<DocId>,
    /// Opposing positions (contradictions only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub positions: Vec<Position>,
    /// Configured precedence rule for the reviewer to apply
    pub precedence: Precedence,
    /// Document the precedence rule would favour. Never applied automatically.
    pub suggested: Option<DocId>,
    pub detail: String,
}

impl ConflictReport {
    /// A report without positions or suggestion.
    #[must_use]
    pub fn new(
        group_id: impl Into<String>,
        topic_key: TopicKey,
        kind: ConflictKind,
        members: Vec<DocId>,
        precedence: Precedence,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            topic_key,
            kind,
            members,
            positions: Vec::new(),
            precedence,
            suggested: None,
            detail: detail.into(),
        }
    }
}

/// A marker with phrases pre-normalized.
#[derive(Debug, Clone)]
pub struct CompiledMarker {
    pub subtopic: String,
    affirm: Vec<String>,
    deny: Vec<String>,
}

impl CompiledMarker {
    #[must_use]
    pub fn new(marker: &ConflictMarker) -> Self {
        let prepare = |phrases: &[String]| -> Vec<String> {
            phrases
                .iter()
                .map(|p| normalize_text(p))
                .filter(|p| !p.is_empty())
                .collect()
        };
        Self {
            subtopic: marker.subtopic.clone(),
            affirm: prepare(&marker.affirm),
            deny: prepare(&marker.deny),
        }
    }

    /// Stance of already-normalized `text`, with an excerpt.
    ///
    /// Denials win when both are present: a denial usually quotes the claim
    /// it rejects ("never use X" contains "use X").
    #[must_use]
    pub fn verdict(&self, text: &str) -> Option<(Verdict, String)> {
        let find = |phrases: &[String]| {
            phrases
                .iter()
                .find_map(|p| text.find(p.as_str()).map(|at| excerpt(text, at, p.len())))
        };
        if let Some(excerpt) = find(&self.deny) {
            return Some((Verdict::Deny, excerpt));
        }
        find(&self.affirm).map(|excerpt| (Verdict::Affirm, excerpt))
    }
}

/// Context facts about a position holder, for precedence hints.
#[derive(Debug, Clone, Copy)]
pub struct PrecedenceFacts {
    pub modified: DateTime<Utc>,
    pub authority: u32,
    pub completeness: u32,
}

/// Document the precedence rule favours among `facts`. Ties go to the
/// smaller document id.
pub fn suggest<'a>(
    precedence: Precedence,
    facts: impl IntoIterator<Item = (&'a DocId, PrecedenceFacts)>,
) -> Option<DocId> {
    let mut facts: Vec<_> = facts.into_iter().collect();
    facts.sort_by(|a, b| a.0.cmp(b.0));
    facts
        .into_iter()
        .rev()
        .max_by(|(_, a), (_, b)| match precedence {
            Precedence::Recency => a.modified.cmp(&b.modified),
            Precedence::Authority => a.authority.cmp(&b.authority),
            Precedence::Completeness => a.completeness.cmp(&b.completeness),
        })
        .map(|(id, _)| id.clone())
}

fn excerpt(text: &str, at: usize, len: usize) -> String {
    let mut start = at.saturating_sub(EXCERPT_CONTEXT);
    while !text.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (at + len + EXCERPT_CONTEXT).min(text.len());
    while !text.is_char_boundary(end) {
        end += 1;
    }
    let mut out = String::new();
    if start > 0 {
        out.push('…');
    }
    out.push_str(text[start..end].trim());
    if end < text.len() {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn marker() -> CompiledMarker {
        CompiledMarker::new(&ConflictMarker {
            subtopic: "tx-origin".to_string(),
            affirm: vec!["use tx.origin for authorization".to_string()],
            deny: vec!["Never use tx.origin for authorization!".to_string()],
        })
    }

    #[test]
    fn test_verdicts() {
        let m = marker();
        let affirm = normalize_text("You can use `tx.origin` for authorization.");
        let deny = normalize_text("Never use tx.origin for authorization in wallets.");
        assert_eq!(m.verdict(&affirm).map(|v| v.0), Some(Verdict::Affirm));
        assert_eq!(m.verdict(&deny).map(|v| v.0), Some(Verdict::Deny));
        assert_eq!(m.verdict("unrelated text"), None);
    }

    #[test]
    fn test_excerpt_has_context() {
        let m = marker();
        let text = normalize_text(&format!(
            "{} never use tx.origin for authorization {}",
            "lead ".repeat(40),
            "tail ".repeat(40)
        ));
        let (_, excerpt) = m.verdict(&text).unwrap();
        assert!(excerpt.starts_with('…'));
        assert!(excerpt.ends_with('…'));
        assert!(excerpt.contains("never use txorigin for authorization"));
    }

    #[test]
    fn test_suggest_by_precedence() {
        let a = DocId::from("a");
        let b = DocId::from("b");
        let old = PrecedenceFacts {
            modified: Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
            authority: 20,
            completeness: 10,
        };
        let new = PrecedenceFacts {
            modified: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            authority: 10,
            completeness: 30,
        };
        let facts = || vec![(&a, old), (&b, new)];
        assert_eq!(suggest(Precedence::Recency, facts()), Some(b.clone()));
        assert_eq!(suggest(Precedence::Authority, facts()), Some(a.clone()));
        assert_eq!(suggest(Precedence::Completeness, facts()), Some(b.clone()));
    }

    #[test]
    fn test_suggest_tie_prefers_smaller_id() {
        let a = DocId::from("a");
        let b = DocId::from("b");
        let same = PrecedenceFacts {
            modified: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            authority: 10,
            completeness: 10,
        };
        assert_eq!(
            suggest(Precedence::Authority, vec![(&b, same), (&a, same)]),
            Some(a)
        );
    }
}
