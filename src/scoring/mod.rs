//! Document quality scoring.
//!
//! A document's score is a pure function of its body, its source collection
//! and the [`Rubric`]: no I/O, no clock, no randomness. Re-running a sync over
//! unchanged input therefore always reproduces the same ranking.
//!
//! ```text
//! composite = round2(100 × matched_points / max_possible)
//! ```
//!
//! where `matched_points` is the sum of detected signal points plus the
//! document's authority tier, and `max_possible` is the sum of all signal
//! points plus the highest tier.

pub mod rubric;
pub mod signals;

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::source::{DocId, Document};

pub use rubric::{Criterion, Rubric, ScoreConfigError, Signal};
pub use signals::detect;

/// Per-document score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub doc_id: DocId,
    /// Points awarded per criterion
    pub criteria: BTreeMap<Criterion, u32>,
    /// Signals detected, in signal order
    pub matched: Vec<Signal>,
    /// Normalized 0–100, two decimals
    pub composite: f64,
}

impl ScoreBreakdown {
    /// A breakdown carrying only a composite, for callers that rank by it.
    #[must_use]
    pub fn with_composite(doc_id: impl Into<DocId>, composite: f64) -> Self {
        Self {
            doc_id: doc_id.into(),
            criteria: BTreeMap::new(),
            matched: Vec::new(),
            composite,
        }
    }

    #[must_use]
    pub fn points(&self, criterion: Criterion) -> u32 {
        self.criteria.get(&criterion).copied().unwrap_or(0)
    }
}

/// Score one document.
#[must_use]
pub fn score_document(doc: &Document, rubric: &Rubric) -> ScoreBreakdown {
    let body = doc.body();
    let mut criteria: BTreeMap<Criterion, u32> = Criterion::ALL.iter().map(|&c| (c, 0)).collect();
    let mut matched = Vec::new();

    for &(signal, points) in rubric.signals() {
        if detect(signal, body, rubric) {
            *criteria.entry(signal.criterion()).or_default() += points;
            matched.push(signal);
        }
    }
    criteria.insert(Criterion::Authority, rubric.authority_points(&doc.collection));

    let total: u32 = criteria.values().sum();
    let composite = round2(100.0 * f64::from(total) / f64::from(rubric.max_possible()));

    log::trace!("Scored {}: {composite} ({} signals)", doc.id, matched.len());

    ScoreBreakdown {
        doc_id: doc.id.clone(),
        criteria,
        matched,
        composite,
    }
}

/// Score documents in parallel on the current rayon pool.
///
/// Output order matches input order.
#[must_use]
pub fn score_documents(docs: &[&Document], rubric: &Rubric) -> Vec<ScoreBreakdown> {
    docs.par_iter().map(|doc| score_document(doc, rubric)).collect()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScoringConfig;
    use chrono::Utc;

    const RICH: &str = "\
# Reentrancy

An attacker drained the vault in a well-known exploit.

## Prevention

1. Use the checks-effects-interactions pattern.
2. Add a ReentrancyGuard.

```solidity
pragma solidity ^0.8.20;
function testWithdraw() public {}
```

- [ ] Audit every external call

caller --> vault --> attacker
";

    fn doc(collection: &str, content: &str) -> Document {
        Document::new("d", collection, "t", content, Utc::now())
    }

    #[test]
    fn test_rich_document_scores_full() {
        let rubric = Rubric::from_config(&ScoringConfig::default()).unwrap();
        let score = score_document(&doc("action", RICH), &rubric);
        assert_eq!(score.matched.len(), 10, "matched {:?}", score.matched);
        assert_eq!(score.composite, 100.0);
        assert_eq!(score.points(Criterion::Authority), 20);
    }

    #[test]
    fn test_authority_tiers() {
        let rubric = Rubric::from_config(&ScoringConfig::default()).unwrap();
        let action = score_document(&doc("action", RICH), &rubric);
        let research = score_document(&doc("research", RICH), &rubric);
        let unknown = score_document(&doc("scratch", RICH), &rubric);
        assert!(action.composite > research.composite);
        assert!(research.composite > unknown.composite);
        assert_eq!(unknown.composite, 80.0);
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let rubric = Rubric::from_config(&ScoringConfig::default()).unwrap();
        let d = doc("research", "# Notes\nSome text about SafeMath usage.");
        assert_eq!(score_document(&d, &rubric), score_document(&d, &rubric));
    }

    #[test]
    fn test_frontmatter_not_scored() {
        let rubric = Rubric::from_config(&ScoringConfig::default()).unwrap();
        let plain = score_document(&doc("research", "plain text"), &rubric);
        let fronted = score_document(
            &doc("research", "---\nsummary: exploit audit checklist\n---\nplain text"),
            &rubric,
        );
        assert_eq!(plain.composite, fronted.composite);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let rubric = Rubric::from_config(&ScoringConfig::default()).unwrap();
        let docs = [doc("action", RICH), doc("research", "short")];
        let refs: Vec<&Document> = docs.iter().collect();
        let parallel = score_documents(&refs, &rubric);
        assert_eq!(parallel[0], score_document(&docs[0], &rubric));
        assert_eq!(parallel[1], score_document(&docs[1], &rubric));
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(66.666_666), 66.67);
        assert_eq!(round2(0.0), 0.0);
    }
}
