//! Group classification.
//!
//! - `Exact`: every member shares one content hash (including lone documents)
//! - `Variation`: mean pairwise similarity at or above `likely`
//! - `Partial`: everything else that grouped
//!
//! Classification is per group. An identical-content subset that grouped
//! with a near-duplicate takes the group's `Partial` or `Variation` label;
//! the subset itself is kept in `DuplicateGroup::exact_sets`, and the
//! resolver collapses it to one representative before applying the policy.
//! Similarity is averaged over distinct contents only, so exact copies do
//! not inflate it.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::groups::{FingerprintedDoc, Thresholds};
use super::similarity::SimilarityMetric;

/// Category of a duplicate group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupCategory {
    Exact,
    Partial,
    Variation,
}

/// Default merge policy implied by a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Identical content: keep one, cross-reference the rest.
    PickOne,
    /// Same content at different detail levels: keep the most detailed.
    KeepMostDetailed,
    /// Complementary coverage: merge sections.
    MergeSections,
}

impl GroupCategory {
    #[must_use]
    pub fn default_policy(self) -> MergePolicy {
        match self {
            Self::Exact => MergePolicy::PickOne,
            Self::Variation => MergePolicy::KeepMostDetailed,
            Self::Partial => MergePolicy::MergeSections,
        }
    }
}

impl fmt::Display for GroupCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::Partial => write!(f, "partial"),
            Self::Variation => write!(f, "variation"),
        }
    }
}

/// Classify a group of members.
///
/// Returns the category and the mean pairwise similarity between members of
/// distinct content (1.0 for exact groups).
pub fn classify(
    members: &[&FingerprintedDoc],
    metric: &dyn SimilarityMetric,
    thresholds: &Thresholds,
) -> (GroupCategory, f64) {
    // One representative per distinct hash.
    let mut distinct: Vec<&FingerprintedDoc> = Vec::new();
    for member in members {
        if !distinct
            .iter()
            .any(|d| d.fingerprint.content_hash == member.fingerprint.content_hash)
        {
            distinct.push(member);
        }
    }

    if distinct.len() <= 1 {
        return (GroupCategory::Exact, 1.0);
    }

    let mut total = 0.0;
    let mut pairs = 0usize;
    for (i, a) in distinct.iter().enumerate() {
        for b in &distinct[i + 1..] {
            total += metric.similarity(&a.fingerprint, &b.fingerprint);
            pairs += 1;
        }
    }
    let mean = total / pairs as f64;

    let category = if thresholds.is_likely(mean) {
        GroupCategory::Variation
    } else {
        GroupCategory::Partial
    };
    (category, mean)
}
