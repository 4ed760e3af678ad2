//! Merge-policy resolution.
//!
//! The resolver turns a classified group and its scores into either a
//! [`MergeDecision`] or a [`ConflictReport`] for human review:
//!
//! 1. Structural anomalies (hash collisions) and contradictory claims always
//!    escalate, whatever the scores say.
//! 2. Each identical-content subset is represented by its best member; the
//!    others become cross-references.
//! 3. Representatives are ranked by composite score, then detail, then id.
//! 4. The category's default policy applies: exact groups keep one, and
//!    variations keep the most detailed representative (token count, then
//!    score) with the rest cross-referenced.
//! 5. For partial groups the gap between the top two picks the action:
//!
//! | gap                     | action                 |
//! |-------------------------|------------------------|
//! | `> keep_single_gap`     | `KeepSingle`           |
//! | `[merge_all_gap, keep]` | `KeepPrimaryAddParts`  |
//! | `< merge_all_gap`       | `MergeAll`             |

pub mod conflict;

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{Precedence, ResolutionConfig};
use crate::duplicates::{DuplicateGroup, GroupAnomaly, GroupCategory, MergePolicy};
use crate::fingerprint::normalize_text;
use crate::scoring::{Criterion, ScoreBreakdown};
use crate::source::{DocId, Document, TopicKey};

pub use conflict::{
    CompiledMarker, ConflictKind, ConflictReport, Position, PrecedenceFacts, Verdict,
};

/// Action taken for a resolved group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    /// Keep the top document; everything else is cross-referenced.
    KeepSingle,
    /// Keep the top document and append uncovered runner-up sections.
    KeepPrimaryAddParts,
    /// Every candidate contributes its uncovered sections.
    MergeAll,
}

impl fmt::Display for DecisionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeepSingle => write!(f, "keep_single"),
            Self::KeepPrimaryAddParts => write!(f, "keep_primary_add_parts"),
            Self::MergeAll => write!(f, "merge_all"),
        }
    }
}

/// A ranked candidate in a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub doc_id: DocId,
    pub composite: f64,
    pub token_count: usize,
}

/// Resolved merge policy for one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeDecision {
    pub group_id: String,
    pub topic_key: TopicKey,
    pub category: GroupCategory,
    pub action: DecisionAction,
    pub primary: DocId,
    /// Representatives in rank order, primary first
    pub ranked: Vec<RankedCandidate>,
    /// Members that are not candidates (duplicates of a representative, or unread)
    pub cross_references: Vec<DocId>,
}

impl MergeDecision {
    /// Gap between the top two candidates, if there are two.
    #[must_use]
    pub fn gap(&self) -> Option<f64> {
        match self.ranked.as_slice() {
            [first, second, ..] => Some(round2(first.composite - second.composite)),
            _ => None,
        }
    }
}

/// Outcome of resolving a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Resolution {
    Resolved(MergeDecision),
    NeedsReview(ConflictReport),
}

/// A group member ready for resolution.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub doc: &'a Document,
    pub score: &'a ScoreBreakdown,
    pub token_count: usize,
}

impl Candidate<'_> {
    fn rank_cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .composite
            .total_cmp(&self.score.composite)
            .then_with(|| other.token_count.cmp(&self.token_count))
            .then_with(|| self.doc.id.cmp(&other.doc.id))
    }

    /// Most detailed first: token count, then score, then id.
    fn detail_cmp(&self, other: &Self) -> Ordering {
        other
            .token_count
            .cmp(&self.token_count)
            .then_with(|| other.score.composite.total_cmp(&self.score.composite))
            .then_with(|| self.doc.id.cmp(&other.doc.id))
    }

    fn facts(&self) -> PrecedenceFacts {
        PrecedenceFacts {
            modified: self.doc.modified,
            authority: self.score.points(Criterion::Authority),
            completeness: self.score.points(Criterion::Completeness),
        }
    }
}

/// Decides merge actions from score gaps and conflict markers.
#[derive(Debug, Clone)]
pub struct Resolver {
    keep_single_gap: f64,
    merge_all_gap: f64,
    precedence: Precedence,
    markers: Vec<CompiledMarker>,
}

impl Resolver {
    #[must_use]
    pub fn from_config(config: &ResolutionConfig) -> Self {
        Self {
            keep_single_gap: config.keep_single_gap,
            merge_all_gap: config.merge_all_gap,
            precedence: config.precedence,
            markers: config.conflict_markers.iter().map(CompiledMarker::new).collect(),
        }
    }

    #[must_use]
    pub fn precedence(&self) -> Precedence {
        self.precedence
    }

    /// Resolve one group. `candidates` are the members that were read and
    /// scored; members missing from it are carried as cross-references.
    ///
    /// Returns `None` when no member could be read.
    pub fn decide(&self, group: &DuplicateGroup, candidates: &[Candidate<'_>]) -> Option<Resolution> {
        if candidates.is_empty() {
            return None;
        }

        if let Some(GroupAnomaly::HashCollision { hash, topic_keys }) = &group.anomaly {
            let keys: Vec<&str> = topic_keys.iter().map(TopicKey::as_str).collect();
            return Some(Resolution::NeedsReview(ConflictReport::new(
                group.id.clone(),
                group.topic_key.clone(),
                ConflictKind::HashCollision,
                group.members.clone(),
                self.precedence,
                format!("content {} carries topic keys [{}]", hash.short(), keys.join(", ")),
            )));
        }

        if let Some(report) = self.find_contradictions(group, candidates) {
            log::warn!(
                "Group {} ({}): contradictory claims on {} position(s); needs review",
                group.id,
                group.topic_key,
                report.positions.len()
            );
            return Some(Resolution::NeedsReview(report));
        }

        // One representative per exact set.
        let by_id: BTreeMap<&DocId, &Candidate<'_>> =
            candidates.iter().map(|c| (&c.doc.id, c)).collect();
        let mut cross_references: Vec<DocId> = group
            .members
            .iter()
            .filter(|m| !by_id.contains_key(m))
            .cloned()
            .collect();
        let mut representatives: Vec<&Candidate<'_>> = Vec::new();
        for candidate in candidates {
            let best_of_set = match group.exact_set_of(&candidate.doc.id) {
                Some(set) => set
                    .iter()
                    .filter_map(|id| by_id.get(id).copied())
                    .min_by(|a, b| a.rank_cmp(b))
                    .is_some_and(|best| best.doc.id == candidate.doc.id),
                None => true,
            };
            if best_of_set {
                representatives.push(candidate);
            } else {
                cross_references.push(candidate.doc.id.clone());
            }
        }
        let policy = group.category.default_policy();
        if policy == MergePolicy::KeepMostDetailed {
            representatives.sort_by(|a, b| a.detail_cmp(b));
        } else {
            representatives.sort_by(|a, b| a.rank_cmp(b));
        }
        cross_references.sort();

        let ranked: Vec<RankedCandidate> = representatives
            .iter()
            .map(|c| RankedCandidate {
                doc_id: c.doc.id.clone(),
                composite: c.score.composite,
                token_count: c.token_count,
            })
            .collect();

        let mut decision = MergeDecision {
            group_id: group.id.clone(),
            topic_key: group.topic_key.clone(),
            category: group.category,
            action: DecisionAction::KeepSingle,
            primary: ranked[0].doc_id.clone(),
            ranked,
            cross_references,
        };

        decision.action = match (policy, decision.gap()) {
            (MergePolicy::PickOne | MergePolicy::KeepMostDetailed, _) | (_, None) => {
                DecisionAction::KeepSingle
            }
            (_, Some(gap)) if gap > self.keep_single_gap => DecisionAction::KeepSingle,
            (_, Some(gap)) if gap >= self.merge_all_gap => DecisionAction::KeepPrimaryAddParts,
            (_, Some(_)) => DecisionAction::MergeAll,
        };

        if group.is_duplicate() {
            log::debug!(
                "Group {} ({}, {}): {} → {} (gap {:?})",
                group.id,
                group.topic_key,
                group.category,
                decision.primary,
                decision.action,
                decision.gap()
            );
        }
        Some(Resolution::Resolved(decision))
    }

    fn find_contradictions(
        &self,
        group: &DuplicateGroup,
        candidates: &[Candidate<'_>],
    ) -> Option<ConflictReport> {
        if self.markers.is_empty() || candidates.len() < 2 {
            return None;
        }

        let texts: Vec<String> = candidates.iter().map(|c| normalize_text(c.doc.body())).collect();
        let mut positions = Vec::new();
        for marker in &self.markers {
            let stances: Vec<Position> = candidates
                .iter()
                .zip(&texts)
                .filter_map(|(c, text)| {
                    marker.verdict(text).map(|(verdict, excerpt)| Position {
                        subtopic: marker.subtopic.clone(),
                        doc_id: c.doc.id.clone(),
                        verdict,
                        excerpt,
                    })
                })
                .collect();
            let affirmed = stances.iter().any(|p| p.verdict == Verdict::Affirm);
            let denied = stances.iter().any(|p| p.verdict == Verdict::Deny);
            if affirmed && denied {
                positions.extend(stances);
            }
        }
        if positions.is_empty() {
            return None;
        }

        let suggested = conflict::suggest(
            self.precedence,
            candidates
                .iter()
                .filter(|c| positions.iter().any(|p| p.doc_id == c.doc.id))
                .map(|c| (&c.doc.id, c.facts())),
        );

        let subtopics: Vec<&str> = {
            let mut s: Vec<&str> = positions.iter().map(|p| p.subtopic.as_str()).collect();
            s.dedup();
            s
        };
        let mut report = ConflictReport::new(
            group.id.clone(),
            group.topic_key.clone(),
            ConflictKind::ContradictoryClaims,
            group.members.clone(),
            self.precedence,
            format!("opposing claims on [{}]", subtopics.join(", ")),
        );
        report.positions = positions;
        report.suggested = suggested;
        Some(report)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
