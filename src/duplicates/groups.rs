//! Duplicate grouping.
//!
//! # Overview
//!
//! Grouping turns fingerprints into [`DuplicateGroup`]s in three steps:
//!
//! 1. Documents with identical content hashes are unioned unconditionally.
//! 2. Candidate pairs (LSH buckets or all pairs) are scored with the
//!    configured [`SimilarityMetric`]; pairs at or above `probable` become
//!    [`SimilarityEdge`]s and are unioned.
//! 3. Connected components become groups, classified and keyed by topic.
//!
//! Grouping is transitive: if A~B and B~C, A and C share a group even when
//! A~C is below threshold. Precision is left to classification and scoring.
//!
//! Every document lands in exactly one group; unique documents form
//! one-member groups.
//!
//! # Example
//!
//! ```
//! use kbcanon::duplicates::{FingerprintedDoc, Grouper, MinHashJaccard, Thresholds};
//! use kbcanon::fingerprint::Fingerprinter;
//!
//! let fingerprinter = Fingerprinter::new(5, 128);
//! let docs: Vec<FingerprintedDoc> = [
//!     ("action/a.md", "Use a reentrancy guard on every external call."),
//!     ("research/a.md", "use a reentrancy guard on every external call"),
//!     ("action/b.md", "Oracle manipulation is mitigated by TWAP pricing."),
//! ]
//! .into_iter()
//! .map(|(id, text)| FingerprintedDoc::new(id, "topic", fingerprinter.fingerprint_text(text)))
//! .collect();
//!
//! let (groups, stats) = Grouper::new(Thresholds::default()).group(&docs, &MinHashJaccard);
//!
//! assert_eq!(stats.total_documents, 3);
//! assert_eq!(groups.len(), 2);
//! assert_eq!(stats.duplicate_groups, 1);
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::config::{CandidateStrategy, SimilarityConfig};
use crate::fingerprint::{ContentHash, Fingerprint};
use crate::source::{DocId, TopicKey};

use super::classify::{classify, GroupCategory};
use super::lsh::{all_pairs, lsh_candidates, CandidatePair};
use super::similarity::SimilarityMetric;

/// Similarity thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Inclusive lower bound for a "probable duplicate" edge.
    pub probable: f64,
    /// Inclusive lower bound for a Variation group.
    pub likely: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            probable: 0.70,
            likely: 0.90,
        }
    }
}

impl Thresholds {
    #[must_use]
    pub fn from_config(config: &SimilarityConfig) -> Self {
        Self {
            probable: config.probable,
            likely: config.likely,
        }
    }

    /// True when `score` counts as a probable duplicate.
    #[must_use]
    pub fn is_probable(&self, score: f64) -> bool {
        score >= self.probable
    }

    #[must_use]
    pub fn is_likely(&self, score: f64) -> bool {
        score >= self.likely
    }
}

/// A document reduced to what grouping needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerprintedDoc {
    pub id: DocId,
    pub topic_key: TopicKey,
    pub fingerprint: Fingerprint,
}

impl FingerprintedDoc {
    #[must_use]
    pub fn new(id: impl Into<String>, topic_key: impl Into<String>, fingerprint: Fingerprint) -> Self {
        Self {
            id: DocId::new(id),
            topic_key: TopicKey::new(topic_key),
            fingerprint,
        }
    }
}

/// A kept similarity edge between two documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityEdge {
    pub a: DocId,
    pub b: DocId,
    pub score: f64,
}

/// Structural problem detected while grouping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GroupAnomaly {
    /// Identical content carries conflicting topic metadata.
    HashCollision {
        hash: ContentHash,
        topic_keys: Vec<TopicKey>,
    },
}

/// A connected set of documents believed to describe one topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    /// Stable id: BLAKE3 of the sorted member ids (16 hex chars)
    pub id: String,
    /// Member ids, sorted
    pub members: Vec<DocId>,
    pub category: GroupCategory,
    /// Most common member topic key
    pub topic_key: TopicKey,
    /// Subsets (2+ members) sharing one content hash
    pub exact_sets: Vec<Vec<DocId>>,
    /// Edges that joined the group
    pub edges: Vec<SimilarityEdge>,
    /// Mean pairwise similarity between distinct-content members
    pub similarity: f64,
    pub anomaly: Option<GroupAnomaly>,
}

impl DuplicateGroup {
    /// Number of documents in this group.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// True for real duplicate groups (2+ members).
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        self.members.len() > 1
    }

    #[must_use]
    pub fn contains(&self, id: &DocId) -> bool {
        self.members.binary_search(id).is_ok()
    }

    /// The exact set containing `id`, if any.
    #[must_use]
    pub fn exact_set_of(&self, id: &DocId) -> Option<&[DocId]> {
        self.exact_sets
            .iter()
            .find(|set| set.contains(id))
            .map(Vec::as_slice)
    }
}

/// Statistics from the grouping phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupingStats {
    /// Documents considered
    pub total_documents: usize,
    /// Pairs scored with the similarity metric
    pub candidate_pairs: usize,
    /// Pairs at or above the probable threshold
    pub edges_kept: usize,
    /// Groups emitted, singletons included
    pub groups: usize,
    /// Groups with 2+ members
    pub duplicate_groups: usize,
    /// Identical-content subsets found
    pub exact_sets: usize,
}

/// Disjoint-set forest with path compression and union by rank.
#[derive(Debug, Clone)]
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    #[must_use]
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    /// Merge the sets of `a` and `b`. Returns false if already joined.
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
        true
    }
}

/// Groups fingerprinted documents.
#[derive(Debug, Clone)]
pub struct Grouper {
    thresholds: Thresholds,
    strategy: CandidateStrategy,
    bands: usize,
}

impl Grouper {
    #[must_use]
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            strategy: CandidateStrategy::Lsh,
            bands: 32,
        }
    }

    #[must_use]
    pub fn from_config(config: &SimilarityConfig) -> Self {
        Self::new(Thresholds::from_config(config))
            .with_strategy(config.candidates)
            .with_bands(config.bands)
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: CandidateStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    #[must_use]
    pub fn with_bands(mut self, bands: usize) -> Self {
        self.bands = bands.max(1);
        self
    }

    #[must_use]
    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Group `docs` into connected components.
    ///
    /// Output groups are sorted by their smallest member id; the result does
    /// not depend on input order.
    pub fn group(
        &self,
        docs: &[FingerprintedDoc],
        metric: &dyn SimilarityMetric,
    ) -> (Vec<DuplicateGroup>, GroupingStats) {
        let mut stats = GroupingStats {
            total_documents: docs.len(),
            ..GroupingStats::default()
        };

        let mut order: Vec<&FingerprintedDoc> = docs.iter().collect();
        order.sort_by(|a, b| a.id.cmp(&b.id));
        order.dedup_by(|a, b| a.id == b.id);

        let mut uf = UnionFind::new(order.len());

        // Exact hashes first: these must always share a group.
        let mut by_hash: BTreeMap<ContentHash, Vec<usize>> = BTreeMap::new();
        for (idx, doc) in order.iter().enumerate() {
            by_hash.entry(doc.fingerprint.content_hash).or_default().push(idx);
        }
        for indices in by_hash.values() {
            for pair in indices.windows(2) {
                uf.union(pair[0], pair[1]);
            }
        }

        let candidates: BTreeSet<CandidatePair> = match self.strategy {
            CandidateStrategy::Lsh => {
                let signatures: Vec<_> = order.iter().map(|d| &d.fingerprint.signature).collect();
                lsh_candidates(&signatures, self.bands)
            }
            CandidateStrategy::AllPairs => all_pairs(order.len()),
        };

        let mut edges: Vec<(usize, usize, f64)> = Vec::new();
        for (i, j) in candidates {
            let (a, b) = (order[i], order[j]);
            if a.fingerprint.content_hash == b.fingerprint.content_hash {
                continue;
            }
            stats.candidate_pairs += 1;
            let score = metric.similarity(&a.fingerprint, &b.fingerprint);
            if self.thresholds.is_probable(score) {
                log::trace!("Edge {} ~ {} ({score:.3})", a.id, b.id);
                uf.union(i, j);
                edges.push((i, j, score));
            }
        }
        stats.edges_kept = edges.len();

        // Components keyed by root, members in id order.
        let mut components: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for idx in 0..order.len() {
            let root = uf.find(idx);
            components.entry(root).or_default().push(idx);
        }
        let mut edges_by_root: BTreeMap<usize, Vec<SimilarityEdge>> = BTreeMap::new();
        for (i, j, score) in edges {
            edges_by_root
                .entry(uf.find(i))
                .or_default()
                .push(SimilarityEdge {
                    a: order[i].id.clone(),
                    b: order[j].id.clone(),
                    score,
                });
        }

        let mut groups: Vec<DuplicateGroup> = components
            .into_iter()
            .map(|(root, indices)| {
                let members: Vec<&FingerprintedDoc> = indices.iter().map(|&i| order[i]).collect();
                let edges = edges_by_root.remove(&root).unwrap_or_default();
                self.build_group(&members, edges, metric)
            })
            .collect();
        groups.sort_by(|a, b| a.members.first().cmp(&b.members.first()));

        stats.groups = groups.len();
        stats.duplicate_groups = groups.iter().filter(|g| g.is_duplicate()).count();
        stats.exact_sets = groups.iter().map(|g| g.exact_sets.len()).sum();

        log::info!(
            "Grouping complete: {} documents → {} groups ({} duplicate, {} exact sets, {} edges from {} candidates)",
            stats.total_documents,
            stats.groups,
            stats.duplicate_groups,
            stats.exact_sets,
            stats.edges_kept,
            stats.candidate_pairs
        );

        (groups, stats)
    }

    fn build_group(
        &self,
        members: &[&FingerprintedDoc],
        edges: Vec<SimilarityEdge>,
        metric: &dyn SimilarityMetric,
    ) -> DuplicateGroup {
        let ids: Vec<DocId> = members.iter().map(|d| d.id.clone()).collect();

        let mut by_hash: BTreeMap<ContentHash, Vec<&FingerprintedDoc>> = BTreeMap::new();
        for &member in members {
            by_hash.entry(member.fingerprint.content_hash).or_default().push(member);
        }

        let mut exact_sets = Vec::new();
        let mut anomaly = None;
        for (hash, set) in &by_hash {
            if set.len() < 2 {
                continue;
            }
            exact_sets.push(set.iter().map(|d| d.id.clone()).collect::<Vec<_>>());

            let keys: BTreeSet<&TopicKey> = set.iter().map(|d| &d.topic_key).collect();
            if keys.len() > 1 && anomaly.is_none() {
                log::warn!(
                    "Hash collision: {} documents share {} under {} topic keys",
                    set.len(),
                    hash.short(),
                    keys.len()
                );
                anomaly = Some(GroupAnomaly::HashCollision {
                    hash: *hash,
                    topic_keys: keys.into_iter().cloned().collect(),
                });
            }
        }
        exact_sets.sort();

        let (category, similarity) = classify(members, metric, &self.thresholds);
        let group = DuplicateGroup {
            id: group_id(&ids),
            members: ids,
            category,
            topic_key: dominant_topic(members),
            exact_sets,
            edges,
            similarity,
            anomaly,
        };

        if group.is_duplicate() {
            log::debug!(
                "Group {} [{}] topic={} members={} similarity={:.3}",
                group.id,
                group.category,
                group.topic_key,
                group.len(),
                group.similarity
            );
        }
        group
    }
}

/// Stable group id from sorted member ids.
#[must_use]
pub fn group_id(sorted_members: &[DocId]) -> String {
    let mut hasher = blake3::Hasher::new();
    for id in sorted_members {
        hasher.update(id.as_str().as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize().to_hex()[..16].to_string()
}

/// Most common topic key; ties go to the lexicographically smallest.
fn dominant_topic(members: &[&FingerprintedDoc]) -> TopicKey {
    let mut counts: BTreeMap<&TopicKey, usize> = BTreeMap::new();
    for member in members {
        *counts.entry(&member.topic_key).or_default() += 1;
    }
    // BTreeMap iterates keys ascending; keep the first maximum.
    let mut best: Option<(&TopicKey, usize)> = None;
    for (key, count) in counts {
        if best.is_none_or(|(_, c)| count > c) {
            best = Some((key, count));
        }
    }
    best.map(|(k, _)| k.clone())
        .unwrap_or_else(|| TopicKey::new(""))
}
