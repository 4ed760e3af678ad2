//! Duplicate detection module.
//!
//! This module provides functionality for:
//! - Pairwise similarity metrics (MinHash Jaccard, TF-IDF cosine)
//! - Candidate pair generation (LSH banding or all pairs)
//! - Union-find grouping of exact and near-duplicate documents
//! - Group classification (Exact / Partial / Variation)

pub mod classify;
pub mod groups;
pub mod lsh;
pub mod similarity;

pub use classify::{classify, GroupCategory, MergePolicy};
pub use groups::{
    group_id, DuplicateGroup, FingerprintedDoc, GroupAnomaly, Grouper, GroupingStats,
    SimilarityEdge, Thresholds, UnionFind,
};
pub use similarity::{metric_for, MinHashJaccard, SimilarityMetric, TfIdfCosine};
