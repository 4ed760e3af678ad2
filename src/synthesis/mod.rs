//! Canonical document synthesis.
//!
//! The synthesizer turns a [`MergeDecision`] and the documents behind it into
//! a [`CanonicalDocument`]: the selected or merged body, an attribution block
//! naming every contributing source with its score, and cross-references to
//! every member that did not contribute. Sources themselves are never touched.
//!
//! Staging and verification of the resulting registry changes live in
//! [`staging`].

pub mod sections;
pub mod staging;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::SimilarityConfig;
use crate::resolve::{DecisionAction, MergeDecision};
use crate::source::{DocId, Document, TopicKey};

pub use sections::{split_sections, Coverage, Section};
pub use staging::{StageOutcome, StagedRegistry, VerifyError};

/// One attributed source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceCredit {
    pub doc_id: DocId,
    pub collection: String,
    pub composite: f64,
}

/// Who contributed a canonical document's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribution {
    pub primary: SourceCredit,
    /// Sources that contributed at least one section, in rank order
    pub secondary: Vec<SourceCredit>,
}

impl Attribution {
    /// True when `id` is the primary or a secondary source.
    #[must_use]
    pub fn credits(&self, id: &DocId) -> bool {
        self.primary.doc_id == *id || self.secondary.iter().any(|s| s.doc_id == *id)
    }
}

/// Provenance of one section of a canonical body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionSource {
    pub heading: Option<String>,
    pub source: DocId,
}

/// The single registry-resident document for a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalDocument {
    pub topic_key: TopicKey,
    pub body: String,
    pub sections: Vec<SectionSource>,
    pub attribution: Attribution,
    /// Members that did not contribute content
    pub cross_references: Vec<DocId>,
    pub action: DecisionAction,
    pub group_id: String,
    /// SHA-256 over topic, body, attribution and cross-references
    pub digest: String,
    /// 1 on first commit, incremented on every changed re-commit
    pub revision: u64,
    pub committed_run: Option<String>,
    pub committed_at: Option<DateTime<Utc>>,
}

impl CanonicalDocument {
    /// Every source this document traces back to.
    #[must_use]
    pub fn sources(&self) -> BTreeSet<DocId> {
        std::iter::once(&self.attribution.primary.doc_id)
            .chain(self.attribution.secondary.iter().map(|s| &s.doc_id))
            .chain(self.cross_references.iter())
            .cloned()
            .collect()
    }

    /// Digest of the content-bearing fields. Commit stamps and revision are
    /// excluded, so an unchanged re-synthesis has an unchanged digest.
    #[must_use]
    pub fn compute_digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.topic_key.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.body.as_bytes());
        hasher.update([0u8]);
        for credit in std::iter::once(&self.attribution.primary).chain(&self.attribution.secondary) {
            hasher.update(credit.doc_id.as_str().as_bytes());
            hasher.update(format!(":{}:{:.2}", credit.collection, credit.composite).as_bytes());
            hasher.update([0u8]);
        }
        for id in &self.cross_references {
            hasher.update(id.as_str().as_bytes());
            hasher.update([1u8]);
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

/// Builds canonical documents from decisions.
#[derive(Debug, Clone)]
pub struct Synthesizer {
    section_coverage: f64,
    shingle_size: usize,
}

impl Synthesizer {
    #[must_use]
    pub fn new(section_coverage: f64, shingle_size: usize) -> Self {
        Self {
            section_coverage,
            shingle_size,
        }
    }

    #[must_use]
    pub fn from_config(config: &SimilarityConfig) -> Self {
        Self::new(config.section_coverage, config.shingle_size)
    }

    /// Synthesize the canonical document for `decision`.
    ///
    /// `docs` must contain every ranked candidate; missing candidates are
    /// carried as cross-references.
    #[must_use]
    pub fn synthesize(
        &self,
        decision: &MergeDecision,
        docs: &BTreeMap<DocId, &Document>,
    ) -> CanonicalDocument {
        let credit = |id: &DocId, composite: f64| SourceCredit {
            doc_id: id.clone(),
            collection: docs
                .get(id)
                .map(|d| d.collection.clone())
                .unwrap_or_default(),
            composite,
        };

        let mut coverage = Coverage::new(self.section_coverage, self.shingle_size);
        let mut body_parts: Vec<String> = Vec::new();
        let mut sections: Vec<SectionSource> = Vec::new();
        let mut secondary = Vec::new();
        let mut cross_references: BTreeSet<DocId> =
            decision.cross_references.iter().cloned().collect();

        for (rank, candidate) in decision.ranked.iter().enumerate() {
            let Some(doc) = docs.get(&candidate.doc_id) else {
                cross_references.insert(candidate.doc_id.clone());
                continue;
            };
            let is_primary = rank == 0;
            let contributes = is_primary || decision.action != DecisionAction::KeepSingle;
            if !contributes {
                cross_references.insert(candidate.doc_id.clone());
                continue;
            }

            let mut added = 0usize;
            for section in split_sections(doc.body()) {
                if section.is_blank() {
                    continue;
                }
                if !is_primary && coverage.covers(&section) {
                    log::trace!(
                        "Section {:?} of {} already covered",
                        section.heading,
                        candidate.doc_id
                    );
                    continue;
                }
                coverage.include(&section);
                let mut text = section.text.trim_end().to_string();
                if !is_primary {
                    text.push_str(&format!("\n\n*Source: `{}`*", candidate.doc_id));
                }
                body_parts.push(text);
                sections.push(SectionSource {
                    heading: section.heading.clone(),
                    source: candidate.doc_id.clone(),
                });
                added += 1;
            }

            if !is_primary {
                // MergeAll credits every candidate, even one fully covered.
                if added > 0 || decision.action == DecisionAction::MergeAll {
                    secondary.push(credit(&candidate.doc_id, candidate.composite));
                } else {
                    cross_references.insert(candidate.doc_id.clone());
                }
            }
        }

        let primary = decision
            .ranked
            .first()
            .map(|c| credit(&c.doc_id, c.composite))
            .unwrap_or_else(|| credit(&decision.primary, 0.0));
        cross_references.remove(&primary.doc_id);

        let mut body = body_parts.join("\n\n");
        body.push('\n');

        let mut canonical = CanonicalDocument {
            topic_key: decision.topic_key.clone(),
            body,
            sections,
            attribution: Attribution { primary, secondary },
            cross_references: cross_references.into_iter().collect(),
            action: decision.action,
            group_id: decision.group_id.clone(),
            digest: String::new(),
            revision: 0,
            committed_run: None,
            committed_at: None,
        };
        canonical.digest = canonical.compute_digest();

        log::debug!(
            "Synthesized {} from {} source(s): {} section(s), {} cross-reference(s)",
            canonical.topic_key,
            1 + canonical.attribution.secondary.len(),
            canonical.sections.len(),
            canonical.cross_references.len()
        );
        canonical
    }
}
