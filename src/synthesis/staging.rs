//! Stage-then-commit for canonical documents.
//!
//! A run never writes to the registry directly. It stages every synthesized
//! document against a [`RegistrySnapshot`], verifies the staged set as a
//! whole, and only then hands the changes to the store in one commit.
//!
//! Staging enforces one canonical document per topic key:
//!
//! - a key already staged by another group in the same run is a collision
//! - a key held in the registry by an entry with no sources in common is a
//!   collision (two unrelated groups landed on the same key)
//! - a key held by an entry sharing sources is an update (revision + 1),
//!   unless the digest is unchanged, in which case nothing is staged and the
//!   existing commit stamps survive

use std::collections::{BTreeMap, BTreeSet};

use crate::config::Precedence;
use crate::resolve::{ConflictKind, ConflictReport};
use crate::source::{DocId, TopicKey};
use crate::store::RegistrySnapshot;

use super::CanonicalDocument;

/// Result of staging one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// New topic or changed content; will be committed.
    Staged,
    /// Identical to the registry entry; nothing to commit.
    Unchanged,
}

/// Consistency failures found by [`StagedRegistry::verify`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    /// Two canonical documents would share a topic key.
    #[error("Topic key {0} would have more than one canonical document")]
    Overlap(TopicKey),

    /// A section's source is missing from the attribution block.
    #[error("Section source {source_id} of {topic} is not attributed")]
    UnattributedSection {
        /// Affected topic
        topic: TopicKey,
        /// Source of the section
        source_id: DocId,
    },

    /// A group member is neither attributed nor cross-referenced.
    #[error("Member {member} of {topic} is not traceable")]
    UntracedMember {
        /// Affected topic
        topic: TopicKey,
        /// Member missing from the document
        member: DocId,
    },
}

/// Pending registry changes for one run.
#[derive(Debug)]
pub struct StagedRegistry<'a> {
    base: &'a RegistrySnapshot,
    precedence: Precedence,
    staged: BTreeMap<TopicKey, CanonicalDocument>,
    /// Topic key → (group id, members) for everything staged or unchanged
    claims: BTreeMap<TopicKey, (String, Vec<DocId>)>,
    unchanged: usize,
}

impl<'a> StagedRegistry<'a> {
    #[must_use]
    pub fn new(base: &'a RegistrySnapshot, precedence: Precedence) -> Self {
        Self {
            base,
            precedence,
            staged: BTreeMap::new(),
            claims: BTreeMap::new(),
            unchanged: 0,
        }
    }

    #[must_use]
    pub fn base(&self) -> &RegistrySnapshot {
        self.base
    }

    /// Stage `doc` synthesized from a group with `members`.
    ///
    /// Collisions come back as a `TopicCollision` report; nothing is staged.
    pub fn stage(
        &mut self,
        mut doc: CanonicalDocument,
        members: &[DocId],
    ) -> Result<StageOutcome, ConflictReport> {
        let topic = doc.topic_key.clone();

        if let Some((owner, _)) = self.claims.get(&topic) {
            return Err(self.collision(
                &doc,
                members,
                format!("topic key already claimed by group {owner} in this run"),
            ));
        }

        let outcome = match self.base.get(&topic) {
            Some(existing) => {
                let existing_sources = existing.sources();
                let shares_sources = doc.sources().iter().any(|s| existing_sources.contains(s))
                    || members.iter().any(|m| existing_sources.contains(m));
                if !shares_sources {
                    return Err(self.collision(
                        &doc,
                        members,
                        format!(
                            "registry entry from group {} shares no sources",
                            existing.group_id
                        ),
                    ));
                }
                if existing.digest == doc.digest {
                    StageOutcome::Unchanged
                } else {
                    doc.revision = existing.revision + 1;
                    StageOutcome::Staged
                }
            }
            None => {
                doc.revision = 1;
                StageOutcome::Staged
            }
        };

        self.claims
            .insert(topic.clone(), (doc.group_id.clone(), members.to_vec()));
        match outcome {
            StageOutcome::Staged => {
                log::trace!("Staged {topic} revision {}", doc.revision);
                self.staged.insert(topic, doc);
            }
            StageOutcome::Unchanged => {
                log::trace!("Unchanged {topic}");
                self.unchanged += 1;
            }
        }
        Ok(outcome)
    }

    fn collision(&self, doc: &CanonicalDocument, members: &[DocId], detail: String) -> ConflictReport {
        log::warn!("Topic collision on {}: {detail}", doc.topic_key);
        ConflictReport::new(
            doc.group_id.clone(),
            doc.topic_key.clone(),
            ConflictKind::TopicCollision,
            members.to_vec(),
            self.precedence,
            detail,
        )
    }

    /// Number of documents that will be written.
    #[must_use]
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    #[must_use]
    pub fn unchanged_len(&self) -> usize {
        self.unchanged
    }

    /// Topic keys staged for writing.
    pub fn staged_topics(&self) -> impl Iterator<Item = &TopicKey> {
        self.staged.keys()
    }

    /// Check the staged set before it is committed.
    pub fn verify(&self) -> Result<(), VerifyError> {
        // Zero overlap: each staged key replaces at most its own registry entry.
        let mut seen: BTreeSet<&TopicKey> = BTreeSet::new();
        for (key, doc) in &self.staged {
            if doc.topic_key != *key || !seen.insert(key) {
                return Err(VerifyError::Overlap(key.clone()));
            }
        }

        for (topic, doc) in &self.staged {
            for section in &doc.sections {
                if !doc.attribution.credits(&section.source) {
                    return Err(VerifyError::UnattributedSection {
                        topic: topic.clone(),
                        source_id: section.source.clone(),
                    });
                }
            }
            let sources = doc.sources();
            if let Some((_, members)) = self.claims.get(topic) {
                if let Some(member) = members.iter().find(|m| !sources.contains(m)) {
                    return Err(VerifyError::UntracedMember {
                        topic: topic.clone(),
                        member: member.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Consume into the documents to commit, in topic order.
    #[must_use]
    pub fn into_changes(self) -> Vec<CanonicalDocument> {
        self.staged.into_values().collect()
    }
}
