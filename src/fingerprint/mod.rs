//! Document fingerprinting.
//!
//! A [`Fingerprint`] carries everything later stages need to compare
//! documents without touching their content again:
//!
//! - `content_hash`: SHA-256 of the normalized body, for exact matches
//! - `signature`: MinHash sketch of k-token shingles, for near-duplicates
//! - `term_counts`: sparse term frequencies, for the TF-IDF metric
//!
//! Fingerprinting is linear in token count and a pure function of the body
//! and the fingerprinter settings.
//!
//! # Example
//!
//! ```
//! use kbcanon::fingerprint::Fingerprinter;
//!
//! let fingerprinter = Fingerprinter::new(5, 128);
//! let a = fingerprinter.fingerprint_text("# Reentrancy\nUse a reentrancy guard.");
//! let b = fingerprinter.fingerprint_text("reentrancy use a REENTRANCY guard");
//! assert_eq!(a.content_hash, b.content_hash);
//! ```

pub mod minhash;
pub mod normalize;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::source::Document;

pub use minhash::{shingle_hashes, MinHashSignature, MinHasher};
pub use normalize::normalize_text;

/// SHA-256 of a document's normalized body.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    #[must_use]
    pub fn of(normalized: &str) -> Self {
        Self(Sha256::digest(normalized.as_bytes()).into())
    }

    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hash as hexadecimal string.
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Parse a 64-character hexadecimal string.
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != 64 || !hex.is_ascii() {
            return None;
        }
        let mut bytes = [0u8; 32];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self(bytes))
    }

    /// First 12 hex characters, for logs.
    #[must_use]
    pub fn short(&self) -> String {
        self.to_hex()[..12].to_string()
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.short())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.to_hex()
    }
}

impl TryFrom<String> for ContentHash {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value).ok_or_else(|| format!("invalid content hash: {value}"))
    }
}

/// Exact-match and near-duplicate signatures for one document version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub content_hash: ContentHash,
    pub signature: MinHashSignature,
    /// Number of tokens in the normalized body.
    pub token_count: usize,
    pub term_counts: BTreeMap<String, u32>,
}

impl Fingerprint {
    /// True when the normalized body had no tokens at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.token_count == 0
    }
}

/// Computes fingerprints with fixed shingle and sketch sizes.
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    shingle_size: usize,
    minhasher: MinHasher,
}

impl Fingerprinter {
    #[must_use]
    pub fn new(shingle_size: usize, signature_size: usize) -> Self {
        Self {
            shingle_size: shingle_size.max(1),
            minhasher: MinHasher::new(signature_size),
        }
    }

    #[must_use]
    pub fn shingle_size(&self) -> usize {
        self.shingle_size
    }

    /// Fingerprint a document's body (frontmatter excluded).
    #[must_use]
    pub fn compute_fingerprint(&self, doc: &Document) -> Fingerprint {
        self.fingerprint_text(doc.body())
    }

    /// Fingerprint raw markdown text.
    #[must_use]
    pub fn fingerprint_text(&self, text: &str) -> Fingerprint {
        let normalized = normalize_text(text);
        let tokens: Vec<&str> = normalized.split_whitespace().collect();

        let mut term_counts: BTreeMap<String, u32> = BTreeMap::new();
        for token in &tokens {
            *term_counts.entry((*token).to_string()).or_default() += 1;
        }

        let shingles = shingle_hashes(&tokens, self.shingle_size);

        Fingerprint {
            content_hash: ContentHash::of(&normalized),
            signature: self.minhasher.signature(&shingles),
            token_count: tokens.len(),
            term_counts,
        }
    }
}
