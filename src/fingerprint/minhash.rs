//! MinHash sketches over hashed shingles.
//!
//! Each slot of a signature is the minimum of one universal hash permutation
//! `(a * x + b) mod (2^61 - 1)` over all shingle hashes. The fraction of equal
//! slots between two signatures estimates the Jaccard similarity of the
//! underlying shingle sets.
//!
//! Coefficients are derived from BLAKE3 of the slot index, so signatures are
//! identical across runs, processes and platforms.

use serde::{Deserialize, Serialize};

/// Mersenne prime 2^61 - 1.
const MERSENNE_61: u64 = (1 << 61) - 1;

/// A fixed-size MinHash sketch. Empty when the document had no shingles.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MinHashSignature(Vec<u64>);

impl MinHashSignature {
    #[must_use]
    pub fn from_slots(slots: Vec<u64>) -> Self {
        Self(slots)
    }

    #[must_use]
    pub fn slots(&self) -> &[u64] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the source document produced no shingles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Estimated Jaccard similarity. Mismatched or empty sketches score 0.
    #[must_use]
    pub fn jaccard(&self, other: &Self) -> f64 {
        if self.0.len() != other.0.len() || self.0.is_empty() {
            return 0.0;
        }
        let matches = self
            .0
            .iter()
            .zip(other.0.iter())
            .filter(|(a, b)| a == b)
            .count();
        matches as f64 / self.0.len() as f64
    }
}

/// Computes MinHash signatures with a fixed set of permutations.
#[derive(Debug, Clone)]
pub struct MinHasher {
    coefficients: Vec<(u64, u64)>,
}

impl MinHasher {
    /// Create a hasher producing `size`-slot signatures.
    #[must_use]
    pub fn new(size: usize) -> Self {
        let coefficients = (0..size as u64)
            .map(|slot| {
                let digest = blake3::hash(format!("kbcanon-minhash-{slot}").as_bytes());
                let bytes = digest.as_bytes();
                let a = le_u64(&bytes[0..8]) % (MERSENNE_61 - 1) + 1;
                let b = le_u64(&bytes[8..16]) % MERSENNE_61;
                (a, b)
            })
            .collect();
        Self { coefficients }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.coefficients.len()
    }

    /// Sketch a set of shingle hashes. Duplicated hashes do not matter.
    #[must_use]
    pub fn signature(&self, shingles: &[u64]) -> MinHashSignature {
        if shingles.is_empty() {
            return MinHashSignature::default();
        }
        let mut slots = vec![u64::MAX; self.coefficients.len()];
        for &shingle in shingles {
            let x = shingle % MERSENNE_61;
            for (slot, &(a, b)) in slots.iter_mut().zip(self.coefficients.iter()) {
                let h = ((a as u128 * x as u128 + b as u128) % MERSENNE_61 as u128) as u64;
                if h < *slot {
                    *slot = h;
                }
            }
        }
        MinHashSignature(slots)
    }
}

/// Hash every contiguous `k`-token window to a u64.
///
/// Documents shorter than `k` tokens yield a single shingle of all tokens.
#[must_use]
pub fn shingle_hashes(tokens: &[&str], k: usize) -> Vec<u64> {
    let k = k.max(1);
    if tokens.is_empty() {
        return Vec::new();
    }
    if tokens.len() < k {
        return vec![hash_tokens(tokens)];
    }
    tokens.windows(k).map(hash_tokens).collect()
}

fn hash_tokens(tokens: &[&str]) -> u64 {
    let mut hasher = blake3::Hasher::new();
    for token in tokens {
        hasher.update(token.as_bytes());
        hasher.update(&[0x1f]);
    }
    le_u64(&hasher.finalize().as_bytes()[0..8])
}

fn le_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}
