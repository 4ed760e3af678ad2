//! Pluggable pairwise similarity metrics.
//!
//! Both metrics agree on two fixed points: identical content hashes score
//! 1.0, and an empty document scores 0.0 against any non-identical one.

use std::collections::HashMap;

use crate::config::{MetricKind, SimilarityConfig};
use crate::fingerprint::Fingerprint;

/// Similarity strategy between two fingerprinted documents.
pub trait SimilarityMetric: Send + Sync {
    /// Short name for logs and reports.
    fn name(&self) -> &'static str;

    /// Similarity in `[0, 1]`.
    fn similarity(&self, a: &Fingerprint, b: &Fingerprint) -> f64;
}

/// Estimated Jaccard similarity of shingle sets via MinHash signatures.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinHashJaccard;

impl SimilarityMetric for MinHashJaccard {
    fn name(&self) -> &'static str {
        "minhash"
    }

    fn similarity(&self, a: &Fingerprint, b: &Fingerprint) -> f64 {
        if a.content_hash == b.content_hash {
            return 1.0;
        }
        a.signature.jaccard(&b.signature)
    }
}

/// Cosine similarity of TF-IDF weighted term vectors.
///
/// Document frequencies are fitted once over the corpus being grouped.
#[derive(Debug, Clone)]
pub struct TfIdfCosine {
    idf: HashMap<String, f64>,
    unseen_idf: f64,
}

impl TfIdfCosine {
    /// Fit inverse document frequencies over `corpus`.
    ///
    /// Uses smoothed IDF: `ln((1 + N) / (1 + df)) + 1`.
    pub fn fit<'a>(corpus: impl IntoIterator<Item = &'a Fingerprint>) -> Self {
        let mut df: HashMap<&str, usize> = HashMap::new();
        let mut n = 0usize;
        for fp in corpus {
            n += 1;
            for term in fp.term_counts.keys() {
                *df.entry(term.as_str()).or_default() += 1;
            }
        }

        let smooth = |count: usize| ((1.0 + n as f64) / (1.0 + count as f64)).ln() + 1.0;
        let idf = df
            .into_iter()
            .map(|(term, count)| (term.to_string(), smooth(count)))
            .collect();
        Self {
            idf,
            unseen_idf: smooth(0),
        }
    }

    fn weight(&self, term: &str, tf: u32) -> f64 {
        f64::from(tf) * self.idf.get(term).copied().unwrap_or(self.unseen_idf)
    }
}

impl SimilarityMetric for TfIdfCosine {
    fn name(&self) -> &'static str {
        "tfidf"
    }

    fn similarity(&self, a: &Fingerprint, b: &Fingerprint) -> f64 {
        if a.content_hash == b.content_hash {
            return 1.0;
        }
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }

        let norm = |fp: &Fingerprint| {
            fp.term_counts
                .iter()
                .map(|(t, &tf)| self.weight(t, tf).powi(2))
                .sum::<f64>()
                .sqrt()
        };

        // Iterate the smaller vector, probe the larger.
        let (small, large) = if a.term_counts.len() <= b.term_counts.len() {
            (a, b)
        } else {
            (b, a)
        };
        let dot: f64 = small
            .term_counts
            .iter()
            .filter_map(|(t, &tf)| {
                large
                    .term_counts
                    .get(t)
                    .map(|&other| self.weight(t, tf) * self.weight(t, other))
            })
            .sum();

        let denom = norm(a) * norm(b);
        if denom == 0.0 {
            0.0
        } else {
            (dot / denom).clamp(0.0, 1.0)
        }
    }
}

/// Build the configured metric, fitting it on `corpus` where needed.
pub fn metric_for<'a>(
    config: &SimilarityConfig,
    corpus: impl IntoIterator<Item = &'a Fingerprint>,
) -> Box<dyn SimilarityMetric> {
    match config.metric {
        MetricKind::MinHash => Box::new(MinHashJaccard),
        MetricKind::TfIdf => Box::new(TfIdfCosine::fit(corpus)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Fingerprinter;

    fn fps(texts: &[&str]) -> Vec<Fingerprint> {
        let f = Fingerprinter::new(3, 128);
        texts.iter().map(|t| f.fingerprint_text(t)).collect()
    }

    #[test]
    fn test_identical_hash_scores_one() {
        let docs = fps(&["Use a reentrancy guard", "use a REENTRANCY guard!"]);
        assert_eq!(MinHashJaccard.similarity(&docs[0], &docs[1]), 1.0);
        let tfidf = TfIdfCosine::fit(&docs);
        assert_eq!(tfidf.similarity(&docs[0], &docs[1]), 1.0);
    }

    #[test]
    fn test_empty_scores_zero() {
        let docs = fps(&["", "some real content about access control"]);
        assert_eq!(MinHashJaccard.similarity(&docs[0], &docs[1]), 0.0);
        let tfidf = TfIdfCosine::fit(&docs);
        assert_eq!(tfidf.similarity(&docs[0], &docs[1]), 0.0);
    }

    #[test]
    fn test_tfidf_orders_by_overlap() {
        let docs = fps(&[
            "reentrancy attack drains the vault through a callback",
            "reentrancy attack drains the pool through a fallback",
            "oracle price manipulation with flash loans",
        ]);
        let tfidf = TfIdfCosine::fit(&docs);
        let close = tfidf.similarity(&docs[0], &docs[1]);
        let far = tfidf.similarity(&docs[0], &docs[2]);
        assert!(close > far, "close={close} far={far}");
        assert!(far < 0.1);
        assert!((0.0..=1.0).contains(&close));
    }

    #[test]
    fn test_tfidf_is_symmetric() {
        let docs = fps(&["alpha beta gamma gamma", "beta gamma delta"]);
        let tfidf = TfIdfCosine::fit(&docs);
        assert_eq!(
            tfidf.similarity(&docs[0], &docs[1]),
            tfidf.similarity(&docs[1], &docs[0])
        );
    }

    #[test]
    fn test_metric_for_config() {
        let mut config = SimilarityConfig::default();
        assert_eq!(metric_for(&config, &[]).name(), "minhash");
        config.metric = MetricKind::TfIdf;
        assert_eq!(metric_for(&config, &[]).name(), "tfidf");
    }
}
