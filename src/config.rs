//! Engine configuration.
//!
//! Configuration is declarative and layered with figment:
//! defaults < TOML file < `KBCANON_*` environment variables (`__` nests,
//! e.g. `KBCANON_SIMILARITY__PROBABLE=0.75`).
//!
//! Numeric settings are checked by [`Config::validate`]; the scoring rubric is
//! checked separately and eagerly by [`crate::scoring::Rubric::from_config`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::scoring::ScoreConfigError;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "KBCANON_";

/// Errors raised while loading or validating configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The layered configuration could not be extracted.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// A setting is out of range or inconsistent with another.
    #[error("Invalid configuration value for {field}: {message}")]
    Invalid {
        /// Dotted path of the offending setting
        field: &'static str,
        /// What is wrong with it
        message: String,
    },

    /// The scoring rubric is malformed.
    #[error(transparent)]
    Scoring(#[from] ScoreConfigError),

    /// No platform configuration directory could be determined.
    #[error("Failed to determine the configuration directory")]
    NoConfigDir,
}

/// Similarity metric used to score candidate pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Estimated Jaccard similarity of shingle sets.
    #[default]
    MinHash,
    /// Cosine similarity of TF-IDF term vectors.
    TfIdf,
}

/// How candidate pairs are generated before scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStrategy {
    /// Locality-sensitive hashing over MinHash bands.
    #[default]
    Lsh,
    /// Every pair. Quadratic; intended for small corpora.
    AllPairs,
}

/// Which evidence a human reviewer should prefer when sources contradict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Precedence {
    #[default]
    Recency,
    Authority,
    Completeness,
}

impl std::fmt::Display for Precedence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Recency => write!(f, "recency"),
            Self::Authority => write!(f, "authority"),
            Self::Completeness => write!(f, "completeness"),
        }
    }
}

/// Similarity and grouping settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    /// Minimum similarity for a "probable duplicate" edge (inclusive).
    pub probable: f64,
    /// Minimum mean similarity for a group to be a Variation.
    pub likely: f64,
    pub metric: MetricKind,
    /// Tokens per shingle.
    pub shingle_size: usize,
    /// MinHash slots per signature.
    pub signature_size: usize,
    /// LSH bands; must divide `signature_size`.
    pub bands: usize,
    pub candidates: CandidateStrategy,
    /// Section similarity at or above which a section counts as already covered.
    pub section_coverage: f64,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            probable: 0.70,
            likely: 0.90,
            metric: MetricKind::MinHash,
            shingle_size: 5,
            signature_size: 128,
            bands: 32,
            candidates: CandidateStrategy::Lsh,
            section_coverage: 0.5,
        }
    }
}

/// Scoring rubric as written in configuration.
///
/// `criteria` maps a criterion name to its `{signal → points}` table. The
/// `authority` criterion maps source collection names to tier points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub criteria: BTreeMap<String, BTreeMap<String, u32>>,
    /// Regexes whose presence marks current conventions.
    pub current_patterns: Vec<String>,
    /// Regexes whose presence marks deprecated patterns.
    pub deprecated_patterns: Vec<String>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let table = |entries: &[(&str, u32)]| -> BTreeMap<String, u32> {
            entries.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
        };

        let mut criteria = BTreeMap::new();
        criteria.insert(
            "completeness".to_string(),
            table(&[
                ("examples", 10),
                ("exploit_cases", 8),
                ("prevention_detail", 10),
                ("tests", 6),
                ("clarity", 6),
                ("diagrams", 4),
            ]),
        );
        criteria.insert(
            "accuracy".to_string(),
            table(&[("current_conventions", 10), ("no_deprecated_patterns", 10)]),
        );
        criteria.insert(
            "practicality".to_string(),
            table(&[("actionable", 8), ("audit_usable", 8)]),
        );
        criteria.insert(
            "authority".to_string(),
            table(&[("action", 20), ("research", 10)]),
        );

        Self {
            criteria,
            current_patterns: vec![
                r"pragma solidity\s*\^?0\.8".to_string(),
                r"\bReentrancyGuard\b".to_string(),
                r"\bSafeERC20\b".to_string(),
            ],
            deprecated_patterns: vec![
                r"pragma solidity\s*\^?0\.[4-6]\.".to_string(),
                r"\bSafeMath\b".to_string(),
                r"\bsuicide\(".to_string(),
                r"\bthrow;".to_string(),
            ],
        }
    }
}

/// A pair of opposing claim phrasings about one sub-topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictMarker {
    pub subtopic: String,
    /// Phrases asserting the claim.
    #[serde(default)]
    pub affirm: Vec<String>,
    /// Phrases rejecting the claim.
    #[serde(default)]
    pub deny: Vec<String>,
}

/// Merge-policy settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    /// Score gap above which the top document is kept alone.
    pub keep_single_gap: f64,
    /// Score gap below which every candidate is merged.
    pub merge_all_gap: f64,
    pub precedence: Precedence,
    pub conflict_markers: Vec<ConflictMarker>,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            keep_single_gap: 20.0,
            merge_all_gap: 10.0,
            precedence: Precedence::Recency,
            conflict_markers: vec![ConflictMarker {
                subtopic: "tx-origin-authorization".to_string(),
                affirm: vec![
                    "tx.origin is safe for authorization".to_string(),
                    "use tx.origin for authorization".to_string(),
                ],
                deny: vec![
                    "never use tx.origin for authorization".to_string(),
                    "do not use tx.origin for authorization".to_string(),
                ],
            }],
        }
    }
}

/// Gap-analysis settings for full runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CoverageConfig {
    pub required_topics: Vec<String>,
}

/// Run-level resource settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Upper bound on worker threads (also bounded by available cores).
    pub max_workers: usize,
    /// Commit attempts after the first one fails with a version conflict.
    pub commit_retries: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            commit_retries: 3,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub similarity: SimilarityConfig,
    pub scoring: ScoringConfig,
    pub resolution: ResolutionConfig,
    pub coverage: CoverageConfig,
    pub run: RunConfig,
}

impl Config {
    /// Load from the default platform-specific path, if it exists.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;
        Self::load_from_path(path.exists().then_some(path.as_path()))
    }

    /// Load defaults, then `path` (if given), then the environment.
    pub fn load_from_path(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            log::debug!("Loading configuration from {}", path.display());
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Default platform-specific configuration path.
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        let dirs = ProjectDirs::from("com", "kbcanon", "kbcanon").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Check numeric ranges and cross-field consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.similarity;
        if !(0.0..=1.0).contains(&s.probable) {
            return Err(invalid("similarity.probable", "must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&s.likely) || s.likely < s.probable {
            return Err(invalid(
                "similarity.likely",
                "must be within [probable, 1]",
            ));
        }
        if s.shingle_size == 0 {
            return Err(invalid("similarity.shingle_size", "must be at least 1"));
        }
        if s.signature_size == 0 || s.bands == 0 || s.signature_size % s.bands != 0 {
            return Err(invalid(
                "similarity.bands",
                format!(
                    "must be non-zero and divide signature_size ({})",
                    s.signature_size
                ),
            ));
        }
        if !(0.0..=1.0).contains(&s.section_coverage) {
            return Err(invalid("similarity.section_coverage", "must be within [0, 1]"));
        }

        let r = &self.resolution;
        if r.merge_all_gap < 0.0 || r.keep_single_gap < r.merge_all_gap {
            return Err(invalid(
                "resolution.keep_single_gap",
                "must be >= merge_all_gap >= 0",
            ));
        }
        for marker in &r.conflict_markers {
            if marker.affirm.is_empty() || marker.deny.is_empty() {
                return Err(invalid(
                    "resolution.conflict_markers",
                    format!("marker '{}' needs both affirm and deny phrases", marker.subtopic),
                ));
            }
        }

        if self.run.max_workers == 0 {
            return Err(invalid("run.max_workers", "must be at least 1"));
        }
        Ok(())
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

fn invalid(field: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        message: message.into(),
    }
}
