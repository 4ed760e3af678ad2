//! Typed scoring rubric.
//!
//! The rubric in configuration is a loose `criterion → signal → points`
//! table. [`Rubric::from_config`] turns it into a closed, validated form:
//! unknown criteria and signals are rejected (with a suggestion when a known
//! name is close), regexes are compiled, and a rubric that can award no
//! points at all is refused.

use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::ScoringConfig;

/// Minimum Jaro-Winkler similarity for a "did you mean" suggestion.
const SUGGESTION_THRESHOLD: f64 = 0.8;

/// Errors in the scoring configuration. Always fatal for a run.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ScoreConfigError {
    /// A criterion name is not one of the known criteria.
    #[error("Unknown scoring criterion '{name}'{}", hint(.suggestion))]
    UnknownCriterion {
        /// Name as written in configuration
        name: String,
        /// Closest known criterion, if any
        suggestion: Option<String>,
    },

    /// A signal is not defined for its criterion.
    #[error("Unknown signal '{name}' for criterion '{criterion}'{}", hint(.suggestion))]
    UnknownSignal {
        /// Criterion the signal was listed under
        criterion: String,
        /// Name as written in configuration
        name: String,
        /// Closest known signal, if any
        suggestion: Option<String>,
    },

    /// A pattern does not compile.
    #[error("Invalid scoring pattern '{pattern}': {message}")]
    InvalidPattern {
        /// Pattern as written
        pattern: String,
        /// Regex compiler message
        message: String,
    },

    /// No signal or tier can award any points.
    #[error("Scoring rubric awards no points")]
    EmptyRubric,
}

fn hint(suggestion: &Option<String>) -> String {
    suggestion
        .as_ref()
        .map(|s| format!(" (did you mean '{s}'?)"))
        .unwrap_or_default()
}

/// Scoring criteria.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criterion {
    Completeness,
    Accuracy,
    Practicality,
    Authority,
}

impl Criterion {
    pub const ALL: [Criterion; 4] = [
        Self::Completeness,
        Self::Accuracy,
        Self::Practicality,
        Self::Authority,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completeness => "completeness",
            Self::Accuracy => "accuracy",
            Self::Practicality => "practicality",
            Self::Authority => "authority",
        }
    }

    fn parse(name: &str) -> Result<Self, ScoreConfigError> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == name)
            .ok_or_else(|| ScoreConfigError::UnknownCriterion {
                name: name.to_string(),
                suggestion: suggest(name, Self::ALL.iter().map(|c| c.as_str())),
            })
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lexical quality signals. Authority is scored from tiers, not signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Examples,
    ExploitCases,
    PreventionDetail,
    Tests,
    Clarity,
    Diagrams,
    CurrentConventions,
    NoDeprecatedPatterns,
    Actionable,
    AuditUsable,
}

impl Signal {
    pub const ALL: [Signal; 10] = [
        Self::Examples,
        Self::ExploitCases,
        Self::PreventionDetail,
        Self::Tests,
        Self::Clarity,
        Self::Diagrams,
        Self::CurrentConventions,
        Self::NoDeprecatedPatterns,
        Self::Actionable,
        Self::AuditUsable,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Examples => "examples",
            Self::ExploitCases => "exploit_cases",
            Self::PreventionDetail => "prevention_detail",
            Self::Tests => "tests",
            Self::Clarity => "clarity",
            Self::Diagrams => "diagrams",
            Self::CurrentConventions => "current_conventions",
            Self::NoDeprecatedPatterns => "no_deprecated_patterns",
            Self::Actionable => "actionable",
            Self::AuditUsable => "audit_usable",
        }
    }

    /// Criterion this signal contributes to.
    #[must_use]
    pub fn criterion(self) -> Criterion {
        match self {
            Self::Examples
            | Self::ExploitCases
            | Self::PreventionDetail
            | Self::Tests
            | Self::Clarity
            | Self::Diagrams => Criterion::Completeness,
            Self::CurrentConventions | Self::NoDeprecatedPatterns => Criterion::Accuracy,
            Self::Actionable | Self::AuditUsable => Criterion::Practicality,
        }
    }

    fn parse(criterion: Criterion, name: &str) -> Result<Self, ScoreConfigError> {
        let candidates = || {
            Self::ALL
                .into_iter()
                .filter(move |s| s.criterion() == criterion)
        };
        candidates()
            .find(|s| s.as_str() == name)
            .ok_or_else(|| ScoreConfigError::UnknownSignal {
                criterion: criterion.to_string(),
                name: name.to_string(),
                suggestion: suggest(name, candidates().map(Signal::as_str)),
            })
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn suggest<'a>(name: &str, known: impl Iterator<Item = &'a str>) -> Option<String> {
    known
        .map(|k| (k, strsim::jaro_winkler(name, k)))
        .filter(|(_, score)| *score >= SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(k, _)| k.to_string())
}

/// Validated rubric.
#[derive(Debug, Clone)]
pub struct Rubric {
    signals: Vec<(Signal, u32)>,
    authority: BTreeMap<String, u32>,
    current_patterns: Vec<Regex>,
    deprecated_patterns: Vec<Regex>,
}

impl Rubric {
    /// Validate and compile a scoring configuration.
    pub fn from_config(config: &ScoringConfig) -> Result<Self, ScoreConfigError> {
        let mut signals = Vec::new();
        let mut authority = BTreeMap::new();

        for (criterion_name, table) in &config.criteria {
            let criterion = Criterion::parse(criterion_name)?;
            if criterion == Criterion::Authority {
                authority.extend(table.iter().map(|(tier, &points)| (tier.clone(), points)));
                continue;
            }
            for (signal_name, &points) in table {
                signals.push((Signal::parse(criterion, signal_name)?, points));
            }
        }
        signals.sort();

        let compile = |patterns: &[String]| -> Result<Vec<Regex>, ScoreConfigError> {
            patterns
                .iter()
                .map(|p| {
                    Regex::new(p).map_err(|e| ScoreConfigError::InvalidPattern {
                        pattern: p.clone(),
                        message: e.to_string(),
                    })
                })
                .collect()
        };

        let rubric = Self {
            signals,
            authority,
            current_patterns: compile(&config.current_patterns)?,
            deprecated_patterns: compile(&config.deprecated_patterns)?,
        };
        if rubric.max_possible() == 0 {
            return Err(ScoreConfigError::EmptyRubric);
        }

        log::debug!(
            "Rubric: {} signals, {} authority tiers, max {} points",
            rubric.signals.len(),
            rubric.authority.len(),
            rubric.max_possible()
        );
        Ok(rubric)
    }

    /// Configured signals and their points, in signal order.
    #[must_use]
    pub fn signals(&self) -> &[(Signal, u32)] {
        &self.signals
    }

    /// Tier points for a source collection (0 when unlisted).
    #[must_use]
    pub fn authority_points(&self, collection: &str) -> u32 {
        self.authority.get(collection).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn current_patterns(&self) -> &[Regex] {
        &self.current_patterns
    }

    #[must_use]
    pub fn deprecated_patterns(&self) -> &[Regex] {
        &self.deprecated_patterns
    }

    /// All signal points plus the highest authority tier.
    #[must_use]
    pub fn max_possible(&self) -> u32 {
        let signals: u32 = self.signals.iter().map(|(_, p)| p).sum();
        signals + self.authority.values().copied().max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a scoring config from `(criterion, signal, points)` rows.
    fn config(rows: &[(&str, &str, u32)]) -> ScoringConfig {
        let mut criteria: BTreeMap<String, BTreeMap<String, u32>> = BTreeMap::new();
        for (criterion, signal, points) in rows {
            criteria
                .entry((*criterion).to_string())
                .or_default()
                .insert((*signal).to_string(), *points);
        }
        ScoringConfig {
            criteria,
            current_patterns: vec![],
            deprecated_patterns: vec![],
        }
    }

    #[test]
    fn test_default_rubric_is_valid() {
        let rubric = Rubric::from_config(&ScoringConfig::default()).unwrap();
        assert_eq!(rubric.signals().len(), 10);
        assert_eq!(rubric.authority_points("action"), 20);
        assert_eq!(rubric.authority_points("unknown"), 0);
        assert_eq!(rubric.max_possible(), 80 + 20);
    }

    #[test]
    fn test_unknown_criterion_suggests() {
        let err = Rubric::from_config(&config(&[("completness", "examples", 5)])).unwrap_err();
        assert_eq!(
            err,
            ScoreConfigError::UnknownCriterion {
                name: "completness".to_string(),
                suggestion: Some("completeness".to_string()),
            }
        );
        assert!(err.to_string().contains("did you mean 'completeness'"));
    }

    #[test]
    fn test_unknown_signal_rejected() {
        let err = Rubric::from_config(&config(&[("accuracy", "examples", 5)])).unwrap_err();
        assert!(matches!(err, ScoreConfigError::UnknownSignal { ref criterion, .. } if criterion == "accuracy"));

        let err = Rubric::from_config(&config(&[("completeness", "exampels", 5)])).unwrap_err();
        assert!(matches!(
            err,
            ScoreConfigError::UnknownSignal { suggestion: Some(ref s), .. } if s == "examples"
        ));
    }

    #[test]
    fn test_no_suggestion_for_distant_names() {
        let err = Rubric::from_config(&config(&[("weights", "examples", 5)])).unwrap_err();
        assert!(matches!(
            err,
            ScoreConfigError::UnknownCriterion { suggestion: None, .. }
        ));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let mut cfg = ScoringConfig::default();
        cfg.deprecated_patterns.push("(unclosed".to_string());
        assert!(matches!(
            Rubric::from_config(&cfg),
            Err(ScoreConfigError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_empty_rubric_rejected() {
        assert_eq!(
            Rubric::from_config(&config(&[])).unwrap_err(),
            ScoreConfigError::EmptyRubric
        );
        assert_eq!(
            Rubric::from_config(&config(&[("completeness", "examples", 0)])).unwrap_err(),
            ScoreConfigError::EmptyRubric
        );
    }

    #[test]
    fn test_authority_only_rubric() {
        let rubric = Rubric::from_config(&config(&[("authority", "gold", 90), ("authority", "silver", 60)]))
            .unwrap();
        assert!(rubric.signals().is_empty());
        assert_eq!(rubric.max_possible(), 90);
    }
}
