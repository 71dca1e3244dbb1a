//! Similarity scoring
//!
//! Scorers return a [`ScoreOutcome`] on a 0-100 scale. A scorer that cannot
//! produce a score (empty input, missing embedding) says so with
//! [`ScoreOutcome::Unavailable`]; callers treat that as 0 and move on.

use crate::core::normalize::normalize;
use crate::core::service::ServiceError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Result of comparing two texts
#[derive(Debug, Clone, PartialEq)]
pub enum ScoreOutcome {
    /// Score in [0, 100]
    Matched(f64),
    Unavailable(String),
}

impl ScoreOutcome {
    pub fn score(&self) -> Option<f64> {
        match self {
            ScoreOutcome::Matched(score) => Some(*score),
            ScoreOutcome::Unavailable(_) => None,
        }
    }

    pub fn score_or_zero(&self) -> f64 {
        self.score().unwrap_or(0.0)
    }
}

/// Pluggable text similarity
pub trait SimilarityScorer: Send + Sync {
    fn name(&self) -> &'static str;

    fn score(&self, a: &str, b: &str) -> ScoreOutcome;
}

/// Acceptance threshold on the 0-100 score scale
///
/// Comparison is inclusive: a score equal to the threshold is accepted.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Threshold(f64);

impl Threshold {
    pub const TITLE_DEFAULT: Threshold = Threshold(90.0);
    pub const COMPANY_DEFAULT: Threshold = Threshold(85.0);

    pub fn new(value: f64) -> Result<Self, ServiceError> {
        if !(0.0..=100.0).contains(&value) {
            return Err(ServiceError::Config(format!(
                "Threshold must be between 0 and 100, got {}",
                value
            )));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    pub fn accepts(&self, score: f64) -> bool {
        score >= self.0
    }
}

impl TryFrom<f64> for Threshold {
    type Error = ServiceError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Threshold::new(value)
    }
}

impl From<Threshold> for f64 {
    fn from(threshold: Threshold) -> f64 {
        threshold.0
    }
}

impl std::fmt::Display for Threshold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token-set ratio over normalized text, rounded to an integer
///
/// Tolerant of word order, abbreviations and subset titles:
/// "Software Engineer" and "Senior Software Engineer" score 100.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenSetScorer;

impl SimilarityScorer for TokenSetScorer {
    fn name(&self) -> &'static str {
        "token_set"
    }

    fn score(&self, a: &str, b: &str) -> ScoreOutcome {
        let (a, b) = (normalize(a), normalize(b));
        if a.is_empty() || b.is_empty() {
            return ScoreOutcome::Unavailable("empty comparison input".to_string());
        }
        ScoreOutcome::Matched(token_set_ratio(&a, &b))
    }
}

/// Jaro-Winkler similarity of the normalized texts, scaled to 0-100
#[derive(Debug, Clone, Copy, Default)]
pub struct JaroWinklerScorer;

impl SimilarityScorer for JaroWinklerScorer {
    fn name(&self) -> &'static str {
        "jaro_winkler"
    }

    fn score(&self, a: &str, b: &str) -> ScoreOutcome {
        let (a, b) = (normalize(a), normalize(b));
        if a.is_empty() || b.is_empty() {
            return ScoreOutcome::Unavailable("empty comparison input".to_string());
        }
        ScoreOutcome::Matched((strsim::jaro_winkler(&a, &b) * 100.0).round())
    }
}

/// Try a primary scorer and fall back to a secondary one when it is unavailable
pub struct FallbackScorer {
    primary: Arc<dyn SimilarityScorer>,
    fallback: Arc<dyn SimilarityScorer>,
}

impl FallbackScorer {
    pub fn new(primary: Arc<dyn SimilarityScorer>, fallback: Arc<dyn SimilarityScorer>) -> Self {
        Self { primary, fallback }
    }
}

impl SimilarityScorer for FallbackScorer {
    fn name(&self) -> &'static str {
        "fallback"
    }

    fn score(&self, a: &str, b: &str) -> ScoreOutcome {
        match self.primary.score(a, b) {
            matched @ ScoreOutcome::Matched(_) => matched,
            ScoreOutcome::Unavailable(reason) => {
                tracing::debug!(
                    primary = self.primary.name(),
                    fallback = self.fallback.name(),
                    "Primary scorer unavailable: {}",
                    reason
                );
                self.fallback.score(a, b)
            }
        }
    }
}

/// Token-set ratio of two already normalized strings
///
/// Builds the sorted intersection of both token sets and each side's
/// remainder, then takes the best indel ratio among
/// `(sect, sect+rest_a)`, `(sect, sect+rest_b)` and `(sect+rest_a, sect+rest_b)`.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let tokens_a: BTreeSet<&str> = a.split_whitespace().collect();
    let tokens_b: BTreeSet<&str> = b.split_whitespace().collect();
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let intersection: Vec<&str> = tokens_a.intersection(&tokens_b).copied().collect();
    let only_a: Vec<&str> = tokens_a.difference(&tokens_b).copied().collect();
    let only_b: Vec<&str> = tokens_b.difference(&tokens_a).copied().collect();

    if !intersection.is_empty() && (only_a.is_empty() || only_b.is_empty()) {
        return 100.0;
    }

    let sect = intersection.join(" ");
    let join = |rest: &[&str]| {
        let rest = rest.join(" ");
        match (sect.is_empty(), rest.is_empty()) {
            (true, _) => rest,
            (false, true) => sect.clone(),
            (false, false) => format!("{} {}", sect, rest),
        }
    };
    let combined_a = join(&only_a);
    let combined_b = join(&only_b);

    let mut best = indel_ratio(&combined_a, &combined_b);
    if !sect.is_empty() {
        best = best
            .max(indel_ratio(&sect, &combined_a))
            .max(indel_ratio(&sect, &combined_b));
    }
    best.round()
}

/// Normalized indel similarity: `2 * LCS / (len_a + len_b) * 100`
pub fn indel_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 100.0;
    }

    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for ca in &a {
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                curr[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    let lcs = prev[b.len()];

    (2 * lcs) as f64 / total as f64 * 100.0
}
