//! Company linking
//!
//! Links a job's free-text company name to a registered [`CompanyEntity`] by
//! fuzzy name matching. The linker only ever links to companies that already
//! exist; registering companies is a separate, explicit step.

use crate::core::normalize::company_key;
use crate::core::record::{CanonicalRecord, CompanyEntity, CompanyId};
use crate::core::similarity::{SimilarityScorer, Threshold};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Best registry match for a company name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkMatch {
    pub company_id: CompanyId,
    pub company_name: String,
    pub score: f64,

    /// Other companies that reached the same score
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tied_with: Vec<CompanyId>,
}

impl LinkMatch {
    pub fn is_ambiguous(&self) -> bool {
        !self.tied_with.is_empty()
    }
}

/// Outcome of linking one company name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LinkOutcome {
    Linked(LinkMatch),
    NoMatch { best: Option<LinkMatch> },
}

impl LinkOutcome {
    pub fn linked(&self) -> Option<&LinkMatch> {
        match self {
            LinkOutcome::Linked(link) => Some(link),
            LinkOutcome::NoMatch { .. } => None,
        }
    }
}

/// Registry entry prepared for matching
#[derive(Debug, Clone)]
struct IndexedCompany {
    id: CompanyId,
    name: String,
    key: String,
}

/// Company registry snapshot with precomputed comparison keys
#[derive(Debug, Clone, Default)]
pub struct CompanyIndex {
    entries: Vec<IndexedCompany>,
}

impl CompanyIndex {
    pub fn new(companies: &[CompanyEntity]) -> Self {
        let mut entries: Vec<IndexedCompany> = companies
            .iter()
            .map(|c| IndexedCompany {
                id: c.id.clone(),
                name: c.name.clone(),
                key: c.key(),
            })
            .filter(|c| !c.key.is_empty())
            .collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Fuzzy company-name linker
pub struct CompanyLinker {
    scorer: Arc<dyn SimilarityScorer>,
    threshold: Threshold,
}

impl CompanyLinker {
    pub fn new(scorer: Arc<dyn SimilarityScorer>, threshold: Threshold) -> Self {
        Self { scorer, threshold }
    }

    pub fn threshold(&self) -> Threshold {
        self.threshold
    }

    /// Best match for a company name, ties broken by the smallest company id
    pub fn best_match(&self, company_name: &str, index: &CompanyIndex) -> Option<LinkMatch> {
        let key = company_key(company_name);
        if key.is_empty() {
            return None;
        }

        let mut best: Option<LinkMatch> = None;
        for entry in &index.entries {
            let score = self.scorer.score(&key, &entry.key).score_or_zero();
            match &mut best {
                Some(current) if score > current.score => {
                    *current = LinkMatch {
                        company_id: entry.id.clone(),
                        company_name: entry.name.clone(),
                        score,
                        tied_with: Vec::new(),
                    };
                }
                Some(current) if score == current.score => {
                    current.tied_with.push(entry.id.clone());
                }
                Some(_) => {}
                None => {
                    best = Some(LinkMatch {
                        company_id: entry.id.clone(),
                        company_name: entry.name.clone(),
                        score,
                        tied_with: Vec::new(),
                    });
                }
            }
        }
        best
    }

    /// Link a company name against the registry
    pub fn link(&self, company_name: &str, index: &CompanyIndex) -> LinkOutcome {
        let best = self.best_match(company_name, index);
        match best {
            Some(link) if self.threshold.accepts(link.score) => {
                if link.is_ambiguous() {
                    warn!(
                        company = company_name,
                        chosen = %link.company_id,
                        tied = link.tied_with.len(),
                        score = link.score,
                        "Ambiguous company match"
                    );
                }
                debug!(
                    company = company_name,
                    linked = %link.company_id,
                    score = link.score,
                    "Linked company"
                );
                LinkOutcome::Linked(link)
            }
            best => LinkOutcome::NoMatch { best },
        }
    }

    /// Link a canonical job's company name
    pub fn link_job(&self, job: &CanonicalRecord, index: &CompanyIndex) -> LinkOutcome {
        self.link(&job.company_name, index)
    }
}
