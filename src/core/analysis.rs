//! Passes over stored records: company registration, linking and classification

use crate::core::classify::{classify, matches_any, KeywordTable};
use crate::core::linker::{CompanyIndex, CompanyLinker, LinkOutcome};
use crate::core::record::{CompanyEntity, CompanyId};
use crate::core::service::ServiceError;
use crate::core::store::RecordStore;
use crate::events::{EventBus, ResolutionEvent};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Counts reported by a linking run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSummary {
    /// Jobs scored against the registry
    pub examined: usize,
    pub linked: usize,
    pub no_match: usize,

    /// Previously linked jobs moved to a better company
    pub relinked: usize,

    /// Links chosen among equally scored companies
    pub ambiguous: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SponsorshipSummary {
    pub jobs_examined: usize,
    pub matching_jobs: usize,
    pub companies_marked: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSummary {
    pub companies: usize,
    pub tagged: usize,
    pub updated: usize,
}

/// Upsert a company, filling blank fields of an already registered one
pub async fn register_company(
    store: &dyn RecordStore,
    company: CompanyEntity,
) -> Result<CompanyEntity, ServiceError> {
    let stored = match store.get_company(&company.id).await? {
        Some(mut existing) => {
            if !existing.absorb(&company) {
                debug!("Company {} already registered", existing.id);
                return Ok(existing);
            }
            existing
        }
        None => company,
    };
    store.upsert_company(&stored).await?;
    debug!("Registered company {}", stored.id);
    Ok(stored)
}

/// Link unlinked jobs, and with `relink` re-score linked ones
pub async fn run_linking(
    store: &dyn RecordStore,
    linker: &CompanyLinker,
    relink: bool,
    events: Option<&EventBus>,
) -> Result<LinkSummary, ServiceError> {
    let companies = store.get_all_companies().await?;
    let index = CompanyIndex::new(&companies);
    if index.is_empty() {
        warn!("Company registry is empty, no jobs will be linked");
    }

    let mut summary = LinkSummary::default();

    let mut jobs = store.get_jobs_without_company_link().await?;
    if relink {
        jobs.extend(store.get_linked_jobs().await?);
    }
    jobs.sort_by(|a, b| a.id.cmp(&b.id));

    for job in jobs {
        summary.examined += 1;
        let link = match linker.link_job(&job, &index) {
            LinkOutcome::Linked(link) => link,
            LinkOutcome::NoMatch { best } => {
                if let Some(best) = best {
                    debug!(job = %job.id, best = best.score, "No company above threshold");
                }
                if !job.is_linked() {
                    summary.no_match += 1;
                }
                continue;
            }
        };

        if let Some(current) = &job.company_id {
            let current_score = job.company_link_score.unwrap_or(0.0);
            if *current == link.company_id || link.score <= current_score {
                continue;
            }
            info!(
                job = %job.id,
                from = %current,
                to = %link.company_id,
                "Moving company link to a better match"
            );
            summary.relinked += 1;
        } else {
            summary.linked += 1;
        }

        store
            .set_company_link(&job.id, &link.company_id, link.score)
            .await?;

        if link.is_ambiguous() {
            summary.ambiguous += 1;
            if let Some(events) = events {
                events
                    .publish_event(ResolutionEvent::AmbiguousCompanyMatch {
                        job_id: job.id.clone(),
                        company_name: job.company_name.clone(),
                        chosen: link.company_id.clone(),
                        tied_with: link.tied_with.clone(),
                        score: link.score,
                    })
                    .await;
            }
        }
    }

    info!(
        examined = summary.examined,
        linked = summary.linked,
        relinked = summary.relinked,
        no_match = summary.no_match,
        "Linking run complete"
    );
    Ok(summary)
}

/// Mark companies whose linked jobs mention visa sponsorship
pub async fn analyze_sponsorship(
    store: &dyn RecordStore,
    table: &KeywordTable,
) -> Result<SponsorshipSummary, ServiceError> {
    let jobs = store.get_linked_jobs().await?;
    let mut summary = SponsorshipSummary {
        jobs_examined: jobs.len(),
        ..Default::default()
    };

    let mut sponsors: BTreeSet<CompanyId> = BTreeSet::new();
    for job in &jobs {
        let (Some(company), Some(description)) = (&job.company_id, &job.description) else {
            continue;
        };
        if matches_any(description, table) {
            summary.matching_jobs += 1;
            sponsors.insert(company.clone());
        }
    }

    for company in &sponsors {
        match store.update_company_sponsorship(company, true).await {
            Ok(()) => summary.companies_marked += 1,
            Err(ServiceError::NotFound(_)) => {
                warn!("Linked company {} is no longer registered", company);
            }
            Err(e) => return Err(e),
        }
    }

    info!(
        matching_jobs = summary.matching_jobs,
        companies = summary.companies_marked,
        "Sponsorship analysis complete"
    );
    Ok(summary)
}

/// Replace each company's tags with those found in its description
pub async fn tag_companies(
    store: &dyn RecordStore,
    table: &KeywordTable,
) -> Result<TagSummary, ServiceError> {
    let companies = store.get_all_companies().await?;
    let mut summary = TagSummary {
        companies: companies.len(),
        ..Default::default()
    };

    for company in &companies {
        let tags = company
            .description
            .as_deref()
            .map(|text| classify(text, table))
            .unwrap_or_default();
        if !tags.is_empty() {
            summary.tagged += 1;
        }
        if tags != company.tags {
            store.update_company_tags(&company.id, &tags).await?;
            summary.updated += 1;
        }
    }

    info!(
        companies = summary.companies,
        updated = summary.updated,
        "Company tagging complete"
    );
    Ok(summary)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::core::record::{CanonicalRecord, Observation, RawRecord};
    use crate::core::similarity::{Threshold, TokenSetScorer};
    use crate::core::store::InMemoryRecordStore;
    use chrono::Utc;
    use std::sync::Arc;

    fn linker() -> CompanyLinker {
        CompanyLinker::new(Arc::new(TokenSetScorer), Threshold::COMPANY_DEFAULT)
    }

    async fn add_job(store: &InMemoryRecordStore, company: &str, description: Option<&str>) -> CanonicalRecord {
        let mut record = RawRecord::new("Software Engineer", company, "jobs.ch").with_canton("ZH");
        if let Some(description) = description {
            record = record.with_description(description);
        }
        let job = CanonicalRecord::from_observation(&Observation::new(record, Utc::now()).unwrap());
        store.upsert_canonical(&job).await.unwrap();
        job
    }

    #[tokio::test]
    async fn test_register_company_fills_gaps() {
        let store = InMemoryRecordStore::new();
        let first = register_company(&store, CompanyEntity::new("Google", None).unwrap())
            .await
            .unwrap();
        assert!(first.description.is_none());

        let again = CompanyEntity::new("Google", None)
            .unwrap()
            .with_description("Search and ads");
        let merged = register_company(&store, again).await.unwrap();
        assert_eq!(merged.description.as_deref(), Some("Search and ads"));

        let overwrite = CompanyEntity::new("Google", None)
            .unwrap()
            .with_description("Something else");
        let kept = register_company(&store, overwrite).await.unwrap();
        assert_eq!(kept.description.as_deref(), Some("Search and ads"));
        assert_eq!(store.get_all_companies().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_linking_scenario() {
        let store = InMemoryRecordStore::new();
        let google = CompanyEntity::new("Google", Some("CHE-1".to_string())).unwrap();
        register_company(&store, google.clone()).await.unwrap();
        register_company(&store, CompanyEntity::new("Nestlé", None).unwrap())
            .await
            .unwrap();

        let job = add_job(&store, "Google Switzerland GmbH", None).await;
        add_job(&store, "Migros", None).await;

        let summary = run_linking(&store, &linker(), false, None).await.unwrap();
        assert_eq!(summary.examined, 2);
        assert_eq!(summary.linked, 1);
        assert_eq!(summary.no_match, 1);

        let stored = store.get_canonical(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.company_id, Some(google.id));

        // nothing left to link
        let again = run_linking(&store, &linker(), false, None).await.unwrap();
        assert_eq!(again.linked, 0);
        assert_eq!(again.examined, 1);
    }

    #[tokio::test]
    async fn test_empty_registry_links_nothing() {
        let store = InMemoryRecordStore::new();
        add_job(&store, "Google", None).await;

        let summary = run_linking(&store, &linker(), false, None).await.unwrap();
        assert_eq!(summary.linked, 0);
        assert_eq!(summary.no_match, 1);
        assert!(store.get_all_companies().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_relink_moves_to_strictly_better_match() {
        let store = InMemoryRecordStore::new();
        let job = add_job(&store, "Alphabet Zurich", None).await;
        let holdings = CompanyEntity::new("Alphabet Holdings", None).unwrap();
        let zurich = CompanyEntity::new("Alphabet Zurich", None).unwrap();
        register_company(&store, holdings.clone()).await.unwrap();
        register_company(&store, zurich.clone()).await.unwrap();

        // an equal score does not move the link
        store.set_company_link(&job.id, &holdings.id, 100.0).await.unwrap();
        let summary = run_linking(&store, &linker(), true, None).await.unwrap();
        assert_eq!(summary.examined, 1);
        assert_eq!(summary.relinked, 0);

        store.set_company_link(&job.id, &holdings.id, 70.0).await.unwrap();
        let without_relink = run_linking(&store, &linker(), false, None).await.unwrap();
        assert_eq!(without_relink.examined, 0);

        let summary = run_linking(&store, &linker(), true, None).await.unwrap();
        assert_eq!(summary.relinked, 1);
        assert_eq!(summary.linked, 0);

        let stored = store.get_canonical(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.company_id, Some(zurich.id));
        assert_eq!(stored.company_link_score, Some(100.0));
    }

    #[tokio::test]
    async fn test_ambiguous_link_is_published() {
        let store = InMemoryRecordStore::new();
        let bus = EventBus::new();
        add_job(&store, "Acme", None).await;
        register_company(&store, CompanyEntity::new("Acme", Some("CHE-2".to_string())).unwrap())
            .await
            .unwrap();
        register_company(&store, CompanyEntity::new("Acme", Some("CHE-1".to_string())).unwrap())
            .await
            .unwrap();

        let summary = run_linking(&store, &linker(), false, Some(&bus)).await.unwrap();
        assert_eq!(summary.ambiguous, 1);

        let review = bus.review_items().await;
        assert_eq!(review.len(), 1);
        match &review[0] {
            ResolutionEvent::AmbiguousCompanyMatch { chosen, tied_with, .. } => {
                assert_eq!(chosen.as_str(), "uid:CHE-1");
                assert_eq!(tied_with.len(), 1);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sponsorship_pass() {
        let store = InMemoryRecordStore::new();
        let google = CompanyEntity::new("Google", None).unwrap();
        let migros = CompanyEntity::new("Migros", None).unwrap();
        register_company(&store, google.clone()).await.unwrap();
        register_company(&store, migros.clone()).await.unwrap();
        add_job(&store, "Google", Some("We offer visa sponsorship.")).await;
        add_job(&store, "Migros", Some("Free coffee")).await;
        run_linking(&store, &linker(), false, None).await.unwrap();

        let summary = analyze_sponsorship(&store, &KeywordTable::sponsorship())
            .await
            .unwrap();
        assert_eq!(summary.jobs_examined, 2);
        assert_eq!(summary.matching_jobs, 1);
        assert_eq!(summary.companies_marked, 1);

        assert!(store.get_company(&google.id).await.unwrap().unwrap().offers_sponsorship);
        assert!(!store.get_company(&migros.id).await.unwrap().unwrap().offers_sponsorship);
    }

    #[tokio::test]
    async fn test_tagging_pass() {
        let store = InMemoryRecordStore::new();
        let fintech = CompanyEntity::new("PayCo", None)
            .unwrap()
            .with_description("A fast-paced fintech company");
        register_company(&store, fintech.clone()).await.unwrap();
        register_company(&store, CompanyEntity::new("Plain", None).unwrap())
            .await
            .unwrap();

        let mut table = KeywordTable::industry();
        table.extend(KeywordTable::culture());
        let summary = tag_companies(&store, &table).await.unwrap();
        assert_eq!(summary.companies, 2);
        assert_eq!(summary.tagged, 1);
        assert_eq!(summary.updated, 1);

        let stored = store.get_company(&fintech.id).await.unwrap().unwrap();
        assert_eq!(
            stored.tags,
            BTreeSet::from(["fast-paced".to_string(), "fintech".to_string()])
        );

        let again = tag_companies(&store, &table).await.unwrap();
        assert_eq!(again.updated, 0);
    }
}
