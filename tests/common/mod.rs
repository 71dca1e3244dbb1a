//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use jobmerge::core::blocking::BlockKey;
use jobmerge::{
    CanonicalRecord, CompanyEntity, CompanyId, Fingerprint, InMemoryRecordStore, JobId, RawRecord,
    RecordStore, ScoreOutcome, ServiceError, SimilarityScorer,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

pub fn at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, 9, 0, 0).unwrap()
}

/// Two postings of the same Zurich job, a different Zurich job and the same
/// title in Geneva
pub fn google_batch() -> Vec<RawRecord> {
    vec![
        RawRecord::new("Software Engineer", "Google", "jobs.ch")
            .with_canton("ZH")
            .with_observed_at(at(1)),
        RawRecord::new("Software Engineer", "Google, Inc.", "linkedin")
            .with_canton("ZH")
            .with_description("Build search infrastructure in Rust and Go")
            .with_observed_at(at(2)),
        RawRecord::new("Data Analyst", "Google", "jobs.ch")
            .with_canton("ZH")
            .with_observed_at(at(1)),
        RawRecord::new("Software Engineer", "Google", "jobs.ch")
            .with_canton("GE")
            .with_observed_at(at(1)),
    ]
}

/// Every canonical job in the store, ordered by id
pub async fn all_jobs(store: &dyn RecordStore) -> Vec<CanonicalRecord> {
    let mut jobs = store.get_jobs_without_company_link().await.unwrap();
    jobs.extend(store.get_linked_jobs().await.unwrap());
    jobs.sort_by(|a, b| a.id.cmp(&b.id));
    jobs
}

/// Scorer that records every pair it is asked about
#[derive(Default)]
pub struct RecordingScorer {
    pub pairs: Mutex<Vec<(String, String)>>,
}

impl SimilarityScorer for RecordingScorer {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn score(&self, a: &str, b: &str) -> ScoreOutcome {
        self.pairs
            .lock()
            .unwrap()
            .push((a.to_string(), b.to_string()));
        jobmerge::core::similarity::TokenSetScorer.score(a, b)
    }
}

/// Store whose block writes start failing after a number of successful ones
pub struct FailingStore {
    pub inner: InMemoryRecordStore,
    pub successful_writes: usize,
    writes: AtomicUsize,
    pub healthy: AtomicBool,
}

impl FailingStore {
    pub fn new(successful_writes: usize) -> Self {
        Self {
            inner: InMemoryRecordStore::new(),
            successful_writes,
            writes: AtomicUsize::new(0),
            healthy: AtomicBool::new(false),
        }
    }

    pub fn recover(&self) {
        self.healthy.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl RecordStore for FailingStore {
    async fn get_existing_by_fingerprint(
        &self,
        fingerprints: &[Fingerprint],
    ) -> Result<HashMap<Fingerprint, JobId>, ServiceError> {
        self.inner.get_existing_by_fingerprint(fingerprints).await
    }

    async fn get_canonicals_by_block(
        &self,
        keys: &[BlockKey],
    ) -> Result<Vec<CanonicalRecord>, ServiceError> {
        self.inner.get_canonicals_by_block(keys).await
    }

    async fn get_canonical(&self, id: &JobId) -> Result<Option<CanonicalRecord>, ServiceError> {
        self.inner.get_canonical(id).await
    }

    async fn upsert_canonical(&self, record: &CanonicalRecord) -> Result<(), ServiceError> {
        self.upsert_canonicals(std::slice::from_ref(record)).await
    }

    async fn upsert_canonicals(&self, records: &[CanonicalRecord]) -> Result<(), ServiceError> {
        let done = self.writes.fetch_add(1, Ordering::SeqCst);
        if done >= self.successful_writes && !self.healthy.load(Ordering::SeqCst) {
            return Err(ServiceError::Storage("database is locked".to_string()));
        }
        self.inner.upsert_canonicals(records).await
    }

    async fn get_jobs_without_company_link(&self) -> Result<Vec<CanonicalRecord>, ServiceError> {
        self.inner.get_jobs_without_company_link().await
    }

    async fn get_linked_jobs(&self) -> Result<Vec<CanonicalRecord>, ServiceError> {
        self.inner.get_linked_jobs().await
    }

    async fn set_company_link(
        &self,
        job: &JobId,
        company: &CompanyId,
        score: f64,
    ) -> Result<(), ServiceError> {
        self.inner.set_company_link(job, company, score).await
    }

    async fn count_canonicals(&self) -> Result<usize, ServiceError> {
        self.inner.count_canonicals().await
    }

    async fn get_all_companies(&self) -> Result<Vec<CompanyEntity>, ServiceError> {
        self.inner.get_all_companies().await
    }

    async fn get_company(&self, id: &CompanyId) -> Result<Option<CompanyEntity>, ServiceError> {
        self.inner.get_company(id).await
    }

    async fn upsert_company(&self, company: &CompanyEntity) -> Result<(), ServiceError> {
        self.inner.upsert_company(company).await
    }

    async fn update_company_sponsorship(
        &self,
        id: &CompanyId,
        offers_sponsorship: bool,
    ) -> Result<(), ServiceError> {
        self.inner.update_company_sponsorship(id, offers_sponsorship).await
    }

    async fn update_company_tags(
        &self,
        id: &CompanyId,
        tags: &BTreeSet<String>,
    ) -> Result<(), ServiceError> {
        self.inner.update_company_tags(id, tags).await
    }
}
