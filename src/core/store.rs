//! Record store interface and in-memory implementation

use crate::core::blocking::BlockKey;
use crate::core::fingerprint::Fingerprint;
use crate::core::record::{CanonicalRecord, CompanyEntity, CompanyId, JobId};
use crate::core::service::ServiceError;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::RwLock;

/// Persistent store of canonical jobs and companies
///
/// All writes are upserts keyed by id, so replaying a write is harmless.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Canonical ids holding any of the given member fingerprints
    async fn get_existing_by_fingerprint(
        &self,
        fingerprints: &[Fingerprint],
    ) -> Result<HashMap<Fingerprint, JobId>, ServiceError>;

    /// Every canonical record under any of the given block keys
    async fn get_canonicals_by_block(
        &self,
        keys: &[BlockKey],
    ) -> Result<Vec<CanonicalRecord>, ServiceError>;

    async fn get_canonical(&self, id: &JobId) -> Result<Option<CanonicalRecord>, ServiceError>;

    async fn upsert_canonical(&self, record: &CanonicalRecord) -> Result<(), ServiceError>;

    /// Upsert a block's records together: either all are written or none
    async fn upsert_canonicals(&self, records: &[CanonicalRecord]) -> Result<(), ServiceError>;

    async fn get_jobs_without_company_link(&self) -> Result<Vec<CanonicalRecord>, ServiceError>;

    async fn get_linked_jobs(&self) -> Result<Vec<CanonicalRecord>, ServiceError>;

    async fn set_company_link(
        &self,
        job: &JobId,
        company: &CompanyId,
        score: f64,
    ) -> Result<(), ServiceError>;

    async fn count_canonicals(&self) -> Result<usize, ServiceError>;

    async fn get_all_companies(&self) -> Result<Vec<CompanyEntity>, ServiceError>;

    async fn get_company(&self, id: &CompanyId) -> Result<Option<CompanyEntity>, ServiceError>;

    async fn upsert_company(&self, company: &CompanyEntity) -> Result<(), ServiceError>;

    async fn update_company_sponsorship(
        &self,
        id: &CompanyId,
        offers_sponsorship: bool,
    ) -> Result<(), ServiceError>;

    async fn update_company_tags(
        &self,
        id: &CompanyId,
        tags: &BTreeSet<String>,
    ) -> Result<(), ServiceError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    jobs: BTreeMap<JobId, CanonicalRecord>,
    fingerprints: HashMap<Fingerprint, JobId>,
    companies: BTreeMap<CompanyId, CompanyEntity>,
}

impl MemoryState {
    fn put_job(&mut self, record: &CanonicalRecord) {
        for fingerprint in &record.member_fingerprints {
            self.fingerprints
                .entry(fingerprint.clone())
                .or_insert_with(|| record.id.clone());
        }
        self.jobs.insert(record.id.clone(), record.clone());
    }
}

/// Record store held in memory, for tests and one-shot runs
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    state: RwLock<MemoryState>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get_existing_by_fingerprint(
        &self,
        fingerprints: &[Fingerprint],
    ) -> Result<HashMap<Fingerprint, JobId>, ServiceError> {
        let state = self.state.read().await;
        Ok(fingerprints
            .iter()
            .filter_map(|fp| state.fingerprints.get(fp).map(|id| (fp.clone(), id.clone())))
            .collect())
    }

    async fn get_canonicals_by_block(
        &self,
        keys: &[BlockKey],
    ) -> Result<Vec<CanonicalRecord>, ServiceError> {
        let keys: BTreeSet<&BlockKey> = keys.iter().collect();
        let state = self.state.read().await;
        Ok(state
            .jobs
            .values()
            .filter(|job| keys.contains(&job.block_key))
            .cloned()
            .collect())
    }

    async fn get_canonical(&self, id: &JobId) -> Result<Option<CanonicalRecord>, ServiceError> {
        Ok(self.state.read().await.jobs.get(id).cloned())
    }

    async fn upsert_canonical(&self, record: &CanonicalRecord) -> Result<(), ServiceError> {
        self.state.write().await.put_job(record);
        Ok(())
    }

    async fn upsert_canonicals(&self, records: &[CanonicalRecord]) -> Result<(), ServiceError> {
        let mut state = self.state.write().await;
        for record in records {
            state.put_job(record);
        }
        Ok(())
    }

    async fn get_jobs_without_company_link(&self) -> Result<Vec<CanonicalRecord>, ServiceError> {
        let state = self.state.read().await;
        Ok(state
            .jobs
            .values()
            .filter(|job| !job.is_linked())
            .cloned()
            .collect())
    }

    async fn get_linked_jobs(&self) -> Result<Vec<CanonicalRecord>, ServiceError> {
        let state = self.state.read().await;
        Ok(state
            .jobs
            .values()
            .filter(|job| job.is_linked())
            .cloned()
            .collect())
    }

    async fn set_company_link(
        &self,
        job: &JobId,
        company: &CompanyId,
        score: f64,
    ) -> Result<(), ServiceError> {
        let mut state = self.state.write().await;
        let record = state
            .jobs
            .get_mut(job)
            .ok_or_else(|| ServiceError::NotFound(format!("job {}", job)))?;
        record.company_id = Some(company.clone());
        record.company_link_score = Some(score);
        Ok(())
    }

    async fn count_canonicals(&self) -> Result<usize, ServiceError> {
        Ok(self.state.read().await.jobs.len())
    }

    async fn get_all_companies(&self) -> Result<Vec<CompanyEntity>, ServiceError> {
        Ok(self.state.read().await.companies.values().cloned().collect())
    }

    async fn get_company(&self, id: &CompanyId) -> Result<Option<CompanyEntity>, ServiceError> {
        Ok(self.state.read().await.companies.get(id).cloned())
    }

    async fn upsert_company(&self, company: &CompanyEntity) -> Result<(), ServiceError> {
        self.state
            .write()
            .await
            .companies
            .insert(company.id.clone(), company.clone());
        Ok(())
    }

    async fn update_company_sponsorship(
        &self,
        id: &CompanyId,
        offers_sponsorship: bool,
    ) -> Result<(), ServiceError> {
        let mut state = self.state.write().await;
        let company = state
            .companies
            .get_mut(id)
            .ok_or_else(|| ServiceError::NotFound(format!("company {}", id)))?;
        company.offers_sponsorship = offers_sponsorship;
        Ok(())
    }

    async fn update_company_tags(
        &self,
        id: &CompanyId,
        tags: &BTreeSet<String>,
    ) -> Result<(), ServiceError> {
        let mut state = self.state.write().await;
        let company = state
            .companies
            .get_mut(id)
            .ok_or_else(|| ServiceError::NotFound(format!("company {}", id)))?;
        company.tags = tags.clone();
        Ok(())
    }
}
