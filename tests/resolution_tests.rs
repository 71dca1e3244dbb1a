//! End-to-end resolution runs through the public service API

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{all_jobs, at, google_batch, FailingStore, RecordingScorer};
use jobmerge::{
    CancellationToken, CompanyEntity, InMemoryRecordStore, RawRecord, RecordStore, ResolutionEvent,
    ResolutionService, ResolverConfig, ServiceError,
};
use std::sync::Arc;

fn service_with(store: Arc<dyn RecordStore>) -> ResolutionService {
    ResolutionService::new(ResolverConfig::default(), store).unwrap()
}

#[tokio::test]
async fn test_near_duplicates_collapse_per_block() {
    let store = Arc::new(InMemoryRecordStore::new());
    let service = service_with(store.clone());

    let summary = service.run_resolution(google_batch()).await.unwrap();
    assert_eq!(summary.processed, 4);
    assert_eq!(summary.blocks, 2);
    assert_eq!(summary.new_canonicals, 3);
    assert_eq!(summary.merged, 1);

    let jobs = all_jobs(store.as_ref()).await;
    assert_eq!(jobs.len(), 3);

    let zurich_engineer = jobs
        .iter()
        .find(|j| j.title == "Software Engineer" && j.canton.as_deref() == Some("ZH"))
        .unwrap();
    assert_eq!(zurich_engineer.sources.len(), 2);
    assert!(zurich_engineer.sources.contains("jobs.ch"));
    assert!(zurich_engineer.sources.contains("linkedin"));
    assert_eq!(
        zurich_engineer.description.as_deref(),
        Some("Build search infrastructure in Rust and Go")
    );
    assert_eq!(zurich_engineer.first_seen, at(1));
    assert_eq!(zurich_engineer.last_seen, at(2));

    assert!(jobs
        .iter()
        .any(|j| j.title == "Data Analyst" && j.canton.as_deref() == Some("ZH")));
    assert!(jobs
        .iter()
        .any(|j| j.title == "Software Engineer" && j.canton.as_deref() == Some("GE")));
}

#[tokio::test]
async fn test_rerun_leaves_store_unchanged() {
    let store = Arc::new(InMemoryRecordStore::new());
    let service = service_with(store.clone());

    service.run_resolution(google_batch()).await.unwrap();
    let before = all_jobs(store.as_ref()).await;

    let summary = service.run_resolution(google_batch()).await.unwrap();
    assert_eq!(summary.new_canonicals, 0);
    assert_eq!(summary.updated, 0);
    assert_eq!(summary.refreshed, 0);
    assert_eq!(summary.unchanged, 3);

    assert_eq!(all_jobs(store.as_ref()).await, before);
}

#[tokio::test]
async fn test_later_observation_refreshes_canonical() {
    let store = Arc::new(InMemoryRecordStore::new());
    let service = service_with(store.clone());
    service.run_resolution(google_batch()).await.unwrap();

    let repeat = vec![RawRecord::new("Data Analyst", "Google", "adzuna")
        .with_canton("ZH")
        .with_observed_at(at(9))];
    let summary = service.run_resolution(repeat).await.unwrap();
    assert_eq!(summary.exact_duplicates, 1);
    assert_eq!(summary.new_canonicals, 0);
    assert_eq!(summary.refreshed, 1);

    let analyst = all_jobs(store.as_ref())
        .await
        .into_iter()
        .find(|j| j.title == "Data Analyst")
        .unwrap();
    assert!(analyst.sources.contains("adzuna"));
    assert_eq!(analyst.first_seen, at(1));
    assert_eq!(analyst.last_seen, at(9));
}

#[tokio::test]
async fn test_rerun_under_block_cap_keeps_canonicals_and_links() {
    let mut config = ResolverConfig::default();
    config.resolution.block_size_cap = Some(2);
    let store = Arc::new(InMemoryRecordStore::new());
    let service = ResolutionService::new(config, store.clone()).unwrap();

    // no connector timestamps, every run stamps its own time
    let batch = || {
        vec![
            RawRecord::new("Software Engineer", "Google", "jobs.ch").with_canton("ZH"),
            RawRecord::new("Software Engineer", "Google, Inc.", "linkedin").with_canton("ZH"),
            RawRecord::new("Data Analyst", "Google", "jobs.ch").with_canton("ZH"),
            RawRecord::new("Recruiter", "Google", "indeed").with_canton("ZH"),
            RawRecord::new("Accountant", "Google", "jobs.ch").with_canton("ZH"),
        ]
    };

    let first = service.run_resolution(batch()).await.unwrap();
    assert_eq!(first.new_canonicals, 4);
    assert!(!first.oversized_blocks.is_empty());

    service
        .register_company(CompanyEntity::new("Google", None).unwrap())
        .await
        .unwrap();
    let linking = service.run_linking(false).await.unwrap();
    assert_eq!(linking.linked, 4);
    let before = all_jobs(store.as_ref()).await;

    let second = service.run_resolution(batch()).await.unwrap();
    assert_eq!(second.exact_duplicates, 5);
    assert_eq!(second.new_canonicals, 0);
    assert_eq!(second.updated, 0);
    assert_eq!(second.refreshed, 0);
    assert_eq!(second.unchanged, 4);

    let after = all_jobs(store.as_ref()).await;
    assert_eq!(after, before);
    assert!(after.iter().all(|job| job.company_id.is_some()));
    assert!(store.get_jobs_without_company_link().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_records_in_different_blocks_are_never_compared() {
    let store = Arc::new(InMemoryRecordStore::new());
    let scorer = Arc::new(RecordingScorer::default());
    let service = service_with(store.clone()).with_scorer(scorer.clone());

    let records = ["ZH", "GE", "BE"]
        .iter()
        .map(|canton| {
            RawRecord::new("Software Engineer", "Google", "jobs.ch")
                .with_canton(*canton)
                .with_observed_at(at(1))
        })
        .collect();
    let summary = service.run_resolution(records).await.unwrap();

    assert_eq!(summary.blocks, 3);
    assert_eq!(summary.comparisons, 0);
    assert_eq!(summary.new_canonicals, 3);
    assert!(scorer.pairs.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_only_same_block_pairs_are_scored() {
    let store = Arc::new(InMemoryRecordStore::new());
    let scorer = Arc::new(RecordingScorer::default());
    let service = service_with(store.clone()).with_scorer(scorer.clone());

    let records = vec![
        RawRecord::new("Backend Engineer", "Migros", "jobs.ch").with_canton("ZH"),
        RawRecord::new("Store Manager", "Migros", "jobs.ch").with_canton("ZH"),
        RawRecord::new("Backend Engineer", "Coop", "jobs.ch").with_canton("ZH"),
    ];
    let summary = service.run_resolution(records).await.unwrap();

    assert_eq!(summary.comparisons, 1);
    let pairs = scorer.pairs.lock().unwrap().clone();
    assert_eq!(pairs.len(), 1);
    let (a, b) = &pairs[0];
    let mut titles = [a.as_str(), b.as_str()];
    titles.sort();
    assert_eq!(titles, ["Backend Engineer", "Store Manager"]);
}

#[tokio::test]
async fn test_result_is_independent_of_input_order() {
    let batch = google_batch();
    let orders: [[usize; 4]; 4] = [[0, 1, 2, 3], [3, 2, 1, 0], [1, 3, 0, 2], [2, 0, 3, 1]];

    let mut results = Vec::new();
    for order in orders {
        let store = Arc::new(InMemoryRecordStore::new());
        let service = service_with(store.clone());
        let records = order.iter().map(|i| batch[*i].clone()).collect();
        let summary = service.run_resolution(records).await.unwrap();
        assert_eq!(summary.new_canonicals, 3);
        results.push(all_jobs(store.as_ref()).await);
    }

    for result in &results[1..] {
        assert_eq!(result, &results[0]);
    }
}

#[tokio::test]
async fn test_incremental_batches_match_single_batch() {
    let batch = google_batch();

    let single = Arc::new(InMemoryRecordStore::new());
    service_with(single.clone())
        .run_resolution(batch.clone())
        .await
        .unwrap();

    let split = Arc::new(InMemoryRecordStore::new());
    let service = service_with(split.clone());
    service.run_resolution(batch[..2].to_vec()).await.unwrap();
    service.run_resolution(batch[2..].to_vec()).await.unwrap();

    assert_eq!(all_jobs(split.as_ref()).await, all_jobs(single.as_ref()).await);
}

#[tokio::test]
async fn test_store_failure_aborts_and_retry_completes() {
    let store = Arc::new(FailingStore::new(1));
    let service = service_with(store.clone());

    match service.run_resolution(google_batch()).await {
        Err(ServiceError::RunAborted {
            reason,
            committed,
            pending,
        }) => {
            assert!(reason.contains("database is locked"));
            assert_eq!(committed.len(), 1);
            assert_eq!(pending.len(), 3);
        }
        other => panic!("unexpected result {:?}", other),
    }
    assert_eq!(store.count_canonicals().await.unwrap(), 1);

    store.recover();
    let summary = service.run_resolution(google_batch()).await.unwrap();
    assert_eq!(summary.new_canonicals, 2);
    assert_eq!(summary.unchanged, 1);
    assert_eq!(store.count_canonicals().await.unwrap(), 3);
}

#[tokio::test]
async fn test_cancelled_run_writes_nothing() {
    let store = Arc::new(InMemoryRecordStore::new());
    let service = service_with(store.clone());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = service
        .run_resolution_with_cancel(google_batch(), cancel)
        .await;
    assert!(matches!(result, Err(ServiceError::Cancelled { .. })));
    assert_eq!(store.count_canonicals().await.unwrap(), 0);

    let summary = service.run_resolution(google_batch()).await.unwrap();
    assert_eq!(summary.new_canonicals, 3);
}

#[tokio::test]
async fn test_run_completed_event() {
    let store = Arc::new(InMemoryRecordStore::new());
    let service = service_with(store);

    service.run_resolution(google_batch()).await.unwrap();

    let history = service.event_bus().get_event_history().await;
    let created = history
        .iter()
        .filter(|(event, _)| matches!(event, ResolutionEvent::CanonicalCreated { .. }))
        .count();
    assert_eq!(created, 3);
    match history.last().map(|(event, _)| event) {
        Some(ResolutionEvent::RunCompleted {
            processed,
            new_canonicals,
            merged,
            ..
        }) => {
            assert_eq!(*processed, 4);
            assert_eq!(*new_canonicals, 3);
            assert_eq!(*merged, 1);
        }
        other => panic!("unexpected last event {:?}", other),
    }
}
