//! Resolution against the SQLite store, including re-opening the database

#![cfg(feature = "sqlite-store")]
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{all_jobs, google_batch};
use jobmerge::{
    open_store, CompanyEntity, InMemoryRecordStore, RecordStore, ResolutionService,
    ResolverConfig, SqliteRecordStore, StoreBackend, StoreConfig,
};
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_sqlite_matches_memory_store() {
    let temp_dir = TempDir::new().unwrap();
    let sqlite = Arc::new(
        SqliteRecordStore::open(temp_dir.path().join("jobs.db"))
            .await
            .unwrap(),
    );
    let memory = Arc::new(InMemoryRecordStore::new());

    let on_disk = ResolutionService::new(ResolverConfig::default(), sqlite.clone())
        .unwrap()
        .run_resolution(google_batch())
        .await
        .unwrap();
    let in_memory = ResolutionService::new(ResolverConfig::default(), memory.clone())
        .unwrap()
        .run_resolution(google_batch())
        .await
        .unwrap();

    assert_eq!(on_disk.new_canonicals, in_memory.new_canonicals);
    assert_eq!(on_disk.merged, in_memory.merged);
    assert_eq!(
        all_jobs(sqlite.as_ref()).await,
        all_jobs(memory.as_ref()).await
    );
}

#[tokio::test]
async fn test_state_persists_across_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let config = StoreConfig {
        backend: StoreBackend::Sqlite,
        db_path: temp_dir.path().join("jobs.db"),
    };

    {
        let store = open_store(&config).await.unwrap();
        let service = ResolutionService::new(ResolverConfig::default(), store).unwrap();
        service.run_resolution(google_batch()).await.unwrap();
        service
            .register_company(CompanyEntity::new("Google", Some("CHE-1".to_string())).unwrap())
            .await
            .unwrap();
        let links = service.run_linking(false).await.unwrap();
        assert_eq!(links.linked, 3);
    }

    let store = open_store(&config).await.unwrap();
    assert_eq!(store.count_canonicals().await.unwrap(), 3);
    assert_eq!(store.get_linked_jobs().await.unwrap().len(), 3);
    assert!(store.get_jobs_without_company_link().await.unwrap().is_empty());
    assert_eq!(store.get_all_companies().await.unwrap().len(), 1);

    let service = ResolutionService::new(ResolverConfig::default(), store.clone()).unwrap();
    let summary = service.run_resolution(google_batch()).await.unwrap();
    assert_eq!(summary.new_canonicals, 0);
    assert_eq!(summary.unchanged, 3);
    assert_eq!(summary.exact_duplicates, 4);
    assert_eq!(store.count_canonicals().await.unwrap(), 3);

    // links are kept by the re-run
    assert_eq!(store.get_linked_jobs().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_missing_parent_directory_is_created() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("data").join("jobs.db");
    let store = SqliteRecordStore::open(&path).await.unwrap();
    assert_eq!(store.db_path(), path.as_path());
    assert!(path.exists());
}
