//! Storage backend implementations

use crate::core::service::{ServiceError, StoreBackend, StoreConfig};
use crate::core::store::{InMemoryRecordStore, RecordStore};
use std::sync::Arc;

#[cfg(feature = "sqlite-store")]
pub mod sqlite;

#[cfg(feature = "sqlite-store")]
pub use sqlite::SqliteRecordStore;

/// Open the configured record store
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn RecordStore>, ServiceError> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(InMemoryRecordStore::new())),
        #[cfg(feature = "sqlite-store")]
        StoreBackend::Sqlite => Ok(Arc::new(SqliteRecordStore::open(&config.db_path).await?)),
        #[cfg(not(feature = "sqlite-store"))]
        StoreBackend::Sqlite => Err(ServiceError::Config(
            "SQLite store requested but the sqlite-store feature is disabled".to_string(),
        )),
    }
}
