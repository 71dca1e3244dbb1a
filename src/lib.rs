//! # jobmerge
//!
//! Entity resolution for job postings and company profiles scraped from
//! several sources. Raw records are normalized, fingerprinted and grouped into
//! blocks; records within a block are clustered by title similarity and each
//! cluster is merged into one canonical job. Canonical jobs are then linked to
//! a registry of known companies.
//!
//! ## Architecture
//!
//! - Normalization and fingerprinting of raw records
//! - Blocking by company and canton
//! - Pluggable similarity scoring (string ratios, embeddings)
//! - Union-find clustering and order-independent merging
//! - Company linking, sponsorship detection and tagging
//! - In-memory and SQLite record stores
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use jobmerge::{InMemoryRecordStore, RawRecord, ResolutionService, ResolverConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(InMemoryRecordStore::new());
//!     let service = ResolutionService::new(ResolverConfig::default(), store)?;
//!
//!     let summary = service
//!         .run_resolution(vec![
//!             RawRecord::new("Software Engineer", "Google", "jobs.ch").with_canton("ZH"),
//!             RawRecord::new("Software Engineer", "Google, Inc.", "linkedin").with_canton("ZH"),
//!         ])
//!         .await?;
//!     println!("{} canonical jobs created", summary.new_canonicals);
//!
//!     let links = service.run_linking(false).await?;
//!     println!("{} jobs linked", links.linked);
//!
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod events;
pub mod storage;

pub use core::analysis::{LinkSummary, SponsorshipSummary, TagSummary};
pub use core::embedding::{EmbeddingScorer, EmbeddingService};
#[cfg(feature = "openai-embeddings")]
pub use core::embedding::OpenAIEmbeddingService;
pub use core::fingerprint::Fingerprint;
pub use core::merge::MergeConflictPolicy;
pub use core::record::{
    CanonicalRecord, CompanyEntity, CompanyId, JobField, JobId, RawRecord, SkipReason,
};
pub use core::resolution::ResolutionSummary;
pub use core::service::{
    ClassifierConfig, EmbeddingConfig, LinkingConfig, ResolutionConfig, ResolutionService,
    ResolverConfig, ScorerKind, ServiceError, StoreBackend, StoreConfig,
};
pub use core::similarity::{ScoreOutcome, SimilarityScorer, Threshold};
pub use core::store::{InMemoryRecordStore, RecordStore};
pub use events::{EventBus, ResolutionEvent};
#[cfg(feature = "sqlite-store")]
pub use storage::SqliteRecordStore;
pub use storage::open_store;

// Re-export commonly used types
pub use async_trait::async_trait;
pub use std::sync::Arc;
pub use tokio_util::sync::CancellationToken;

/// Version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging (safe for testing)
pub fn init_logging() {
    // Only initialize logging once
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "jobmerge=warn".into());

        // stdout carries command output (JSON with --json)
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .finish();

        // This will fail silently if already initialized
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_service_initialization() {
        let store = Arc::new(InMemoryRecordStore::new());
        let service = ResolutionService::new(ResolverConfig::default(), store).unwrap();
        assert_eq!(service.store().count_canonicals().await.unwrap(), 0);
        assert!(!VERSION.is_empty());
    }
}
