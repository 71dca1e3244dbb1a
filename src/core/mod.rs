//! Core resolution modules

pub mod analysis;
pub mod blocking;
pub mod classify;
pub mod cluster;
pub mod embedding;
pub mod fingerprint;
pub mod linker;
pub mod merge;
pub mod normalize;
pub mod record;
pub mod resolution;
pub mod service;
pub mod similarity;
pub mod store;

// Re-export main types for convenience
pub use analysis::{LinkSummary, SponsorshipSummary, TagSummary};
pub use blocking::{BlockKey, BlockLimits, OversizedBlock};
pub use classify::{classify, extract_skills, KeywordTable};
pub use cluster::{CanonicalStatus, ClusterSettings, UnionFind};
pub use embedding::*;
pub use fingerprint::{fingerprint, Fingerprint};
pub use linker::{CompanyIndex, CompanyLinker, LinkMatch, LinkOutcome};
pub use merge::{merge, MergeConflictPolicy};
pub use normalize::{company_key, normalize};
pub use record::{
    CanonicalRecord, CompanyEntity, CompanyId, JobField, JobId, Observation, RawRecord, SkipReason,
};
pub use resolution::ResolutionSummary;
pub use service::*;
pub use similarity::{
    FallbackScorer, JaroWinklerScorer, ScoreOutcome, SimilarityScorer, Threshold, TokenSetScorer,
};
pub use store::{InMemoryRecordStore, RecordStore};
