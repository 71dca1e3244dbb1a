//! Resolution service, configuration and errors

use crate::core::analysis::{self, LinkSummary, SponsorshipSummary, TagSummary};
use crate::core::classify::{KeywordTable, DEFAULT_SKILLS};
use crate::core::embedding::EmbeddingService;
use crate::core::fingerprint::Fingerprint;
use crate::core::linker::CompanyLinker;
use crate::core::merge::MergeConflictPolicy;
use crate::core::record::{CompanyEntity, RawRecord};
use crate::core::resolution::{self, ResolutionContext, ResolutionSummary};
use crate::core::similarity::{JaroWinklerScorer, SimilarityScorer, Threshold, TokenSetScorer};
use crate::core::store::RecordStore;
use crate::events::EventBus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// String similarity used when no embedding service is configured
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScorerKind {
    #[default]
    TokenSet,
    JaroWinkler,
}

impl ScorerKind {
    pub fn build(self) -> Arc<dyn SimilarityScorer> {
        match self {
            ScorerKind::TokenSet => Arc::new(TokenSetScorer),
            ScorerKind::JaroWinkler => Arc::new(JaroWinklerScorer),
        }
    }
}

/// Clustering and merge settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    /// Minimum title similarity for two records to be the same job
    pub title_similarity_threshold: Threshold,

    /// Blocks larger than this are logged
    pub block_size_warn: usize,

    /// Blocks larger than this are split into chunks
    pub block_size_cap: Option<usize>,

    pub merge_conflict_policy: MergeConflictPolicy,

    /// Union records with a known fingerprint without scoring them
    pub exact_match_fast_path: bool,

    pub scorer: ScorerKind,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            title_similarity_threshold: Threshold::TITLE_DEFAULT,
            block_size_warn: 500,
            block_size_cap: None,
            merge_conflict_policy: MergeConflictPolicy::default(),
            exact_match_fast_path: true,
            scorer: ScorerKind::default(),
        }
    }
}

/// Company linking settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkingConfig {
    pub company_link_threshold: Threshold,
    pub scorer: ScorerKind,
}

impl Default for LinkingConfig {
    fn default() -> Self {
        Self {
            company_link_threshold: Threshold::COMPANY_DEFAULT,
            scorer: ScorerKind::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Memory,
    #[default]
    Sqlite,
}

/// Record store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// SQLite database file
    pub db_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            db_path: PathBuf::from("jobmerge.db"),
        }
    }
}

/// Embedding configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// OpenAI API base URL
    pub openai_base_url: String,

    /// Embedding model name
    pub embedding_model: String,

    /// Environment variable holding the API key
    pub api_key_env: String,

    /// Texts sent per request
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            openai_base_url: "https://api.openai.com/v1".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            batch_size: 100,
        }
    }
}

/// Extra classifier entries added to the built-in tables
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Industry tag to literal phrases
    pub industry: BTreeMap<String, Vec<String>>,

    /// Culture tag to literal phrases
    pub culture: BTreeMap<String, Vec<String>>,

    /// Extra regular expressions implying visa sponsorship
    pub sponsorship_patterns: Vec<String>,

    /// Replaces the default skill list when not empty
    pub skills: Vec<String>,
}

impl ClassifierConfig {
    pub fn sponsorship_table(&self) -> Result<KeywordTable, ServiceError> {
        let mut table = KeywordTable::sponsorship();
        for pattern in &self.sponsorship_patterns {
            table.add_pattern(crate::core::classify::SPONSORSHIP_TAG, pattern)?;
        }
        Ok(table)
    }

    /// Industry and culture tags together
    pub fn tag_table(&self) -> Result<KeywordTable, ServiceError> {
        let mut table = KeywordTable::industry();
        table.extend(KeywordTable::culture());
        table.extend(KeywordTable::from_keywords(
            self.industry
                .iter()
                .chain(self.culture.iter())
                .map(|(tag, phrases)| (tag.as_str(), phrases.iter().map(String::as_str))),
        )?);
        Ok(table)
    }

    pub fn skills(&self) -> Vec<String> {
        if self.skills.is_empty() {
            DEFAULT_SKILLS.iter().map(|s| s.to_string()).collect()
        } else {
            self.skills.clone()
        }
    }
}

/// Main service configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub resolution: ResolutionConfig,
    pub linking: LinkingConfig,
    pub store: StoreConfig,

    /// Score titles by embedding similarity when set
    pub embedding: Option<EmbeddingConfig>,

    pub classifiers: ClassifierConfig,
}

impl ResolverConfig {
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.resolution.block_size_warn == 0 {
            return Err(ServiceError::Config(
                "block_size_warn must be greater than zero".to_string(),
            ));
        }
        if self.resolution.block_size_cap == Some(0) {
            return Err(ServiceError::Config(
                "block_size_cap must be greater than zero".to_string(),
            ));
        }
        if let Some(embedding) = &self.embedding {
            if embedding.batch_size == 0 {
                return Err(ServiceError::Config(
                    "embedding batch_size must be greater than zero".to_string(),
                ));
            }
            if embedding.embedding_model.trim().is_empty() {
                return Err(ServiceError::Config(
                    "embedding_model cannot be empty".to_string(),
                ));
            }
        }
        self.classifiers
            .sponsorship_table()
            .and_then(|_| self.classifiers.tag_table())
            .map_err(|e| ServiceError::Config(format!("Invalid classifier: {}", e)))?;
        Ok(())
    }
}

/// Main service error type
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Scoring error: {0}")]
    Scoring(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A store write failed mid-run; earlier blocks stay committed
    #[error(
        "Run aborted: {reason} ({} committed, {} pending)",
        .committed.len(),
        .pending.len()
    )]
    RunAborted {
        reason: String,
        committed: Vec<Fingerprint>,
        pending: Vec<Fingerprint>,
    },

    #[error("Run cancelled ({} committed, {} pending)", .committed.len(), .pending.len())]
    Cancelled {
        committed: Vec<Fingerprint>,
        pending: Vec<Fingerprint>,
    },

    #[error("Custom error: {0}")]
    Custom(String),
}

/// Entry point for resolution, linking and analysis runs
pub struct ResolutionService {
    config: ResolverConfig,
    store: Arc<dyn RecordStore>,
    title_scorer: Arc<dyn SimilarityScorer>,
    company_scorer: Arc<dyn SimilarityScorer>,
    embeddings: Option<Arc<dyn EmbeddingService>>,
    event_bus: Arc<EventBus>,
}

impl ResolutionService {
    pub fn new(config: ResolverConfig, store: Arc<dyn RecordStore>) -> Result<Self, ServiceError> {
        crate::init_logging();
        config.validate()?;

        info!("Initializing jobmerge service v{}", crate::VERSION);

        Ok(Self {
            title_scorer: config.resolution.scorer.build(),
            company_scorer: config.linking.scorer.build(),
            config,
            store,
            embeddings: None,
            event_bus: Arc::new(EventBus::new()),
        })
    }

    /// Replace the title scorer
    pub fn with_scorer(mut self, scorer: Arc<dyn SimilarityScorer>) -> Self {
        self.title_scorer = scorer;
        self
    }

    /// Replace the company name scorer
    pub fn with_company_scorer(mut self, scorer: Arc<dyn SimilarityScorer>) -> Self {
        self.company_scorer = scorer;
        self
    }

    /// Score titles by embeddings first, falling back to the title scorer
    pub fn with_embedding_service(mut self, service: Arc<dyn EmbeddingService>) -> Self {
        self.embeddings = Some(service);
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn store(&self) -> Arc<dyn RecordStore> {
        self.store.clone()
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.event_bus.clone()
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve a batch of raw records into canonical jobs
    pub async fn run_resolution(
        &self,
        records: Vec<RawRecord>,
    ) -> Result<ResolutionSummary, ServiceError> {
        self.run_resolution_with_cancel(records, CancellationToken::new())
            .await
    }

    /// Resolve a batch, stopping between blocks once `cancel` fires
    pub async fn run_resolution_with_cancel(
        &self,
        records: Vec<RawRecord>,
        cancel: CancellationToken,
    ) -> Result<ResolutionSummary, ServiceError> {
        resolution::run_resolution(
            records,
            ResolutionContext {
                store: self.store.as_ref(),
                scorer: self.title_scorer.clone(),
                embeddings: self.embeddings.clone(),
                config: &self.config.resolution,
                events: Some(self.event_bus.as_ref()),
                cancel,
            },
        )
        .await
    }

    /// Add a company to the registry, or fill gaps in the registered one
    pub async fn register_company(
        &self,
        company: CompanyEntity,
    ) -> Result<CompanyEntity, ServiceError> {
        analysis::register_company(self.store.as_ref(), company).await
    }

    /// Link jobs to registered companies
    ///
    /// With `relink`, already linked jobs are re-scored and moved when a
    /// strictly better company is found.
    pub async fn run_linking(&self, relink: bool) -> Result<LinkSummary, ServiceError> {
        let linker = CompanyLinker::new(
            self.company_scorer.clone(),
            self.config.linking.company_link_threshold,
        );
        analysis::run_linking(
            self.store.as_ref(),
            &linker,
            relink,
            Some(self.event_bus.as_ref()),
        )
        .await
    }

    /// Mark companies whose linked jobs mention visa sponsorship
    pub async fn analyze_sponsorship(&self) -> Result<SponsorshipSummary, ServiceError> {
        let table = self.config.classifiers.sponsorship_table()?;
        analysis::analyze_sponsorship(self.store.as_ref(), &table).await
    }

    /// Tag companies from their descriptions
    pub async fn tag_companies(&self) -> Result<TagSummary, ServiceError> {
        let table = self.config.classifiers.tag_table()?;
        analysis::tag_companies(self.store.as_ref(), &table).await
    }
}
