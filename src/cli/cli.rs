//! Main CLI application structure

use clap::Parser;
use jobmerge::{ResolutionService, StoreBackend};
use std::path::PathBuf;

use crate::cli::commands::{analyze, companies, link, resolve, show, version, Commands};
use crate::cli::config_file::{get_config_search_paths, load_config};
use crate::cli::error::{CliError, CliResult};

/// jobmerge CLI - Resolve scraped job postings into canonical jobs
#[derive(Debug, Parser)]
#[command(name = "jobmerge")]
#[command(version = jobmerge::VERSION)]
#[command(about = "jobmerge - Resolve scraped job postings into canonical jobs")]
#[command(long_about = "jobmerge merges job postings collected from several sources into \
                         canonical jobs and links them to registered companies.\n\n\
                         Configuration is read from jobmerge.toml, found by walking up from the \
                         current directory, or from --config. JOBMERGE_DB_PATH, \
                         JOBMERGE_TITLE_THRESHOLD and JOBMERGE_COMPANY_THRESHOLD override it.\n\n\
                         Examples:\n\
                           jobmerge companies import --input registry.jsonl\n\
                           jobmerge resolve --input jobs.jsonl\n\
                           jobmerge link\n\
                           jobmerge analyze sponsorship")]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// SQLite database path (overrides configuration)
    #[arg(long, global = true, help = "SQLite database file")]
    pub db: Option<PathBuf>,

    /// Configuration file (skips the directory search)
    #[arg(long, global = true, help = "Path to jobmerge.toml")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> CliResult<()> {
        jobmerge::init_logging();

        // Handle version command early (no service needed)
        if let Commands::Version(args) = self.command {
            return version::execute_version(args).await;
        }

        let loaded = load_config(self.config.as_deref())?;
        let mut config = loaded.config;
        if let Some(db) = self.db {
            config.store.backend = StoreBackend::Sqlite;
            config.store.db_path = db;
        }

        if self.verbose {
            match &loaded.path {
                Some(path) => eprintln!("Using configuration: {}", path.display()),
                None => eprintln!(
                    "No jobmerge.toml found (searched {} locations), using defaults",
                    get_config_search_paths().len()
                ),
            }
            if config.store.backend == StoreBackend::Sqlite {
                eprintln!("Using database: {}", config.store.db_path.display());
            }
        }

        let store = jobmerge::open_store(&config.store)
            .await
            .map_err(CliError::Service)?;
        let service = create_service(config, store)?;
        if self.verbose {
            let events = service.event_bus();
            for event_type in ["review:overlap", "review:ambiguous-company", "run:completed"] {
                events
                    .register_handler(event_type, jobmerge::events::LoggingEventHandler)
                    .await;
            }
        }

        match self.command {
            Commands::Resolve(args) => resolve::execute_resolve(&service, args).await,
            Commands::Companies(args) => companies::execute_companies(&service, args).await,
            Commands::Link(args) => link::execute_link(&service, args).await,
            Commands::Analyze(args) => analyze::execute_analyze(&service, args).await,
            Commands::Show(args) => show::execute_show(&service, args).await,
            Commands::Version(_) => unreachable!("Handled above"),
        }
    }
}

/// Build the service, attaching the embedding client when [embedding] is configured
fn create_service(
    config: jobmerge::ResolverConfig,
    store: std::sync::Arc<dyn jobmerge::RecordStore>,
) -> CliResult<ResolutionService> {
    let embedding = config.embedding.clone();
    let service = ResolutionService::new(config, store).map_err(CliError::Service)?;

    match embedding {
        #[cfg(feature = "openai-embeddings")]
        Some(embedding) => {
            let api_key = crate::cli::config_file::get_api_key(&embedding)?;
            let client = jobmerge::OpenAIEmbeddingService::from_config(&embedding, api_key);
            Ok(service.with_embedding_service(std::sync::Arc::new(client)))
        }
        #[cfg(not(feature = "openai-embeddings"))]
        Some(_) => Err(CliError::Config(
            "[embedding] is configured but the openai-embeddings feature is disabled".to_string(),
        )),
        None => Ok(service),
    }
}
