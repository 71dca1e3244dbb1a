//! Command modules for CLI

pub mod analyze;
pub mod companies;
pub mod link;
pub mod resolve;
pub mod show;
pub mod version;

use clap::Subcommand;

#[derive(Debug, Subcommand)]
#[command(about = "jobmerge commands")]
pub enum Commands {
    /// Resolve raw job records into canonical jobs
    #[command(about = "Resolve a JSONL file of raw job records into canonical jobs")]
    Resolve(resolve::ResolveArgs),

    /// Manage the company registry
    #[command(about = "Import and list registered companies")]
    Companies(companies::CompaniesArgs),

    /// Link canonical jobs to registered companies
    #[command(about = "Link canonical jobs to registered companies")]
    Link(link::LinkArgs),

    /// Classify companies from stored descriptions
    #[command(about = "Detect visa sponsorship and tag companies")]
    Analyze(analyze::AnalyzeArgs),

    /// Show one canonical job
    #[command(about = "Show a canonical job with its sources and company link")]
    Show(show::ShowArgs),

    /// Show version information
    #[command(about = "Show version information")]
    Version(version::VersionArgs),
}
