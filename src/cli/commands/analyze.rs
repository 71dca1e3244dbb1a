//! Company analysis commands

use crate::cli::error::CliResult;
use crate::cli::utils::{print_json, print_rows};
use clap::{Args, Subcommand};
use jobmerge::ResolutionService;

/// Analyze command arguments
#[derive(Debug, Args)]
#[command(
    after_help = "Examples:\n  jobmerge analyze sponsorship\n  jobmerge analyze tags --json\n\n\
                  Extra keywords and patterns are read from the [classifiers] section of jobmerge.toml."
)]
pub struct AnalyzeArgs {
    #[command(subcommand)]
    pub command: AnalyzeSubcommand,

    /// Output in JSON format
    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum AnalyzeSubcommand {
    /// Mark companies whose linked jobs mention visa sponsorship
    #[command(about = "Mark companies whose linked jobs mention visa sponsorship")]
    Sponsorship,

    /// Tag companies by industry and culture
    #[command(about = "Tag companies by industry and culture from their descriptions")]
    Tags,
}

pub async fn execute_analyze(service: &ResolutionService, args: AnalyzeArgs) -> CliResult<()> {
    match args.command {
        AnalyzeSubcommand::Sponsorship => {
            let summary = service.analyze_sponsorship().await?;
            if args.json {
                return print_json(&summary);
            }
            println!("Sponsorship analysis");
            print_rows(&[
                ("linked jobs", summary.jobs_examined.to_string()),
                ("mentioning sponsorship", summary.matching_jobs.to_string()),
                ("companies marked", summary.companies_marked.to_string()),
            ]);
        }
        AnalyzeSubcommand::Tags => {
            let summary = service.tag_companies().await?;
            if args.json {
                return print_json(&summary);
            }
            println!("Company tagging");
            print_rows(&[
                ("companies", summary.companies.to_string()),
                ("tagged", summary.tagged.to_string()),
                ("updated", summary.updated.to_string()),
            ]);
        }
    }
    Ok(())
}
