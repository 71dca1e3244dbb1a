//! Link command implementation

use crate::cli::error::CliResult;
use crate::cli::utils::{print_json, print_rows};
use clap::Args;
use jobmerge::{ResolutionEvent, ResolutionService};

/// Link command arguments
#[derive(Debug, Args)]
#[command(after_help = "Examples:\n  jobmerge link\n  jobmerge link --relink --json")]
pub struct LinkArgs {
    /// Also re-score jobs that are already linked
    #[arg(long, help = "Re-score linked jobs and move links to strictly better matches")]
    pub relink: bool,

    /// Output in JSON format
    #[arg(long, help = "Output the link summary as JSON")]
    pub json: bool,
}

pub async fn execute_link(service: &ResolutionService, args: LinkArgs) -> CliResult<()> {
    let summary = service.run_linking(args.relink).await?;

    if args.json {
        return print_json(&summary);
    }

    println!("Company linking");
    print_rows(&[
        ("examined", summary.examined.to_string()),
        ("linked", summary.linked.to_string()),
        ("relinked", summary.relinked.to_string()),
        ("no match", summary.no_match.to_string()),
        ("ambiguous", summary.ambiguous.to_string()),
    ]);

    for item in service.event_bus().review_items().await {
        if let ResolutionEvent::AmbiguousCompanyMatch {
            job_id,
            company_name,
            chosen,
            tied_with,
            score,
        } = item
        {
            let tied: Vec<&str> = tied_with.iter().map(|id| id.as_str()).collect();
            println!(
                "  review: {} '{}' -> {} (tied with {} at {:.0})",
                job_id,
                company_name,
                chosen,
                tied.join(", "),
                score
            );
        }
    }
    Ok(())
}
