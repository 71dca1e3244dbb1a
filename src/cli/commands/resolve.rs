//! Resolve command implementation

use crate::cli::error::{CliError, CliResult};
use crate::cli::utils::{print_json, print_rows, read_jsonl};
use clap::Args;
use jobmerge::{
    CancellationToken, RawRecord, ResolutionEvent, ResolutionService, ResolutionSummary,
    ServiceError,
};
use serde::Serialize;
use std::path::PathBuf;

/// Resolve command arguments
#[derive(Debug, Args)]
#[command(
    after_help = "Input is one JSON object per line:\n  \
                  {\"title\": \"Software Engineer\", \"company_name\": \"Google\", \"canton\": \"ZH\", \"source\": \"jobs.ch\"}\n\n\
                  Examples:\n  jobmerge resolve --input jobs.jsonl\n  cat jobs.jsonl | jobmerge resolve --input - --json"
)]
pub struct ResolveArgs {
    /// JSONL file of raw records, "-" for stdin
    #[arg(short, long, help = "JSONL file of raw job records (\"-\" reads stdin)")]
    pub input: PathBuf,

    /// Output in JSON format
    #[arg(long, help = "Output the run summary as JSON")]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct ResolveReport<'a> {
    #[serde(flatten)]
    summary: &'a ResolutionSummary,
    review: Vec<ResolutionEvent>,
}

pub async fn execute_resolve(service: &ResolutionService, args: ResolveArgs) -> CliResult<()> {
    let records: Vec<RawRecord> = read_jsonl(&args.input)?;

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Interrupted, stopping after the current block");
                cancel.cancel();
            }
        })
    };

    let result = service.run_resolution_with_cancel(records, cancel).await;
    interrupt.abort();

    let summary = match result {
        Ok(summary) => summary,
        Err(e) => {
            if let ServiceError::RunAborted {
                committed, pending, ..
            }
            | ServiceError::Cancelled { committed, pending } = &e
            {
                eprintln!(
                    "{} records committed, {} not committed; re-run the same input to finish",
                    committed.len(),
                    pending.len()
                );
            }
            return Err(CliError::Service(e));
        }
    };

    let review = service.event_bus().review_items().await;

    if args.json {
        return print_json(&ResolveReport {
            summary: &summary,
            review,
        });
    }

    println!("Resolution run {}", summary.run_id);
    print_rows(&[
        ("processed", summary.processed.to_string()),
        ("skipped", summary.skipped.to_string()),
        ("exact duplicates", summary.exact_duplicates.to_string()),
        ("blocks", summary.blocks.to_string()),
        ("comparisons", summary.comparisons.to_string()),
        ("clusters", summary.clusters.to_string()),
        ("new canonicals", summary.new_canonicals.to_string()),
        ("merged", summary.merged.to_string()),
        ("updated", summary.updated.to_string()),
        ("refreshed", summary.refreshed.to_string()),
        ("unchanged", summary.unchanged.to_string()),
    ]);
    for (reason, count) in &summary.skipped_by_reason {
        println!("  skipped ({}): {}", reason, count);
    }
    for block in &summary.oversized_blocks {
        println!(
            "  oversized block {} ({} records, {} chunks)",
            block.key, block.size, block.chunks
        );
    }
    if !review.is_empty() {
        println!("{} items need review:", review.len());
        for item in &review {
            if let ResolutionEvent::CanonicalOverlap { kept, others, .. } = item {
                let others: Vec<&str> = others.iter().map(|id| id.as_str()).collect();
                println!("  {} overlaps {}", kept, others.join(", "));
            }
        }
    }
    Ok(())
}
