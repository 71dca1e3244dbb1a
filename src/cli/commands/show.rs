//! Show command implementation

use crate::cli::error::{CliError, CliResult};
use crate::cli::utils::{print_json, print_rows};
use clap::Args;
use jobmerge::core::classify::extract_skills;
use jobmerge::{CanonicalRecord, CompanyEntity, JobId, ResolutionService};
use serde::Serialize;
use std::collections::BTreeSet;

/// Show command arguments
#[derive(Debug, Args)]
#[command(after_help = "Examples:\n  jobmerge show 3f1c9a...\n  jobmerge show 3f1c9a... --json")]
pub struct ShowArgs {
    /// Canonical job id
    #[arg(help = "Canonical job id (as printed by resolve events or stored in the database)")]
    pub job_id: String,

    /// Output in JSON format
    #[arg(long, help = "Output in JSON format")]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct JobDetails {
    job: CanonicalRecord,
    company: Option<CompanyEntity>,
    skills: BTreeSet<String>,
}

pub async fn execute_show(service: &ResolutionService, args: ShowArgs) -> CliResult<()> {
    let id = JobId::new(args.job_id.trim().to_string())
        .map_err(|e| CliError::Validation(e.to_string()))?;
    let store = service.store();
    let job = store
        .get_canonical(&id)
        .await?
        .ok_or_else(|| CliError::NotFound(format!("Job '{}' not found", id)))?;

    let company = match &job.company_id {
        Some(company_id) => store.get_company(company_id).await?,
        None => None,
    };
    let skills = job
        .description
        .as_deref()
        .map(|text| extract_skills(text, &service.config().classifiers.skills()))
        .unwrap_or_default();

    if args.json {
        return print_json(&JobDetails {
            job,
            company,
            skills,
        });
    }

    println!("{}", job.title);
    let mut rows = vec![
        ("id", job.id.to_string()),
        ("company", job.company_name.clone()),
    ];
    if let Some(canton) = &job.canton {
        rows.push(("canton", canton.clone()));
    }
    if let Some(location) = &job.location {
        rows.push(("location", location.clone()));
    }
    if let Some(date) = &job.date_posted {
        rows.push(("posted", date.clone()));
    }
    if let Some(url) = &job.url {
        rows.push(("url", url.clone()));
    }
    rows.push((
        "sources",
        job.sources.iter().cloned().collect::<Vec<_>>().join(", "),
    ));
    rows.push(("observations", job.member_fingerprints.len().to_string()));
    rows.push((
        "seen",
        format!(
            "{} .. {}",
            job.first_seen.format("%Y-%m-%d"),
            job.last_seen.format("%Y-%m-%d")
        ),
    ));
    match (&company, job.company_link_score) {
        (Some(company), Some(score)) => {
            rows.push(("linked to", format!("{} ({:.0})", company.name, score)));
        }
        _ => rows.push(("linked to", "-".to_string())),
    }
    if !skills.is_empty() {
        rows.push(("skills", skills.iter().cloned().collect::<Vec<_>>().join(", ")));
    }
    print_rows(&rows);

    if !job.alternates.is_empty() {
        println!("Other values seen:");
        for (field, values) in &job.alternates {
            let values: Vec<&str> = values.iter().map(String::as_str).collect();
            println!("  {}: {}", field, values.join(" | "));
        }
    }
    Ok(())
}
