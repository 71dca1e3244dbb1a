//! Company registry commands

use crate::cli::error::{CliError, CliResult};
use crate::cli::utils::{print_json, read_jsonl};
use clap::{Args, Subcommand};
use jobmerge::core::normalize::normalize_location;
use jobmerge::{CompanyEntity, ResolutionService};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Companies command arguments
#[derive(Debug, Args)]
#[command(
    after_help = "Examples:\n  jobmerge companies import --input registry.jsonl\n  jobmerge companies list --json"
)]
pub struct CompaniesArgs {
    #[command(subcommand)]
    pub command: CompaniesSubcommand,
}

#[derive(Debug, Subcommand)]
pub enum CompaniesSubcommand {
    /// Register companies from a JSONL file
    #[command(about = "Register companies from a JSONL file (fills gaps in known companies)")]
    Import(ImportArgs),

    /// List registered companies
    #[command(about = "List registered companies")]
    List(ListArgs),
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// JSONL file, "-" for stdin
    #[arg(short, long, help = "JSONL file of company profiles (\"-\" reads stdin)")]
    pub input: PathBuf,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Output in JSON format
    #[arg(long, help = "Output in JSON format")]
    pub json: bool,
}

/// Company profile as supplied by a registry export
#[derive(Debug, Deserialize)]
struct CompanyInput {
    name: String,
    #[serde(default, alias = "uid")]
    external_uid: Option<String>,
    #[serde(default)]
    legal_form: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tags: BTreeSet<String>,
}

impl CompanyInput {
    fn into_entity(self) -> Result<CompanyEntity, jobmerge::ServiceError> {
        let mut company = CompanyEntity::new(self.name, self.external_uid)?;
        company.legal_form = self.legal_form;
        company.address = self.address;
        company.location =
            Some(normalize_location(self.location.as_deref())).filter(|l| !l.is_empty());
        company.description = self.description;
        company.tags = self.tags;
        Ok(company)
    }
}

pub async fn execute_companies(service: &ResolutionService, args: CompaniesArgs) -> CliResult<()> {
    match args.command {
        CompaniesSubcommand::Import(args) => execute_import(service, args).await,
        CompaniesSubcommand::List(args) => execute_list(service, args).await,
    }
}

async fn execute_import(service: &ResolutionService, args: ImportArgs) -> CliResult<()> {
    let inputs: Vec<CompanyInput> = read_jsonl(&args.input)?;

    let mut registered = BTreeSet::new();
    for (index, input) in inputs.into_iter().enumerate() {
        let company = input.into_entity().map_err(|e| CliError::InvalidInput {
            path: args.input.display().to_string(),
            line: index + 1,
            message: e.to_string(),
        })?;
        let stored = service.register_company(company).await?;
        registered.insert(stored.id);
    }

    println!("Registered {} companies", registered.len());
    Ok(())
}

async fn execute_list(service: &ResolutionService, args: ListArgs) -> CliResult<()> {
    let companies = service.store().get_all_companies().await?;

    if args.json {
        return print_json(&companies);
    }

    if companies.is_empty() {
        println!("No companies registered");
        return Ok(());
    }
    for company in &companies {
        let mut line = format!("{}  {}", company.id, company.name);
        if company.offers_sponsorship {
            line.push_str("  [sponsorship]");
        }
        if !company.tags.is_empty() {
            let tags: Vec<&str> = company.tags.iter().map(String::as_str).collect();
            line.push_str(&format!("  ({})", tags.join(", ")));
        }
        println!("{}", line);
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_company_input_conversion() {
        let input: CompanyInput = serde_json::from_str(
            r#"{"name": "Google Switzerland GmbH", "uid": "che-123.456.789", "location": "Zürich"}"#,
        )
        .unwrap();
        let company = input.into_entity().unwrap();
        assert_eq!(company.id.as_str(), "uid:CHE-123.456.789");
        assert_eq!(company.location.as_deref(), Some("Zürich"));

        let abroad: CompanyInput =
            serde_json::from_str(r#"{"name": "Nestlé", "location": "Vevey, Suisse"}"#).unwrap();
        let company = abroad.into_entity().unwrap();
        assert_eq!(company.location.as_deref(), Some("Switzerland"));

        let blank: CompanyInput = serde_json::from_str(r#"{"name": "  "}"#).unwrap();
        assert!(blank.into_entity().is_err());
    }
}
