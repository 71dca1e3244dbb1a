//! Input and output helpers shared by commands

use crate::cli::error::{CliError, CliResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// Read one JSON value per line from a file, or from stdin when the path is "-"
///
/// Blank lines are ignored.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> CliResult<Vec<T>> {
    let label = path.display().to_string();
    if label == "-" {
        return parse_jsonl(std::io::stdin().lock(), &label);
    }
    let file = std::fs::File::open(path).map_err(|e| {
        CliError::Validation(format!("Failed to open {}: {}", label, e))
    })?;
    parse_jsonl(file, &label)
}

pub fn parse_jsonl<T: DeserializeOwned, R: Read>(reader: R, label: &str) -> CliResult<Vec<T>> {
    let mut values = Vec::new();
    for (index, line) in BufReader::new(reader).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value = serde_json::from_str(&line).map_err(|e| CliError::InvalidInput {
            path: label.to_string(),
            line: index + 1,
            message: e.to_string(),
        })?;
        values.push(value);
    }
    Ok(values)
}

/// Print a value as pretty JSON
pub fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| CliError::Validation(format!("Failed to serialize output: {}", e)))?;
    println!("{}", json);
    Ok(())
}

/// Print aligned "label: value" rows
pub fn print_rows(rows: &[(&str, String)]) {
    let width = rows.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
    for (label, value) in rows {
        println!("  {:<width$}  {}", format!("{}:", label), value, width = width + 1);
    }
}
