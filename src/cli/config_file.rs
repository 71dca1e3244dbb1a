//! Configuration file loading for the jobmerge CLI

use crate::cli::error::{CliError, CliResult};
use jobmerge::{EmbeddingConfig, ResolverConfig, StoreBackend, Threshold};
use std::path::{Path, PathBuf};

/// Name of the configuration file looked up from the working directory
pub const CONFIG_FILE_NAME: &str = "jobmerge.toml";

/// Environment variables overriding file settings
pub const ENV_DB_PATH: &str = "JOBMERGE_DB_PATH";
pub const ENV_TITLE_THRESHOLD: &str = "JOBMERGE_TITLE_THRESHOLD";
pub const ENV_COMPANY_THRESHOLD: &str = "JOBMERGE_COMPANY_THRESHOLD";

/// Configuration together with the file it came from
#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    pub config: ResolverConfig,
    pub path: Option<PathBuf>,
}

/// Find jobmerge.toml in the given directory or any parent
pub fn resolve_config_file(start_path: &Path) -> Option<PathBuf> {
    let mut current = start_path.to_path_buf();
    loop {
        let candidate = current.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !current.pop() {
            return None;
        }
    }
}

/// Load configuration from an explicit file, or from jobmerge.toml found by
/// walking up from the current directory, then apply environment overrides
pub fn load_config(explicit: Option<&Path>) -> CliResult<LoadedConfig> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => {
            let current_dir = std::env::current_dir().map_err(|e| {
                CliError::Config(format!("Failed to get current directory: {}", e))
            })?;
            resolve_config_file(&current_dir)
        }
    };

    let mut loaded = match path {
        Some(path) => LoadedConfig {
            config: load_config_file(&path)?,
            path: Some(path),
        },
        None => LoadedConfig::default(),
    };

    apply_env_overrides(&mut loaded.config, |name| std::env::var(name).ok())?;
    loaded
        .config
        .validate()
        .map_err(|e| CliError::Config(e.to_string()))?;
    Ok(loaded)
}

/// Parse one configuration file
///
/// A relative database path is taken relative to the file's directory.
pub fn load_config_file(path: &Path) -> CliResult<ResolverConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        CliError::Config(format!("Failed to read {}: {}", path.display(), e))
    })?;
    let mut config: ResolverConfig = toml::from_str(&content).map_err(|e| {
        CliError::Config(format!("Failed to parse {}: {}", path.display(), e))
    })?;

    if config.store.db_path.is_relative() {
        if let Some(dir) = path.parent() {
            config.store.db_path = dir.join(&config.store.db_path);
        }
    }
    Ok(config)
}

/// Apply JOBMERGE_* overrides read through `lookup`
pub fn apply_env_overrides<F>(config: &mut ResolverConfig, lookup: F) -> CliResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(db_path) = lookup(ENV_DB_PATH).filter(|v| !v.trim().is_empty()) {
        config.store.backend = StoreBackend::Sqlite;
        config.store.db_path = PathBuf::from(db_path);
    }
    if let Some(value) = lookup(ENV_TITLE_THRESHOLD) {
        config.resolution.title_similarity_threshold = parse_threshold(ENV_TITLE_THRESHOLD, &value)?;
    }
    if let Some(value) = lookup(ENV_COMPANY_THRESHOLD) {
        config.linking.company_link_threshold = parse_threshold(ENV_COMPANY_THRESHOLD, &value)?;
    }
    Ok(())
}

fn parse_threshold(name: &str, value: &str) -> CliResult<Threshold> {
    let parsed: f64 = value
        .trim()
        .parse()
        .map_err(|_| CliError::Config(format!("{} must be a number, got '{}'", name, value)))?;
    Threshold::new(parsed).map_err(|e| CliError::Config(format!("{}: {}", name, e)))
}

/// Read the embedding API key from the configured environment variable
pub fn get_api_key(config: &EmbeddingConfig) -> CliResult<String> {
    std::env::var(&config.api_key_env)
        .ok()
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| {
            CliError::Config(format!(
                "{} environment variable not set (required by [embedding])",
                config.api_key_env
            ))
        })
}

/// Every location searched for jobmerge.toml, for error reporting
pub fn get_config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(mut current) = std::env::current_dir() {
        loop {
            paths.push(current.join(CONFIG_FILE_NAME));
            if !current.pop() {
                break;
            }
        }
    }
    paths
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use jobmerge::MergeConflictPolicy;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_config_found_in_parent_directory() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(
            temp_dir.path().join(CONFIG_FILE_NAME),
            "[resolution]\nmerge_conflict_policy = \"prefer_most_recent\"\n\n[store]\ndb_path = \"data/jobs.db\"\n",
        )
        .unwrap();

        let path = resolve_config_file(&nested).unwrap();
        assert_eq!(path, temp_dir.path().join(CONFIG_FILE_NAME));

        let config = load_config_file(&path).unwrap();
        assert_eq!(
            config.resolution.merge_conflict_policy,
            MergeConflictPolicy::PreferMostRecent
        );
        assert_eq!(config.store.db_path, temp_dir.path().join("data/jobs.db"));
    }

    #[test]
    fn test_missing_config_file() {
        let temp_dir = TempDir::new().unwrap();
        let found = resolve_config_file(temp_dir.path());
        assert!(found.map_or(true, |p| !p.starts_with(temp_dir.path())));
    }

    #[test]
    fn test_invalid_config_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[resolution]\ntitle_similarity_threshold = 150\n").unwrap();
        assert!(matches!(load_config_file(&path), Err(CliError::Config(_))));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_DB_PATH, "/tmp/override.db"),
            (ENV_TITLE_THRESHOLD, "80"),
            (ENV_COMPANY_THRESHOLD, "95.5"),
        ]);
        let mut config = ResolverConfig::default();
        config.store.backend = StoreBackend::Memory;

        apply_env_overrides(&mut config, |name| env.get(name).map(|v| v.to_string())).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.store.db_path, PathBuf::from("/tmp/override.db"));
        assert_eq!(config.resolution.title_similarity_threshold.value(), 80.0);
        assert_eq!(config.linking.company_link_threshold.value(), 95.5);
    }

    #[test]
    fn test_env_override_rejects_bad_threshold() {
        let mut config = ResolverConfig::default();
        let result = apply_env_overrides(&mut config, |name| {
            (name == ENV_TITLE_THRESHOLD).then(|| "high".to_string())
        });
        assert!(matches!(result, Err(CliError::Config(_))));

        let result = apply_env_overrides(&mut config, |name| {
            (name == ENV_COMPANY_THRESHOLD).then(|| "101".to_string())
        });
        assert!(matches!(result, Err(CliError::Config(_))));
    }

    #[test]
    fn test_search_paths_end_at_root() {
        let paths = get_config_search_paths();
        assert!(!paths.is_empty());
        assert!(paths.iter().all(|p| p.ends_with(CONFIG_FILE_NAME)));
    }
}
