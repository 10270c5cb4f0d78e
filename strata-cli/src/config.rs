//! CLI configuration handling.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CliError, CliResult};

/// Default config file name (lives in project root)
pub const CONFIG_FILE_NAME: &str = "strata.toml";

/// Default model file path (relative to project root)
pub const MODEL_FILE_PATH: &str = "strata/model.toml";

/// Default migrations directory (relative to project root)
pub const MIGRATIONS_DIR: &str = "strata/migrations";

/// Database URL written by `migrations enable` when none is given
pub const DEFAULT_DATABASE_URL: &str = "sqlite://strata.db";

static ENV_VAR: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").ok());

/// Strata CLI configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Model configuration
    pub model: ModelConfig,

    /// Migration configuration
    pub migrations: MigrationsConfig,

    /// Directory relative paths are resolved against
    #[serde(skip)]
    root: PathBuf,
}

/// Database configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database connection URL, may reference `${VARS}`
    pub url: Option<String>,
}

/// Model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Model file
    pub path: PathBuf,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(MODEL_FILE_PATH),
        }
    }
}

/// Migration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationsConfig {
    /// Directory for migration artifacts
    pub directory: PathBuf,

    /// History table name
    pub table_name: String,

    /// Per-migration transaction timeout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_timeout_secs: Option<u64>,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(MIGRATIONS_DIR),
            table_name: strata_migrate::DEFAULT_HISTORY_TABLE.to_string(),
            transaction_timeout_secs: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut config: Config = toml::from_str(&content)?;
        config.root = base_dir(path);
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> CliResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Default configuration rooted next to `path`
    pub fn new_at(path: &Path) -> Self {
        Self {
            root: base_dir(path),
            ..Self::default()
        }
    }

    /// Model file path
    pub fn model_path(&self) -> PathBuf {
        self.root.join(&self.model.path)
    }

    /// Migrations directory path
    pub fn migrations_dir(&self) -> PathBuf {
        self.root.join(&self.migrations.directory)
    }

    /// Resolve the database URL.
    ///
    /// Precedence: command line / `STRATA_DATABASE_URL`, then the
    /// configuration file, then `DATABASE_URL`.
    pub fn database_url(&self, cli_url: Option<&str>) -> CliResult<String> {
        if let Some(url) = cli_url {
            return expand_env(url);
        }
        if let Some(url) = &self.database.url {
            return expand_env(url);
        }
        std::env::var("DATABASE_URL").map_err(|_| {
            CliError::Config(
                "no database URL: pass --database-url, set STRATA_DATABASE_URL or database.url"
                    .to_string(),
            )
        })
    }

    /// Engine configuration, with an optional timeout override in seconds
    pub fn engine_config(&self, timeout_secs: Option<u64>) -> strata_migrate::MigrationConfig {
        let config = strata_migrate::MigrationConfig::new()
            .migrations_dir(self.migrations_dir())
            .history_table(self.migrations.table_name.clone());
        match timeout_secs.or(self.migrations.transaction_timeout_secs) {
            Some(secs) => config.transaction_timeout(Duration::from_secs(secs)),
            None => config,
        }
    }
}

fn base_dir(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Replace `${VAR}` references with environment values.
pub fn expand_env(value: &str) -> CliResult<String> {
    let Some(re) = ENV_VAR.as_ref() else {
        return Ok(value.to_string());
    };

    let mut missing = Vec::new();
    let expanded = re.replace_all(value, |caps: &regex_lite::Captures<'_>| {
        let name = &caps[1];
        std::env::var(name).unwrap_or_else(|_| {
            missing.push(name.to_string());
            String::new()
        })
    });

    if !missing.is_empty() {
        return Err(CliError::Config(format!(
            "environment variable(s) not set: {}",
            missing.join(", ")
        )));
    }
    Ok(expanded.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::new_at(Path::new("strata.toml"));
        assert_eq!(config.model_path(), PathBuf::from("./strata/model.toml"));
        assert_eq!(config.migrations_dir(), PathBuf::from("./strata/migrations"));
        assert_eq!(config.migrations.table_name, "_strata_migrations");
    }

    #[test]
    fn test_load_resolves_paths_against_config_dir() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("strata.toml");
        std::fs::write(
            &path,
            r#"
[database]
url = "sqlite://app.db"

[model]
path = "db/model.toml"

[migrations]
directory = "db/migrations"
table_name = "schema_history"
transaction_timeout_secs = 30
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.model_path(), dir.path().join("db/model.toml"));
        assert_eq!(config.migrations_dir(), dir.path().join("db/migrations"));
        assert_eq!(config.database_url(None).unwrap(), "sqlite://app.db");

        let engine = config.engine_config(None);
        assert_eq!(engine.history_table, "schema_history");
        assert_eq!(engine.transaction_timeout, Some(Duration::from_secs(30)));
        assert_eq!(
            config.engine_config(Some(2)).transaction_timeout,
            Some(Duration::from_secs(2))
        );
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("strata.toml");
        let mut config = Config::new_at(&path);
        config.database.url = Some("sqlite://x.db".to_string());
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.database.url.as_deref(), Some("sqlite://x.db"));
        assert_eq!(loaded.migrations.directory, PathBuf::from(MIGRATIONS_DIR));
    }

    #[test]
    fn test_cli_url_wins() {
        let mut config = Config::default();
        config.database.url = Some("sqlite://config.db".to_string());
        assert_eq!(
            config.database_url(Some("sqlite://cli.db")).unwrap(),
            "sqlite://cli.db"
        );
    }

    #[test]
    fn test_expand_env() {
        assert_eq!(expand_env("sqlite://plain.db").unwrap(), "sqlite://plain.db");
        let path = std::env::var("PATH").unwrap_or_default();
        assert_eq!(expand_env("${PATH}").unwrap(), path);

        let err = expand_env("sqlite://${STRATA_TEST_SURELY_UNSET_VAR}/db").unwrap_err();
        assert!(err.to_string().contains("STRATA_TEST_SURELY_UNSET_VAR"));
    }
}
