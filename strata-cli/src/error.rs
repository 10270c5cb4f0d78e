//! CLI error types and result alias.

use miette::Diagnostic;
use strata_migrate::MigrationError;
use strata_schema::SchemaError;
use strata_sqlite::SqliteError;
use thiserror::Error;

/// Result type alias for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// CLI error types
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// IO error
    #[error("IO error: {0}")]
    #[diagnostic(code(strata::io))]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    #[diagnostic(code(strata::config))]
    Config(String),

    /// Model error
    #[error("Model error: {0}")]
    #[diagnostic(code(strata::model))]
    Model(#[from] SchemaError),

    /// Migration error
    #[error("{0}")]
    #[diagnostic(code(strata::migration))]
    Migration(#[from] MigrationError),

    /// Database error
    #[error("Database error: {0}")]
    #[diagnostic(code(strata::database))]
    Database(#[from] SqliteError),
}

impl CliError {
    /// Individual problems behind an aggregated model validation failure.
    pub fn details(&self) -> Vec<String> {
        let schema = match self {
            Self::Model(e) => e,
            Self::Migration(MigrationError::Schema(e)) => e,
            _ => return Vec::new(),
        };
        match schema {
            SchemaError::ValidationFailed { errors, .. } => {
                errors.iter().map(ToString::to_string).collect()
            }
            _ => Vec::new(),
        }
    }
}

impl From<toml::de::Error> for CliError {
    fn from(err: toml::de::Error) -> Self {
        CliError::Config(format!("Failed to parse TOML: {}", err))
    }
}

impl From<toml::ser::Error> for CliError {
    fn from(err: toml::ser::Error) -> Self {
        CliError::Config(format!("Failed to serialize TOML: {}", err))
    }
}
