//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::history::DEFAULT_HISTORY_TABLE;

/// Configuration for the migration engine.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Directory holding migration artifacts.
    pub migrations_dir: PathBuf,
    /// Name of the history table.
    pub history_table: String,
    /// Upper bound for each migration transaction.
    pub transaction_timeout: Option<Duration>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            migrations_dir: PathBuf::from("./migrations"),
            history_table: DEFAULT_HISTORY_TABLE.to_string(),
            transaction_timeout: None,
        }
    }
}

impl MigrationConfig {
    /// Create a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the migrations directory.
    pub fn migrations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations_dir = dir.into();
        self
    }

    /// Set the history table name.
    pub fn history_table(mut self, table: impl Into<String>) -> Self {
        self.history_table = table.into();
        self
    }

    /// Set the per-migration transaction timeout.
    pub fn transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = Some(timeout);
        self
    }

    /// Remove the transaction timeout.
    pub fn no_transaction_timeout(mut self) -> Self {
        self.transaction_timeout = None;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MigrationConfig::new();
        assert_eq!(config.history_table, "_strata_migrations");
        assert!(config.transaction_timeout.is_none());
    }

    #[test]
    fn test_builder() {
        let config = MigrationConfig::new()
            .migrations_dir("db/migrations")
            .history_table("schema_history")
            .transaction_timeout(Duration::from_secs(5));

        assert_eq!(config.migrations_dir, PathBuf::from("db/migrations"));
        assert_eq!(config.history_table, "schema_history");
        assert_eq!(config.transaction_timeout, Some(Duration::from_secs(5)));
        assert!(config.no_transaction_timeout().transaction_timeout.is_none());
    }
}
