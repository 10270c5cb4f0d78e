//! CLI command implementations.

pub mod database;
pub mod migrations;

use strata_sqlite::SqliteConnector;
use tracing::debug;

use crate::cli::GlobalArgs;
use crate::config::Config;
use crate::error::{CliError, CliResult};

/// Load the configuration file, which `migrations enable` must have written.
pub(crate) fn load_config(global: &GlobalArgs) -> CliResult<Config> {
    if !global.config.exists() {
        return Err(CliError::Config(format!(
            "{} not found, run `strata migrations enable` first",
            global.config.display()
        )));
    }
    Config::load(&global.config)
}

/// Connect to the configured database.
pub(crate) async fn connect(config: &Config, global: &GlobalArgs) -> CliResult<SqliteConnector> {
    let url = config.database_url(global.database_url.as_deref())?;
    debug!(url = %url, "Connecting to database");
    Ok(SqliteConnector::from_url(&url).await?)
}

/// Lock owner recorded while this process migrates.
pub(crate) fn lock_owner() -> String {
    format!("strata-cli (pid {})", std::process::id())
}
