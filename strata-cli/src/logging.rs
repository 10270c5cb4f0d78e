//! Logging setup for the CLI.
//!
//! Logs go to stderr so they never mix with command output.
//!
//! # Environment Variables
//!
//! - `STRATA_DEBUG=1` - Enable debug logging
//! - `STRATA_LOG_LEVEL=trace|debug|info|warn|error` - Set a specific level
//! - `STRATA_LOG_FORMAT=json|pretty|compact` - Output format (default: compact)
//!
//! `-v` and `-vv` on the command line raise the level to info and debug.

use std::env;
use std::sync::Once;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static INIT: Once = Once::new();

const CRATES: &[&str] = &[
    "strata",
    "strata_cli",
    "strata_migrate",
    "strata_schema",
    "strata_sqlite",
];

const LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

/// Check if debug logging is enabled via `STRATA_DEBUG`.
pub fn is_debug_enabled() -> bool {
    env::var("STRATA_DEBUG")
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

/// Pick the log level.
///
/// `STRATA_LOG_LEVEL` wins over `STRATA_DEBUG`; `-v` flags can only raise
/// the result.
pub fn resolve_level(env_level: Option<&str>, debug: bool, verbosity: u8) -> &'static str {
    let base = env_level
        .and_then(|l| LEVELS.iter().position(|known| known.eq_ignore_ascii_case(l)))
        .unwrap_or(if debug { 3 } else { 1 });
    let level = match verbosity {
        0 => base,
        1 => base.max(2),
        _ => base.max(3),
    };
    LEVELS[level]
}

/// Get the configured log format from `STRATA_LOG_FORMAT`.
pub fn get_log_format() -> &'static str {
    env::var("STRATA_LOG_FORMAT")
        .map(|f| match f.to_lowercase().as_str() {
            "pretty" => "pretty",
            "json" => "json",
            _ => "compact",
        })
        .unwrap_or("compact")
}

/// Initialize logging. Subsequent calls are no-ops.
pub fn init(verbosity: u8) {
    INIT.call_once(|| {
        let env_level = env::var("STRATA_LOG_LEVEL").ok();
        let level = resolve_level(env_level.as_deref(), is_debug_enabled(), verbosity);

        let directives = CRATES
            .iter()
            .map(|krate| format!("{}={}", krate, level))
            .collect::<Vec<_>>()
            .join(",");
        let filter = EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("warn"));

        let registry = tracing_subscriber::registry().with(filter);
        let result = match get_log_format() {
            "json" => registry
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .try_init(),
            "pretty" => registry
                .with(fmt::layer().pretty().with_writer(std::io::stderr))
                .try_init(),
            _ => registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .try_init(),
        };

        if result.is_ok() {
            tracing::debug!(level, format = get_log_format(), "Strata logging initialized");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_level() {
        assert_eq!(resolve_level(None, false, 0), "warn");
        assert_eq!(resolve_level(None, false, 1), "info");
        assert_eq!(resolve_level(None, false, 2), "debug");
        assert_eq!(resolve_level(None, true, 0), "debug");
        assert_eq!(resolve_level(Some("TRACE"), false, 0), "trace");
        assert_eq!(resolve_level(Some("error"), true, 0), "error");
        assert_eq!(resolve_level(Some("error"), false, 1), "info");
        assert_eq!(resolve_level(Some("bogus"), false, 0), "warn");
    }
}
