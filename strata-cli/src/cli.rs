//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::config::CONFIG_FILE_NAME;

/// Strata CLI - schema migrations for relational databases
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(author = "Pegasus Heavy Industries LLC")]
#[command(version)]
#[command(about = "Strata CLI - schema migrations for relational databases", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Options shared by every command
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every command
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = CONFIG_FILE_NAME)]
    pub config: PathBuf,

    /// Database connection URL (overrides the configuration file)
    #[arg(long, global = true, env = "STRATA_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Migration tracking and scaffolding
    Migrations(MigrationsArgs),

    /// Operations against the target database
    Database(DatabaseArgs),
}

// =============================================================================
// Migrations Command
// =============================================================================

/// Arguments for the `migrations` command
#[derive(Args, Debug)]
pub struct MigrationsArgs {
    #[command(subcommand)]
    pub command: MigrationsSubcommand,
}

/// Migrations subcommands
#[derive(Subcommand, Debug)]
pub enum MigrationsSubcommand {
    /// Enable migrations for this project
    Enable,

    /// Scaffold a new migration from the current model
    Add(AddArgs),

    /// List applied and pending migrations
    List,
}

/// Arguments for `migrations add`
#[derive(Args, Debug)]
pub struct AddArgs {
    /// Name for the migration
    pub name: String,

    /// Treat a table as renamed instead of dropped and created
    #[arg(long = "rename-table", value_name = "FROM=TO", value_parser = parse_table_rename)]
    pub rename_tables: Vec<TableRename>,

    /// Treat a column as renamed instead of dropped and added
    #[arg(long = "rename-column", value_name = "TABLE.FROM=TO", value_parser = parse_column_rename)]
    pub rename_columns: Vec<ColumnRename>,
}

/// A `FROM=TO` table rename hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRename {
    pub from: String,
    pub to: String,
}

/// A `TABLE.FROM=TO` column rename hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRename {
    pub table: String,
    pub from: String,
    pub to: String,
}

fn split_pair(value: &str, expected: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((from, to)) if !from.trim().is_empty() && !to.trim().is_empty() => {
            Ok((from.trim().to_string(), to.trim().to_string()))
        }
        _ => Err(format!("expected {}, got '{}'", expected, value)),
    }
}

fn parse_table_rename(value: &str) -> Result<TableRename, String> {
    let (from, to) = split_pair(value, "FROM=TO")?;
    Ok(TableRename { from, to })
}

fn parse_column_rename(value: &str) -> Result<ColumnRename, String> {
    let (qualified, to) = split_pair(value, "TABLE.FROM=TO")?;
    match qualified.split_once('.') {
        Some((table, from)) if !table.is_empty() && !from.is_empty() => Ok(ColumnRename {
            table: table.to_string(),
            from: from.to_string(),
            to,
        }),
        _ => Err(format!("expected TABLE.FROM=TO, got '{}'", value)),
    }
}

// =============================================================================
// Database Command
// =============================================================================

/// Arguments for the `database` command
#[derive(Args, Debug)]
pub struct DatabaseArgs {
    #[command(subcommand)]
    pub command: DatabaseSubcommand,
}

/// Database subcommands
#[derive(Subcommand, Debug)]
pub enum DatabaseSubcommand {
    /// Update the database to a migration (latest by default, 0 to revert everything)
    Update(UpdateArgs),

    /// Clear a migration lock left behind by a crashed process
    Unlock,
}

/// Arguments for `database update`
#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Target migration id or name; `0` reverts all migrations
    pub migration: Option<String>,

    /// Show what would run without touching the database
    #[arg(long)]
    pub dry_run: bool,

    /// Per-migration transaction timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_rename_hints() {
        let cli = Cli::try_parse_from([
            "strata",
            "migrations",
            "add",
            "rename_things",
            "--rename-table",
            "people=users",
            "--rename-column",
            "users.name=full_name",
        ])
        .unwrap();

        let Command::Migrations(MigrationsArgs {
            command: MigrationsSubcommand::Add(args),
        }) = cli.command
        else {
            panic!("expected migrations add");
        };
        assert_eq!(args.name, "rename_things");
        assert_eq!(
            args.rename_tables,
            vec![TableRename {
                from: "people".into(),
                to: "users".into()
            }]
        );
        assert_eq!(
            args.rename_columns,
            vec![ColumnRename {
                table: "users".into(),
                from: "name".into(),
                to: "full_name".into()
            }]
        );
    }

    #[test]
    fn test_rejects_malformed_hints() {
        assert!(parse_table_rename("users").is_err());
        assert!(parse_table_rename("=users").is_err());
        assert!(parse_column_rename("name=full_name").is_err());
        assert!(parse_column_rename("users.=x").is_err());
    }

    #[test]
    fn test_update_args() {
        let cli = Cli::try_parse_from([
            "strata", "database", "update", "0", "--dry-run", "--timeout", "5", "-vv",
        ])
        .unwrap();
        assert_eq!(cli.global.verbose, 2);

        let Command::Database(DatabaseArgs {
            command: DatabaseSubcommand::Update(args),
        }) = cli.command
        else {
            panic!("expected database update");
        };
        assert_eq!(args.migration.as_deref(), Some("0"));
        assert!(args.dry_run);
        assert_eq!(args.timeout, Some(5));
    }
}
