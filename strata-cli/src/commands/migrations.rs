//! `strata migrations` commands - tracking, scaffolding and listing.

use strata_migrate::{Applier, FileRepository, HistoryStore, Scaffolder};
use strata_schema::FileModelProvider;

use crate::cli::{AddArgs, GlobalArgs, MigrationsArgs, MigrationsSubcommand};
use crate::commands::{connect, load_config, lock_owner};
use crate::config::{Config, DEFAULT_DATABASE_URL};
use crate::error::CliResult;
use crate::output::{self, success};

const MODEL_TEMPLATE: &str = r#"# Strata model: the schema migrations move the database towards.
#
# [[tables]]
# name = "users"
#
# [[tables.columns]]
# name = "id"
# type = "integer"
#
# [[tables.columns]]
# name = "email"
# type = { varchar = 255 }
# nullable = true
#
# [[tables.constraints]]
# name = "pk_users"
# kind = "primary_key"
# columns = ["id"]
"#;

/// Run the migrations command
pub async fn run(args: MigrationsArgs, global: &GlobalArgs) -> CliResult<()> {
    match args.command {
        MigrationsSubcommand::Enable => run_enable(global).await,
        MigrationsSubcommand::Add(add_args) => run_add(add_args, global).await,
        MigrationsSubcommand::List => run_list(global).await,
    }
}

/// Run `strata migrations enable`
async fn run_enable(global: &GlobalArgs) -> CliResult<()> {
    output::header("Enable Migrations");

    output::step(1, 4, "Writing configuration...");
    let config = if global.config.exists() {
        output::list_item(&format!("{} already exists", global.config.display()));
        Config::load(&global.config)?
    } else {
        let mut config = Config::new_at(&global.config);
        config.database.url = Some(
            global
                .database_url
                .clone()
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
        );
        config.save(&global.config)?;
        output::list_item(&format!("Created {}", global.config.display()));
        config
    };

    output::step(2, 4, "Preparing model file...");
    let model_path = config.model_path();
    if model_path.exists() {
        output::list_item(&format!("{} already exists", model_path.display()));
    } else {
        if let Some(parent) = model_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&model_path, MODEL_TEMPLATE)?;
        output::list_item(&format!("Created {}", model_path.display()));
    }

    output::step(3, 4, "Preparing migrations directory...");
    let migrations_dir = config.migrations_dir();
    std::fs::create_dir_all(&migrations_dir)?;
    output::list_item(&migrations_dir.display().to_string());

    output::step(4, 4, "Creating history table...");
    let connector = connect(&config, global).await?;
    HistoryStore::new(&connector, config.migrations.table_name.clone())
        .ensure_table()
        .await?;
    output::list_item(&config.migrations.table_name);

    output::newline();
    success("Migrations enabled");
    output::newline();
    output::section("Next steps");
    output::list_item(&format!("Describe your schema in {}", model_path.display()));
    output::list_item("Run `strata migrations add <name>` to scaffold a migration");

    Ok(())
}

/// Run `strata migrations add <name>`
async fn run_add(args: AddArgs, global: &GlobalArgs) -> CliResult<()> {
    output::header("Add Migration");

    let config = load_config(global)?;
    let provider = FileModelProvider::new(config.model_path());
    let repository = FileRepository::new(config.migrations_dir());

    output::kv("Model", &provider.path().display().to_string());
    output::kv("Migrations", &repository.dir().display().to_string());
    output::newline();

    let mut scaffolder = Scaffolder::new(&repository, &provider);
    for rename in args.rename_tables {
        scaffolder = scaffolder.rename_table(rename.from, rename.to);
    }
    for rename in args.rename_columns {
        scaffolder = scaffolder.rename_column(rename.table, rename.from, rename.to);
    }

    let artifact = scaffolder.scaffold(&args.name).await?;

    output::section("Operations");
    for operation in &artifact.up {
        let line = operation.describe();
        if operation.is_destructive() {
            output::list_item(&output::style_error(&line));
        } else {
            output::list_item(&line);
        }
    }
    output::newline();
    success(&format!("Migration '{}' created", artifact.id));
    output::dim(&repository.artifact_path(&artifact.id).display().to_string());

    Ok(())
}

/// Run `strata migrations list`
async fn run_list(global: &GlobalArgs) -> CliResult<()> {
    output::header("Migrations");

    let config = load_config(global)?;
    let repository = FileRepository::new(config.migrations_dir());
    let connector = connect(&config, global).await?;
    let applier = Applier::new(&repository, &connector, config.engine_config(None))
        .with_owner(lock_owner());

    let status = applier.status().await?;

    if status.entries.is_empty() {
        output::info("No migrations found");
    }
    for entry in &status.entries {
        let line = match (&entry.applied_at, entry.applied) {
            (Some(at), true) => format!(
                "{} {} {}",
                output::style_success("applied"),
                entry.id,
                at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            (_, true) => format!("{} {}", output::style_success("applied"), entry.id),
            (_, false) => format!("{} {}", output::style_pending("pending"), entry.id),
        };
        output::list_item(&line);
    }

    if !status.drift.is_empty() {
        output::newline();
        output::warn("History drift detected:");
        for issue in &status.drift {
            output::list_item(&output::style_error(&issue.to_string()));
        }
        output::newline();
    } else {
        let pending = status.pending().count();
        output::newline();
        output::kv("Applied", &status.applied().count().to_string());
        output::kv("Pending", &pending.to_string());
    }

    status.ensure_consistent()?;
    Ok(())
}
