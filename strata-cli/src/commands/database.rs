//! `strata database` commands - bring a database to a migration.

use strata_migrate::{Applier, CancellationFlag, Direction, FileRepository, Target};
use strata_sqlite::sql::lock_table_name;

use crate::cli::{DatabaseArgs, DatabaseSubcommand, GlobalArgs, UpdateArgs};
use crate::commands::{connect, load_config, lock_owner};
use crate::error::CliResult;
use crate::output::{self, success};

/// Run the database command
pub async fn run(args: DatabaseArgs, global: &GlobalArgs) -> CliResult<()> {
    match args.command {
        DatabaseSubcommand::Update(update_args) => run_update(update_args, global).await,
        DatabaseSubcommand::Unlock => run_unlock(global).await,
    }
}

/// Run `strata database update [migration]`
async fn run_update(args: UpdateArgs, global: &GlobalArgs) -> CliResult<()> {
    output::header("Update Database");

    let config = load_config(global)?;
    let target = args
        .migration
        .as_deref()
        .map(Target::parse)
        .unwrap_or(Target::Latest);
    let repository = FileRepository::new(config.migrations_dir());
    let connector = connect(&config, global).await?;

    let cancellation = CancellationFlag::new();
    let applier = Applier::new(&repository, &connector, config.engine_config(args.timeout))
        .with_owner(lock_owner())
        .with_cancellation(cancellation.clone());

    output::kv("Target", &target.to_string());
    output::kv("Migrations", &repository.dir().display().to_string());
    output::newline();

    if args.dry_run {
        let plan = applier.plan(&target).await?;
        if plan.is_empty() {
            success("Database is already up to date");
            return Ok(());
        }
        let verb = match plan.direction {
            Direction::Down => "revert",
            _ => "apply",
        };
        output::section(&format!("Would {} {} migration(s)", verb, plan.steps.len()));
        for step in &plan.steps {
            output::list_item(&step.id.to_string());
        }
        return Ok(());
    }

    // Ctrl-C stops between migrations; the current one still commits or rolls back.
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancellation.cancel();
        }
    });
    let result = applier.apply(&target).await;
    watcher.abort();
    let applied = result?;

    if !applied.has_changes() {
        success("Database is already up to date");
        return Ok(());
    }

    let verb = match applied.direction {
        Direction::Down => "Reverted",
        _ => "Applied",
    };
    for id in &applied.migrations {
        output::list_item(&format!("{} {}", verb, id));
    }
    output::newline();
    success(&format!(
        "{} {} migration(s) in {}ms",
        verb,
        applied.migrations.len(),
        applied.duration_ms
    ));

    let history = config.migrations.table_name.as_str();
    let lock = lock_table_name(history);
    let tables: Vec<String> = connector
        .introspect_tables()
        .await?
        .into_keys()
        .filter(|t| t != history && *t != lock)
        .collect();
    output::kv(
        "Tables",
        &if tables.is_empty() {
            "(none)".to_string()
        } else {
            tables.join(", ")
        },
    );

    Ok(())
}

/// Run `strata database unlock`
async fn run_unlock(global: &GlobalArgs) -> CliResult<()> {
    output::header("Unlock Database");

    let config = load_config(global)?;
    let repository = FileRepository::new(config.migrations_dir());
    let connector = connect(&config, global).await?;

    let history = config.migrations.table_name.as_str();
    match connector.lock_holder(history).await? {
        Some(owner) => output::kv("Held by", &owner),
        None => output::info("The migration lock is not held"),
    }

    Applier::new(&repository, &connector, config.engine_config(None))
        .force_unlock()
        .await?;
    success("Migration lock released");
    Ok(())
}
