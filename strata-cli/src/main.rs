//! Strata CLI - command-line interface for the strata migration engine.

use clap::Parser;

use strata_cli::cli::{Cli, Command};
use strata_cli::commands;
use strata_cli::error::CliResult;
use strata_cli::{logging, output};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.global.verbose);

    if let Err(e) = run(cli).await {
        output::newline();
        output::error(&e.to_string());
        for detail in e.details() {
            output::error_detail(&detail);
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    match cli.command {
        Command::Migrations(args) => commands::migrations::run(args, &cli.global).await,
        Command::Database(args) => commands::database::run(args, &cli.global).await,
    }
}
