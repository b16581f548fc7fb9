mod cli;
mod commands;
mod logging;

use clap::Parser;

use crate::cli::{Cli, Command};

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init_logging()?;

    let cli = Cli::parse();
    match &cli.command {
        Command::Patients => commands::run_patients(cli.source.to_config()?),
        Command::Readings(args) => commands::run_readings(cli.source.to_config()?, args),
        Command::Analyze(args) => commands::run_analyze(args),
    }
}
