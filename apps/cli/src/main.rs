//! courtlink CLI: batch facility geocoding and court jurisdiction mapping.
//!
//! Imports detention facility lists, geocodes their addresses, links each
//! facility to the federal district court covering its county, and verifies
//! the resulting database.

mod commands;

use std::process::ExitCode;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    commands::init_tracing(&cli);

    match commands::run(cli).await {
        Ok(code) => Ok(code),
        Err(report) if commands::is_config_error(&report) => {
            eprintln!("configuration error: {report}");
            Ok(ExitCode::from(commands::EXIT_CONFIG))
        }
        Err(report) => Err(report),
    }
}
