//! atsync CLI Binary

use anyhow::Context;
use atsync::logging::init_logging;
use atsync::tooling::cli::{Cli, CliContext};
use clap::Parser;
use std::process;

async fn run(cli: Cli) -> anyhow::Result<String> {
    let mut context = CliContext::new(cli.project.clone(), cli.config.clone())
        .context("Error loading configuration")?;
    context.apply_log_overrides(cli.log_level.as_deref(), cli.log_format.as_deref());
    init_logging(Some(&context.config().logging)).context("Error initializing logging")?;
    Ok(context.execute(&cli.command).await?)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(output) => {
            println!("{}", output);
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}
