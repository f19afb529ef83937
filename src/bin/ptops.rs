//! ptops CLI Binary
//!
//! Operator front end for the bundle registry: load, list, activate and unload bundles.

use anyhow::Context;
use clap::Parser;
use ptops_ingest::cli::{Cli, RunContext};
use ptops_ingest::config::ConfigLoader;
use ptops_ingest::logging::{init_logging, LoggingConfig};
use std::process;
use tracing::{error, info};

fn main() {
    let cli = Cli::parse();

    let logging_config = build_logging_config(&cli);
    if let Err(e) = init_logging(Some(&logging_config)) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    match run(&cli) {
        Ok(output) => {
            info!("Command completed successfully");
            println!("{}", output);
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<String> {
    let context = RunContext::new(cli.config.as_deref(), cli.out.as_deref(), cli.format)
        .context("failed to initialize ptops")?;
    let output = context
        .execute(&cli.command)
        .context("command failed")?;
    Ok(output)
}

/// Logging config from the config file, then CLI flags on top.
fn build_logging_config(cli: &Cli) -> LoggingConfig {
    if !cli.verbose && cli.log_level.is_none() {
        return LoggingConfig {
            level: "off".to_string(),
            ..LoggingConfig::default()
        };
    }

    let mut config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path).ok(),
        None => ConfigLoader::load().ok(),
    }
    .map(|c| c.logging)
    .unwrap_or_default();

    if let Some(level) = &cli.log_level {
        config.level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.format = format.clone();
    }
    config
}
