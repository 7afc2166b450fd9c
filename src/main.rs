//! CLI entry point for myrient-dl.

use std::fs;

use anyhow::{Context as _, Result};
use clap::Parser;
use myrient_core::Config;
use tracing::{debug, info};

mod cli;
mod commands;
mod progress;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // Logs go to stderr so --json output stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let config = load_config(&args)?;
    info!(
        db = %config.database_path.display(),
        download_root = %config.download_root.display(),
        "myrient-dl starting"
    );

    commands::run(args.command, config, args.quiet).await
}

/// Defaults, then the config file, then command-line overrides.
fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("cannot read config file {}", path.display()))?;
            Config::from_kv_str(&raw)
                .with_context(|| format!("invalid config file {}", path.display()))?
        }
        None => Config::default(),
    };
    if let Some(db) = &args.db {
        config.database_path.clone_from(db);
    }
    if let Some(root) = &args.download_root {
        config.download_root.clone_from(root);
    }
    Ok(config)
}
