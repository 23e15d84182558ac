// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the coldwatch project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

// Main entry point for the coldwatch sensor collector

use anyhow::Result;
use clap::Parser;
use log::info;

use std::path::PathBuf;

use coldwatch::config::Config;
use coldwatch::daemon::launch_daemon::Daemon;
use coldwatch::state::AppState;

/// Cold-room temperature and humidity collector
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file (YAML format)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to a configuration to validate and exit
    #[arg(long)]
    validate_config: Option<PathBuf>,

    /// Archive directory for daily files
    #[arg(long)]
    archive_dir: Option<PathBuf>,

    /// Poll interval in milliseconds
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// History query range, e.g. "1h" or "2d"
    #[arg(long)]
    range: Option<String>,

    /// Enable verbose logging (debug level)
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Disable all logging output
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.quiet {
        log::LevelFilter::Off
    } else if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    // Validate configuration file if --validate-config is set
    if let Some(validate_path) = args.validate_config {
        if !validate_path.exists() {
            return Err(anyhow::anyhow!(
                "Configuration file does not exist: {}",
                validate_path.display()
            ));
        }

        Config::from_file(&validate_path)
            .map_err(|err| anyhow::anyhow!("Configuration validation failed: {}", err))?;
        println!("Configuration file is valid: {}", validate_path.display());
        return Ok(());
    }

    // Load configuration
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from("config.yaml"));
    let mut config = Config::from_file(&config_path)?;

    // Apply command line overrides
    config.apply_args(args.archive_dir, args.poll_interval_ms, args.range);
    config.validate()?;

    let state = AppState::new(config);

    info!("Starting in daemon mode");
    let mut daemon = Daemon::new(state);
    daemon.launch()?;

    // Wait for termination signal
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Received shutdown signal, terminating daemon");
            daemon.shutdown();
            daemon.join().await?;
        }
        Err(err) => {
            eprintln!("Error waiting for shutdown signal: {}", err);
        }
    }

    Ok(())
}
