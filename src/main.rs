//! Plinth - deterministic environment provisioning
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use plinth::cli::{Cli, Commands};
use plinth::config::{Config, ConfigManager};
use plinth::error::{PlinthError, PlinthResult};
use plinth::pipeline::CancelToken;
use std::process::ExitCode;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> PlinthResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };

    // Find local config unless --no-local is set
    let local_config_path = if cli.no_local {
        None
    } else {
        let cwd = std::env::current_dir()
            .map_err(|e| PlinthError::io("getting current directory", e))?;
        ConfigManager::find_local_config(&cwd)
    };

    let config = config_manager
        .load_merged(local_config_path.as_deref())
        .await?;

    init_logging(cli.verbose, &config);
    debug!("Using config {}", config_manager.path().display());
    if let Some(ref path) = local_config_path {
        debug!("Merged local config {}", path.display());
    }

    ConfigManager::ensure_state_dirs().await?;

    match cli.command {
        Commands::Run(args) => {
            let cancel = CancelToken::new();
            watch_ctrl_c(cancel.clone());
            plinth::cli::commands::run(args, &config, cancel).await
        }
        Commands::Plan(args) => plinth::cli::commands::plan(args, &config).await,
        Commands::Cache(args) => plinth::cli::commands::cache(args, &config).await,
        Commands::Config(args) => plinth::cli::commands::config(args, &config, cli.config).await,
    }
}

/// 0 = warn (progress only), 1 = info, 2+ = debug
fn init_logging(verbose: u8, config: &Config) {
    let filter = match verbose {
        0 => EnvFilter::new("plinth=warn"),
        1 => EnvFilter::new("plinth=info"),
        _ => EnvFilter::new("plinth=debug"),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if config.general.log_format == "json" {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}

/// Cancel the run on Ctrl-C; the current step is allowed to finish
fn watch_ctrl_c(cancel: CancelToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current step");
            cancel.cancel();
        }
    });
}
