//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Plinth - deterministic environment provisioning
///
/// Builds an application environment as a chain of cached layers: base,
/// dependencies, source, package. Unchanged inputs are never rebuilt.
#[derive(Parser, Debug)]
#[command(name = "plinth")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "PLINTH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Skip local plinth.toml discovery
    #[arg(long, global = true)]
    pub no_local: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Provision the environment, reusing cached layers
    Run(RunArgs),

    /// Show step fingerprints and cache status without running anything
    Plan(PlanArgs),

    /// Manage the layer cache
    Cache(CacheArgs),

    /// Show or edit configuration
    Config(ConfigArgs),
}

/// Inputs shared by `run` and `plan`
#[derive(Parser, Debug, Clone)]
pub struct InputArgs {
    /// Requirements manifest
    #[arg(short, long, default_value = "requirements.txt")]
    pub manifest: PathBuf,

    /// Application source directory
    #[arg(short, long, default_value = ".")]
    pub source: PathBuf,
}

/// Arguments for the run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Time limit per step in seconds, overriding config
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Use a throwaway in-memory cache for this run
    #[arg(long)]
    pub no_cache: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments for the plan command
#[derive(Parser, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON output
    Json,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show effective configuration
    Show,

    /// Show configuration file path
    Path,

    /// Write the default configuration file
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., base.image)
        key: String,
        /// Value to set; lists are comma-separated
        value: String,
        /// Write to ./plinth.toml instead of the global config
        #[arg(long)]
        local: bool,
    },
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List cache entries, newest first
    List {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show one entry (full fingerprint or unique prefix)
    Info {
        /// Fingerprint or prefix
        fingerprint: String,
    },

    /// Remove entries older than N days
    Gc {
        /// Age threshold in days (default: from config)
        #[arg(long)]
        days: Option<u32>,

        /// Dry run - show what would be removed
        #[arg(long)]
        dry_run: bool,
    },

    /// Forget one entry, e.g. to retry a recorded failure
    Forget {
        /// Fingerprint or prefix
        fingerprint: String,
    },

    /// Remove every entry
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_defaults() {
        let cli = Cli::try_parse_from(["plinth", "run"]).unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.input.manifest, PathBuf::from("requirements.txt"));
                assert_eq!(args.input.source, PathBuf::from("."));
                assert_eq!(args.format, OutputFormat::Text);
                assert!(!args.no_cache);
                assert!(args.timeout.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["plinth", "plan", "-vv", "--no-local", "--format", "json"])
            .unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(cli.no_local);
        assert!(matches!(cli.command, Commands::Plan(PlanArgs { format: OutputFormat::Json, .. })));
    }

    #[test]
    fn cache_subcommands_parse() {
        let cli = Cli::try_parse_from(["plinth", "cache", "gc", "--days", "7", "--dry-run"]).unwrap();
        match cli.command {
            Commands::Cache(CacheArgs {
                action: CacheAction::Gc { days, dry_run },
            }) => {
                assert_eq!(days, Some(7));
                assert!(dry_run);
            }
            other => panic!("unexpected {other:?}"),
        }

        assert!(Cli::try_parse_from(["plinth", "cache", "forget"]).is_err());
    }
}
