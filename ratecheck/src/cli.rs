//! CLI argument parsing using clap derive API
//!
//! Purely declarative; no side effects or I/O.

use std::path::PathBuf;

use clap::builder::PossibleValuesParser;
use clap::{Args, Parser, Subcommand, ValueEnum};

use ratecheck_core::config::LOG_LEVELS;

/// ratecheck -- verify that a room enforces its upload rate limit.
///
/// Use `ratecheck <COMMAND> --help` for subcommand details.
#[derive(Parser, Debug)]
#[command(name = "ratecheck", version, about, long_about = None)]
pub struct Cli {
    /// Path to the ratecheck.toml configuration file. Built-in defaults are
    /// used when omitted.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, global = true, value_parser = PossibleValuesParser::new(LOG_LEVELS))]
    pub log_level: Option<String>,

    /// Output format.
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// Machine-readable JSON.
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the configured test cases.
    Run(RunArgs),

    /// Manage configuration.
    Config(ConfigArgs),
}

// ---- run ----

/// Run test cases sequentially and report the outcome.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Test case as SIZE:RATE[:SECS], e.g. 50KB:10KB:5. Repeatable; replaces
    /// the configured cases.
    #[arg(long = "case", value_name = "SIZE:RATE[:SECS]")]
    pub cases: Vec<String>,

    /// Override the directory fixtures are created in.
    #[arg(long)]
    pub work_dir: Option<PathBuf>,
}

// ---- config ----

/// Manage ratecheck configuration.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors.
    Validate,
    /// Show the effective configuration (file + env overrides + defaults).
    Show {
        /// Show only a specific section (general, binaries, identity, timing,
        /// ports, validation, protocol, cases).
        #[arg(long)]
        section: Option<String>,
    },
}
