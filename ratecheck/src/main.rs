use clap::Parser;
use colored::Colorize;

use ratecheck::cli::{Cli, Commands};
use ratecheck::commands;
use ratecheck::error::CliError;
use ratecheck::logging;
use ratecheck::output::OutputWriter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    // A broken config still gets logging, so `config validate` can report it.
    let loaded = commands::config::load_effective(config_path).await;
    let mut general = loaded
        .as_ref()
        .map(|c| c.general.clone())
        .unwrap_or_default();
    if let Some(level) = &cli.log_level {
        general.log_level = level.clone();
    }
    if let Err(e) = logging::init_tracing(&general) {
        eprintln!("{} {:#}", "error:".red().bold(), e);
        std::process::exit(2);
    }
    tracing::debug!(config = ?config_path, "ratecheck starting");

    let writer = OutputWriter::new(cli.output);
    let result = match cli.command {
        Commands::Run(args) => match loaded {
            Ok(config) => commands::run::execute(args, config, &writer).await,
            Err(e) => Err(CliError::from(e)),
        },
        Commands::Config(args) => commands::config::execute(args, config_path, &writer).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(e.exit_code());
    }
}
