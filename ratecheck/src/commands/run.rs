//! `ratecheck run` command handler

use tracing::{info, warn};

use ratecheck_core::config::RatecheckConfig;
use ratecheck_core::error::RatecheckError;
use ratecheck_core::types::TestCase;

use crate::cli::{OutputFormat, RunArgs};
use crate::error::CliError;
use crate::output::OutputWriter;
use crate::runner::Harness;

/// Execute the `run` command.
///
/// Cases given with `--case` replace the configured ones. Ctrl-C stops the
/// run after tearing down the case in flight. Text output is streamed per
/// case; JSON output is one document written when the run ends.
pub async fn execute(
    args: RunArgs,
    mut config: RatecheckConfig,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    if let Some(work_dir) = args.work_dir {
        config.general.work_dir = work_dir;
    }
    let cases = select_cases(&args.cases, &config)?;

    tokio::fs::create_dir_all(&config.general.work_dir).await?;
    info!(
        cases = cases.len(),
        work_dir = %config.general.work_dir.display(),
        "starting run"
    );

    let harness = Harness::new(config);
    let report = match writer.format() {
        // Text output shows each case as it finishes, then the totals.
        OutputFormat::Text => {
            let report = harness
                .run_observed(&cases, shutdown_signal(), |case| {
                    if let Err(e) = writer.render(case) {
                        warn!(error = %e, "failed to print case result");
                    }
                })
                .await?;
            writer.render(&report.summary())?;
            report
        }
        OutputFormat::Json => {
            let report = harness.run_until(&cases, shutdown_signal()).await?;
            writer.render(&report)?;
            report
        }
    };

    if report.interrupted {
        Err(CliError::Interrupted {
            completed: report.total(),
            total: cases.len(),
        })
    } else if report.all_passed() {
        Ok(())
    } else {
        Err(CliError::CasesFailed {
            failed: report.failed,
            total: report.total(),
        })
    }
}

/// Parse `--case` specs, or fall back to the configured cases.
pub fn select_cases(specs: &[String], config: &RatecheckConfig) -> Result<Vec<TestCase>, CliError> {
    let cases = if specs.is_empty() {
        config.test_cases()
    } else {
        specs.iter().map(|s| TestCase::parse_spec(s)).collect()
    };
    cases.map_err(|e| CliError::Core(RatecheckError::Config(e)))
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => warn!("ctrl-c received, stopping"),
        Err(e) => {
            warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    }
}
