//! CLI-specific error types and exit code mapping

use ratecheck_core::error::RatecheckError;

/// CLI-specific error type.
///
/// Each variant carries enough context for a user-friendly message.
/// The `exit_code()` method maps errors to process exit codes.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration loading or validation failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// A subcommand-specific operation failed.
    #[error("{0}")]
    Command(String),

    /// At least one test case failed.
    #[error("{failed} of {total} test cases failed")]
    CasesFailed { failed: usize, total: usize },

    /// The run was stopped by Ctrl-C before all cases finished.
    #[error("interrupted after {completed} of {total} test cases")]
    Interrupted { completed: usize, total: usize },

    /// JSON serialisation failed during output rendering.
    #[error("json output error: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    /// IO error (file read, stdout write, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapped domain error from ratecheck-core.
    #[error("{0}")]
    Core(#[from] RatecheckError),
}

impl CliError {
    /// Map the error to a process exit code.
    ///
    /// | Code | Meaning                              |
    /// |------|--------------------------------------|
    /// | 0    | All cases passed                     |
    /// | 1    | A case failed / command error        |
    /// | 2    | Configuration error                  |
    /// | 10   | IO or fixture error                  |
    /// | 130  | Interrupted by Ctrl-C                |
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Interrupted { .. } => 130,
            Self::Config(_) | Self::Core(RatecheckError::Config(_)) => 2,
            Self::Io(_) | Self::Core(RatecheckError::Io(_) | RatecheckError::Fixture(_)) => 10,
            Self::CasesFailed { .. } | Self::Command(_) | Self::JsonSerialize(_) => 1,
        }
    }
}
