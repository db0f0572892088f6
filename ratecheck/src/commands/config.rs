//! `ratecheck config` command handler

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use ratecheck_core::config::RatecheckConfig;
use ratecheck_core::error::RatecheckError;

use crate::cli::{ConfigAction, ConfigArgs};
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

const SECTIONS: &[&str] = &[
    "general",
    "binaries",
    "identity",
    "timing",
    "ports",
    "validation",
    "protocol",
    "cases",
];

/// Load the effective configuration.
///
/// With a path: file, then env overrides, then validation. Without one:
/// built-in defaults, then env overrides, then validation.
pub async fn load_effective(path: Option<&Path>) -> Result<RatecheckConfig, RatecheckError> {
    match path {
        Some(path) => RatecheckConfig::load(path).await,
        None => {
            let mut config = RatecheckConfig::default();
            config.apply_env_overrides();
            config.validate()?;
            Ok(config)
        }
    }
}

fn source_label(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| "(defaults)".to_owned())
}

/// Execute the `config` command.
pub async fn execute(
    args: ConfigArgs,
    config_path: Option<&Path>,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    match args.action {
        ConfigAction::Validate => execute_validate(config_path, writer).await,
        ConfigAction::Show { section } => execute_show(config_path, section, writer).await,
    }
}

/// Load and validate the configuration, reporting any errors.
///
/// # Errors
///
/// Returns `CliError::Config` if validation fails.
async fn execute_validate(config_path: Option<&Path>, writer: &OutputWriter) -> Result<(), CliError> {
    let source = source_label(config_path);
    info!(source = %source, "validating configuration");

    let report = match load_effective(config_path).await {
        Ok(config) => ConfigValidationReport {
            source,
            valid: true,
            cases: config.cases.len(),
            errors: Vec::new(),
        },
        Err(e) => ConfigValidationReport {
            source,
            valid: false,
            cases: 0,
            errors: vec![e.to_string()],
        },
    };

    writer.render(&report)?;

    if !report.valid {
        return Err(CliError::Config("configuration is invalid".to_owned()));
    }
    Ok(())
}

/// Display the effective configuration, or one section of it.
///
/// # Errors
///
/// Returns `CliError::Core` if loading fails or `CliError::Command` if the
/// section name is unknown.
async fn execute_show(
    config_path: Option<&Path>,
    section: Option<String>,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let source = source_label(config_path);
    info!(source = %source, "loading configuration");

    let config = load_effective(config_path).await?;
    let report = match section {
        Some(name) => {
            let value = section_value(&config, &name)?;
            let mut table = BTreeMap::new();
            table.insert(name.clone(), value);
            ConfigReport {
                source,
                section: Some(name),
                config_toml: to_toml(&table),
                config: table
                    .into_values()
                    .next()
                    .unwrap_or(serde_json::Value::Null),
            }
        }
        None => ConfigReport {
            source,
            section: None,
            config_toml: to_toml(&config),
            config: serde_json::to_value(&config)?,
        },
    };

    writer.render(&report)?;
    Ok(())
}

fn section_value(config: &RatecheckConfig, name: &str) -> Result<serde_json::Value, CliError> {
    let value = match name {
        "general" => serde_json::to_value(&config.general)?,
        "binaries" => serde_json::to_value(&config.binaries)?,
        "identity" => serde_json::to_value(&config.identity)?,
        "timing" => serde_json::to_value(&config.timing)?,
        "ports" => serde_json::to_value(&config.ports)?,
        "validation" => serde_json::to_value(&config.validation)?,
        "protocol" => serde_json::to_value(&config.protocol)?,
        "cases" => serde_json::to_value(&config.cases)?,
        _ => {
            return Err(CliError::Command(format!(
                "unknown section: {} (expected: {})",
                name,
                SECTIONS.join(", ")
            )));
        }
    };
    Ok(value)
}

fn to_toml<T: Serialize>(value: &T) -> String {
    toml::to_string_pretty(value).unwrap_or_else(|e| format!("(serialization error: {})", e))
}

/// Configuration display report.
///
/// `config_toml` is used for text rendering only; JSON carries `config`.
#[derive(Serialize)]
pub struct ConfigReport {
    /// Configuration file path, or `(defaults)`
    pub source: String,
    /// Optional section name (None = full config)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(skip)]
    pub config_toml: String,
    pub config: serde_json::Value,
}

impl Render for ConfigReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        if let Some(ref section) = self.section {
            let section_label = format!("[{}]", section);
            writeln!(
                w,
                "Configuration {} (source: {})",
                section_label.bold(),
                self.source
            )?;
        } else {
            writeln!(w, "Configuration (source: {})", self.source.bold())?;
        }

        writeln!(w)?;
        write!(w, "{}", self.config_toml)?;

        Ok(())
    }
}

/// Configuration validation report.
#[derive(Serialize)]
pub struct ConfigValidationReport {
    pub source: String,
    pub valid: bool,
    /// Number of configured test cases (0 if invalid)
    pub cases: usize,
    /// Validation error messages (empty if valid)
    pub errors: Vec<String>,
}

impl Render for ConfigValidationReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w, "Config Validation: {}", self.source.bold())?;

        if self.valid {
            writeln!(w, "  Result: {}", "VALID".green().bold())?;
            writeln!(w, "  Cases: {}", self.cases)?;
        } else {
            writeln!(w, "  Result: {}", "INVALID".red().bold())?;
            for err in &self.errors {
                writeln!(w, "  Error: {}", err.red())?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn render(report: &impl Render) -> String {
        colored::control::set_override(false);
        let mut buffer = Vec::new();
        report
            .render_text(&mut buffer)
            .expect("text rendering should succeed");
        String::from_utf8(buffer).expect("valid UTF-8")
    }

    #[test]
    fn test_every_section_resolves() {
        let config = RatecheckConfig::default();
        for name in SECTIONS {
            assert!(section_value(&config, name).is_ok(), "section {name}");
        }
        assert!(matches!(
            section_value(&config, "ebpf"),
            Err(CliError::Command(_))
        ));
    }

    #[test]
    fn test_cases_section_renders_as_array_of_tables() {
        let config = RatecheckConfig::default();
        let mut table = BTreeMap::new();
        table.insert("cases", section_value(&config, "cases").unwrap());
        let text = to_toml(&table);
        assert_eq!(text.matches("[[cases]]").count(), 2, "{text}");
        assert!(text.contains("rate_limit = \"10KB\""), "{text}");
    }

    #[test]
    fn test_validation_report_render_invalid() {
        let report = ConfigValidationReport {
            source: "ratecheck.toml".to_owned(),
            valid: false,
            cases: 0,
            errors: vec!["invalid config value for 'validation.tolerance'".to_owned()],
        };
        let output = render(&report);
        assert!(output.contains("INVALID"));
        assert!(output.contains("validation.tolerance"));
    }

    #[test]
    fn test_config_report_render_section() {
        let report = ConfigReport {
            source: "(defaults)".to_owned(),
            section: Some("timing".to_owned()),
            config_toml: "[timing]\ncase_timeout_secs = 120\n".to_owned(),
            config: serde_json::Value::Null,
        };
        let output = render(&report);
        assert!(output.contains("Configuration [timing] (source: (defaults))"));
        assert!(output.contains("case_timeout_secs = 120"));
    }

    #[tokio::test]
    #[serial]
    async fn test_load_effective_defaults_and_file() {
        let config = load_effective(None).await.expect("defaults are valid");
        assert_eq!(config.cases.len(), 2);

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ratecheck.toml");
        std::fs::write(&path, "[validation]\ntolerance = 1.5\n").unwrap();
        let err = load_effective(Some(&path)).await.unwrap_err();
        assert!(matches!(err, RatecheckError::Config(_)));

        let missing = dir.path().join("absent.toml");
        assert!(load_effective(Some(&missing)).await.is_err());
    }
}
