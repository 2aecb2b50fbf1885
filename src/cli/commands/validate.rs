//! `validate` command handler.

use serde::Serialize;

use crate::cli::args::{OutputFormat, ValidateArgs};
use crate::config::{ConfigLoader, LoadWarning, LoaderOptions};
use crate::error::{ConfigError, Severity, SignalError, ValidationIssue};

#[derive(Debug, Serialize)]
struct FileReport<'a> {
    file: String,
    valid: bool,
    intersections: usize,
    warnings: Vec<WarningView<'a>>,
}

#[derive(Debug, Serialize)]
struct WarningView<'a> {
    location: Option<&'a str>,
    message: &'a str,
}

/// Validates configuration files without starting the controller.
///
/// Stops at the first file that fails.
///
/// # Errors
///
/// Returns an I/O error if a file does not exist, or a config error if
/// validation fails. With `--strict`, any warning fails validation.
pub fn run(args: &ValidateArgs) -> Result<(), SignalError> {
    let loader = ConfigLoader::new(LoaderOptions::default());

    for path in &args.files {
        if !path.exists() {
            return Err(SignalError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("file not found: {}", path.display()),
            )));
        }
        tracing::info!(file = %path.display(), "validating configuration");

        let load_result = loader.load(path)?;
        for warning in &load_result.warnings {
            tracing::warn!(
                location = warning.location.as_deref().unwrap_or("<unknown>"),
                "{}",
                warning.message
            );
        }

        if args.strict && !load_result.warnings.is_empty() {
            return Err(ConfigError::ValidationError {
                path: path.display().to_string(),
                errors: load_result.warnings.iter().map(as_issue).collect(),
            }
            .into());
        }

        let intersections = load_result
            .config
            .intersections
            .as_ref()
            .map_or(0, Vec::len);
        match args.format {
            OutputFormat::Human => {
                println!(
                    "{}: ok ({} warning{})",
                    path.display(),
                    load_result.warnings.len(),
                    if load_result.warnings.len() == 1 { "" } else { "s" }
                );
            }
            OutputFormat::Json => {
                let report = FileReport {
                    file: path.display().to_string(),
                    valid: true,
                    intersections,
                    warnings: load_result
                        .warnings
                        .iter()
                        .map(|w| WarningView {
                            location: w.location.as_deref(),
                            message: &w.message,
                        })
                        .collect(),
                };
                println!("{}", serde_json::to_string(&report)?);
            }
        }
        tracing::info!(file = %path.display(), "configuration valid");
    }

    Ok(())
}

fn as_issue(warning: &LoadWarning) -> ValidationIssue {
    ValidationIssue {
        path: warning
            .location
            .clone()
            .unwrap_or_else(|| "<unknown>".to_string()),
        message: warning.message.clone(),
        severity: Severity::Warning,
    }
}
