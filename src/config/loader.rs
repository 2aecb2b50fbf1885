//! Configuration loader.
//!
//! Loading pipeline:
//! 1. Size check and UTF-8 BOM strip
//! 2. Environment variable expansion (pre-parse, on raw text)
//! 3. YAML parsing and deserialization to [`SignalConfig`]
//! 4. Validation
//! 5. Freeze with `Arc`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::schema::SignalConfig;
use crate::config::validation::Validator;
use crate::error::ConfigError;

// ============================================================================
// Public API
// ============================================================================

/// Options for the configuration loader.
#[derive(Debug, Clone, Default)]
pub struct LoaderOptions {
    pub config_limits: ConfigLimits,
}

/// Size limits that protect the loader and the store from oversized input.
#[derive(Debug, Clone)]
pub struct ConfigLimits {
    /// Maximum number of seed intersections.
    pub max_intersections: usize,

    /// Maximum phases per intersection.
    pub max_phases: usize,

    /// Maximum configuration file size in bytes.
    pub max_config_size: usize,
}

impl Default for ConfigLimits {
    fn default() -> Self {
        Self {
            max_intersections: env_or("SIGNALCTL_MAX_INTERSECTIONS", 10_000),
            max_phases: env_or("SIGNALCTL_MAX_PHASES", 64),
            max_config_size: env_or("SIGNALCTL_MAX_CONFIG_SIZE", 10 * 1024 * 1024),
        }
    }
}

/// Result of loading a configuration file.
#[derive(Debug)]
pub struct LoadResult {
    /// The loaded and validated configuration.
    pub config: Arc<SignalConfig>,

    /// Warnings encountered during loading.
    pub warnings: Vec<LoadWarning>,
}

/// Warning during configuration loading.
#[derive(Debug, Clone)]
pub struct LoadWarning {
    pub message: String,

    /// Location where the warning occurred.
    pub location: Option<String>,
}

/// Configuration loader.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: LoaderOptions,
}

impl ConfigLoader {
    #[must_use]
    pub const fn new(options: LoaderOptions) -> Self {
        Self { options }
    }

    /// Loads, validates and freezes a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read or exceeds the size limit
    /// - A required environment variable is missing
    /// - YAML parsing or deserialization fails
    /// - Validation reports errors
    pub fn load(&self, path: &Path) -> Result<LoadResult, ConfigError> {
        let metadata = std::fs::metadata(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;

        let limit = self.options.config_limits.max_config_size;
        let file_size = usize::try_from(metadata.len()).unwrap_or(usize::MAX);
        if file_size > limit {
            return Err(ConfigError::InvalidValue {
                field: "file_size".to_string(),
                value: format!("{file_size} bytes"),
                expected: format!("at most {limit} bytes"),
            });
        }

        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;
        self.load_str(&raw, path)
    }

    /// Runs the pipeline on already-read text; `source` is used in
    /// messages only.
    ///
    /// # Errors
    ///
    /// See [`load`](Self::load).
    pub fn load_str(&self, raw: &str, source: &Path) -> Result<LoadResult, ConfigError> {
        let mut warnings = Vec::new();
        let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);

        let mut env_sub = EnvSubstitution::new();
        let substituted = env_sub.substitute(raw, source)?;
        warnings.extend(env_sub.warnings);

        let config: SignalConfig = if substituted.trim().is_empty() {
            SignalConfig::default()
        } else {
            serde_yaml::from_str(&substituted).map_err(|e| ConfigError::ParseError {
                path: source.to_path_buf(),
                line: e.location().map(|l| l.line()),
                message: e.to_string(),
            })?
        };

        let result = Validator::new().validate(&config, &self.options.config_limits);
        if result.has_errors() {
            return Err(ConfigError::ValidationError {
                path: source.display().to_string(),
                errors: result.errors,
            });
        }
        warnings.extend(result.warnings.into_iter().map(|issue| LoadWarning {
            message: issue.message,
            location: Some(issue.path),
        }));

        Ok(LoadResult {
            config: Arc::new(config),
            warnings,
        })
    }
}

// ============================================================================
// Environment Variable Substitution
// ============================================================================

/// Pre-parse environment variable substitution.
///
/// Runs on raw YAML text before parsing so substituted values take part
/// in YAML type inference.
struct EnvSubstitution {
    warnings: Vec<LoadWarning>,
}

impl EnvSubstitution {
    const fn new() -> Self {
        Self {
            warnings: Vec::new(),
        }
    }

    /// Supports:
    /// - `${VAR}`: value, or empty string with a warning if unset
    /// - `${VAR:-default}`: `default` if unset
    /// - `${VAR:?message}`: error if unset
    /// - `$$`: literal `$`
    fn substitute(&mut self, raw: &str, source: &Path) -> Result<String, ConfigError> {
        let mut result = String::with_capacity(raw.len());
        let mut chars = raw.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '$' {
                result.push(c);
                continue;
            }
            match chars.peek() {
                Some('$') => {
                    chars.next();
                    result.push('$');
                }
                Some('{') => {
                    chars.next();
                    let spec = parse_var_spec(&mut chars, source)?;
                    match std::env::var(&spec.name) {
                        Ok(value) => result.push_str(&value),
                        Err(_) => match spec.fallback {
                            Fallback::Default(value) => result.push_str(&value),
                            Fallback::Required(message) => {
                                return Err(ConfigError::EnvVarNotSet {
                                    var: spec.name,
                                    location: if message.is_empty() {
                                        source.display().to_string()
                                    } else {
                                        format!("{}: {message}", source.display())
                                    },
                                });
                            }
                            Fallback::Empty => self.warnings.push(LoadWarning {
                                message: format!(
                                    "Environment variable '{}' is not set, using empty string",
                                    spec.name
                                ),
                                location: Some(source.display().to_string()),
                            }),
                        },
                    }
                }
                _ => result.push(c),
            }
        }

        Ok(result)
    }
}

enum Fallback {
    Empty,
    Default(String),
    Required(String),
}

struct VarSpec {
    name: String,
    fallback: Fallback,
}

/// Parses the body of `${...}` up to and including the closing brace.
fn parse_var_spec(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    source: &Path,
) -> Result<VarSpec, ConfigError> {
    let mut name = String::new();
    while let Some(c) = chars.next() {
        match c {
            '}' => {
                return Ok(VarSpec {
                    name,
                    fallback: Fallback::Empty,
                });
            }
            ':' if chars.peek() == Some(&'-') => {
                chars.next();
                let value = read_until_close(chars, source, &name)?;
                return Ok(VarSpec {
                    name,
                    fallback: Fallback::Default(value),
                });
            }
            ':' if chars.peek() == Some(&'?') => {
                chars.next();
                let message = read_until_close(chars, source, &name)?;
                return Ok(VarSpec {
                    name,
                    fallback: Fallback::Required(message),
                });
            }
            _ => name.push(c),
        }
    }
    Err(unclosed(source, &name))
}

/// Reads to the matching `}`, keeping nested braces.
fn read_until_close(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    source: &Path,
    name: &str,
) -> Result<String, ConfigError> {
    let mut value = String::new();
    let mut depth = 1;
    for c in chars.by_ref() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(value);
                }
            }
            _ => {}
        }
        value.push(c);
    }
    Err(unclosed(source, name))
}

fn unclosed(source: &Path, name: &str) -> ConfigError {
    ConfigError::ParseError {
        path: PathBuf::from(source),
        line: None,
        message: format!("Unclosed environment variable reference: ${{{name}"),
    }
}

/// Reads a limit from the environment, falling back to `default`.
fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use super::*;
    use crate::backend::BackendKind;

    fn sub(raw: &str) -> Result<String, ConfigError> {
        EnvSubstitution::new().substitute(raw, Path::new("test.yaml"))
    }

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn env_substitution_set_variable() {
        let result = sub("path: ${PATH}").unwrap();
        assert!(!result.contains("${PATH}"));
        assert!(result.len() > "path: ".len());
    }

    #[test]
    fn env_substitution_default() {
        let result = sub("url: ${SIGNALCTL_TEST_UNSET_XYZ123:-http://localhost:9000}").unwrap();
        assert_eq!(result, "url: http://localhost:9000");
    }

    #[test]
    fn env_substitution_required_missing() {
        match sub("url: ${SIGNALCTL_TEST_REQUIRED_XYZ123:?store url}") {
            Err(ConfigError::EnvVarNotSet { var, location }) => {
                assert_eq!(var, "SIGNALCTL_TEST_REQUIRED_XYZ123");
                assert!(location.contains("store url"));
            }
            other => panic!("expected EnvVarNotSet, got {other:?}"),
        }
    }

    #[test]
    fn env_substitution_missing_warns() {
        let mut env = EnvSubstitution::new();
        let result = env
            .substitute("x: '${SIGNALCTL_TEST_MISSING_XYZ123}'", Path::new("t.yaml"))
            .unwrap();
        assert_eq!(result, "x: ''");
        assert_eq!(env.warnings.len(), 1);
    }

    #[test]
    fn env_substitution_escapes_and_unclosed() {
        assert_eq!(sub("cost: $$5 and $x").unwrap(), "cost: $5 and $x");
        assert!(matches!(
            sub("x: ${UNCLOSED"),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn default_keeps_nested_braces() {
        let result = sub("v: ${SIGNALCTL_TEST_UNSET_XYZ123:-{a: 1}}").unwrap();
        assert_eq!(result, "v: {a: 1}");
    }

    #[test]
    fn load_full_file() {
        let file = write_config(
            "\u{feff}controller:\n  tick_interval: 200ms\n\
             control:\n  manual_toggle_resumes: false\n\
             backend:\n  kind: realtime\n  url: ${SIGNALCTL_TEST_UNSET_URL:-https://db.example.com}\n\
             sync:\n  max_retries: 1\n",
        );
        let loaded = ConfigLoader::default().load(file.path()).unwrap();
        let config = loaded.config;
        assert_eq!(config.controller.tick_interval(), Duration::from_millis(200));
        assert!(!config.control.manual_toggle_resumes);
        assert_eq!(config.backend.kind, BackendKind::Realtime);
        assert_eq!(config.backend.url.as_deref(), Some("https://db.example.com"));
        assert_eq!(config.sync.max_retries, 1);
        assert!(loaded.warnings.is_empty());
    }

    #[test]
    fn empty_file_is_default_config() {
        let file = write_config("");
        let loaded = ConfigLoader::default().load(file.path()).unwrap();
        assert_eq!(*loaded.config, SignalConfig::default());
    }

    #[test]
    fn missing_file() {
        let err = ConfigLoader::default()
            .load(Path::new("/nonexistent/signalctl.yaml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingFile { .. }));
    }

    #[test]
    fn parse_error_reports_line() {
        let file = write_config("controller:\n  tick_interval: [1s\n");
        match ConfigLoader::default().load(file.path()) {
            Err(ConfigError::ParseError { line, .. }) => assert!(line.is_some()),
            other => panic!("expected ParseError, got {other:?}"),
        }
    }

    #[test]
    fn validation_errors_are_collected() {
        let file = write_config(
            "backend:\n  kind: realtime\n\
             intersections:\n  - id: \"1\"\n    name: A\n    status: active\n    mode: automatic\n    \
             currentPhase: blue\n    timeRemaining: 3\n",
        );
        match ConfigLoader::default().load(file.path()) {
            Err(ConfigError::ValidationError { errors, .. }) => assert_eq!(errors.len(), 2),
            other => panic!("expected ValidationError, got {other:?}"),
        }
    }

    #[test]
    fn oversized_file_rejected() {
        let file = write_config(&"# padding\n".repeat(20));
        let loader = ConfigLoader::new(LoaderOptions {
            config_limits: ConfigLimits {
                max_config_size: 16,
                ..ConfigLimits::default()
            },
        });
        assert!(matches!(
            loader.load(file.path()),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn validation_warnings_become_load_warnings() {
        let loaded = ConfigLoader::default()
            .load_str("intersections: []\n", Path::new("inline.yaml"))
            .unwrap();
        assert_eq!(loaded.warnings.len(), 1);
        assert_eq!(loaded.warnings[0].location.as_deref(), Some("intersections"));
    }
}
