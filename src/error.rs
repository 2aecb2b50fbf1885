//! Error types for `signalctl`
//!
//! One top-level error that maps to process exit codes, plus one enum per
//! subsystem: configuration, record validation, shared-store sync and the
//! control surface.

use std::path::PathBuf;
use thiserror::Error;

use crate::signal::IntersectionId;

// ============================================================================
// Exit Codes
// ============================================================================

/// Exit codes for `signalctl` CLI operations.
pub struct ExitCode;

impl ExitCode {
    /// Successful execution
    pub const SUCCESS: i32 = 0;

    /// General error
    pub const ERROR: i32 = 1;

    /// Configuration error (invalid YAML, validation failure)
    pub const CONFIG_ERROR: i32 = 2;

    /// I/O error (file not found, permission denied, bind failure)
    pub const IO_ERROR: i32 = 3;

    /// Shared store unreachable or returned unusable data
    pub const STORE_ERROR: i32 = 4;

    /// Control surface error (unknown intersection)
    pub const CONTROL_ERROR: i32 = 5;

    /// Usage error (invalid arguments, missing required options)
    pub const USAGE_ERROR: i32 = 64;

    /// Interrupted by SIGINT (Ctrl+C)
    pub const INTERRUPTED: i32 = 130;

    /// Terminated by SIGTERM
    pub const TERMINATED: i32 = 143;
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type for `signalctl` operations.
#[derive(Debug, Error)]
pub enum SignalError {
    /// Configuration loading or validation error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Shared store error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Control surface error
    #[error(transparent)]
    Control(#[from] ControlError),

    /// Invalid command-line usage
    #[error("usage error: {0}")]
    Usage(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl SignalError {
    /// Returns the appropriate exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Json(_) | Self::Yaml(_) => ExitCode::CONFIG_ERROR,
            Self::Store(_) => ExitCode::STORE_ERROR,
            Self::Control(_) => ExitCode::CONTROL_ERROR,
            Self::Usage(_) => ExitCode::USAGE_ERROR,
            Self::Io(_) => ExitCode::IO_ERROR,
        }
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// YAML parsing failed
    #[error("parse error in {path}: {message}")]
    ParseError {
        /// Path to the configuration file
        path: PathBuf,
        /// Line number where the error occurred (if available)
        line: Option<usize>,
        /// Error message from the parser
        message: String,
    },

    /// Configuration validation failed
    #[error("validation failed for {path}: {}", summarize(.errors))]
    ValidationError {
        /// Path to the configuration file
        path: String,
        /// List of validation issues found
        errors: Vec<ValidationIssue>,
    },

    /// Referenced configuration file not found
    #[error("file not found: {path}")]
    MissingFile {
        /// Path to the missing file
        path: PathBuf,
    },

    /// Field has an invalid value
    #[error("invalid value for '{field}': got '{value}', expected {expected}")]
    InvalidValue {
        /// Name of the field with invalid value
        field: String,
        /// The actual value provided
        value: String,
        /// Description of what was expected
        expected: String,
    },

    /// Environment variable referenced in configuration is not set
    #[error("environment variable '{var}' not set (referenced at {location})")]
    EnvVarNotSet {
        /// Name of the environment variable
        var: String,
        /// Location in the configuration where it was referenced
        location: String,
    },

    /// A seed intersection violates a record invariant
    #[error("invalid intersection '{id}': {source}")]
    InvalidIntersection {
        /// Identifier of the offending intersection
        id: IntersectionId,
        /// The violated invariant
        #[source]
        source: RecordError,
    },

    /// Two seed intersections share an identifier
    #[error("duplicate intersection id '{0}'")]
    DuplicateIntersection(IntersectionId),
}

fn summarize(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// ============================================================================
// Validation Types
// ============================================================================

/// A single validation issue found during configuration validation.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the problematic field (e.g., "intersections[2].phases")
    pub path: String,
    /// Description of the validation issue
    pub message: String,
    /// Severity level of the issue
    pub severity: Severity,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {} at {}", prefix, self.message, self.path)
    }
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Prevents the configuration from being used
    Error,
    /// Reported but does not prevent loading
    Warning,
}

// ============================================================================
// Record Errors
// ============================================================================

/// Intersection record invariant violations.
///
/// Phase advancement is undefined for a record that fails any of these,
/// so such records never enter a store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// Name is empty or whitespace
    #[error("name must not be empty")]
    EmptyName,

    /// No phases to cycle through
    #[error("phase list must not be empty")]
    EmptyPhases,

    /// Current phase is not a member of the phase list
    #[error("current phase '{phase}' is not in the phase list")]
    PhaseNotInList {
        /// The offending phase name
        phase: String,
    },
}

// ============================================================================
// Store Errors
// ============================================================================

/// Shared realtime store errors.
///
/// None of these are fatal to a running session: the local store stays
/// authoritative and the clock keeps running.
#[derive(Debug, Error)]
pub enum StoreError {
    /// HTTP request could not be sent or completed
    #[error("store request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Store answered with a non-success status
    #[error("store returned {status} for {url}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Requested URL
        url: String,
    },

    /// Store payload could not be decoded
    #[error("invalid store payload: {0}")]
    Decode(String),

    /// Change stream ended
    #[error("change stream closed: {0}")]
    StreamClosed(String),

    /// Change stream sent an event larger than the buffer limit
    #[error("change stream event exceeds {limit} bytes")]
    EventTooLarge {
        /// Buffer limit in bytes
        limit: usize,
    },
}

// ============================================================================
// Control Errors
// ============================================================================

/// Control surface errors.
#[derive(Debug, Error)]
pub enum ControlError {
    /// No intersection with this identifier exists
    #[error("unknown intersection '{0}'")]
    UnknownIntersection(IntersectionId),
}

/// Convenience alias for results using [`SignalError`].
pub type Result<T> = std::result::Result<T, SignalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_per_variant() {
        let config = SignalError::Config(ConfigError::MissingFile {
            path: PathBuf::from("x.yaml"),
        });
        assert_eq!(config.exit_code(), ExitCode::CONFIG_ERROR);

        let store = SignalError::Store(StoreError::Decode("bad".into()));
        assert_eq!(store.exit_code(), ExitCode::STORE_ERROR);

        let control = SignalError::Control(ControlError::UnknownIntersection("9".into()));
        assert_eq!(control.exit_code(), ExitCode::CONTROL_ERROR);

        let usage = SignalError::Usage("--store-url required".into());
        assert_eq!(usage.exit_code(), ExitCode::USAGE_ERROR);

        let io = SignalError::Io(std::io::Error::other("boom"));
        assert_eq!(io.exit_code(), ExitCode::IO_ERROR);
    }

    #[test]
    fn validation_error_lists_issues() {
        let err = ConfigError::ValidationError {
            path: "traffic.yaml".into(),
            errors: vec![ValidationIssue {
                path: "intersections[0].phases".into(),
                message: "phase list must not be empty".into(),
                severity: Severity::Error,
            }],
        };
        let msg = err.to_string();
        assert!(msg.contains("traffic.yaml"));
        assert!(msg.contains("intersections[0].phases"));
    }

    #[test]
    fn record_error_display() {
        let err = RecordError::PhaseNotInList {
            phase: "flashing-red".into(),
        };
        assert_eq!(
            err.to_string(),
            "current phase 'flashing-red' is not in the phase list"
        );
    }

    #[test]
    fn unknown_intersection_display() {
        let err = ControlError::UnknownIntersection(IntersectionId::new("42"));
        assert_eq!(err.to_string(), "unknown intersection '42'");
    }
}
