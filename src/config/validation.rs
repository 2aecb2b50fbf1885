//! Configuration validation.
//!
//! Runs on the deserialized [`SignalConfig`] and collects every issue
//! instead of stopping at the first, so an operator sees all problems in
//! one pass.

use std::collections::HashSet;

use crate::backend::BackendKind;
use crate::config::loader::ConfigLimits;
use crate::config::schema::SignalConfig;
use crate::error::{Severity, ValidationIssue};
use crate::signal::{Intersection, phase_duration};

/// Characters a realtime database forbids in keys and paths.
const FORBIDDEN_KEY_CHARS: [char; 5] = ['.', '$', '#', '[', ']'];

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Issues that prevent the configuration from being used.
    pub errors: Vec<ValidationIssue>,

    /// Informational issues.
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Configuration validator.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Validator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a configuration and returns every issue found.
    pub fn validate(&mut self, config: &SignalConfig, limits: &ConfigLimits) -> ValidationResult {
        self.errors.clear();
        self.warnings.clear();

        if let Some(interval) = &config.controller.tick_interval {
            self.validate_duration(interval, "controller.tick_interval", false);
        }
        self.validate_backend(config);
        self.validate_sync(config);
        if let Some(seeds) = &config.intersections {
            self.validate_intersections(seeds, limits);
        }

        ValidationResult {
            errors: std::mem::take(&mut self.errors),
            warnings: std::mem::take(&mut self.warnings),
        }
    }

    // ========================================================================
    // Sections
    // ========================================================================

    fn validate_backend(&mut self, config: &SignalConfig) {
        let backend = &config.backend;
        match (&backend.kind, &backend.url) {
            (BackendKind::Realtime, None) => {
                self.add_error("backend.url", "A realtime backend requires a database URL");
            }
            (_, Some(url)) if !(url.starts_with("http://") || url.starts_with("https://")) => {
                self.add_error(
                    "backend.url",
                    &format!("Invalid URL '{url}'. Expected an http:// or https:// URL"),
                );
            }
            (BackendKind::Memory, Some(_)) => {
                self.add_warning("backend.url", "URL is ignored by the memory backend");
            }
            _ => {}
        }

        if backend.path.contains(FORBIDDEN_KEY_CHARS) {
            self.add_error(
                "backend.path",
                &format!(
                    "Store path '{}' contains a forbidden character (one of . $ # [ ])",
                    backend.path
                ),
            );
        }
    }

    fn validate_sync(&mut self, config: &SignalConfig) {
        let sync = &config.sync;
        if let Some(backoff) = &sync.retry_backoff {
            self.validate_duration(backoff, "sync.retry_backoff", true);
        }
        if let Some(delay) = &sync.reconnect_delay {
            self.validate_duration(delay, "sync.reconnect_delay", false);
        }
        if sync.max_retries > 10 {
            self.add_warning(
                "sync.max_retries",
                "More than 10 retries can delay later writes by minutes",
            );
        }
    }

    fn validate_intersections(&mut self, seeds: &[Intersection], limits: &ConfigLimits) {
        if seeds.is_empty() {
            self.add_warning(
                "intersections",
                "No intersections configured; the controller will be idle",
            );
        }
        if seeds.len() > limits.max_intersections {
            self.add_error(
                "intersections",
                &format!(
                    "Too many intersections: {} (maximum: {}). \
                     Set SIGNALCTL_MAX_INTERSECTIONS to increase the limit.",
                    seeds.len(),
                    limits.max_intersections
                ),
            );
        }

        let mut seen = HashSet::new();
        for (i, seed) in seeds.iter().enumerate() {
            let path = format!("intersections[{i}]");
            let id = seed.id.as_str();

            if id.trim().is_empty() {
                self.add_error(&format!("{path}.id"), "Intersection id cannot be empty");
            } else if id.contains(FORBIDDEN_KEY_CHARS) || id.contains('/') {
                self.add_error(
                    &format!("{path}.id"),
                    &format!("Intersection id '{id}' contains a forbidden character"),
                );
            }
            if !seen.insert(id) {
                self.add_error(&format!("{path}.id"), &format!("Duplicate intersection id '{id}'"));
            }

            if let Err(e) = seed.record.validate() {
                self.add_error(&path, &e.to_string());
                continue;
            }

            let rec = &seed.record;
            if rec.time_remaining > phase_duration(&rec.current_phase) {
                self.add_warning(
                    &format!("{path}.timeRemaining"),
                    &format!(
                        "{} seconds exceeds the {} second duration of '{}'",
                        rec.time_remaining,
                        phase_duration(&rec.current_phase),
                        rec.current_phase
                    ),
                );
            }
            if rec.phases.len() > limits.max_phases {
                self.add_error(
                    &format!("{path}.phases"),
                    &format!(
                        "Too many phases: {} (maximum: {}). \
                         Set SIGNALCTL_MAX_PHASES to increase the limit.",
                        rec.phases.len(),
                        limits.max_phases
                    ),
                );
            }
        }
    }

    /// Validates a duration string such as `1s` or `250ms`.
    fn validate_duration(&mut self, duration: &str, path: &str, allow_zero: bool) {
        let trimmed = duration.trim();
        if trimmed.is_empty() {
            self.add_error(path, "Duration cannot be empty");
            return;
        }
        match humantime::parse_duration(trimmed) {
            Ok(d) if d.is_zero() && !allow_zero => {
                self.add_error(path, "Duration must be greater than zero");
            }
            Ok(_) => {}
            Err(e) => self.add_error(
                path,
                &format!("Invalid duration '{duration}': {e}. Expected e.g. 1s, 250ms, 2m"),
            ),
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn add_error(&mut self, path: &str, message: &str) {
        self.errors.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Error,
        });
    }

    fn add_warning(&mut self, path: &str, message: &str) {
        self.warnings.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Warning,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{BackendConfig, ControllerConfig};
    use crate::signal::intersection::seed_intersections;

    fn limits() -> ConfigLimits {
        ConfigLimits {
            max_intersections: 100,
            max_phases: 32,
            max_config_size: 1024 * 1024,
        }
    }

    fn check(config: &SignalConfig) -> ValidationResult {
        Validator::new().validate(config, &limits())
    }

    #[test]
    fn default_config_is_valid() {
        let result = check(&SignalConfig::default());
        assert!(result.is_valid());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn seed_list_is_valid() {
        let config = SignalConfig {
            intersections: Some(seed_intersections()),
            ..SignalConfig::default()
        };
        assert!(check(&config).is_valid());
    }

    #[test]
    fn realtime_requires_url() {
        let config = SignalConfig {
            backend: BackendConfig {
                kind: BackendKind::Realtime,
                ..BackendConfig::default()
            },
            ..SignalConfig::default()
        };
        let result = check(&config);
        assert!(result.has_errors());
        assert_eq!(result.errors[0].path, "backend.url");
    }

    #[test]
    fn bad_url_and_path() {
        let config = SignalConfig {
            backend: BackendConfig {
                kind: BackendKind::Realtime,
                url: Some("ftp://db".into()),
                path: "signals.v2".into(),
            },
            ..SignalConfig::default()
        };
        let paths: Vec<String> = check(&config).errors.into_iter().map(|e| e.path).collect();
        assert_eq!(paths, ["backend.url", "backend.path"]);
    }

    #[test]
    fn zero_tick_interval_rejected() {
        let config = SignalConfig {
            controller: ControllerConfig {
                tick_interval: Some("0s".into()),
            },
            ..SignalConfig::default()
        };
        assert!(check(&config).has_errors());
    }

    #[test]
    fn garbage_duration_rejected() {
        let config = SignalConfig {
            controller: ControllerConfig {
                tick_interval: Some("soon".into()),
            },
            ..SignalConfig::default()
        };
        let result = check(&config);
        assert!(result.errors[0].message.contains("Invalid duration"));
    }

    #[test]
    fn collects_all_record_errors() {
        let mut seeds = seed_intersections();
        seeds[0].record.phases.clear();
        seeds[1].record.current_phase = "flashing-red".into();
        seeds[3].id = seeds[2].id.clone();
        let config = SignalConfig {
            intersections: Some(seeds),
            ..SignalConfig::default()
        };
        let result = check(&config);
        let paths: Vec<&str> = result.errors.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, ["intersections[0]", "intersections[1]", "intersections[3].id"]);
        assert!(result.errors[1].message.contains("flashing-red"));
    }

    #[test]
    fn overlong_countdown_is_a_warning() {
        let mut seeds = seed_intersections();
        seeds[3].record.time_remaining = 60;
        let config = SignalConfig {
            intersections: Some(seeds),
            ..SignalConfig::default()
        };
        let result = check(&config);
        assert!(result.is_valid());
        assert_eq!(result.warnings[0].path, "intersections[3].timeRemaining");
    }

    #[test]
    fn empty_list_is_a_warning() {
        let config = SignalConfig {
            intersections: Some(vec![]),
            ..SignalConfig::default()
        };
        let result = check(&config);
        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn forbidden_id_characters() {
        let mut seeds = seed_intersections();
        seeds[0].id = "a/b".into();
        let config = SignalConfig {
            intersections: Some(seeds),
            ..SignalConfig::default()
        };
        assert_eq!(check(&config).errors[0].path, "intersections[0].id");
    }
}
