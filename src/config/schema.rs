//! Configuration schema.
//!
//! Types mirror the YAML layout one to one. Durations are kept as the
//! strings the operator wrote (`1s`, `250ms`) and resolved through
//! accessors once the [`Validator`](super::Validator) has accepted them.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;
use crate::backend::realtime::DEFAULT_RECONNECT_DELAY;
use crate::signal::{ControlPolicy, Intersection};
use crate::signal::clock::DEFAULT_TICK_INTERVAL;

/// Default collection path in the shared store.
pub const DEFAULT_STORE_PATH: &str = "intersections";

/// Default number of retries for a failed store write.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the first write retry; doubles per attempt.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Root of a `signalctl` configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignalConfig {
    #[serde(default)]
    pub controller: ControllerConfig,

    /// Transition rules applied by the control surface.
    #[serde(default)]
    pub control: ControlPolicy,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    /// Seed records; the built-in list is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intersections: Option<Vec<Intersection>>,
}

/// Phase clock settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControllerConfig {
    /// Clock period, e.g. `1s`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tick_interval: Option<String>,
}

impl ControllerConfig {
    /// Resolved clock period.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        resolve(self.tick_interval.as_deref(), DEFAULT_TICK_INTERVAL)
    }
}

/// Shared store selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,

    /// Database root URL; required for `realtime`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Collection path under the root.
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            url: None,
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> String {
    DEFAULT_STORE_PATH.to_string()
}

/// Write retry and reconnect settings for the shared store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First retry delay, e.g. `250ms`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_backoff: Option<String>,

    /// Delay before reopening the change stream, e.g. `2s`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect_delay: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: None,
            reconnect_delay: None,
        }
    }
}

const fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl SyncConfig {
    #[must_use]
    pub fn retry_backoff(&self) -> Duration {
        resolve(self.retry_backoff.as_deref(), DEFAULT_RETRY_BACKOFF)
    }

    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        resolve(self.reconnect_delay.as_deref(), DEFAULT_RECONNECT_DELAY)
    }
}

fn resolve(value: Option<&str>, default: Duration) -> Duration {
    value
        .and_then(|s| humantime::parse_duration(s.trim()).ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: SignalConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, SignalConfig::default());
        assert_eq!(config.controller.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.backend.kind, BackendKind::Memory);
        assert_eq!(config.backend.path, "intersections");
        assert_eq!(config.sync.max_retries, 3);
        assert_eq!(config.sync.retry_backoff(), Duration::from_millis(250));
        assert!(config.control.manual_toggle_resumes);
        assert!(config.intersections.is_none());
    }

    #[test]
    fn durations_resolve() {
        let config: SignalConfig = serde_yaml::from_str(
            "controller:\n  tick_interval: 500ms\nsync:\n  retry_backoff: 1s\n  reconnect_delay: 1m\n",
        )
        .unwrap();
        assert_eq!(config.controller.tick_interval(), Duration::from_millis(500));
        assert_eq!(config.sync.retry_backoff(), Duration::from_secs(1));
        assert_eq!(config.sync.reconnect_delay(), Duration::from_secs(60));
    }

    #[test]
    fn unknown_keys_rejected() {
        let result: Result<SignalConfig, _> = serde_yaml::from_str("contoller: {}\n");
        assert!(result.is_err());
    }

    #[test]
    fn intersections_use_wire_field_names() {
        let yaml = r#"
intersections:
  - id: "9"
    name: Elm St & 5th Ave
    status: paused
    mode: manual
    currentPhase: red-ew
    timeRemaining: 4
"#;
        let config: SignalConfig = serde_yaml::from_str(yaml).unwrap();
        let seeds = config.intersections.unwrap();
        assert_eq!(seeds[0].id.as_str(), "9");
        assert_eq!(seeds[0].record.current_phase, "red-ew");
        assert_eq!(seeds[0].record.phases.len(), 6);
    }
}
