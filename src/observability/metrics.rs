//! Metrics collection.
//!
//! Prometheus-compatible metrics with label cardinality protection and
//! typed convenience functions for recording measurements.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::SignalError;
use crate::signal::Status;
use crate::store::StatusCounts;

/// Guard to prevent double-initialization of the metrics recorder.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Action names accepted as metric labels.
///
/// Action names arrive over HTTP, so anything else is bucketed as
/// `"__unknown__"`.
const KNOWN_ACTIONS: [&str; 3] = ["pause", "reset", "manual"];

/// Emergency kinds accepted as metric labels.
const KNOWN_EMERGENCIES: [&str; 3] = ["all-stop", "priority-clear", "resume"];

/// Maximum length for phase name labels.
const MAX_PHASE_LABEL_LEN: usize = 64;

/// Outcome of one write to the shared store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Succeeded on the first attempt.
    Ok,
    /// Succeeded after at least one retry.
    Retried,
    /// Gave up after the last retry.
    Failed,
}

impl WriteOutcome {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Retried => "retried",
            Self::Failed => "failed",
        }
    }
}

/// Sanitizes an action name for use as a metrics label.
#[must_use]
pub fn sanitize_action_label(action: &str) -> &str {
    if KNOWN_ACTIONS.contains(&action) {
        action
    } else {
        "__unknown__"
    }
}

/// Sanitizes an emergency kind for use as a metrics label.
#[must_use]
pub fn sanitize_emergency_label(kind: &str) -> &str {
    if KNOWN_EMERGENCIES.contains(&kind) {
        kind
    } else {
        "__unknown__"
    }
}

/// Sanitizes a phase name for use as a metrics label.
///
/// Phase names come from configuration, so they are truncated and any
/// character invalid in a Prometheus label is replaced with `_`.
fn sanitize_phase_label(name: &str) -> String {
    name.chars()
        .take(MAX_PHASE_LABEL_LEN)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Initializes the global metrics recorder.
///
/// When `port` is `Some`, a Prometheus HTTP listener is started on
/// `127.0.0.1:<port>`. When `None`, the recorder is installed without
/// an HTTP endpoint.
///
/// # Errors
///
/// Returns `SignalError::Io` if the recorder or HTTP listener cannot be
/// installed (e.g. port already in use).
pub fn init_metrics(port: Option<u16>) -> Result<(), SignalError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::debug!("metrics already initialized, skipping");
        return Ok(());
    }
    port.map_or_else(
        || PrometheusBuilder::new().install_recorder().map(|_| ()),
        |p| {
            PrometheusBuilder::new()
                .with_http_listener(([127, 0, 0, 1], p))
                .install()
        },
    )
    .map_err(|e| SignalError::Io(std::io::Error::other(e.to_string())))?;

    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    describe_counter!("signalctl_ticks_total", "Phase clock ticks processed");
    describe_counter!(
        "signalctl_phase_transitions_total",
        "Phase changes made by the clock"
    );
    describe_counter!(
        "signalctl_control_actions_total",
        "Operator actions received, by action and outcome"
    );
    describe_counter!(
        "signalctl_emergency_overrides_total",
        "Emergency overrides applied"
    );
    describe_counter!(
        "signalctl_store_writes_total",
        "Writes to the shared store, by outcome"
    );
    describe_counter!(
        "signalctl_remote_updates_total",
        "Remote changes merged into the local store"
    );
    describe_histogram!(
        "signalctl_tick_duration_ms",
        "Time spent applying one tick to the store"
    );
    describe_gauge!("signalctl_intersections", "Intersections by status");
}

/// Records one clock tick and how long it took.
pub fn record_tick(duration: Duration) {
    counter!("signalctl_ticks_total").increment(1);
    histogram!("signalctl_tick_duration_ms").record(duration.as_secs_f64() * 1000.0);
}

/// Records a phase change.
pub fn record_phase_transition(from: &str, to: &str) {
    counter!(
        "signalctl_phase_transitions_total",
        "from" => sanitize_phase_label(from),
        "to" => sanitize_phase_label(to)
    )
    .increment(1);
}

/// Records an operator action.
pub fn record_control_action(action: &str, applied: bool) {
    let applied = if applied { "true" } else { "false" };
    counter!(
        "signalctl_control_actions_total",
        "action" => sanitize_action_label(action).to_owned(),
        "applied" => applied,
    )
    .increment(1);
}

/// Records an emergency override.
pub fn record_emergency(kind: &str) {
    counter!(
        "signalctl_emergency_overrides_total",
        "kind" => sanitize_emergency_label(kind).to_owned()
    )
    .increment(1);
}

/// Records the outcome of one shared-store write.
pub fn record_store_write(outcome: WriteOutcome) {
    counter!("signalctl_store_writes_total", "outcome" => outcome.as_str()).increment(1);
}

/// Records a merged remote change.
pub fn record_remote_update(kind: &'static str) {
    counter!("signalctl_remote_updates_total", "kind" => kind).increment(1);
}

/// Sets the per-status intersection gauges.
#[allow(clippy::cast_precision_loss)]
pub fn set_intersections(counts: StatusCounts) {
    for status in Status::ALL {
        gauge!("signalctl_intersections", "status" => status.as_str())
            .set(counts.get(status) as f64);
    }
}
