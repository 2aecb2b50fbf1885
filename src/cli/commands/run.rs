//! `run` command handler.
//!
//! Starts a controller session and keeps it running until the process is
//! interrupted.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::api;
use crate::backend::realtime::RealtimeConfig;
use crate::backend::{BackendKind, MemoryBackend, RealtimeBackend, SyncBackend};
use crate::cli::args::RunArgs;
use crate::config::{ConfigLimits, SignalConfig, Validator};
use crate::controller::{Controller, SessionSettings};
use crate::error::{ConfigError, SignalError};
use crate::observability::{EventEmitter, init_metrics};

/// How long open API connections may delay exit.
const API_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Runs the controller until `cancel` fires.
///
/// # Errors
///
/// Returns a config error if the file or the flag overrides are invalid,
/// a usage error for a malformed bind address, or a store error if the
/// realtime backend cannot be read at startup.
pub async fn run(args: &RunArgs, cancel: CancellationToken) -> Result<(), SignalError> {
    let loaded = super::load_config(args.config.as_deref())?;
    let config = apply_overrides(&loaded, args)?;

    if let Some(port) = args.metrics_port {
        init_metrics(Some(port))?;
        tracing::info!(port, "Prometheus metrics endpoint started");
    }

    let backend = build_backend(&config);
    let emitter = match args.events_file {
        Some(ref path) => EventEmitter::from_file(path)?,
        None => EventEmitter::noop(),
    };

    let settings = SessionSettings::from_config(&config);
    let controller = Arc::new(
        Controller::start(settings, backend, Arc::new(emitter), &cancel).await?,
    );

    let server = match args.http {
        Some(ref bind) => {
            let (addr, handle) = api::serve(Arc::clone(&controller), bind, cancel.clone()).await?;
            tracing::info!(%addr, "control API ready");
            Some(handle)
        }
        None => None,
    };

    cancel.cancelled().await;
    controller.shutdown("interrupted").await;
    if let Some(handle) = server {
        match tokio::time::timeout(API_SHUTDOWN_GRACE, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "control API task ended abnormally"),
            Err(_) => tracing::warn!("control API still had open streams at shutdown"),
        }
    }
    Ok(())
}

/// Layers command-line flags over the file configuration and re-validates
/// the result.
fn apply_overrides(base: &SignalConfig, args: &RunArgs) -> Result<SignalConfig, SignalError> {
    let mut config = base.clone();
    if let Some(kind) = args.backend {
        config.backend.kind = kind;
    }
    if let Some(ref url) = args.store_url {
        config.backend.url = Some(url.clone());
    }
    if let Some(ref path) = args.store_path {
        config.backend.path.clone_from(path);
    }
    if let Some(interval) = args.tick_interval {
        config.controller.tick_interval = Some(humantime::format_duration(interval).to_string());
    }

    let result = Validator::new().validate(&config, &ConfigLimits::default());
    if result.has_errors() {
        return Err(ConfigError::ValidationError {
            path: args.config.as_ref().map_or_else(
                || "<command line>".to_string(),
                |p| p.display().to_string(),
            ),
            errors: result.errors,
        }
        .into());
    }
    Ok(config)
}

fn build_backend(config: &SignalConfig) -> Arc<dyn SyncBackend> {
    match (config.backend.kind, config.backend.url.as_ref()) {
        (BackendKind::Realtime, Some(url)) => {
            tracing::info!(url = %url, path = %config.backend.path, "using realtime backend");
            Arc::new(RealtimeBackend::new(RealtimeConfig {
                url: url.clone(),
                path: config.backend.path.clone(),
                reconnect_delay: config.sync.reconnect_delay(),
            }))
        }
        // Validation rejects realtime without a URL before this point.
        _ => {
            let seeds = SessionSettings::from_config(config).seeds;
            Arc::new(MemoryBackend::new(seeds))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_file_values() {
        let args = RunArgs {
            backend: Some(BackendKind::Realtime),
            store_url: Some("http://127.0.0.1:9000".into()),
            store_path: Some("city/signals".into()),
            tick_interval: Some(Duration::from_millis(500)),
            ..RunArgs::default()
        };
        let config = apply_overrides(&SignalConfig::default(), &args).unwrap();
        assert_eq!(config.backend.kind, BackendKind::Realtime);
        assert_eq!(config.backend.path, "city/signals");
        assert_eq!(config.controller.tick_interval(), Duration::from_millis(500));
    }

    #[test]
    fn realtime_without_url_is_rejected() {
        let args = RunArgs {
            backend: Some(BackendKind::Realtime),
            ..RunArgs::default()
        };
        let err = apply_overrides(&SignalConfig::default(), &args).unwrap_err();
        assert!(matches!(
            err,
            SignalError::Config(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn memory_backend_is_seeded() {
        let backend = build_backend(&SignalConfig::default());
        assert_eq!(backend.kind(), BackendKind::Memory);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let dir = tempfile::tempdir().unwrap();
        let events = dir.path().join("events.jsonl");
        let args = RunArgs {
            events_file: Some(events.clone()),
            ..RunArgs::default()
        };

        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { run(&args, cancel).await }
        });
        tokio::time::sleep(Duration::from_millis(2500)).await;
        cancel.cancel();
        task.await.unwrap().unwrap();

        let raw = std::fs::read_to_string(events).unwrap();
        let first = raw.lines().next().unwrap();
        let last = raw.lines().last().unwrap();
        assert!(first.contains("ControllerStarted"));
        assert!(last.contains("ControllerStopped"));
    }
}
