//! `signalctl` - Traffic signal phase controller

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

use signalctl::cli::args::Cli;
use signalctl::cli::commands;
use signalctl::error::ExitCode;
use signalctl::observability::init_logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if !cli.quiet {
        init_logging(cli.log_format, cli.verbose, cli.color);
    }

    let cancel = CancellationToken::new();
    let interrupted = Arc::new(AtomicI32::new(ExitCode::SUCCESS));

    // First signal shuts down gracefully, second forces exit.
    tokio::spawn({
        let cancel = cancel.clone();
        let interrupted = Arc::clone(&interrupted);
        async move {
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => Some(s),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to register SIGTERM handler");
                    None
                }
            };

            let code = wait_for_signal(sigterm.as_mut()).await;
            interrupted.store(code, Ordering::SeqCst);
            eprintln!("\nShutting down gracefully... (press Ctrl+C again to force)");
            cancel.cancel();

            let code = wait_for_signal(sigterm.as_mut()).await;
            std::process::exit(code);
        }
    });

    let result = commands::dispatch(cli, cancel).await;

    match result {
        Ok(()) => std::process::exit(interrupted.load(Ordering::SeqCst)),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(e.exit_code());
        }
    }
}

/// Waits for SIGINT or SIGTERM and returns the matching exit code.
async fn wait_for_signal(sigterm: Option<&mut tokio::signal::unix::Signal>) -> i32 {
    match sigterm {
        Some(sigterm) => tokio::select! {
            _ = tokio::signal::ctrl_c() => ExitCode::INTERRUPTED,
            _ = sigterm.recv() => ExitCode::TERMINATED,
        },
        None => {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
            ExitCode::INTERRUPTED
        }
    }
}
