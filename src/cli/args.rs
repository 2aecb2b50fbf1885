//! CLI argument definitions.
//!
//! All Clap derive structs for `signalctl` command-line parsing.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use crate::backend::BackendKind;
use crate::observability::LogFormat;

// ============================================================================
// Root CLI
// ============================================================================

/// Traffic signal phase controller.
#[derive(Parser, Debug)]
#[command(name = "signalctl", author, version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all non-error output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output control.
    #[arg(long, default_value = "auto", global = true, env = "SIGNALCTL_COLOR")]
    pub color: ColorChoice,

    /// Log line format.
    #[arg(long, default_value = "human", global = true, env = "SIGNALCTL_LOG_FORMAT")]
    pub log_format: LogFormat,
}

// ============================================================================
// Commands
// ============================================================================

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the controller until interrupted.
    Run(RunArgs),

    /// Tick the configured intersections offline and print the result.
    Simulate(SimulateArgs),

    /// Validate configuration files without starting the controller.
    Validate(ValidateArgs),

    /// Print the built-in seed intersections.
    Seed(SeedArgs),

    /// Display version information.
    Version(VersionArgs),
}

/// Arguments for `run`.
///
/// Flags override the matching configuration file values.
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Path to YAML configuration file.
    #[arg(short, long, env = "SIGNALCTL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Shared store backend.
    #[arg(long, env = "SIGNALCTL_BACKEND")]
    pub backend: Option<BackendKind>,

    /// Realtime database root URL.
    #[arg(long, env = "SIGNALCTL_STORE_URL")]
    pub store_url: Option<String>,

    /// Collection path in the realtime database.
    #[arg(long, env = "SIGNALCTL_STORE_PATH")]
    pub store_path: Option<String>,

    /// Phase clock period, e.g. `1s` or `500ms`.
    #[arg(long, value_parser = humantime::parse_duration)]
    pub tick_interval: Option<Duration>,

    /// Serve the control API on `[host:]port`.
    #[arg(long, env = "SIGNALCTL_HTTP")]
    pub http: Option<String>,

    /// Expose Prometheus metrics on this port.
    #[arg(long, env = "SIGNALCTL_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Write JSONL events to this file.
    #[arg(long, env = "SIGNALCTL_EVENTS_FILE")]
    pub events_file: Option<PathBuf>,
}

/// Arguments for `simulate`.
#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Number of ticks to run.
    #[arg(short, long, default_value_t = 1)]
    pub ticks: u64,

    /// Configuration file providing seed intersections.
    #[arg(short, long, env = "SIGNALCTL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

/// Arguments for `validate`.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Configuration files to validate.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,

    /// Treat warnings as errors.
    #[arg(long)]
    pub strict: bool,
}

/// Arguments for `seed`.
#[derive(Args, Debug)]
pub struct SeedArgs {
    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: SeedFormat,
}

/// Arguments for version display.
#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

// ============================================================================
// CLI-Local Enums
// ============================================================================

/// Color output choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorChoice {
    /// Auto-detect terminal support.
    #[default]
    Auto,
    /// Always use color.
    Always,
    /// Never use color.
    Never,
}

/// Output format for structured output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output.
    #[default]
    Human,
    /// JSON output.
    Json,
}

/// Output format for `seed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SeedFormat {
    /// One line per intersection.
    #[default]
    Human,
    /// JSON array.
    Json,
    /// YAML, ready to paste under `intersections:`.
    Yaml,
}

// ============================================================================
// Tests
// ============================================================================
