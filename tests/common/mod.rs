//! Shared integration-test harness for driving the `signalctl` binary.

#![allow(dead_code)]

use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

/// How long to wait for the control API to come up.
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs `signalctl` to completion with the given arguments.
#[allow(clippy::missing_panics_doc)]
pub fn spawn_command(args: &[&str]) -> Output {
    std::process::Command::new(env!("CARGO_BIN_EXE_signalctl"))
        .args(args)
        .env_remove("SIGNALCTL_CONFIG")
        .output()
        .expect("failed to run signalctl")
}

/// Returns the path to a test fixture.
#[must_use]
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

/// A `signalctl run` process serving the control API on an ephemeral port.
///
/// The child process is killed on drop via `kill_on_drop(true)`.
pub struct RunningController {
    pub child: Child,
    pub base_url: String,
    pub client: reqwest::Client,
}

impl RunningController {
    /// Spawns `signalctl run --http 127.0.0.1:0` plus `extra` arguments.
    ///
    /// Reads stderr until the "control API listening" line to discover the
    /// port.
    #[allow(clippy::missing_panics_doc)]
    pub async fn start(extra: &[&str]) -> Self {
        let mut child = Command::new(env!("CARGO_BIN_EXE_signalctl"))
            .args(["run", "--http", "127.0.0.1:0", "-v", "--color", "never"])
            .args(extra)
            .env_remove("SIGNALCTL_CONFIG")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .expect("failed to spawn signalctl");

        let stderr = child.stderr.take().expect("stderr not captured");
        let mut reader = BufReader::new(stderr);
        let mut line = String::new();

        let port = tokio::time::timeout(STARTUP_TIMEOUT, async {
            loop {
                line.clear();
                let n = reader
                    .read_line(&mut line)
                    .await
                    .expect("failed to read stderr");
                assert!(n > 0, "controller exited before the API came up");
                if line.contains("control API listening") {
                    let start = line.find("127.0.0.1:").expect("bound address in log line");
                    let digits: String = line[start + "127.0.0.1:".len()..]
                        .chars()
                        .take_while(char::is_ascii_digit)
                        .collect();
                    return digits.parse::<u16>().expect("port");
                }
            }
        })
        .await
        .expect("timed out waiting for control API startup");

        // Keep draining stderr so the child never blocks on a full pipe.
        tokio::spawn(async move {
            let mut sink = String::new();
            while reader.read_line(&mut sink).await.is_ok_and(|n| n > 0) {
                sink.clear();
            }
        });

        Self {
            child,
            base_url: format!("http://127.0.0.1:{port}"),
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Sends `signal` (e.g. `-INT`) with `kill` and waits for exit.
    #[allow(clippy::missing_panics_doc)]
    pub async fn stop_with(mut self, signal: &str) -> std::process::ExitStatus {
        let pid = self.child.id().expect("child still running");
        let status = Command::new("kill")
            .args([signal, &pid.to_string()])
            .status()
            .await
            .expect("failed to run kill");
        assert!(status.success());
        tokio::time::timeout(Duration::from_secs(10), self.child.wait())
            .await
            .expect("controller did not exit after signal")
            .expect("wait failed")
    }
}
