//! Driver process management.
//!
//! Locates the Node.js driver bundle and manages the lifecycle of the
//! child process that speaks the wire protocol over stdio.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::transport::{PipeTransport, TransportParts};

/// Locates the driver executable.
///
/// Search order:
/// 1. `DROVER_NODE_EXE` and `DROVER_CLI_JS` environment variables
/// 2. `DROVER_DRIVER_PATH` pointing at an unpacked driver directory
/// 3. Global npm installation (`npm root -g`)
/// 4. Local npm installation (`npm root`)
///
/// Returns a `(node_executable, cli_js)` pair.
///
/// # Errors
///
/// Returns [`Error::DriverNotFound`] if no candidate is both present and
/// runnable.
pub fn get_driver_executable() -> Result<(PathBuf, PathBuf)> {
    if let Some((node, cli)) = try_node_cli_env() {
        if node_is_usable(&node) {
            return Ok((node, cli));
        }
        warn!(
            node = %node.display(),
            cli = %cli.display(),
            "DROVER_NODE_EXE is set but node is not runnable; falling back"
        );
    }

    if let Some((node, cli)) = try_driver_path_env() {
        if node_is_usable(&node) {
            return Ok((node, cli));
        }
        warn!(
            node = %node.display(),
            cli = %cli.display(),
            "DROVER_DRIVER_PATH is set but node is not runnable; falling back"
        );
    }

    for global in [true, false] {
        if let Some((node, cli)) = try_npm_root(global) {
            if node_is_usable(&node) {
                debug!(node = %node.display(), cli = %cli.display(), global, "using npm driver");
                return Ok((node, cli));
            }
        }
    }

    Err(Error::DriverNotFound)
}

fn try_node_cli_env() -> Option<(PathBuf, PathBuf)> {
    let node = PathBuf::from(std::env::var_os("DROVER_NODE_EXE")?);
    let cli = PathBuf::from(std::env::var_os("DROVER_CLI_JS")?);
    (node.exists() && cli.exists()).then_some((node, cli))
}

fn try_driver_path_env() -> Option<(PathBuf, PathBuf)> {
    let driver_dir = PathBuf::from(std::env::var_os("DROVER_DRIVER_PATH")?);
    let node = if cfg!(windows) {
        driver_dir.join("node.exe")
    } else {
        driver_dir.join("node")
    };
    let cli = driver_dir.join("package").join("cli.js");
    (node.exists() && cli.exists()).then_some((node, cli))
}

/// Looks for the driver package under an npm root, pairing it with a
/// node executable from `PATH`.
fn try_npm_root(global: bool) -> Option<(PathBuf, PathBuf)> {
    let mut cmd = std::process::Command::new("npm");
    cmd.arg("root");
    if global {
        cmd.arg("-g");
    }
    let output = cmd.output().ok()?;
    if !output.status.success() {
        return None;
    }

    let node_modules = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
    let candidates = [
        node_modules.join("playwright"),
        node_modules.join("@playwright").join("test"),
    ];
    for dir in &candidates {
        let cli = dir.join("cli.js");
        if cli.exists() {
            if let Some(node) = find_node_executable() {
                return Some((node, cli));
            }
        }
    }
    None
}

fn node_is_usable(node: &Path) -> bool {
    std::process::Command::new(node)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

fn find_node_executable() -> Option<PathBuf> {
    #[cfg(not(windows))]
    let which_cmd = "which";
    #[cfg(windows)]
    let which_cmd = "where";

    if let Ok(output) = std::process::Command::new(which_cmd).arg("node").output() {
        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            if let Some(line) = stdout.lines().next() {
                let path = PathBuf::from(line.trim());
                if path.exists() {
                    return Some(path);
                }
            }
        }
    }

    #[cfg(not(windows))]
    let common_locations = [
        "/usr/local/bin/node",
        "/usr/bin/node",
        "/opt/homebrew/bin/node",
    ];
    #[cfg(windows)]
    let common_locations = [
        "C:\\Program Files\\nodejs\\node.exe",
        "C:\\Program Files (x86)\\nodejs\\node.exe",
    ];

    common_locations
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
}

/// The driver child process, communicating over stdio pipes.
#[derive(Debug)]
pub struct DriverProcess {
    process: Child,
}

impl DriverProcess {
    /// Launches the driver with `node <cli.js> run-driver`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DriverNotFound`] if the driver cannot be located
    /// and [`Error::LaunchFailed`] if the process fails to start or exits
    /// immediately.
    pub async fn launch() -> Result<Self> {
        let (node_exe, cli_js) = get_driver_executable()?;

        let mut cmd = Command::new(&node_exe);
        cmd.arg(&cli_js)
            .arg("run-driver")
            .env("PW_LANG_NAME", "rust")
            .env("PW_CLI_DISPLAY_VERSION", env!("CARGO_PKG_VERSION"))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::LaunchFailed(format!("failed to spawn driver: {e}")))?;

        // Give the process a moment to fail fast on a bad bundle.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        match child.try_wait() {
            Ok(Some(status)) => {
                return Err(Error::LaunchFailed(format!(
                    "driver exited immediately with status: {status}"
                )));
            }
            Ok(None) => {}
            Err(e) => {
                return Err(Error::LaunchFailed(format!(
                    "failed to check driver status: {e}"
                )));
            }
        }

        Ok(Self { process: child })
    }

    /// Takes the stdio pipes and wires them into a framed transport.
    ///
    /// May only be called once per launched process.
    pub fn transport_parts(&mut self) -> Result<TransportParts> {
        let stdin = self
            .process
            .stdin
            .take()
            .ok_or_else(|| Error::LaunchFailed("driver stdin already taken".to_string()))?;
        let stdout = self
            .process
            .stdout
            .take()
            .ok_or_else(|| Error::LaunchFailed("driver stdout already taken".to_string()))?;

        let (transport, message_rx) = PipeTransport::new(stdin, stdout);
        Ok(transport.into_transport_parts(message_rx))
    }

    /// Terminates the driver process and waits for it to exit.
    pub async fn shutdown(mut self) -> Result<()> {
        #[cfg(windows)]
        {
            // Tokio services child stdio through a blocking threadpool on
            // Windows; pipes must be closed before kill or the wait hangs.
            drop(self.process.stdin.take());
            drop(self.process.stdout.take());
            drop(self.process.stderr.take());
        }

        self.process
            .kill()
            .await
            .map_err(|e| Error::LaunchFailed(format!("failed to kill driver: {e}")))?;
        let _ = self.process.wait().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_lookup_returns_existing_path() {
        if let Some(node) = find_node_executable() {
            assert!(node.exists());
        }
    }

    #[test]
    fn driver_lookup_is_consistent() {
        match get_driver_executable() {
            Ok((node, cli)) => {
                assert!(node.exists());
                assert!(cli.exists());
            }
            Err(Error::DriverNotFound) => {}
            Err(e) => panic!("unexpected error: {e:?}"),
        }
    }
}
