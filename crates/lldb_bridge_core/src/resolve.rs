//! Bundle identifier to process id, via the simulator tooling.

use crate::error::SessionError;
use crate::Result;
use async_trait::async_trait;
use std::process::Output;
use tokio::process::Command;

#[async_trait]
pub trait ProcessResolver: Send + Sync {
    /// Pid of the running app with this bundle identifier.
    async fn resolve(&self, bundle_id: &str) -> Result<u32>;
}

#[async_trait]
pub trait AppLauncher: Send + Sync {
    /// Starts the app and returns its pid. With `wait_for_debugger` the app
    /// is held before `main` until a debugger attaches.
    async fn launch(&self, bundle_id: &str, wait_for_debugger: bool) -> Result<u32>;
}

/// Resolver and launcher backed by `xcrun simctl`.
#[derive(Debug, Clone)]
pub struct SimulatorTools {
    simulator: String,
    xcrun: String,
}

impl SimulatorTools {
    pub fn new(simulator: impl Into<String>) -> Self {
        Self {
            simulator: simulator.into(),
            xcrun: "xcrun".to_string(),
        }
    }

    pub fn with_xcrun(mut self, xcrun: impl Into<String>) -> Self {
        self.xcrun = xcrun.into();
        self
    }

    async fn simctl(&self, args: &[&str]) -> std::io::Result<Output> {
        tracing::debug!(simulator = %self.simulator, ?args, "Running simctl");
        Command::new(&self.xcrun)
            .arg("simctl")
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
    }
}

#[async_trait]
impl ProcessResolver for SimulatorTools {
    async fn resolve(&self, bundle_id: &str) -> Result<u32> {
        let resolve_error = |message: String| SessionError::Resolve {
            bundle_id: bundle_id.to_string(),
            message,
        };

        let output = self
            .simctl(&["spawn", &self.simulator, "launchctl", "list"])
            .await
            .map_err(|e| resolve_error(format!("failed to run simctl: {e}")))?;
        if !output.status.success() {
            return Err(resolve_error(command_failure(&output)));
        }

        let listing = String::from_utf8_lossy(&output.stdout);
        let pid = parse_launchctl_pid(&listing, bundle_id)
            .ok_or_else(|| resolve_error("no running process for bundle".to_string()))?;
        tracing::info!(bundle_id, pid, "Resolved bundle to pid");
        Ok(pid)
    }
}

#[async_trait]
impl AppLauncher for SimulatorTools {
    async fn launch(&self, bundle_id: &str, wait_for_debugger: bool) -> Result<u32> {
        let launch_error = |message: String| SessionError::Launch {
            bundle_id: bundle_id.to_string(),
            message,
        };

        let mut args = vec!["launch"];
        if wait_for_debugger {
            args.push("--wait-for-debugger");
        }
        args.push(&self.simulator);
        args.push(bundle_id);

        let output = self
            .simctl(&args)
            .await
            .map_err(|e| launch_error(format!("failed to run simctl: {e}")))?;
        if !output.status.success() {
            return Err(launch_error(command_failure(&output)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let pid = parse_launch_pid(&stdout, bundle_id)
            .ok_or_else(|| launch_error(format!("unexpected simctl output: {}", stdout.trim())))?;
        tracing::info!(bundle_id, pid, wait_for_debugger, "Launched app");
        Ok(pid)
    }
}

fn command_failure(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("simctl exited with {}: {}", output.status, stderr.trim())
}

/// Finds the pid column of the `UIKitApplication:<bundle>[...]` row.
/// A `-` pid means the job is known but not running.
pub fn parse_launchctl_pid(listing: &str, bundle_id: &str) -> Option<u32> {
    let label = format!("UIKitApplication:{bundle_id}[");
    listing.lines().find_map(|line| {
        let mut columns = line.split_whitespace();
        let pid = columns.next()?;
        let _status = columns.next()?;
        let name = columns.next()?;
        if name.starts_with(&label) || name == bundle_id {
            pid.parse().ok()
        } else {
            None
        }
    })
}

/// Parses `<bundle>: <pid>` as printed by `simctl launch`.
pub fn parse_launch_pid(stdout: &str, bundle_id: &str) -> Option<u32> {
    stdout.lines().find_map(|line| {
        let (name, pid) = line.trim().rsplit_once(':')?;
        if name.trim() == bundle_id {
            pid.trim().parse().ok()
        } else {
            None
        }
    })
}
