//! Dev-server process supervision via shell primitives.
//!
//! The dev server is launched as a detached background process whose pid is
//! echoed back (`… & echo $!`). Liveness is a `kill -0` probe and
//! termination is `kill -9`; "already dead" is success for both kill and
//! restart, matching the cleanup philosophy of the lifecycle operations.

use crate::error::{Result, SandboxError};
use crate::runner::ProcessRunner;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const SIGNAL_TIMEOUT: Duration = Duration::from_secs(10);
/// Pause between kill and respawn so the old process releases its port.
const RESTART_SETTLE: Duration = Duration::from_millis(1000);

pub struct ProcessSupervisor {
    runner: Arc<dyn ProcessRunner>,
    command_template: String,
    spawn_timeout: Duration,
}

impl ProcessSupervisor {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        command_template: impl Into<String>,
        spawn_timeout: Duration,
    ) -> Self {
        Self {
            runner,
            command_template: command_template.into(),
            spawn_timeout,
        }
    }

    /// Launch the dev server in `directory` bound to `port` and return its
    /// pid. Fails with [`SandboxError::ProcessSpawnFailure`] when no valid
    /// pid comes back.
    pub async fn spawn(&self, directory: &Path, port: u16) -> Result<u32> {
        let dev_command = self.command_template.replace("{port}", &port.to_string());
        let command = format!("{dev_command} >/dev/null 2>&1 & echo $!");

        let out = self.runner.run(&command, directory, self.spawn_timeout).await?;
        let pid = out
            .stdout
            .trim()
            .parse::<u32>()
            .map_err(|_| SandboxError::ProcessSpawnFailure)?;

        tracing::info!("dev server started with pid {pid} on port {port}");
        Ok(pid)
    }

    /// Signal-0 liveness probe. Any failure to deliver means "not alive".
    pub async fn is_alive(&self, pid: u32) -> bool {
        match self
            .runner
            .run(&format!("kill -0 {pid}"), Path::new("/"), SIGNAL_TIMEOUT)
            .await
        {
            Ok(out) => out.success(),
            Err(_) => false,
        }
    }

    /// Force-terminate. Returns whether the signal was delivered; a process
    /// that was already gone is not an error.
    pub async fn kill(&self, pid: u32) -> bool {
        match self
            .runner
            .run(&format!("kill -9 {pid}"), Path::new("/"), SIGNAL_TIMEOUT)
            .await
        {
            Ok(out) => {
                if !out.success() {
                    tracing::debug!("process {pid} was already dead");
                }
                out.success()
            }
            Err(e) => {
                tracing::debug!("kill -9 {pid} failed: {e}");
                false
            }
        }
    }

    /// Kill the old process (absence ignored) and spawn a fresh one.
    pub async fn restart(&self, directory: &Path, port: u16, old_pid: Option<u32>) -> Result<u32> {
        if let Some(pid) = old_pid {
            self.kill(pid).await;
            tokio::time::sleep(RESTART_SETTLE).await;
        }
        self.spawn(directory, port).await
    }
}
