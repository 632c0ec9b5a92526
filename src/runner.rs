//! Shell command execution seam.
//!
//! Everything the manager does to the host — spawning the dev server,
//! probing pids, chown, nginx validation and reload — goes through the
//! [`ProcessRunner`] trait, so the same lifecycle logic runs against the
//! real shell or a scripted double in tests.

use crate::error::{Result, SandboxError};
use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

/// Captured output of a finished command.
#[derive(Debug, Clone, Serialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Convert a non-zero exit into a typed [`SandboxError::Exec`].
    pub fn into_result(self, command: &str) -> Result<CommandOutput> {
        if self.success() {
            Ok(self)
        } else {
            Err(SandboxError::Exec {
                command: command.to_string(),
                exit_code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Bounded shell execution. Implementations must never block past `timeout`.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, command: &str, cwd: &Path, timeout: Duration) -> Result<CommandOutput>;
}

/// Real implementation: `sh -c` under the calling user.
pub struct ShellRunner;

#[async_trait]
impl ProcessRunner for ShellRunner {
    async fn run(&self, command: &str, cwd: &Path, timeout: Duration) -> Result<CommandOutput> {
        tracing::debug!("running command in {}: {command}", cwd.display());

        let fut = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();

        let output = match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result?,
            Err(_elapsed) => {
                return Err(SandboxError::Exec {
                    command: command.to_string(),
                    exit_code: -1,
                    stderr: format!("timed out after {timeout:?}"),
                })
            }
        };

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().map(i64::from).unwrap_or(-1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let out = ShellRunner
            .run("echo hello; exit 3", Path::new("/"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.exit_code, 3);
        assert!(!out.success());
    }

    #[tokio::test]
    async fn timeout_becomes_exec_error() {
        let err = ShellRunner
            .run("sleep 5", Path::new("/"), Duration::from_millis(50))
            .await
            .unwrap_err();
        match err {
            SandboxError::Exec { stderr, .. } => assert!(stderr.contains("timed out")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn into_result_maps_failure() {
        let out = CommandOutput {
            stdout: String::new(),
            stderr: "boom\n".to_string(),
            exit_code: 1,
        };
        let err = out.into_result("false").unwrap_err();
        match err {
            SandboxError::Exec {
                command,
                exit_code,
                stderr,
            } => {
                assert_eq!(command, "false");
                assert_eq!(exit_code, 1);
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
