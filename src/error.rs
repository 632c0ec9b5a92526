//! Error taxonomy for sandbox lifecycle operations.
//!
//! Every fallible path in the crate surfaces one of these variants. The
//! binary boundary (`main.rs`) wraps them in `anyhow` for display; library
//! callers match on the variant.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The provisioning step that failed, carried by
/// [`SandboxError::Provisioning`] so callers can see how far `create` got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStage {
    Port,
    Directory,
    Scaffold,
    Install,
    Spawn,
    Proxy,
    Health,
}

impl ProvisionStage {
    pub fn as_str(self) -> &'static str {
        match self {
            ProvisionStage::Port => "port",
            ProvisionStage::Directory => "directory",
            ProvisionStage::Scaffold => "scaffold",
            ProvisionStage::Install => "install",
            ProvisionStage::Spawn => "spawn",
            ProvisionStage::Proxy => "proxy",
            ProvisionStage::Health => "health",
        }
    }
}

impl fmt::Display for ProvisionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("no available port in {start}..{end}")]
    ResourceExhausted { start: u16, end: u16 },

    #[error("provisioning failed at stage `{stage}`: {source}")]
    Provisioning {
        stage: ProvisionStage,
        #[source]
        source: Box<SandboxError>,
    },

    #[error("failed to start development server (no pid captured)")]
    ProcessSpawnFailure,

    #[error("server on port {port} did not become ready within {waited:?}")]
    HealthCheckTimeout { port: u16, waited: Duration },

    #[error("proxy config validation failed: {detail}")]
    ConfigValidation { detail: String },

    #[error("path escapes the sandbox directory: {path}")]
    PathTraversal { path: String },

    #[error("file not found: {path}")]
    FileNotFound { path: String },

    #[error("package installation failed: {stderr}")]
    PackageInstall { stderr: String },

    #[error("command `{command}` failed with exit code {exit_code}: {stderr}")]
    Exec {
        command: String,
        exit_code: i64,
        stderr: String,
    },

    #[error("no active sandbox")]
    NoActiveSandbox,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    /// Tag an error with the provisioning stage it surfaced in.
    pub fn at_stage(self, stage: ProvisionStage) -> Self {
        SandboxError::Provisioning {
            stage,
            source: Box::new(self),
        }
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names() {
        assert_eq!(ProvisionStage::Port.as_str(), "port");
        assert_eq!(ProvisionStage::Scaffold.as_str(), "scaffold");
        assert_eq!(ProvisionStage::Health.as_str(), "health");
    }

    #[test]
    fn stage_tagging_preserves_source() {
        let err = SandboxError::ProcessSpawnFailure.at_stage(ProvisionStage::Spawn);
        match err {
            SandboxError::Provisioning { stage, source } => {
                assert_eq!(stage, ProvisionStage::Spawn);
                assert!(matches!(*source, SandboxError::ProcessSpawnFailure));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
