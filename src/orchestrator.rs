//! Lifecycle entry point: create / kill / status / restart, plus the
//! file and command surface collaborators use against the active sandbox.
//!
//! Every operation takes the single lifecycle lock before touching shared
//! resources, so concurrent requests queue instead of interleaving port
//! allocation, process spawns, and proxy edits. `create` always begins by
//! force-tearing-down whatever sandbox exists; `kill` and route removal
//! are best-effort and never surface internal failures to the caller.

use crate::config::ManagerConfig;
use crate::error::{Result, SandboxError};
use crate::fsx::{self, FileSystemGateway};
use crate::health::HealthMonitor;
use crate::installer::{InstallReport, PackageInstaller};
use crate::process::ProcessSupervisor;
use crate::provision::SandboxProvisioner;
use crate::proxy::{NginxProxy, ProxyController};
use crate::registry::{SandboxRecord, SandboxRegistry, SandboxStatus};
use crate::runner::{CommandOutput, ProcessRunner, ShellRunner};
use crate::scaffold;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

// ── responses ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct CreateResponse {
    pub sandbox_id: String,
    pub url: String,
    pub fallback_url: String,
    pub subdomain: String,
    pub user_name: String,
    pub port: u16,
    pub directory: String,
}

impl From<&SandboxRecord> for CreateResponse {
    fn from(record: &SandboxRecord) -> Self {
        Self {
            sandbox_id: record.sandbox_id.clone(),
            url: record.url.clone(),
            fallback_url: record.fallback_url.clone(),
            subdomain: record.subdomain.clone(),
            user_name: record.user_name.clone(),
            port: record.port,
            directory: record.directory.to_string_lossy().into_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct KillResponse {
    pub killed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub active: bool,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<SandboxRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestartResponse {
    pub sandbox_id: String,
    pub pid: u32,
}

// ── identifier derivation ────────────────────────────────────────────────────

/// Reduce a caller-supplied name to the charset safe for directory names,
/// subdomains, and nginx config names. Empty results fall back to "user".
pub fn sanitize_user(name: &str) -> String {
    let sanitized: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c == '_' || c.is_whitespace() { '-' } else { c })
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
        .collect();
    let sanitized = sanitized.trim_matches('-').to_string();
    if sanitized.is_empty() {
        "user".to_string()
    } else {
        sanitized
    }
}

// ── orchestrator ─────────────────────────────────────────────────────────────

pub struct LifecycleOrchestrator {
    config: Arc<ManagerConfig>,
    registry: Arc<SandboxRegistry>,
    runner: Arc<dyn ProcessRunner>,
    supervisor: Arc<ProcessSupervisor>,
    proxy: Arc<dyn ProxyController>,
    health: Arc<HealthMonitor>,
    provisioner: SandboxProvisioner,
    installer: PackageInstaller,
    /// Serializes all lifecycle and collaborator operations.
    op_lock: Mutex<()>,
}

impl LifecycleOrchestrator {
    /// Production wiring: real shell, real nginx.
    pub fn new(config: ManagerConfig) -> Self {
        let runner: Arc<dyn ProcessRunner> = Arc::new(ShellRunner);
        let proxy: Arc<dyn ProxyController> = Arc::new(NginxProxy::new(runner.clone(), &config));
        Self::with_parts(config, runner, proxy)
    }

    /// Wiring seam for tests and alternative backends.
    pub fn with_parts(
        config: ManagerConfig,
        runner: Arc<dyn ProcessRunner>,
        proxy: Arc<dyn ProxyController>,
    ) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(SandboxRegistry::new());
        let supervisor = Arc::new(ProcessSupervisor::new(
            runner.clone(),
            config.dev_server_command.clone(),
            config.spawn_timeout(),
        ));
        let health = Arc::new(HealthMonitor::new(supervisor.clone(), config.health_policy()));
        let provisioner = SandboxProvisioner::new(
            config.clone(),
            runner.clone(),
            supervisor.clone(),
            proxy.clone(),
            health.clone(),
        );
        let installer = PackageInstaller::new(
            runner.clone(),
            supervisor.clone(),
            registry.clone(),
            config.install_timeout(),
        );

        Self {
            config,
            registry,
            runner,
            supervisor,
            proxy,
            health,
            provisioner,
            installer,
            op_lock: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<SandboxRegistry> {
        &self.registry
    }

    // ── lifecycle operations ─────────────────────────────────────────────────

    /// Tear down any existing sandbox, then provision a fresh one. A failed
    /// provision leaves the registry empty.
    pub async fn create(&self, user_name: Option<&str>) -> Result<CreateResponse> {
        let _guard = self.op_lock.lock().await;
        self.teardown_current().await;

        let base = sanitize_user(user_name.unwrap_or("user"));
        let unique_user = format!("{base}{}", rand::random_range(0..100u32));
        let sandbox_id = format!("sandbox_{}", Uuid::new_v4().simple());

        tracing::info!("creating sandbox {sandbox_id} for user {unique_user}");

        let record = self.provisioner.provision(&sandbox_id, &unique_user).await?;
        let response = CreateResponse::from(&record);
        self.registry.commit(record, scaffold::SEED_PATHS);

        tracing::info!("sandbox created: {}", response.url);
        Ok(response)
    }

    /// Kill the active sandbox. Absence is a no-op success; internal
    /// cleanup failures are logged, never returned.
    pub async fn kill(&self) -> KillResponse {
        let _guard = self.op_lock.lock().await;
        KillResponse {
            killed: self.teardown_current().await,
        }
    }

    /// Report the registry record plus a fresh liveness probe. Does not
    /// mutate the registry: a dead process shows up as `healthy: false`
    /// with the record intact, and `restart`/`kill` remain the recovery
    /// verbs.
    pub async fn status(&self) -> StatusResponse {
        let _guard = self.op_lock.lock().await;
        match self.registry.current() {
            None => StatusResponse {
                active: false,
                healthy: false,
                record: None,
            },
            Some(record) => {
                let healthy = match record.pid {
                    Some(pid) => self.health.probe_process(pid).await,
                    None => false,
                };
                StatusResponse {
                    active: true,
                    healthy,
                    record: Some(record),
                }
            }
        }
    }

    /// Restart the dev server on the same port and directory; the record
    /// keeps its identity and picks up the new pid.
    pub async fn restart(&self) -> Result<RestartResponse> {
        let _guard = self.op_lock.lock().await;
        let record = self.registry.current().ok_or(SandboxError::NoActiveSandbox)?;

        let pid = self
            .supervisor
            .restart(&record.directory, record.port, record.pid)
            .await?;
        self.registry.update_pid(pid);
        self.registry.set_status(SandboxStatus::Running);

        tracing::info!("sandbox {} restarted with pid {pid}", record.sandbox_id);
        Ok(RestartResponse {
            sandbox_id: record.sandbox_id,
            pid,
        })
    }

    // ── collaborator surface ─────────────────────────────────────────────────

    pub async fn write_file(&self, rel_path: &str, content: &str) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        self.gateway()?.write(rel_path, content).await
    }

    pub async fn read_file(&self, rel_path: &str) -> Result<String> {
        let _guard = self.op_lock.lock().await;
        let gateway = self.gateway()?;
        let rel = fsx::normalize(rel_path)?.to_string_lossy().into_owned();
        if let Some(cached) = self.registry.cache_get(&rel) {
            return Ok(cached.content);
        }
        gateway.read(&rel).await
    }

    pub async fn delete_file(&self, rel_path: &str) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        self.gateway()?.delete(rel_path).await
    }

    pub async fn list_files(&self) -> Result<Vec<String>> {
        let _guard = self.op_lock.lock().await;
        self.gateway()?.list().await
    }

    /// Run an arbitrary shell command scoped to the sandbox directory (or a
    /// relative subdirectory of it), with the configured command timeout.
    pub async fn run_command(&self, command: &str, cwd: Option<&str>) -> Result<CommandOutput> {
        let _guard = self.op_lock.lock().await;
        let record = self.registry.current().ok_or(SandboxError::NoActiveSandbox)?;
        let workdir = match cwd {
            Some(rel) => record.directory.join(fsx::normalize(rel)?),
            None => record.directory.clone(),
        };
        self.runner
            .run(command, &workdir, self.config.command_timeout())
            .await
    }

    pub async fn install_packages(&self, packages: &[String]) -> Result<InstallReport> {
        let _guard = self.op_lock.lock().await;
        self.installer.install(packages).await
    }

    /// Detect packages referenced by a batch of generated files and install
    /// them. Used by the code-apply collaborator after a write burst.
    pub async fn detect_and_install(
        &self,
        files: &HashMap<String, String>,
    ) -> Result<InstallReport> {
        let _guard = self.op_lock.lock().await;
        self.installer.detect_and_install(files).await
    }

    // ── internals ────────────────────────────────────────────────────────────

    fn gateway(&self) -> Result<FileSystemGateway> {
        let record = self.registry.current().ok_or(SandboxError::NoActiveSandbox)?;
        Ok(FileSystemGateway::new(
            record.directory,
            self.registry.clone(),
            self.runner.clone(),
            self.config.owner(),
        ))
    }

    /// Best-effort teardown of the current sandbox: kill the dev server,
    /// sweep stragglers out of its directory, drop the proxy route, clear
    /// the registry. Returns whether a process was actually signaled.
    async fn teardown_current(&self) -> bool {
        let Some(record) = self.registry.current() else {
            return false;
        };

        tracing::info!("tearing down sandbox {}", record.sandbox_id);

        let mut killed = false;
        if let Some(pid) = record.pid {
            killed = self.supervisor.kill(pid).await;
        }

        // Anything else still running out of the sandbox directory.
        let sweep = format!("pkill -f \"{}\"", record.directory.display());
        if let Err(e) = self
            .runner
            .run(&sweep, Path::new("/"), self.config.command_timeout())
            .await
        {
            tracing::debug!("sweep of {} failed: {e}", record.directory.display());
        }

        self.proxy.deactivate(&record.user_name).await;
        self.registry.clear();
        killed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_user_reduces_to_safe_charset() {
        assert_eq!(sanitize_user("Alice"), "alice");
        assert_eq!(sanitize_user("alice_dev"), "alice-dev");
        assert_eq!(sanitize_user("bob smith"), "bob-smith");
        assert_eq!(sanitize_user("weird!#$chars"), "weirdchars");
        assert_eq!(sanitize_user("---"), "user");
        assert_eq!(sanitize_user(""), "user");
        assert_eq!(sanitize_user("../../etc"), "etc");
    }

    #[test]
    fn sanitized_names_pass_proxy_validation() {
        for name in ["Alice", "bob_smith", "x../..y", "user name"] {
            assert!(crate::proxy::valid_identifier(&sanitize_user(name)));
        }
    }
}
