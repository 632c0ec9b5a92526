//! Sandbox provisioning: directory, scaffold, dependencies, process, route,
//! readiness.
//!
//! Each completed step pushes a compensating action, so a failure anywhere
//! in the sequence unwinds what was already built instead of leaving a
//! half-provisioned sandbox behind. The surfaced error carries the stage
//! that failed.

use crate::config::ManagerConfig;
use crate::error::{ProvisionStage, Result, SandboxError};
use crate::health::HealthMonitor;
use crate::ports::PortAllocator;
use crate::process::ProcessSupervisor;
use crate::proxy::ProxyController;
use crate::registry::{SandboxRecord, SandboxStatus};
use crate::runner::ProcessRunner;
use crate::scaffold;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Compensating actions, unwound in reverse on failure.
enum Rollback {
    RemoveDir(PathBuf),
    KillProcess(u32),
    DeactivateRoute(String),
}

pub struct SandboxProvisioner {
    config: Arc<ManagerConfig>,
    runner: Arc<dyn ProcessRunner>,
    supervisor: Arc<ProcessSupervisor>,
    proxy: Arc<dyn ProxyController>,
    health: Arc<HealthMonitor>,
}

impl SandboxProvisioner {
    pub fn new(
        config: Arc<ManagerConfig>,
        runner: Arc<dyn ProcessRunner>,
        supervisor: Arc<ProcessSupervisor>,
        proxy: Arc<dyn ProxyController>,
        health: Arc<HealthMonitor>,
    ) -> Self {
        Self {
            config,
            runner,
            supervisor,
            proxy,
            health,
        }
    }

    /// Bring a sandbox for `user_name` to a running, routed, healthy state.
    pub async fn provision(&self, sandbox_id: &str, user_name: &str) -> Result<SandboxRecord> {
        let mut rollback = Vec::new();
        match self.run_stages(sandbox_id, user_name, &mut rollback).await {
            Ok(record) => Ok(record),
            Err(e) => {
                tracing::warn!("provisioning {sandbox_id} failed, rolling back: {e}");
                self.unwind(rollback).await;
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        sandbox_id: &str,
        user_name: &str,
        rollback: &mut Vec<Rollback>,
    ) -> Result<SandboxRecord> {
        let allocator = PortAllocator::new(self.config.dev_port, self.config.port_window);
        let port = allocator
            .allocate()
            .await
            .map_err(|e| e.at_stage(ProvisionStage::Port))?;

        let directory = self.config.sandbox_root.join(user_name);
        tokio::fs::create_dir_all(&directory)
            .await
            .map_err(|e| SandboxError::from(e).at_stage(ProvisionStage::Directory))?;
        rollback.push(Rollback::RemoveDir(directory.clone()));

        self.scaffold(&directory)
            .await
            .map_err(|e| e.at_stage(ProvisionStage::Scaffold))?;

        self.npm_install(&directory)
            .await
            .map_err(|e| e.at_stage(ProvisionStage::Install))?;

        let pid = self
            .supervisor
            .spawn(&directory, port)
            .await
            .map_err(|e| e.at_stage(ProvisionStage::Spawn))?;
        rollback.push(Rollback::KillProcess(pid));

        let subdomain = format!("{user_name}.{}", self.config.base_domain);
        self.proxy
            .activate(user_name, port, &subdomain)
            .await
            .map_err(|e| e.at_stage(ProvisionStage::Proxy))?;
        rollback.push(Rollback::DeactivateRoute(user_name.to_string()));

        self.health
            .wait_for_ready(port)
            .await
            .map_err(|e| e.at_stage(ProvisionStage::Health))?;

        Ok(SandboxRecord {
            sandbox_id: sandbox_id.to_string(),
            user_name: user_name.to_string(),
            port,
            url: format!("https://{subdomain}"),
            fallback_url: format!("http://{}:{port}", self.config.server_ip),
            subdomain,
            directory,
            pid: Some(pid),
            status: SandboxStatus::Running,
            created_at: Utc::now(),
        })
    }

    /// Write the template file set and hand ownership to the runtime user.
    async fn scaffold(&self, directory: &Path) -> Result<()> {
        tracing::info!("scaffolding project in {}", directory.display());

        for (rel_path, content) in scaffold::SCAFFOLD_FILES {
            let full = directory.join(rel_path);
            if let Some(parent) = full.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&full, content).await?;
        }

        if let Some((user, group)) = self.config.owner() {
            let command = format!("chown -R {user}:{group} \"{}\"", directory.display());
            self.runner
                .run(&command, Path::new("/"), self.config.command_timeout())
                .await?
                .into_result(&command)?;
        }
        Ok(())
    }

    async fn npm_install(&self, directory: &Path) -> Result<()> {
        tracing::info!("installing base dependencies...");
        let out = self
            .runner
            .run("npm install", directory, self.config.install_timeout())
            .await?;
        if !out.success() {
            return Err(SandboxError::PackageInstall {
                stderr: out.stderr.trim().to_string(),
            });
        }
        Ok(())
    }

    async fn unwind(&self, rollback: Vec<Rollback>) {
        for action in rollback.into_iter().rev() {
            match action {
                Rollback::KillProcess(pid) => {
                    self.supervisor.kill(pid).await;
                }
                Rollback::DeactivateRoute(user_name) => {
                    self.proxy.deactivate(&user_name).await;
                }
                Rollback::RemoveDir(directory) => {
                    if let Err(e) = tokio::fs::remove_dir_all(&directory).await {
                        tracing::warn!(
                            "rollback failed to remove {}: {e}",
                            directory.display()
                        );
                    }
                }
            }
        }
    }
}
