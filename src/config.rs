//! Host configuration for the sandbox manager.
//!
//! All of the host-specific knobs live here: where sandboxes are rooted,
//! which domain subdomains hang off, the port scan window, nginx paths, and
//! the timeout/retry budget for every external call. Defaults match a
//! typical single-host deployment; a TOML file overrides any subset.

use crate::health::RetryPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ManagerConfig {
    /// Parent directory for all sandbox project directories.
    pub sandbox_root: PathBuf,
    /// Base domain; each sandbox gets `<user>.<base_domain>`.
    pub base_domain: String,
    /// Public IP of the host, used for the fallback `http://ip:port` URL.
    pub server_ip: String,
    /// Unix user the dev server and sandbox files run as. When unset, no
    /// ownership changes are attempted (useful for tests and dev machines).
    pub runtime_user: Option<String>,
    pub runtime_group: Option<String>,
    /// First port of the allocation window.
    pub dev_port: u16,
    /// Number of ports scanned after `dev_port`.
    pub port_window: u16,
    pub nginx_available: PathBuf,
    pub nginx_enabled: PathBuf,
    /// Wildcard certificate shared by every sandbox subdomain.
    pub tls_cert: PathBuf,
    pub tls_key: PathBuf,
    /// Dev-server launch command; `{port}` is substituted at spawn time.
    pub dev_server_command: String,
    pub install_timeout_secs: u64,
    pub command_timeout_secs: u64,
    pub spawn_timeout_secs: u64,
    pub health_max_attempts: u32,
    pub health_interval_ms: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            sandbox_root: PathBuf::from("/var/www/sandhost/sandboxes"),
            base_domain: "sandbox.example.com".to_string(),
            server_ip: "127.0.0.1".to_string(),
            runtime_user: Some("www-data".to_string()),
            runtime_group: Some("www-data".to_string()),
            dev_port: 3000,
            port_window: 100,
            nginx_available: PathBuf::from("/etc/nginx/sites-available"),
            nginx_enabled: PathBuf::from("/etc/nginx/sites-enabled"),
            tls_cert: PathBuf::from("/etc/letsencrypt/live/sandbox.example.com/fullchain.pem"),
            tls_key: PathBuf::from("/etc/letsencrypt/live/sandbox.example.com/privkey.pem"),
            dev_server_command: "npm run dev -- --port {port}".to_string(),
            install_timeout_secs: 300,
            command_timeout_secs: 60,
            spawn_timeout_secs: 30,
            health_max_attempts: 30,
            health_interval_ms: 1000,
        }
    }
}

impl ManagerConfig {
    /// Load config from a TOML file. A missing file yields the defaults so
    /// the binary runs without any setup.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::warn!("config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let mut config: ManagerConfig = toml::from_str(&raw)?;
        config.sandbox_root =
            PathBuf::from(shellexpand::tilde(&config.sandbox_root.to_string_lossy()).into_owned());
        Ok(config)
    }

    /// `user:group` pair for chown, when a runtime user is configured.
    pub fn owner(&self) -> Option<(String, String)> {
        let user = self.runtime_user.clone()?;
        let group = self.runtime_group.clone().unwrap_or_else(|| user.clone());
        Some((user, group))
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn spawn_timeout(&self) -> Duration {
        Duration::from_secs(self.spawn_timeout_secs)
    }

    pub fn health_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.health_max_attempts,
            interval: Duration::from_millis(self.health_interval_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ManagerConfig::default();
        assert_eq!(config.dev_port, 3000);
        assert_eq!(config.port_window, 100);
        assert!(config.dev_server_command.contains("{port}"));
        assert_eq!(config.health_policy().max_attempts, 30);
    }

    #[test]
    fn owner_falls_back_to_user_as_group() {
        let config = ManagerConfig {
            runtime_user: Some("ubuntu".to_string()),
            runtime_group: None,
            ..Default::default()
        };
        assert_eq!(
            config.owner(),
            Some(("ubuntu".to_string(), "ubuntu".to_string()))
        );

        let unowned = ManagerConfig {
            runtime_user: None,
            ..Default::default()
        };
        assert_eq!(unowned.owner(), None);
    }

    #[test]
    fn toml_overrides_subset() {
        let raw = r#"
            base_domain = "apps.internal"
            dev_port = 4000
            port_window = 10
        "#;
        let config: ManagerConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.base_domain, "apps.internal");
        assert_eq!(config.dev_port, 4000);
        assert_eq!(config.port_window, 10);
        // untouched fields keep their defaults
        assert_eq!(config.health_max_attempts, 30);
    }
}
