//! Nginx route management for sandbox subdomains.
//!
//! Each sandbox gets a per-user server block: port 80 redirect, TLS on 443
//! with the shared wildcard certificate, and a websocket-capable proxy to
//! the dev server's localhost port (Vite's live reload rides that socket).
//!
//! Activation is transactional: the rendered block is written to a staging
//! file, linked into `sites-enabled`, and `nginx -t` validates the whole
//! configuration before anything is reloaded. A failed validation removes
//! the staged file and leaves the previously working configuration in
//! force. Deactivation is best-effort cleanup and never propagates errors.

use crate::config::ManagerConfig;
use crate::error::{Result, SandboxError};
use crate::runner::ProcessRunner;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const NGINX_TIMEOUT: Duration = Duration::from_secs(30);

/// Seam for proxy reconfiguration so the orchestrator can run against
/// nginx or a test double.
#[async_trait]
pub trait ProxyController: Send + Sync {
    async fn activate(&self, user_name: &str, port: u16, subdomain: &str) -> Result<()>;
    /// Best-effort removal; failures are logged, never returned.
    async fn deactivate(&self, user_name: &str);
}

/// Filesystem- and DNS-safe identifier: lowercase alphanumerics and `-`.
/// Anything else could smuggle nginx directives or path segments through
/// the rendered template, so it is rejected before substitution.
pub fn valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

fn valid_subdomain(subdomain: &str) -> bool {
    !subdomain.is_empty()
        && subdomain
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
}

/// Render the per-user server block. Inputs must already be validated.
pub fn render_server_block(subdomain: &str, port: u16, tls_cert: &Path, tls_key: &Path) -> String {
    format!(
        r#"# Server block for user subdomain: {subdomain}
server {{
    listen 80;
    listen [::]:80;
    server_name {subdomain};
    return 301 https://$server_name$request_uri;
}}

server {{
    listen 443 ssl http2;
    listen [::]:443 ssl http2;
    server_name {subdomain};

    # Shared wildcard certificate
    ssl_certificate {cert};
    ssl_certificate_key {key};

    ssl_protocols TLSv1.2 TLSv1.3;
    ssl_ciphers HIGH:!aNULL:!MD5;
    ssl_prefer_server_ciphers on;

    add_header X-Frame-Options "SAMEORIGIN" always;
    add_header X-XSS-Protection "1; mode=block" always;
    add_header X-Content-Type-Options "nosniff" always;
    add_header Referrer-Policy "no-referrer-when-downgrade" always;
    add_header Content-Security-Policy "default-src 'self' http: https: data: blob: 'unsafe-inline'; connect-src 'self' ws: wss:;" always;

    location / {{
        proxy_pass http://localhost:{port}/;
        proxy_http_version 1.1;
        proxy_set_header Upgrade $http_upgrade;
        proxy_set_header Connection 'upgrade';
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
        proxy_cache_bypass $http_upgrade;

        # Keep HMR websockets open
        proxy_set_header Origin http://localhost:{port};
        proxy_buffering off;
        proxy_read_timeout 86400;
        proxy_send_timeout 86400;
    }}

    error_page 404 /404.html;
    error_page 500 502 503 504 /50x.html;
}}
"#,
        subdomain = subdomain,
        port = port,
        cert = tls_cert.display(),
        key = tls_key.display(),
    )
}

pub struct NginxProxy {
    runner: Arc<dyn ProcessRunner>,
    available_dir: PathBuf,
    enabled_dir: PathBuf,
    tls_cert: PathBuf,
    tls_key: PathBuf,
}

impl NginxProxy {
    pub fn new(runner: Arc<dyn ProcessRunner>, config: &ManagerConfig) -> Self {
        Self {
            runner,
            available_dir: config.nginx_available.clone(),
            enabled_dir: config.nginx_enabled.clone(),
            tls_cert: config.tls_cert.clone(),
            tls_key: config.tls_key.clone(),
        }
    }

    fn conf_path(&self, user_name: &str) -> PathBuf {
        self.available_dir.join(format!("{user_name}.conf"))
    }

    fn staging_path(&self, user_name: &str) -> PathBuf {
        self.available_dir.join(format!("{user_name}.conf.staging"))
    }

    fn enabled_path(&self, user_name: &str) -> PathBuf {
        self.enabled_dir.join(format!("{user_name}.conf"))
    }

    async fn validate(&self) -> Result<()> {
        let out = self
            .runner
            .run("nginx -t", Path::new("/"), NGINX_TIMEOUT)
            .await?;
        if !out.success() {
            return Err(SandboxError::ConfigValidation {
                detail: out.stderr.trim().to_string(),
            });
        }
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        self.runner
            .run("systemctl reload nginx", Path::new("/"), NGINX_TIMEOUT)
            .await?
            .into_result("systemctl reload nginx")?;
        Ok(())
    }

    async fn relink(&self, link: &Path, target: &Path) -> Result<()> {
        let _ = tokio::fs::remove_file(link).await;
        tokio::fs::symlink(target, link).await?;
        Ok(())
    }
}

#[async_trait]
impl ProxyController for NginxProxy {
    async fn activate(&self, user_name: &str, port: u16, subdomain: &str) -> Result<()> {
        if !valid_identifier(user_name) || !valid_subdomain(subdomain) {
            return Err(SandboxError::ConfigValidation {
                detail: format!("unsafe identifier: {user_name} / {subdomain}"),
            });
        }

        tracing::info!("activating proxy route {subdomain} -> localhost:{port}");

        let rendered = render_server_block(subdomain, port, &self.tls_cert, &self.tls_key);
        tokio::fs::create_dir_all(&self.available_dir).await?;
        tokio::fs::create_dir_all(&self.enabled_dir).await?;

        let staging = self.staging_path(user_name);
        let conf = self.conf_path(user_name);
        let enabled = self.enabled_path(user_name);

        // Stage, enable the staged file, and validate the whole config.
        // Nothing is reloaded until validation passes, so a rejected block
        // leaves the previous configuration live.
        tokio::fs::write(&staging, rendered).await?;
        self.relink(&enabled, &staging).await?;

        if let Err(e) = self.validate().await {
            let _ = tokio::fs::remove_file(&enabled).await;
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e);
        }

        tokio::fs::rename(&staging, &conf).await?;
        self.relink(&enabled, &conf).await?;
        self.reload().await?;
        Ok(())
    }

    async fn deactivate(&self, user_name: &str) {
        if !valid_identifier(user_name) {
            tracing::warn!("refusing to deactivate unsafe identifier: {user_name}");
            return;
        }

        tracing::info!("removing proxy route for {user_name}");

        for path in [
            self.enabled_path(user_name),
            self.conf_path(user_name),
            self.staging_path(user_name),
        ] {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("failed to remove {}: {e}", path.display());
                }
            }
        }

        if let Err(e) = self.validate().await {
            tracing::warn!("nginx validation after route removal failed: {e}");
            return;
        }
        if let Err(e) = self.reload().await {
            tracing::warn!("nginx reload after route removal failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::CommandOutput;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Runner double: nginx -t outcome is switchable, everything else
    /// succeeds.
    struct NginxStub {
        fail_validation: AtomicBool,
    }

    impl NginxStub {
        fn new() -> Self {
            Self {
                fail_validation: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl ProcessRunner for NginxStub {
        async fn run(&self, command: &str, _: &Path, _: Duration) -> Result<CommandOutput> {
            let failing = command == "nginx -t" && self.fail_validation.load(Ordering::SeqCst);
            Ok(CommandOutput {
                stdout: String::new(),
                stderr: if failing {
                    "nginx: configuration file test failed".to_string()
                } else {
                    String::new()
                },
                exit_code: if failing { 1 } else { 0 },
            })
        }
    }

    fn proxy_in(dir: &Path, runner: Arc<NginxStub>) -> NginxProxy {
        let config = ManagerConfig {
            nginx_available: dir.join("sites-available"),
            nginx_enabled: dir.join("sites-enabled"),
            ..Default::default()
        };
        NginxProxy::new(runner, &config)
    }

    #[test]
    fn identifier_validation() {
        assert!(valid_identifier("alice42"));
        assert!(valid_identifier("a-b-c"));
        assert!(!valid_identifier(""));
        assert!(!valid_identifier("alice;rm -rf /"));
        assert!(!valid_identifier("alice.conf"));
        assert!(!valid_identifier("Alice"));
        assert!(!valid_identifier("../alice"));
    }

    #[test]
    fn rendered_block_binds_subdomain_to_port() {
        let block = render_server_block(
            "alice42.sandbox.example.com",
            3004,
            Path::new("/etc/ssl/fullchain.pem"),
            Path::new("/etc/ssl/privkey.pem"),
        );
        assert!(block.contains("server_name alice42.sandbox.example.com;"));
        assert!(block.contains("proxy_pass http://localhost:3004/;"));
        assert!(block.contains("proxy_set_header Upgrade $http_upgrade;"));
        assert!(block.contains("proxy_set_header Connection 'upgrade';"));
        assert!(block.contains("ssl_certificate /etc/ssl/fullchain.pem;"));
        assert!(block.contains("proxy_buffering off;"));
        assert!(block.contains("return 301 https://$server_name$request_uri;"));
    }

    #[tokio::test]
    async fn activate_enables_validated_config() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(NginxStub::new());
        let proxy = proxy_in(dir.path(), runner);

        proxy
            .activate("alice42", 3004, "alice42.sandbox.example.com")
            .await
            .unwrap();

        let conf = dir.path().join("sites-available/alice42.conf");
        let enabled = dir.path().join("sites-enabled/alice42.conf");
        assert!(conf.exists());
        assert!(enabled.exists());
        assert!(!dir.path().join("sites-available/alice42.conf.staging").exists());

        proxy.deactivate("alice42").await;
        assert!(!conf.exists());
        assert!(!enabled.exists());
    }

    #[tokio::test]
    async fn failed_validation_leaves_nothing_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(NginxStub::new());
        runner.fail_validation.store(true, Ordering::SeqCst);
        let proxy = proxy_in(dir.path(), runner);

        let err = proxy
            .activate("alice42", 3004, "alice42.sandbox.example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::ConfigValidation { .. }));

        // Neither the staged file nor a symlink survives.
        assert!(!dir.path().join("sites-available/alice42.conf").exists());
        assert!(!dir.path().join("sites-available/alice42.conf.staging").exists());
        assert!(!dir.path().join("sites-enabled/alice42.conf").exists());
    }

    #[tokio::test]
    async fn activate_rejects_injection_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = proxy_in(dir.path(), Arc::new(NginxStub::new()));

        let err = proxy
            .activate("alice;}server{", 3000, "x.example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::ConfigValidation { .. }));
    }
}
