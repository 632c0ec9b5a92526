//! Package installation and import-based package detection.
//!
//! Installing into a live sandbox is a two-phase operation: `npm install`
//! first, and only on success a dev-server restart so the new packages are
//! picked up. An install failure leaves the running server untouched; a
//! restart failure after a successful install is logged but not propagated,
//! because the packages did land.

use crate::error::{Result, SandboxError};
use crate::process::ProcessSupervisor;
use crate::registry::{SandboxRegistry, SandboxStatus};
use crate::runner::ProcessRunner;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

/// Node builtins that look like bare imports but are never npm packages.
const NODE_BUILTINS: &[&str] = &["fs", "path", "url", "crypto", "os", "util"];

static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"import\s+(?:(?:\{[^}]*\}|\*\s+as\s+\w+|\w+)\s*,?\s*)*(?:from\s+)?['"]([^'"]+)['"]"#,
    )
    .expect("import regex")
});

static REQUIRE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"require\s*\(['"]([^'"]+)['"]\)"#).expect("require regex"));

#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
    pub installed: Vec<String>,
    pub failed: Vec<String>,
    pub stdout: String,
    pub stderr: String,
}

impl InstallReport {
    fn empty() -> Self {
        Self {
            installed: Vec::new(),
            failed: Vec::new(),
            stdout: String::new(),
            stderr: String::new(),
        }
    }
}

/// Extract the npm package names referenced by a set of js/jsx/ts/tsx
/// sources. Relative imports and Node builtins are dropped; deep imports
/// collapse to the package root (`lodash/merge` -> `lodash`,
/// `@scope/pkg/sub` -> `@scope/pkg`). Order of first appearance, deduped.
pub fn detect_packages(files: &HashMap<String, String>) -> Vec<String> {
    let mut packages = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for (path, content) in files {
        let is_source = [".js", ".jsx", ".ts", ".tsx"]
            .iter()
            .any(|ext| path.ends_with(ext));
        if !is_source {
            continue;
        }

        let specifiers = IMPORT_RE
            .captures_iter(content)
            .chain(REQUIRE_RE.captures_iter(content))
            .filter_map(|captures| captures.get(1))
            .map(|m| m.as_str());

        for specifier in specifiers {
            if specifier.starts_with('.') || specifier.starts_with('/') {
                continue;
            }
            if NODE_BUILTINS.contains(&specifier) {
                continue;
            }

            let parts: Vec<&str> = specifier.split('/').collect();
            let package = if specifier.starts_with('@') && parts.len() >= 2 {
                format!("{}/{}", parts[0], parts[1])
            } else {
                parts[0].to_string()
            };

            if seen.insert(package.clone()) {
                packages.push(package);
            }
        }
    }

    packages
}

pub struct PackageInstaller {
    runner: Arc<dyn ProcessRunner>,
    supervisor: Arc<ProcessSupervisor>,
    registry: Arc<SandboxRegistry>,
    install_timeout: Duration,
}

impl PackageInstaller {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        supervisor: Arc<ProcessSupervisor>,
        registry: Arc<SandboxRegistry>,
        install_timeout: Duration,
    ) -> Self {
        Self {
            runner,
            supervisor,
            registry,
            install_timeout,
        }
    }

    /// Install packages into the active sandbox. On success the dev server
    /// is restarted and the registry pid updated; on npm failure the report
    /// lists every package as failed and the server is left alone.
    pub async fn install(&self, packages: &[String]) -> Result<InstallReport> {
        if packages.is_empty() {
            return Err(SandboxError::PackageInstall {
                stderr: "no packages specified".to_string(),
            });
        }
        let record = self.registry.current().ok_or(SandboxError::NoActiveSandbox)?;

        tracing::info!("installing packages: {}", packages.join(", "));
        let command = format!("npm install {}", packages.join(" "));
        let out = self
            .runner
            .run(&command, &record.directory, self.install_timeout)
            .await?;

        if !out.success() {
            tracing::warn!("package install failed: {}", out.stderr.trim());
            return Ok(InstallReport {
                installed: Vec::new(),
                failed: packages.to_vec(),
                stdout: out.stdout,
                stderr: out.stderr,
            });
        }

        match self
            .supervisor
            .restart(&record.directory, record.port, record.pid)
            .await
        {
            Ok(pid) => {
                self.registry.update_pid(pid);
                self.registry.set_status(SandboxStatus::Running);
                tracing::info!("dev server restarted with pid {pid} after install");
            }
            Err(e) => {
                tracing::warn!("failed to restart dev server after install: {e}");
            }
        }

        Ok(InstallReport {
            installed: packages.to_vec(),
            failed: Vec::new(),
            stdout: out.stdout,
            stderr: out.stderr,
        })
    }

    /// Detect packages referenced by `files` and install whatever is found.
    pub async fn detect_and_install(
        &self,
        files: &HashMap<String, String>,
    ) -> Result<InstallReport> {
        let packages = detect_packages(files);
        if packages.is_empty() {
            tracing::debug!("no packages detected for installation");
            return Ok(InstallReport::empty());
        }
        self.install(&packages).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(path, content)| (path.to_string(), content.to_string()))
            .collect()
    }

    #[test]
    fn detects_es_imports_and_requires() {
        let files = files(&[(
            "src/App.jsx",
            r#"
                import React from 'react'
                import { merge } from 'lodash/merge'
                import * as icons from '@heroicons/react/24/solid'
                const axios = require('axios')
            "#,
        )]);

        let mut packages = detect_packages(&files);
        packages.sort();
        assert_eq!(packages, vec!["@heroicons/react", "axios", "lodash", "react"]);
    }

    #[test]
    fn skips_relative_builtin_and_non_source() {
        let files = files(&[
            (
                "src/util.js",
                r#"
                    import helper from './helper'
                    import config from '../config'
                    import path from 'path'
                    const fs = require('fs')
                "#,
            ),
            ("README.md", "import fake from 'not-a-real-import'"),
        ]);

        assert!(detect_packages(&files).is_empty());
    }

    #[test]
    fn dedupes_across_files() {
        let files = files(&[
            ("src/a.jsx", "import React from 'react'"),
            ("src/b.tsx", "import React from 'react'\nimport dayjs from 'dayjs'"),
        ]);

        let mut packages = detect_packages(&files);
        packages.sort();
        assert_eq!(packages, vec!["dayjs", "react"]);
    }
}
