//! Scoped filesystem access for the active sandbox directory.
//!
//! All collaborator file operations go through [`FileSystemGateway`], which
//! normalizes relative paths and rejects anything that would resolve
//! outside the sandbox directory. Successful writes feed the registry's
//! tracked-file set and content cache.

use crate::error::{Result, SandboxError};
use crate::registry::SandboxRegistry;
use crate::runner::ProcessRunner;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use walkdir::WalkDir;

/// Directories excluded from listings.
pub const SKIP_DIRS: &[&str] = &["node_modules", ".git", ".next", "dist", "build", ".cache"];

const CHOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Normalize a sandbox-relative path.
///
/// Rejects absolute paths and any `..` that climbs above the sandbox root.
/// `.` components are dropped; interior `..` is resolved, so
/// `src/a/../b.jsx` normalizes to `src/b.jsx`.
pub fn normalize(rel_path: &str) -> Result<PathBuf> {
    let traversal = || SandboxError::PathTraversal {
        path: rel_path.to_string(),
    };

    let path = Path::new(rel_path);
    if path.is_absolute() {
        return Err(traversal());
    }

    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(traversal());
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(traversal()),
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(traversal());
    }
    Ok(normalized)
}

pub struct FileSystemGateway {
    directory: PathBuf,
    registry: Arc<SandboxRegistry>,
    runner: Arc<dyn ProcessRunner>,
    owner: Option<(String, String)>,
}

impl FileSystemGateway {
    pub fn new(
        directory: PathBuf,
        registry: Arc<SandboxRegistry>,
        runner: Arc<dyn ProcessRunner>,
        owner: Option<(String, String)>,
    ) -> Self {
        Self {
            directory,
            registry,
            runner,
            owner,
        }
    }

    fn resolve(&self, rel_path: &str) -> Result<(String, PathBuf)> {
        let normalized = normalize(rel_path)?;
        let rel = normalized.to_string_lossy().into_owned();
        let full = self.directory.join(&normalized);
        Ok((rel, full))
    }

    /// Write (or overwrite) a file, creating parent directories. Tracks the
    /// path and caches the content on success.
    pub async fn write(&self, rel_path: &str, content: &str) -> Result<()> {
        let (rel, full) = self.resolve(rel_path)?;
        tracing::debug!("writing file: {rel}");

        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, content).await?;
        self.chown(&full).await;

        self.registry.track(&rel);
        self.registry.cache_put(&rel, content);
        Ok(())
    }

    pub async fn read(&self, rel_path: &str) -> Result<String> {
        let (rel, full) = self.resolve(rel_path)?;
        match tokio::fs::read_to_string(&full).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SandboxError::FileNotFound { path: rel })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort delete. The path is untracked even when the underlying
    /// remove fails: the tracked set is a hint for collaborators, and a
    /// stale "exists" entry is worse than a stale miss.
    pub async fn delete(&self, rel_path: &str) -> Result<()> {
        let (rel, full) = self.resolve(rel_path)?;
        self.registry.untrack(&rel);
        self.registry.cache_remove(&rel);

        if let Err(e) = tokio::fs::remove_file(&full).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("failed to delete {rel}: {e}");
            }
        }
        Ok(())
    }

    /// Recursive listing of relative paths, sorted, skipping dependency and
    /// build directories.
    pub async fn list(&self) -> Result<Vec<String>> {
        let directory = self.directory.clone();
        let files = tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            let walker = WalkDir::new(&directory).into_iter().filter_entry(|entry| {
                !(entry.file_type().is_dir()
                    && entry
                        .file_name()
                        .to_str()
                        .is_some_and(|name| SKIP_DIRS.contains(&name)))
            });
            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::debug!("skipping unreadable entry: {e}");
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                if let Ok(rel) = entry.path().strip_prefix(&directory) {
                    files.push(rel.to_string_lossy().into_owned());
                }
            }
            files.sort();
            files
        })
        .await
        .map_err(|e| SandboxError::Io(std::io::Error::other(e)))?;

        Ok(files)
    }

    async fn chown(&self, full: &Path) {
        let Some((user, group)) = &self.owner else {
            return;
        };
        let command = format!("chown {user}:{group} \"{}\"", full.display());
        match self.runner.run(&command, Path::new("/"), CHOWN_TIMEOUT).await {
            Ok(out) if !out.success() => {
                tracing::warn!("chown failed for {}: {}", full.display(), out.stderr.trim());
            }
            Err(e) => tracing::warn!("chown failed for {}: {e}", full.display()),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::CommandOutput;
    use async_trait::async_trait;

    struct NullRunner;

    #[async_trait]
    impl ProcessRunner for NullRunner {
        async fn run(&self, _: &str, _: &Path, _: Duration) -> Result<CommandOutput> {
            Ok(CommandOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
            })
        }
    }

    fn gateway(dir: &Path) -> FileSystemGateway {
        FileSystemGateway::new(
            dir.to_path_buf(),
            Arc::new(SandboxRegistry::new()),
            Arc::new(NullRunner),
            None,
        )
    }

    #[test]
    fn normalize_accepts_clean_paths() {
        assert_eq!(normalize("src/App.jsx").unwrap(), PathBuf::from("src/App.jsx"));
        assert_eq!(normalize("./src/./App.jsx").unwrap(), PathBuf::from("src/App.jsx"));
        assert_eq!(normalize("src/a/../b.jsx").unwrap(), PathBuf::from("src/b.jsx"));
    }

    #[test]
    fn normalize_rejects_escapes() {
        for path in [
            "../../etc/passwd",
            "..",
            "../peer",
            "src/../../peer",
            "/etc/passwd",
            "",
            ".",
        ] {
            match normalize(path) {
                Err(SandboxError::PathTraversal { path: p }) => assert_eq!(p, path),
                other => panic!("expected PathTraversal for {path:?}, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn write_read_delete_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let gw = gateway(dir.path());

        gw.write("src/Foo.jsx", "export default () => null").await.unwrap();
        assert_eq!(gw.read("src/Foo.jsx").await.unwrap(), "export default () => null");
        assert_eq!(gw.registry.tracked_files(), vec!["src/Foo.jsx"]);
        assert!(gw.registry.cache_get("src/Foo.jsx").is_some());

        gw.delete("src/Foo.jsx").await.unwrap();
        assert!(gw.registry.tracked_files().is_empty());
        match gw.read("src/Foo.jsx").await {
            Err(SandboxError::FileNotFound { path }) => assert_eq!(path, "src/Foo.jsx"),
            other => panic!("expected FileNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn delete_of_missing_file_still_untracks() {
        let dir = tempfile::tempdir().unwrap();
        let gw = gateway(dir.path());
        gw.registry.track("ghost.txt");

        gw.delete("ghost.txt").await.unwrap();
        assert!(gw.registry.tracked_files().is_empty());
    }

    #[tokio::test]
    async fn list_skips_dependency_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let gw = gateway(dir.path());

        gw.write("index.html", "<html></html>").await.unwrap();
        gw.write("src/App.jsx", "app").await.unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/react")).unwrap();
        std::fs::write(dir.path().join("node_modules/react/index.js"), "x").unwrap();

        let files = gw.list().await.unwrap();
        assert_eq!(files, vec!["index.html", "src/App.jsx"]);
    }

    #[tokio::test]
    async fn traversal_rejected_on_every_operation() {
        let dir = tempfile::tempdir().unwrap();
        let gw = gateway(dir.path());

        for result in [
            gw.write("../../etc/passwd", "x").await,
            gw.read("../../etc/passwd").await.map(|_| ()),
            gw.delete("../../etc/passwd").await,
        ] {
            assert!(matches!(result, Err(SandboxError::PathTraversal { .. })));
        }
    }
}
