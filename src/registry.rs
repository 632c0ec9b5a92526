//! Process-wide state for the single active sandbox.
//!
//! The registry is an explicit owned object rather than ambient global
//! state: the orchestrator holds one instance, and tests build their own
//! with isolated state. It tracks three things that live and die together:
//! the [`SandboxRecord`], the set of files known to exist in the sandbox,
//! and a content cache for files this manager already wrote.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxStatus {
    Creating,
    Running,
    Stopped,
    Error,
}

/// Canonical description of the one active sandbox.
#[derive(Debug, Clone, Serialize)]
pub struct SandboxRecord {
    pub sandbox_id: String,
    pub user_name: String,
    pub port: u16,
    pub directory: PathBuf,
    pub url: String,
    pub fallback_url: String,
    pub subdomain: String,
    /// Pid of the spawned dev server. Set means this manager spawned it;
    /// it does not mean the process is still alive — probe, never assume.
    pub pid: Option<u32>,
    pub status: SandboxStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CachedFile {
    pub content: String,
    pub last_modified: DateTime<Utc>,
}

#[derive(Default)]
pub struct SandboxRegistry {
    record: Mutex<Option<SandboxRecord>>,
    tracked: Mutex<BTreeSet<String>>,
    cache: Mutex<HashMap<String, CachedFile>>,
}

impl SandboxRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a freshly provisioned record, seeding the tracked-file set
    /// with the scaffold and dropping any stale cache.
    pub fn commit(&self, record: SandboxRecord, seed_files: &[&str]) {
        *self.record.lock() = Some(record);
        *self.tracked.lock() = seed_files.iter().map(|s| s.to_string()).collect();
        self.cache.lock().clear();
    }

    /// Tear down all registry state. Always leaves record, tracked set, and
    /// cache empty, regardless of what cleanup succeeded elsewhere.
    pub fn clear(&self) {
        *self.record.lock() = None;
        self.tracked.lock().clear();
        self.cache.lock().clear();
    }

    pub fn current(&self) -> Option<SandboxRecord> {
        self.record.lock().clone()
    }

    pub fn is_active(&self) -> bool {
        self.record.lock().is_some()
    }

    pub fn update_pid(&self, pid: u32) {
        if let Some(record) = self.record.lock().as_mut() {
            record.pid = Some(pid);
        }
    }

    pub fn set_status(&self, status: SandboxStatus) {
        if let Some(record) = self.record.lock().as_mut() {
            record.status = status;
        }
    }

    pub fn track(&self, rel_path: &str) {
        self.tracked.lock().insert(rel_path.to_string());
    }

    pub fn untrack(&self, rel_path: &str) {
        self.tracked.lock().remove(rel_path);
    }

    pub fn tracked_files(&self) -> Vec<String> {
        self.tracked.lock().iter().cloned().collect()
    }

    pub fn cache_put(&self, rel_path: &str, content: &str) {
        self.cache.lock().insert(
            rel_path.to_string(),
            CachedFile {
                content: content.to_string(),
                last_modified: Utc::now(),
            },
        );
    }

    pub fn cache_get(&self, rel_path: &str) -> Option<CachedFile> {
        self.cache.lock().get(rel_path).cloned()
    }

    pub fn cache_remove(&self, rel_path: &str) {
        self.cache.lock().remove(rel_path);
    }
}
