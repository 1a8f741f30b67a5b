//! In-process commit caches and the persisted mtime checkpoint.
//!
//! Every table is keyed by content-derived values (workdir path plus commit
//! ids); an entry is valid exactly when its key fields match, never by age.
//! The only state that survives a process is the per-workdir directory-mtime
//! checkpoint, a single RFC 3339 timestamp under `cache/` in the
//! meta-repository.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::RwLock;
use std::time::SystemTime;

use git2::Oid;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;

#[derive(Default)]
pub struct CommitCache {
    inner: RwLock<Tables>,
}

#[derive(Default)]
struct Tables {
    touched_files: HashMap<String, TouchedFilesEntry>,
    tree_hash: HashMap<String, TreeHashEntry>,
    directory_state: HashMap<String, DirectoryStateEntry>,
    file_list: HashMap<String, FileListEntry>,
    meta_tree: HashMap<String, MetaTreeEntry>,
}

struct TouchedFilesEntry {
    head: Oid,
    last_merge: Oid,
    files: Vec<String>,
}

struct TreeHashEntry {
    head: Oid,
    touched: Vec<String>,
    tree: Oid,
}

struct DirectoryStateEntry {
    head: Oid,
    mtime: SystemTime,
    #[allow(dead_code)]
    file_count: usize,
}

struct FileListEntry {
    head: Oid,
    files: Vec<String>,
}

struct MetaTreeEntry {
    commit: Oid,
    files: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub touched_files: usize,
    pub tree_hash: usize,
    pub directory_state: usize,
    pub file_list: usize,
    pub meta_tree: usize,
}

impl CommitCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn touched_files(&self, path: &str, head: Oid, last_merge: Oid) -> Option<Vec<String>> {
        let tables = self.inner.read().ok()?;
        tables
            .touched_files
            .get(path)
            .filter(|e| e.head == head && e.last_merge == last_merge)
            .map(|e| e.files.clone())
    }

    pub fn store_touched_files(
        &self,
        path: &str,
        head: Oid,
        last_merge: Oid,
        files: Vec<String>,
    ) {
        if let Ok(mut tables) = self.inner.write() {
            tables.touched_files.insert(
                path.to_string(),
                TouchedFilesEntry {
                    head,
                    last_merge,
                    files,
                },
            );
        }
    }

    pub fn tree_hash(&self, path: &str, head: Oid, touched: &[String]) -> Option<Oid> {
        let tables = self.inner.read().ok()?;
        tables
            .tree_hash
            .get(path)
            .filter(|e| e.head == head && e.touched == touched)
            .map(|e| e.tree)
    }

    pub fn store_tree_hash(&self, path: &str, head: Oid, touched: Vec<String>, tree: Oid) {
        if let Ok(mut tables) = self.inner.write() {
            tables
                .tree_hash
                .insert(path.to_string(), TreeHashEntry { head, touched, tree });
        }
    }

    /// True when the directory state for `(path, head)` is cached and the
    /// directory has not been modified since.
    pub fn dir_state_unchanged(&self, path: &str, head: Oid, mtime: SystemTime) -> bool {
        let Ok(tables) = self.inner.read() else {
            return false;
        };
        tables
            .directory_state
            .get(path)
            .is_some_and(|e| e.head == head && mtime <= e.mtime)
    }

    pub fn store_dir_state(&self, path: &str, head: Oid, mtime: SystemTime, file_count: usize) {
        if let Ok(mut tables) = self.inner.write() {
            tables.directory_state.insert(
                path.to_string(),
                DirectoryStateEntry {
                    head,
                    mtime,
                    file_count,
                },
            );
        }
    }

    pub fn file_list(&self, path: &str, head: Oid) -> Option<Vec<String>> {
        let tables = self.inner.read().ok()?;
        tables
            .file_list
            .get(path)
            .filter(|e| e.head == head)
            .map(|e| e.files.clone())
    }

    pub fn store_file_list(&self, path: &str, head: Oid, files: Vec<String>) {
        if let Ok(mut tables) = self.inner.write() {
            tables
                .file_list
                .insert(path.to_string(), FileListEntry { head, files });
        }
    }

    pub fn meta_tree_files(&self, name: &str, branch: &str, commit: Oid) -> Option<Vec<String>> {
        let tables = self.inner.read().ok()?;
        tables
            .meta_tree
            .get(&meta_tree_key(name, branch))
            .filter(|e| e.commit == commit)
            .map(|e| e.files.clone())
    }

    pub fn store_meta_tree_files(
        &self,
        name: &str,
        branch: &str,
        commit: Oid,
        files: Vec<String>,
    ) {
        if let Ok(mut tables) = self.inner.write() {
            tables
                .meta_tree
                .insert(meta_tree_key(name, branch), MetaTreeEntry { commit, files });
        }
    }

    pub fn stats(&self) -> CacheStats {
        match self.inner.read() {
            Ok(tables) => CacheStats {
                touched_files: tables.touched_files.len(),
                tree_hash: tables.tree_hash.len(),
                directory_state: tables.directory_state.len(),
                file_list: tables.file_list.len(),
                meta_tree: tables.meta_tree.len(),
            },
            Err(_) => CacheStats {
                touched_files: 0,
                tree_hash: 0,
                directory_state: 0,
                file_list: 0,
                meta_tree: 0,
            },
        }
    }

    pub fn log_stats(&self) {
        let stats = self.stats();
        if stats.touched_files > 0
            || stats.tree_hash > 0
            || stats.directory_state > 0
            || stats.file_list > 0
            || stats.meta_tree > 0
        {
            debug!(
                touched_files = stats.touched_files,
                tree_hash = stats.tree_hash,
                directory_state = stats.directory_state,
                file_list = stats.file_list,
                meta_tree = stats.meta_tree,
                "cache stats"
            );
        }
    }
}

fn meta_tree_key(name: &str, branch: &str) -> String {
    format!("{name}:{branch}")
}

/// The checkpoint file holds one JSON-encoded RFC 3339 timestamp.
#[derive(Serialize, Deserialize)]
struct Checkpoint(#[serde(with = "time::serde::rfc3339")] OffsetDateTime);

/// Last recorded directory mtime, or `None` when the checkpoint is absent or
/// unreadable.
pub fn read_checkpoint(path: &Path) -> Option<OffsetDateTime> {
    let content = fs::read(path).ok()?;
    serde_json::from_slice::<Checkpoint>(&content)
        .ok()
        .map(|c| c.0)
}

/// Truncate-replace the checkpoint with a new directory mtime.
pub fn write_checkpoint(path: &Path, mtime: OffsetDateTime) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_vec(&Checkpoint(mtime))?;
    fs::write(path, content)
}
