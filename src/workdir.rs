//! Workdir path policy and the persistent name map.
//!
//! A workdir is referenced from the meta-repository by a relative path that
//! must stay outside of it (`../...`). Each path gets a short name derived
//! from its last segment; the name-to-path map is append-only and lives at
//! `md-internal/workdir-map.json`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum WorkdirError {
    #[error("invalid workdir path {path}: absolute paths not allowed")]
    AbsolutePath { path: String },

    #[error("invalid workdir path {path}: meta-repository paths not allowed")]
    InsideMetaRepo { path: String },

    #[error("invalid workdir path {path}: must start with ../")]
    NotParentRelative { path: String },

    #[error("invalid workdir path {path}: path traversal not allowed")]
    Traversal { path: String },

    #[error("workdir path not accessible: {path}: {source}")]
    NotAccessible {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("workdir path is not a directory: {path}")]
    NotADirectory { path: String },

    #[error("workdir is not a git repository: {path}")]
    NotARepository { path: String },

    #[error("failed to read workdir map at {path}: {source}")]
    MapRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse workdir map at {path}: {source}")]
    MapParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write workdir map at {path}: {source}")]
    MapWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Validate a configured workdir path against the raw textual form, then
/// against the filesystem. Returns the resolved absolute path.
///
/// Rejected: absolute paths; `.` and `./...`; paths not starting with `../`;
/// `..` segments after any normal segment; targets that are missing, not a
/// directory, or not a git repository; targets inside the meta-repository.
pub fn validate_path(meta_root: &Path, raw: &str) -> Result<PathBuf, WorkdirError> {
    let reject = |raw: &str| raw.to_string();

    if Path::new(raw).is_absolute() {
        return Err(WorkdirError::AbsolutePath { path: reject(raw) });
    }
    if raw == "." || raw.starts_with("./") {
        return Err(WorkdirError::InsideMetaRepo { path: reject(raw) });
    }
    if !raw.starts_with("../") {
        return Err(WorkdirError::NotParentRelative { path: reject(raw) });
    }
    let mut seen_normal = false;
    for segment in raw.split('/') {
        match segment {
            ".." if seen_normal => {
                return Err(WorkdirError::Traversal { path: reject(raw) });
            }
            "" | ".." => {}
            _ => seen_normal = true,
        }
    }

    let abs = normalize(&meta_root.join(raw));
    let metadata = fs::metadata(&abs).map_err(|source| WorkdirError::NotAccessible {
        path: reject(raw),
        source,
    })?;
    if !metadata.is_dir() {
        return Err(WorkdirError::NotADirectory { path: reject(raw) });
    }
    if !abs.join(".git").exists() {
        return Err(WorkdirError::NotARepository { path: reject(raw) });
    }
    if abs.starts_with(meta_root) {
        return Err(WorkdirError::InsideMetaRepo { path: reject(raw) });
    }
    Ok(abs)
}

/// Lexically normalize a path: drop `.` segments and resolve `..` against
/// preceding segments without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Lexically clean a relative path string, preserving a leading `..` run.
pub fn clean_path(raw: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if matches!(out.last(), Some(&"..")) || out.is_empty() {
                    out.push("..");
                } else {
                    out.pop();
                }
            }
            seg => out.push(seg),
        }
    }
    if out.is_empty() {
        ".".to_string()
    } else {
        out.join("/")
    }
}

/// Append-only mapping of workdir name to configured (cleaned) path.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkdirMap(BTreeMap<String, String>);

impl WorkdirMap {
    pub fn load(path: &Path) -> Result<Self, WorkdirError> {
        let content = fs::read(path).map_err(|source| WorkdirError::MapRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&content).map_err(|source| WorkdirError::MapParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), WorkdirError> {
        let write = |source| WorkdirError::MapWrite {
            path: path.to_path_buf(),
            source,
        };
        let content = serde_json::to_string_pretty(&self.0)
            .map_err(|source| WorkdirError::MapParse {
                path: path.to_path_buf(),
                source,
            })?;
        fs::write(path, content).map_err(write)
    }

    /// Look a name up by path, comparing cleaned forms.
    pub fn name_for(&self, path: &str) -> Option<&str> {
        let wanted = clean_path(path);
        self.0
            .iter()
            .find(|(_, stored)| clean_path(stored) == wanted)
            .map(|(name, _)| name.as_str())
    }

    /// Derive a unique name from the path's last segment, suffixing `-2`,
    /// `-3`, ... on collision.
    pub fn generate_name(&self, path: &str) -> String {
        let cleaned = clean_path(path);
        let base = cleaned.rsplit('/').next().unwrap_or(&cleaned).to_string();
        if !self.0.contains_key(&base) {
            return base;
        }
        let mut counter = 2u32;
        loop {
            let candidate = format!("{base}-{counter}");
            if !self.0.contains_key(&candidate) {
                return candidate;
            }
            counter += 1;
        }
    }

    /// Record a (name, path) pair. Pairs are never removed or renamed.
    pub fn insert(&mut self, name: String, path: &str) {
        self.0.insert(name, clean_path(path));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
