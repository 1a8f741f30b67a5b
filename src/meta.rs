//! Meta-repository discovery and configuration.
//!
//! A meta-repository is identified by an empty `.git-wmem` marker file at its
//! root. Its human-edited configuration lives under `md/`:
//!
//! ```text
//! md/commit-workdir-paths   one workdir path per line
//! md/commit/msg-prefix      optional message prefix
//! md/commit/author          Name <email>
//! md/commit/committer       Name <email>
//! md-internal/workdir-map.json
//! repos/<name>.git          bare stores
//! cache/git-wmem-cache-<basename>.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Marker file identifying a meta-repository.
pub const MARKER: &str = ".git-wmem";

pub const WORKDIR_PATHS_FILE: &str = "md/commit-workdir-paths";
pub const MSG_PREFIX_FILE: &str = "md/commit/msg-prefix";
pub const AUTHOR_FILE: &str = "md/commit/author";
pub const COMMITTER_FILE: &str = "md/commit/committer";
pub const WORKDIR_MAP_FILE: &str = "md-internal/workdir-map.json";

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MetaError {
    #[error(
        "not in a wmem repository (missing .git-wmem file); run this command from a meta-repository root"
    )]
    NotAMetaRepo,

    #[error("no workdirs configured for commit; add paths to {WORKDIR_PATHS_FILE}")]
    NoWorkdirsConfigured,

    #[error("failed to read {path}: {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} must not be empty")]
    EmptySignature(&'static str),

    #[error("invalid signature format (expected `Name <email>`): {0}")]
    InvalidSignature(String),

    #[error("directory is not empty; specify an empty directory to initialize")]
    DirectoryNotEmpty(PathBuf),

    #[error("failed to prepare {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),
}

/// A `Name <email>` pair read from the signature files.
#[derive(Debug, Clone)]
pub struct SignatureInfo {
    pub name: String,
    pub email: String,
}

impl SignatureInfo {
    /// A git signature stamped with the current time.
    pub fn to_signature(&self) -> Result<git2::Signature<'static>, git2::Error> {
        git2::Signature::now(&self.name, &self.email)
    }
}

/// Parse `Name <email>`; both halves must be present.
pub fn parse_signature(raw: &str) -> Result<SignatureInfo, MetaError> {
    let raw = raw.trim();
    let invalid = || MetaError::InvalidSignature(raw.to_string());
    let (name, rest) = raw.split_once(" <").ok_or_else(invalid)?;
    let email = rest.strip_suffix('>').ok_or_else(invalid)?;
    if name.is_empty() || email.is_empty() {
        return Err(invalid());
    }
    Ok(SignatureInfo {
        name: name.to_string(),
        email: email.to_string(),
    })
}

/// Commit configuration read from `md/commit/`.
#[derive(Debug, Clone)]
pub struct CommitConfig {
    pub msg_prefix: String,
    pub author: SignatureInfo,
    pub committer: SignatureInfo,
}

/// Handle on an opened meta-repository.
pub struct MetaRepo {
    root: PathBuf,
}

impl MetaRepo {
    /// Open the meta-repository at the current directory; the marker file
    /// must be present.
    pub fn discover() -> Result<Self, MetaError> {
        let root = std::env::current_dir().map_err(|source| MetaError::Io {
            path: PathBuf::from("."),
            source,
        })?;
        Self::open(root)
    }

    pub fn open(root: PathBuf) -> Result<Self, MetaError> {
        if !root.join(MARKER).is_file() {
            return Err(MetaError::NotAMetaRepo);
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the bare store for a workdir name.
    pub fn store_path(&self, name: &str) -> PathBuf {
        self.root.join("repos").join(format!("{name}.git"))
    }

    pub fn map_path(&self) -> PathBuf {
        self.root.join(WORKDIR_MAP_FILE)
    }

    /// Location of the persisted mtime checkpoint for a workdir path. Named
    /// by the path's final segment.
    pub fn checkpoint_path(&self, workdir_path: &str) -> PathBuf {
        let cleaned = crate::workdir::clean_path(workdir_path);
        let base = cleaned.rsplit('/').next().unwrap_or(&cleaned);
        self.root
            .join("cache")
            .join(format!("git-wmem-cache-{base}.json"))
    }

    /// Configured workdir paths, one per line, trimmed, blanks dropped. The
    /// raw textual form is preserved for validation.
    pub fn workdir_paths(&self) -> Result<Vec<String>, MetaError> {
        let path = self.root.join(WORKDIR_PATHS_FILE);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(MetaError::ReadConfig { path, source }),
        };
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Message prefix and signatures. Signature files are mandatory and must
    /// hold a parseable, non-empty `Name <email>`.
    pub fn commit_config(&self) -> Result<CommitConfig, MetaError> {
        let msg_prefix = self.read_trimmed(MSG_PREFIX_FILE)?;
        let author_raw = self.read_trimmed(AUTHOR_FILE)?;
        if author_raw.is_empty() {
            return Err(MetaError::EmptySignature("author"));
        }
        let committer_raw = self.read_trimmed(COMMITTER_FILE)?;
        if committer_raw.is_empty() {
            return Err(MetaError::EmptySignature("committer"));
        }
        Ok(CommitConfig {
            msg_prefix,
            author: parse_signature(&author_raw)?,
            committer: parse_signature(&committer_raw)?,
        })
    }

    fn read_trimmed(&self, rel: &str) -> Result<String, MetaError> {
        let path = self.root.join(rel);
        fs::read_to_string(&path)
            .map(|s| s.trim().to_string())
            .map_err(|source| MetaError::ReadConfig { path, source })
    }
}
