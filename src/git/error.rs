//! Git store error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from bare-store and workdir repository plumbing.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    #[error("failed to open repository at {0}: {1}")]
    OpenRepo(PathBuf, #[source] git2::Error),

    #[error("failed to initialize bare repository at {0}: {1}")]
    InitRepo(PathBuf, #[source] git2::Error),

    #[error("failed to configure remote {name}: {source}")]
    ConfigureRemote {
        name: String,
        #[source]
        source: git2::Error,
    },

    #[error("failed to fetch from remote {name}: {source}")]
    Fetch {
        name: String,
        #[source]
        source: git2::Error,
    },

    #[error("branch not found: {0}")]
    MissingBranch(String),

    #[error("failed to read reference {name}: {source}")]
    ReadRef {
        name: String,
        #[source]
        source: git2::Error,
    },

    #[error("failed to update reference {name}: {source}")]
    WriteRef {
        name: String,
        #[source]
        source: git2::Error,
    },

    #[error("failed to read HEAD of {0}: {1}")]
    ReadHead(PathBuf, #[source] git2::Error),

    #[error("path is not valid UTF-8: {0}")]
    NonUtf8Path(PathBuf),

    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to scan {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write object: {0}")]
    WriteObject(#[source] git2::Error),

    #[error("failed to copy object {oid}: {source}")]
    CopyObject {
        oid: git2::Oid,
        #[source]
        source: git2::Error,
    },

    #[error("failed to read status of {0}: {1}")]
    Status(PathBuf, #[source] git2::Error),

    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),
}
