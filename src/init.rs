//! Meta-repository initialization.
//!
//! `init <dir>` lays down the skeleton the commit pipeline reads:
//! the `.git-wmem` marker, the `md/` configuration files with a default
//! signature, the empty workdir map, the `repos/` and `cache/` areas (both
//! outside version control concern except the map), and a fresh git
//! repository on branch `main` holding one initial commit.

use std::fs;
use std::path::{Path, PathBuf};

use git2::{IndexAddOption, Repository, RepositoryInitOptions, Signature};

use crate::error::Result;
use crate::meta::{self, MetaError};

const DEFAULT_SIGNATURE: &str = "WMem Git <git-wmem@mj41.cz>";

/// Entry point for `git-wmem init`.
pub fn run(target: &str) -> Result<()> {
    let root = resolve_target(target)?;
    create_skeleton(&root)?;
    create_initial_commit(&root)?;
    Ok(())
}

/// The target must be `.`, an existing empty directory, or a directory that
/// does not exist yet.
fn resolve_target(target: &str) -> Result<PathBuf> {
    let io_err = |path: &Path, source| MetaError::Io {
        path: path.to_path_buf(),
        source,
    };

    let root = if target == "." {
        std::env::current_dir().map_err(|e| io_err(Path::new("."), e))?
    } else {
        let path = PathBuf::from(target);
        if !path.exists() {
            fs::create_dir_all(&path).map_err(|e| io_err(&path, e))?;
        }
        path.canonicalize().map_err(|e| io_err(&path, e))?
    };

    let mut entries = fs::read_dir(&root).map_err(|e| io_err(&root, e))?;
    if entries.next().is_some() {
        return Err(MetaError::DirectoryNotEmpty(root).into());
    }
    Ok(root)
}

fn create_skeleton(root: &Path) -> Result<()> {
    let io_err = |path: PathBuf, source| MetaError::Io { path, source };

    for dir in ["md", "md/commit", "md-internal", "repos", "cache"] {
        let path = root.join(dir);
        fs::create_dir_all(&path).map_err(|e| io_err(path.clone(), e))?;
    }

    let files: [(&str, &str); 7] = [
        (meta::MARKER, ""),
        (".gitignore", "repos/\n"),
        (meta::WORKDIR_PATHS_FILE, ""),
        (meta::MSG_PREFIX_FILE, ""),
        (meta::AUTHOR_FILE, DEFAULT_SIGNATURE),
        (meta::COMMITTER_FILE, DEFAULT_SIGNATURE),
        (meta::WORKDIR_MAP_FILE, "{}"),
    ];
    for (rel, content) in files {
        let path = root.join(rel);
        fs::write(&path, content).map_err(|e| io_err(path.clone(), e))?;
    }
    Ok(())
}

fn create_initial_commit(root: &Path) -> Result<()> {
    let mut opts = RepositoryInitOptions::new();
    opts.initial_head("main");
    let repo = Repository::init_opts(root, &opts).map_err(MetaError::Git)?;

    let mut index = repo.index().map_err(MetaError::Git)?;
    index
        .add_all(["*"], IndexAddOption::DEFAULT, None)
        .map_err(MetaError::Git)?;
    index.write().map_err(MetaError::Git)?;
    let tree_id = index.write_tree().map_err(MetaError::Git)?;
    let tree = repo.find_tree(tree_id).map_err(MetaError::Git)?;

    let name = root
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("wmem-repo");
    let message = format!("Initialize git-wmem repository `{name}`");
    let sig = Signature::now("WMem Git", "git-wmem@mj41.cz").map_err(MetaError::Git)?;
    repo.commit(Some("HEAD"), &sig, &sig, &message, &tree, &[])
        .map_err(MetaError::Git)?;
    Ok(())
}
