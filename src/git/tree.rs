//! Filesystem to git-tree synthesis.
//!
//! Trees are written into the bare store through libgit2's tree builder, so
//! entry encoding and the canonical order (names compared with a virtual `/`
//! appended to directories) are byte-exact with what git itself produces.
//!
//! Walk rules:
//! - the entry literally named `.git` is skipped at every level; other
//!   dotfiles are included,
//! - entries matching the root `.gitignore` are skipped,
//! - a subdirectory containing `.git` becomes a gitlink entry (mode `160000`,
//!   hash = nested HEAD commit) and is not descended into,
//! - broken symlinks are omitted; live symlinks become `120000` blobs holding
//!   the target string,
//! - files are `100644`, or `100755` when any executable bit is set,
//! - subdirectories (empty ones included) are recursed into.

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use git2::{ObjectType, Oid, Repository, TreeWalkMode, TreeWalkResult};

use super::error::StoreError;

const MODE_TREE: i32 = 0o040000;
const MODE_BLOB: i32 = 0o100644;
const MODE_BLOB_EXEC: i32 = 0o100755;
const MODE_LINK: i32 = 0o120000;
const MODE_GITLINK: i32 = 0o160000;

/// Ignore rules read from the repository root's `.gitignore` only.
///
/// Pattern semantics: blank lines and `#` comments are skipped; a trailing
/// `/` marks a directory pattern; a pattern matches when it equals the
/// entry's root-relative path, and a directory pattern additionally matches
/// everything below that path. Negations and nested ignore files are not
/// handled.
pub struct IgnorePolicy {
    patterns: Vec<IgnorePattern>,
}

struct IgnorePattern {
    path: String,
    dir_only: bool,
}

impl IgnorePolicy {
    pub fn for_root(root: &Path) -> Self {
        let mut patterns = Vec::new();
        if let Ok(content) = fs::read_to_string(root.join(".gitignore")) {
            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let dir_only = line.ends_with('/');
                patterns.push(IgnorePattern {
                    path: line.trim_end_matches('/').to_string(),
                    dir_only,
                });
            }
        }
        Self { patterns }
    }

    pub fn is_ignored(&self, rel: &str) -> bool {
        self.patterns.iter().any(|p| {
            p.path == rel || (p.dir_only && rel.starts_with(&format!("{}/", p.path)))
        })
    }
}

/// Build the root tree for `root`'s current on-disk state, writing every
/// blob and subtree into `repo`'s object database.
pub fn build_full(repo: &Repository, root: &Path) -> Result<Oid, StoreError> {
    let policy = IgnorePolicy::for_root(root);
    build_dir(repo, root, root, &policy)
}

fn build_dir(
    repo: &Repository,
    root: &Path,
    dir: &Path,
    policy: &IgnorePolicy,
) -> Result<Oid, StoreError> {
    let mut builder = repo.treebuilder(None)?;
    let entries = fs::read_dir(dir)
        .map_err(|source| StoreError::Walk {
            path: dir.to_path_buf(),
            source,
        })?
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|source| StoreError::Walk {
            path: dir.to_path_buf(),
            source,
        })?;

    for entry in entries {
        let os_name = entry.file_name();
        let Some(name) = os_name.to_str() else {
            return Err(StoreError::NonUtf8Path(entry.path()));
        };
        if name == ".git" {
            continue;
        }
        let path = entry.path();
        let rel = relative_to(root, &path)?;
        if policy.is_ignored(&rel) {
            continue;
        }

        let file_type = entry.file_type().map_err(|source| StoreError::Walk {
            path: path.clone(),
            source,
        })?;

        if file_type.is_dir() {
            if path.join(".git").exists() {
                let head = nested_head_commit(&path)?;
                builder.insert(name, head, MODE_GITLINK)?;
            } else {
                let subtree = build_dir(repo, root, &path, policy)?;
                builder.insert(name, subtree, MODE_TREE)?;
            }
        } else if file_type.is_symlink() {
            // A symlink whose target is gone is omitted entirely.
            if fs::metadata(&path).is_err() {
                continue;
            }
            let oid = write_symlink_blob(repo, &path)?;
            builder.insert(name, oid, MODE_LINK)?;
        } else if file_type.is_file() {
            let (oid, mode) = write_file_blob(repo, &path)?;
            builder.insert(name, oid, mode)?;
        }
        // Sockets, fifos and other special files have no tree representation.
    }

    Ok(builder.write()?)
}

fn relative_to(root: &Path, path: &Path) -> Result<String, StoreError> {
    let rel = path
        .strip_prefix(root)
        .map_err(|_| StoreError::NonUtf8Path(path.to_path_buf()))?;
    rel.to_str()
        .map(str::to_string)
        .ok_or_else(|| StoreError::NonUtf8Path(path.to_path_buf()))
}

fn nested_head_commit(path: &Path) -> Result<Oid, StoreError> {
    let nested =
        Repository::open(path).map_err(|e| StoreError::OpenRepo(path.to_path_buf(), e))?;
    let head = nested
        .head()
        .map_err(|e| StoreError::ReadHead(path.to_path_buf(), e))?;
    Ok(head
        .peel_to_commit()
        .map_err(|e| StoreError::ReadHead(path.to_path_buf(), e))?
        .id())
}

fn write_symlink_blob(repo: &Repository, path: &Path) -> Result<Oid, StoreError> {
    let target = fs::read_link(path).map_err(|source| StoreError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    repo.blob(target.as_os_str().as_encoded_bytes())
        .map_err(StoreError::WriteObject)
}

fn write_file_blob(repo: &Repository, path: &Path) -> Result<(Oid, i32), StoreError> {
    let content = fs::read(path).map_err(|source| StoreError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    let oid = repo.blob(&content).map_err(StoreError::WriteObject)?;
    let metadata = fs::metadata(path).map_err(|source| StoreError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    let mode = if metadata.permissions().mode() & 0o111 != 0 {
        MODE_BLOB_EXEC
    } else {
        MODE_BLOB
    };
    Ok((oid, mode))
}

/// Rebuild the root tree from a prior root plus the paths known to have
/// changed. Untouched entries are carried over from the base tree; only the
/// subtrees along changed paths are re-hashed. The result is byte-identical
/// to a full rebuild for the same set of changes.
pub fn build_with_touched(
    repo: &Repository,
    root: &Path,
    base_tree: Oid,
    touched: &[String],
) -> Result<Oid, StoreError> {
    let policy = IgnorePolicy::for_root(root);
    let mut changes = ChangeNode::default();
    for path in touched {
        changes.insert(path.split('/').filter(|s| !s.is_empty() && *s != "."));
    }
    apply_dir(repo, root, root, Some(base_tree), &changes, &policy)
}

#[derive(Default)]
struct ChangeNode {
    children: BTreeMap<String, ChangeNode>,
}

impl ChangeNode {
    fn insert<'a>(&mut self, mut segments: impl Iterator<Item = &'a str>) {
        if let Some(seg) = segments.next() {
            self.children.entry(seg.to_string()).or_default().insert(segments);
        }
    }
}

fn apply_dir(
    repo: &Repository,
    root: &Path,
    dir: &Path,
    base: Option<Oid>,
    node: &ChangeNode,
    policy: &IgnorePolicy,
) -> Result<Oid, StoreError> {
    let base_tree = base.map(|oid| repo.find_tree(oid)).transpose()?;
    let mut builder = repo.treebuilder(base_tree.as_ref())?;

    for (name, child) in &node.children {
        let path = dir.join(name);
        let rel = relative_to(root, &path)?;
        if child.children.is_empty() {
            apply_leaf(repo, &mut builder, name, &path, &rel, policy)?;
        } else {
            let sub_base = builder
                .get(name.as_str())?
                .filter(|entry| entry.kind() == Some(ObjectType::Tree))
                .map(|entry| entry.id());
            let subtree = apply_dir(repo, root, &path, sub_base, child, policy)?;
            // Full walks record empty directories as empty trees; an emptied
            // subtree stays only while the directory itself still exists.
            if repo.find_tree(subtree)?.is_empty() && !path.is_dir() {
                if builder.get(name.as_str())?.is_some() {
                    builder.remove(name.as_str())?;
                }
            } else {
                builder.insert(name.as_str(), subtree, MODE_TREE)?;
            }
        }
    }

    Ok(builder.write()?)
}

fn apply_leaf(
    repo: &Repository,
    builder: &mut git2::TreeBuilder<'_>,
    name: &str,
    path: &Path,
    rel: &str,
    policy: &IgnorePolicy,
) -> Result<(), StoreError> {
    let remove = |builder: &mut git2::TreeBuilder<'_>| -> Result<(), StoreError> {
        if builder.get(name)?.is_some() {
            builder.remove(name)?;
        }
        Ok(())
    };

    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return remove(builder),
        Err(source) => {
            return Err(StoreError::ReadFile {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    if policy.is_ignored(rel) {
        return remove(builder);
    }

    if metadata.file_type().is_symlink() {
        if fs::metadata(path).is_err() {
            return remove(builder);
        }
        let oid = write_symlink_blob(repo, path)?;
        builder.insert(name, oid, MODE_LINK)?;
    } else if metadata.is_dir() {
        if path.join(".git").exists() {
            let head = nested_head_commit(path)?;
            builder.insert(name, head, MODE_GITLINK)?;
        }
        // A plain directory never shows up as a changed leaf; leave the base
        // entry alone.
    } else {
        let (oid, mode) = write_file_blob(repo, path)?;
        builder.insert(name, oid, mode)?;
    }
    Ok(())
}

/// Root-relative paths of every blob entry (files and symlinks) in a tree.
/// Gitlink entries are not files and are not listed.
pub fn list_tree_files(tree: &git2::Tree<'_>) -> Result<Vec<String>, StoreError> {
    let mut files = Vec::new();
    tree.walk(TreeWalkMode::PreOrder, |prefix, entry| {
        if entry.kind() == Some(ObjectType::Blob)
            && let Some(name) = entry.name()
        {
            files.push(format!("{prefix}{name}"));
        }
        TreeWalkResult::Ok
    })?;
    Ok(files)
}
