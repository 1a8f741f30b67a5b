//! Bare-store adapter.
//!
//! Each tracked workdir gets one bare repository under `repos/<name>.git`
//! inside the meta-repository. The store carries:
//! - a `wmem-wd` remote pointing at the workdir's absolute path,
//! - one `wmem-br/<branch>` meta-branch per workdir branch ever synced,
//! - the `wmem-br/head` tracker, always equal to the meta-branch currently
//!   being advanced,
//! - a symbolic `HEAD` pointing at that meta-branch.

use std::path::{Path, PathBuf};

use git2::{ErrorCode, ObjectType, Odb, Oid, Repository};

use super::error::StoreError;

/// Name of the remote pointing at the workdir.
pub const WORKDIR_REMOTE: &str = "wmem-wd";

/// The moving branch that tracks the tip of the current meta-branch.
pub const HEAD_TRACKER: &str = "wmem-br/head";

/// Meta-branch name for a workdir branch (`main` -> `wmem-br/main`).
pub fn meta_branch(branch: &str) -> String {
    format!("wmem-br/{branch}")
}

/// Fully qualified ref name for a meta-branch.
pub fn meta_branch_ref(branch: &str) -> String {
    format!("refs/heads/wmem-br/{branch}")
}

/// A per-workdir bare repository.
pub struct BareStore {
    repo: Repository,
    path: PathBuf,
}

impl BareStore {
    /// Initialize a new bare store and point its `wmem-wd` remote at the
    /// workdir. The remote URL is set once at creation and never rewritten.
    pub fn create(path: &Path, workdir_abs: &Path) -> Result<Self, StoreError> {
        let repo = Repository::init_bare(path)
            .map_err(|e| StoreError::InitRepo(path.to_path_buf(), e))?;
        let url = workdir_abs
            .to_str()
            .ok_or_else(|| StoreError::NonUtf8Path(workdir_abs.to_path_buf()))?;
        repo.remote(WORKDIR_REMOTE, url)
            .map_err(|source| StoreError::ConfigureRemote {
                name: WORKDIR_REMOTE.to_string(),
                source,
            })?;
        Ok(Self {
            repo,
            path: path.to_path_buf(),
        })
    }

    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let repo =
            Repository::open(path).map_err(|e| StoreError::OpenRepo(path.to_path_buf(), e))?;
        Ok(Self {
            repo,
            path: path.to_path_buf(),
        })
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Tip of `refs/heads/<branch>`, or `None` when the branch does not exist.
    pub fn try_branch_tip(&self, branch: &str) -> Result<Option<Oid>, StoreError> {
        let name = format!("refs/heads/{branch}");
        match self.repo.refname_to_id(&name) {
            Ok(oid) => Ok(Some(oid)),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(source) => Err(StoreError::ReadRef { name, source }),
        }
    }

    /// Tip of `refs/heads/<branch>`; the branch must exist.
    pub fn branch_tip(&self, branch: &str) -> Result<Oid, StoreError> {
        self.try_branch_tip(branch)?
            .ok_or_else(|| StoreError::MissingBranch(branch.to_string()))
    }

    /// Create or move `refs/heads/<branch>` to `target`.
    pub fn set_branch(&self, branch: &str, target: Oid) -> Result<(), StoreError> {
        let name = format!("refs/heads/{branch}");
        self.repo
            .reference(&name, target, true, "git-wmem sync")
            .map(|_| ())
            .map_err(|source| StoreError::WriteRef { name, source })
    }

    /// Point the symbolic `HEAD` at `refs/heads/<branch>`.
    pub fn set_symbolic_head(&self, branch: &str) -> Result<(), StoreError> {
        let name = format!("refs/heads/{branch}");
        self.repo
            .set_head(&name)
            .map_err(|source| StoreError::WriteRef { name, source })
    }

    /// Fetch from the `wmem-wd` remote. "Already up-to-date" is success.
    pub fn fetch_workdir(&self) -> Result<(), StoreError> {
        let mut remote =
            self.repo
                .find_remote(WORKDIR_REMOTE)
                .map_err(|source| StoreError::Fetch {
                    name: WORKDIR_REMOTE.to_string(),
                    source,
                })?;
        remote
            .fetch(&[] as &[&str], None, None)
            .map_err(|source| StoreError::Fetch {
                name: WORKDIR_REMOTE.to_string(),
                source,
            })
    }

    /// Whether `ancestor` is reachable from `descendant` (identity counts).
    pub fn is_ancestor(&self, ancestor: Oid, descendant: Oid) -> Result<bool, StoreError> {
        if ancestor == descendant {
            return Ok(true);
        }
        Ok(self.repo.graph_descendant_of(descendant, ancestor)?)
    }

    /// Whether the object database holds `oid`.
    pub fn contains(&self, oid: Oid) -> Result<bool, StoreError> {
        Ok(self.repo.odb()?.exists(oid))
    }

    /// Copy a commit, its ancestry, and every reachable tree and blob from
    /// `src` into this store. Used when a fetch cannot make the workdir HEAD
    /// reachable (detached HEAD). Existing objects are skipped; a write of an
    /// object that is already present is success.
    pub fn copy_commit_from(&self, src: &Repository, commit: Oid) -> Result<(), StoreError> {
        let src_odb = src.odb()?;
        let dst_odb = self.repo.odb()?;
        let mut walk = src.revwalk()?;
        walk.push(commit)?;
        for oid in walk {
            let oid = oid?;
            if dst_odb.exists(oid) {
                continue;
            }
            let commit = src.find_commit(oid)?;
            copy_tree(&src_odb, &dst_odb, src, commit.tree_id())?;
            copy_raw(&src_odb, &dst_odb, oid)?;
        }
        Ok(())
    }
}

fn copy_tree(src_odb: &Odb, dst_odb: &Odb, src: &Repository, tree: Oid) -> Result<(), StoreError> {
    if dst_odb.exists(tree) {
        return Ok(());
    }
    let obj = src.find_tree(tree)?;
    for entry in obj.iter() {
        match entry.kind() {
            Some(ObjectType::Tree) => copy_tree(src_odb, dst_odb, src, entry.id())?,
            Some(ObjectType::Blob) => copy_raw(src_odb, dst_odb, entry.id())?,
            // Gitlinks point into another repository; nothing to copy.
            _ => {}
        }
    }
    copy_raw(src_odb, dst_odb, tree)
}

fn copy_raw(src_odb: &Odb, dst_odb: &Odb, oid: Oid) -> Result<(), StoreError> {
    if dst_odb.exists(oid) {
        return Ok(());
    }
    let obj = src_odb
        .read(oid)
        .map_err(|source| StoreError::CopyObject { oid, source })?;
    dst_odb
        .write(obj.kind(), obj.data())
        .map_err(|source| StoreError::CopyObject { oid, source })?;
    Ok(())
}
