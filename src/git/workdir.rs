//! Read-only views of a user's working repository.
//!
//! Everything here opens the workdir's own git repository and reads; the tool
//! never writes to a workdir or to its `.git`.

use std::path::{Path, PathBuf};

use git2::{Oid, Repository, StatusOptions};

use super::error::StoreError;

pub struct WorkdirRepo {
    repo: Repository,
    path: PathBuf,
}

impl WorkdirRepo {
    pub fn open(abs: &Path) -> Result<Self, StoreError> {
        let repo =
            Repository::open(abs).map_err(|e| StoreError::OpenRepo(abs.to_path_buf(), e))?;
        Ok(Self {
            repo,
            path: abs.to_path_buf(),
        })
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    /// Short name of the branch HEAD points at.
    pub fn current_branch(&self) -> Result<String, StoreError> {
        let head = self
            .repo
            .head()
            .map_err(|e| StoreError::ReadHead(self.path.clone(), e))?;
        head.shorthand()
            .map(str::to_string)
            .ok_or_else(|| StoreError::NonUtf8Path(self.path.clone()))
    }

    /// Commit id HEAD resolves to.
    pub fn head_id(&self) -> Result<Oid, StoreError> {
        let head = self
            .repo
            .head()
            .map_err(|e| StoreError::ReadHead(self.path.clone(), e))?;
        Ok(head
            .peel_to_commit()
            .map_err(|e| StoreError::ReadHead(self.path.clone(), e))?
            .id())
    }

    /// Any staged, unstaged, or untracked change in the working tree.
    pub fn is_dirty(&self) -> Result<bool, StoreError> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(true).recurse_untracked_dirs(true);
        let statuses = self
            .repo
            .statuses(Some(&mut opts))
            .map_err(|e| StoreError::Status(self.path.clone(), e))?;
        Ok(!statuses.is_empty())
    }

    /// Most recent commit with exactly two parents on HEAD's history, newest
    /// first by commit time.
    pub fn last_merge_commit(&self) -> Result<Option<Oid>, StoreError> {
        let head = self.head_id()?;
        let mut walk = self.repo.revwalk()?;
        walk.push(head)?;
        walk.set_sorting(git2::Sort::TIME)?;
        for oid in walk {
            let oid = oid?;
            if self.repo.find_commit(oid)?.parent_count() == 2 {
                return Ok(Some(oid));
            }
        }
        Ok(None)
    }

    /// Paths differing between `since`'s tree and HEAD's tree. Renames
    /// contribute both sides.
    pub fn touched_since(&self, since: Oid) -> Result<Vec<String>, StoreError> {
        let old_tree = self.repo.find_commit(since)?.tree()?;
        let new_tree = self.repo.find_commit(self.head_id()?)?.tree()?;
        let diff = self
            .repo
            .diff_tree_to_tree(Some(&old_tree), Some(&new_tree), None)?;
        let mut files = Vec::new();
        for delta in diff.deltas() {
            let new_path = delta.new_file().path().and_then(Path::to_str);
            if let Some(path) = new_path {
                files.push(path.to_string());
            }
            if let Some(path) = delta.old_file().path().and_then(Path::to_str)
                && Some(path) != new_path
            {
                files.push(path.to_string());
            }
        }
        Ok(files)
    }
}
