//! Per-workdir sync machine.
//!
//! Implements the snapshot protocol with typestate guarantees:
//! - Opened → BranchEnsured → HeadSynced → Fetched → Reconciled → Evaluated
//! - each transition consumes `self` and returns the next phase
//! - steps can't be skipped - enforced at compile time
//!
//! The first six steps only read the workdir and perform idempotent ref
//! setup in the bare store, so the coordinator may run them for many
//! workdirs concurrently. Snapshot writing (`finish`) mutates refs and runs
//! sequentially.

use std::path::PathBuf;

use git2::Oid;
use thiserror::Error;
use tracing::{debug, info};

use crate::cache::CommitCache;
use crate::commit::CommitInfo;
use crate::git::{
    BareStore, HEAD_TRACKER, StoreError, WorkdirRepo, meta_branch, meta_branch_ref, tree,
};
use crate::meta::MetaRepo;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to create signature: {0}")]
    Signature(#[source] git2::Error),

    #[error("failed to create merge commit: {0}")]
    MergeCommit(#[source] git2::Error),

    #[error("failed to create snapshot commit: {0}")]
    SnapshotCommit(#[source] git2::Error),

    #[error("failed to scan {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("failed to write checkpoint {path}: {source}")]
    Checkpoint {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("workdir check thread panicked")]
    WorkerPanicked,

    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),
}

/// Everything a sync needs to know about one workdir.
pub struct WorkdirContext {
    /// Configured relative path, as written in the paths file.
    pub path: String,
    /// Resolved absolute path.
    pub abs: PathBuf,
    /// Name in the workdir map; also names the bare store.
    pub name: String,
    pub store: BareStore,
    pub repo: WorkdirRepo,
}

/// Per-workdir outcome of one commit invocation.
#[derive(Debug, Clone)]
pub struct WorkdirCommitResult {
    pub name: String,
    pub branch: String,
    /// New snapshot commit in the bare store; `None` when unchanged.
    pub commit: Option<Oid>,
    pub changed: bool,
}

// =============================================================================
// Phase markers
// =============================================================================

pub struct Opened;

pub struct BranchEnsured {
    branch: String,
}

pub struct HeadSynced {
    branch: String,
}

pub struct Fetched {
    branch: String,
}

pub struct Reconciled {
    branch: String,
}

pub struct Evaluated {
    branch: String,
    changed: bool,
}

pub struct SyncProcess<Phase> {
    ctx: WorkdirContext,
    phase: Phase,
}

impl SyncProcess<Opened> {
    /// Open both sides for a mapped workdir.
    pub fn open(meta: &MetaRepo, path: &str, abs: PathBuf, name: &str) -> Result<Self, SyncError> {
        let store = BareStore::open(&meta.store_path(name))?;
        let repo = WorkdirRepo::open(&abs)?;
        Ok(SyncProcess {
            ctx: WorkdirContext {
                path: path.to_string(),
                abs,
                name: name.to_string(),
                store,
                repo,
            },
            phase: Opened,
        })
    }

    /// Step 1 + 2: read the current branch and make sure the matching
    /// meta-branch exists, creating it at the workdir HEAD if not. The fetch
    /// on the creation path brings the commit, tree, and blob objects the
    /// new ref needs; a detached HEAD falls back to a direct object copy.
    pub fn ensure_branch(self) -> Result<SyncProcess<BranchEnsured>, SyncError> {
        let branch = self.ctx.repo.current_branch()?;
        if self.ctx.store.try_branch_tip(&meta_branch(&branch))?.is_none() {
            self.ctx.store.fetch_workdir()?;
            let head = self.ctx.repo.head_id()?;
            if !self.ctx.store.contains(head)? {
                self.ctx.store.copy_commit_from(self.ctx.repo.repo(), head)?;
            }
            self.ctx.store.set_branch(&meta_branch(&branch), head)?;
            debug!(workdir = %self.ctx.name, %branch, "created meta-branch at workdir HEAD");
        }
        Ok(SyncProcess {
            ctx: self.ctx,
            phase: BranchEnsured { branch },
        })
    }
}

impl SyncProcess<BranchEnsured> {
    /// Step 3: point the store's symbolic HEAD at the meta-branch and move
    /// the head tracker onto its tip.
    pub fn sync_head_ref(self) -> Result<SyncProcess<HeadSynced>, SyncError> {
        let branch = self.phase.branch;
        let tip = self.ctx.store.branch_tip(&meta_branch(&branch))?;
        self.ctx.store.set_symbolic_head(&meta_branch(&branch))?;
        self.ctx.store.set_branch(HEAD_TRACKER, tip)?;
        Ok(SyncProcess {
            ctx: self.ctx,
            phase: HeadSynced { branch },
        })
    }
}

impl SyncProcess<HeadSynced> {
    /// Step 4: fetch the workdir's refs and objects. "Already up-to-date" is
    /// not an error.
    pub fn fetch(self) -> Result<SyncProcess<Fetched>, SyncError> {
        self.ctx.store.fetch_workdir()?;
        Ok(SyncProcess {
            ctx: self.ctx,
            phase: Fetched {
                branch: self.phase.branch,
            },
        })
    }
}

impl SyncProcess<Fetched> {
    /// Step 5: when the workdir HEAD is not an ancestor of the meta-branch
    /// tip, record a merge that adopts the workdir's tree wholesale, then
    /// advance the meta-branch and the head tracker onto it.
    pub fn reconcile(self, info: &CommitInfo) -> Result<SyncProcess<Reconciled>, SyncError> {
        let branch = self.phase.branch;
        let head = self.ctx.repo.head_id()?;
        if !self.ctx.store.contains(head)? {
            self.ctx.store.copy_commit_from(self.ctx.repo.repo(), head)?;
        }
        let tip = self.ctx.store.branch_tip(&meta_branch(&branch))?;
        if !self.ctx.store.is_ancestor(head, tip)? {
            let merge = write_merge_commit(&self.ctx.store, tip, head, &branch, info)?;
            self.ctx.store.set_branch(HEAD_TRACKER, merge)?;
            info!(workdir = %self.ctx.name, %branch, "merged workdir HEAD into meta-branch");
        }
        Ok(SyncProcess {
            ctx: self.ctx,
            phase: Reconciled { branch },
        })
    }
}

impl SyncProcess<Reconciled> {
    /// Step 6: decide whether the on-disk state differs from the meta-branch
    /// tip.
    pub fn evaluate(
        self,
        cache: &CommitCache,
        meta: &MetaRepo,
    ) -> Result<SyncProcess<Evaluated>, SyncError> {
        let branch = self.phase.branch;
        let changed = crate::detect::has_changes(&self.ctx, &branch, cache, meta)?;
        if !changed {
            debug!(workdir = %self.ctx.name, %branch, "no modified files, skipping snapshot");
        }
        Ok(SyncProcess {
            ctx: self.ctx,
            phase: Evaluated { branch, changed },
        })
    }
}

impl SyncProcess<Evaluated> {
    pub fn has_changes(&self) -> bool {
        self.phase.changed
    }

    /// Steps 7-9 for changed workdirs: synthesize the root tree from the
    /// live filesystem, commit it onto the meta-branch, and advance the head
    /// tracker. Unchanged workdirs record a no-change result.
    pub fn finish(self, info: &CommitInfo) -> Result<WorkdirCommitResult, SyncError> {
        let branch = self.phase.branch;
        if !self.phase.changed {
            return Ok(WorkdirCommitResult {
                name: self.ctx.name,
                branch,
                commit: None,
                changed: false,
            });
        }

        let store = &self.ctx.store;
        let tip = store.branch_tip(&meta_branch(&branch))?;
        let tree_id = tree::build_full(store.repo(), &self.ctx.abs)?;
        let tree = store.repo().find_tree(tree_id)?;
        let parent = store.repo().find_commit(tip)?;
        let author = info.author.to_signature().map_err(SyncError::Signature)?;
        let committer = info.committer.to_signature().map_err(SyncError::Signature)?;
        let commit = store
            .repo()
            .commit(
                Some(&meta_branch_ref(&branch)),
                &author,
                &committer,
                &info.message,
                &tree,
                &[&parent],
            )
            .map_err(SyncError::SnapshotCommit)?;
        store.set_branch(HEAD_TRACKER, commit)?;

        info!(
            workdir = %self.ctx.name,
            %branch,
            commit = %commit,
            "committed workdir snapshot"
        );
        Ok(WorkdirCommitResult {
            name: self.ctx.name,
            branch,
            commit: Some(commit),
            changed: true,
        })
    }
}

/// The workdir-merge: never resolves content, the workdir's tree is
/// authoritative. Parents are the meta-branch tip first, then the workdir
/// HEAD. Advances the meta-branch as part of the commit.
fn write_merge_commit(
    store: &BareStore,
    tip: Oid,
    head: Oid,
    branch: &str,
    info: &CommitInfo,
) -> Result<Oid, SyncError> {
    let repo = store.repo();
    let tip_commit = repo.find_commit(tip)?;
    let head_commit = repo.find_commit(head)?;
    let tree = head_commit.tree()?;
    let message = format!(
        "Merge workdir '{branch}' into 'wmem-br/{branch}' accepting workdir's branch tree hash\n\n{}",
        info.message
    );
    let author = info.author.to_signature().map_err(SyncError::Signature)?;
    let committer = info.committer.to_signature().map_err(SyncError::Signature)?;
    repo.commit(
        Some(&meta_branch_ref(branch)),
        &author,
        &committer,
        &message,
        &tree,
        &[&tip_commit, &head_commit],
    )
    .map_err(SyncError::MergeCommit)
}
