//! Tiered change detection.
//!
//! Decides whether a workdir's on-disk state differs from its meta-branch
//! tip, cheapest test first:
//!
//! 1. mtime sweep: no file newer than the tip's committer timestamp, and
//! 2. no deletion detected via the directory-mtime checkpoint and file-list
//!    comparison, together conclude "unchanged";
//! 3. a clean working tree whose HEAD is already an ancestor of the tip
//!    concludes "unchanged";
//! 4. otherwise the prospective root tree is derived from the paths touched
//!    since the workdir's last merge commit and compared against the tip's
//!    tree hash;
//! 5. with no merge commit in the history, a full rebuild is compared.
//!
//! The timestamp shortcut alone cannot see deletions, so it is only
//! conclusive together with the deletion check.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

use time::OffsetDateTime;
use tracing::debug;
use walkdir::WalkDir;

use crate::cache::{self, CommitCache};
use crate::git::{meta_branch, tree};
use crate::meta::MetaRepo;
use crate::sync::{SyncError, WorkdirContext};

/// Tolerance below the commit timestamp for filesystem clock granularity.
const MTIME_SLACK_SECS: i64 = 1;

pub(crate) fn has_changes(
    ctx: &WorkdirContext,
    branch: &str,
    cache: &CommitCache,
    meta: &MetaRepo,
) -> Result<bool, SyncError> {
    let tip = ctx.store.branch_tip(&meta_branch(branch))?;

    if !quick_scan_suspects_changes(ctx, branch, tip, cache, meta)? {
        debug!(workdir = %ctx.name, "no files newer than last snapshot and no deletions");
        return Ok(false);
    }

    if !ctx.repo.is_dirty()? {
        let head = ctx.repo.head_id()?;
        if ctx.store.is_ancestor(head, tip)? {
            debug!(workdir = %ctx.name, "working tree clean and HEAD already recorded");
            return Ok(false);
        }
    }

    let head = ctx.repo.head_id()?;
    let tip_tree = ctx.store.repo().find_commit(tip)?.tree_id();

    match ctx.repo.last_merge_commit()? {
        None => {
            let full = tree::build_full(ctx.store.repo(), &ctx.abs)?;
            Ok(full != tip_tree)
        }
        Some(merge) => {
            let touched = match cache.touched_files(&ctx.path, head, merge) {
                Some(files) => files,
                None => {
                    let files = ctx.repo.touched_since(merge)?;
                    cache.store_touched_files(&ctx.path, head, merge, files.clone());
                    files
                }
            };
            if touched.is_empty() {
                return Ok(false);
            }
            let prospective = match cache.tree_hash(&ctx.path, head, &touched) {
                Some(hash) => hash,
                None => {
                    let hash =
                        tree::build_with_touched(ctx.store.repo(), &ctx.abs, tip_tree, &touched)?;
                    cache.store_tree_hash(&ctx.path, head, touched, hash);
                    hash
                }
            };
            Ok(prospective != tip_tree)
        }
    }
}

/// Tiers 1 and 2. `false` means definitively unchanged; `true` means a
/// change is possible and the deeper tiers must decide.
fn quick_scan_suspects_changes(
    ctx: &WorkdirContext,
    branch: &str,
    tip: git2::Oid,
    cache: &CommitCache,
    meta: &MetaRepo,
) -> Result<bool, SyncError> {
    let tip_commit = ctx.store.repo().find_commit(tip)?;
    let commit_secs = tip_commit.committer().when().seconds();
    if newer_files_exist(&ctx.abs, commit_secs)? {
        return Ok(true);
    }
    deletions_detected(ctx, branch, tip, cache, meta)
}

fn newer_files_exist(root: &Path, since_secs: i64) -> Result<bool, SyncError> {
    for entry in WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
    {
        let entry = entry.map_err(|source| SyncError::Scan {
            path: root.to_path_buf(),
            source,
        })?;
        if entry.file_type().is_dir() {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            // A file we cannot stat (e.g. a just-broken symlink) counts as a
            // potential change.
            return Ok(true);
        };
        if mtime_secs(&metadata) > since_secs - MTIME_SLACK_SECS {
            return Ok(true);
        }
    }
    Ok(false)
}

fn mtime_secs(metadata: &fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Deletion detection. The root directory's mtime gates the expensive path:
/// when it has not advanced past the persisted checkpoint, nothing was
/// removed at the root level since the last conclusion. When it has, the
/// current file list is compared against what the meta-branch tip tracks;
/// any tracked name missing on disk is a deletion. The new mtime is written
/// back to the checkpoint on conclusion.
fn deletions_detected(
    ctx: &WorkdirContext,
    branch: &str,
    tip: git2::Oid,
    cache: &CommitCache,
    meta: &MetaRepo,
) -> Result<bool, SyncError> {
    let root_mtime = fs::metadata(&ctx.abs)
        .and_then(|m| m.modified())
        .unwrap_or(UNIX_EPOCH);
    let checkpoint_path = meta.checkpoint_path(&ctx.path);
    if let Some(recorded) = cache::read_checkpoint(&checkpoint_path)
        && OffsetDateTime::from(root_mtime) <= recorded
    {
        return Ok(false);
    }

    let head = ctx.repo.head_id()?;
    if cache.dir_state_unchanged(&ctx.path, head, root_mtime) {
        return Ok(false);
    }

    let current = list_files(&ctx.abs)?;
    let previous = match cache.file_list(&ctx.path, head) {
        Some(files) => files,
        None => meta_tree_files(ctx, branch, tip, cache)?,
    };

    let current_set: HashSet<&str> = current.iter().map(String::as_str).collect();
    let deleted = previous
        .iter()
        .find(|file| !current_set.contains(file.as_str()));
    if let Some(file) = deleted {
        debug!(workdir = %ctx.name, %file, "previously tracked file is missing");
    }
    let verdict = deleted.is_some();

    cache.store_dir_state(&ctx.path, head, root_mtime, current.len());
    cache.store_file_list(&ctx.path, head, current);
    cache::write_checkpoint(&checkpoint_path, OffsetDateTime::from(root_mtime)).map_err(
        |source| SyncError::Checkpoint {
            path: checkpoint_path.clone(),
            source,
        },
    )?;

    Ok(verdict)
}

/// Files currently on disk, relative to the workdir root, `.git` excluded.
fn list_files(root: &Path) -> Result<Vec<String>, SyncError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
    {
        let entry = entry.map_err(|source| SyncError::Scan {
            path: root.to_path_buf(),
            source,
        })?;
        if entry.file_type().is_dir() {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(root)
            && let Some(rel) = rel.to_str()
        {
            files.push(rel.to_string());
        }
    }
    Ok(files)
}

/// File list of the meta-branch tip's tree, cached by commit id.
fn meta_tree_files(
    ctx: &WorkdirContext,
    branch: &str,
    tip: git2::Oid,
    cache: &CommitCache,
) -> Result<Vec<String>, SyncError> {
    if let Some(files) = cache.meta_tree_files(&ctx.name, branch, tip) {
        return Ok(files);
    }
    let tip_tree = ctx.store.repo().find_commit(tip)?.tree()?;
    let files = tree::list_tree_files(&tip_tree)?;
    cache.store_meta_tree_files(&ctx.name, branch, tip, files.clone());
    Ok(files)
}
