//! The commit coordinator.
//!
//! One `commit` invocation:
//! 1. loads the configured workdir paths and commit configuration,
//! 2. mints a fresh wmem-uid shared by every commit written this run,
//! 3. validates each path, creating bare stores and map entries for new
//!    ones,
//! 4. phase A: runs the read-mostly sync steps for every workdir in
//!    parallel and joins the verdicts in input order (first error wins),
//! 5. phase B: writes snapshots sequentially for the changed workdirs,
//! 6. records one summary commit in the meta-repository when anything
//!    changed.

use std::path::PathBuf;

use git2::{ErrorCode, IndexAddOption, Repository, StatusOptions};
use rand::Rng;
use rand::distr::Alphanumeric;
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::cache::CommitCache;
use crate::error::{Error, Result};
use crate::git::{BareStore, WorkdirRepo, meta_branch};
use crate::meta::{CommitConfig, MetaError, MetaRepo, SignatureInfo};
use crate::sync::{Evaluated, SyncError, SyncProcess, WorkdirCommitResult};
use crate::workdir::{self, WorkdirMap};

/// Per-invocation commit identity: the shared uid, the message carrying it,
/// and the signatures every commit of this run is stamped with.
pub struct CommitInfo {
    pub uid: String,
    pub message: String,
    pub author: SignatureInfo,
    pub committer: SignatureInfo,
}

impl CommitInfo {
    pub fn new(config: CommitConfig) -> Self {
        let uid = generate_uid();
        let mut message = String::new();
        if !config.msg_prefix.is_empty() {
            message.push_str(&config.msg_prefix);
            message.push_str("\n\n");
        }
        message.push_str(&format!("wmem-uid: {uid}"));
        Self {
            uid,
            message,
            author: config.author,
            committer: config.committer,
        }
    }
}

/// Mint a `wmem-YYMMDD-HHMMSS-XXXXXXXX` identifier. Uniqueness is
/// probabilistic; the suffix draws eight characters from `[A-Za-z0-9]`.
pub fn generate_uid() -> String {
    let now = OffsetDateTime::now_utc();
    let suffix: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!(
        "wmem-{:02}{:02}{:02}-{:02}{:02}{:02}-{suffix}",
        now.year() % 100,
        u8::from(now.month()),
        now.day(),
        now.hour(),
        now.minute(),
        now.second(),
    )
}

/// Whether `s` has the exact shape of a wmem-uid.
pub fn is_wmem_uid(s: &str) -> bool {
    let Some(rest) = s.strip_prefix("wmem-") else {
        return false;
    };
    let mut parts = rest.splitn(3, '-');
    let (Some(date), Some(time), Some(suffix)) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    date.len() == 6
        && date.bytes().all(|b| b.is_ascii_digit())
        && time.len() == 6
        && time.bytes().all(|b| b.is_ascii_digit())
        && suffix.len() == 8
        && suffix.bytes().all(|b| b.is_ascii_alphanumeric())
}

struct WorkdirPlan {
    path: String,
    abs: PathBuf,
    name: String,
}

/// Entry point for `git-wmem commit`.
pub fn run(meta: &MetaRepo) -> Result<()> {
    let paths = meta.workdir_paths()?;
    if paths.is_empty() {
        return Err(MetaError::NoWorkdirsConfigured.into());
    }

    let plans = prepare_workdirs(meta, &paths)?;
    let info = CommitInfo::new(meta.commit_config()?);
    let cache = CommitCache::new();

    // Phase A: read-mostly checks, one thread per workdir. A single workdir
    // skips the fan-out overhead.
    let outcomes = if plans.len() == 1 {
        info!(workdir = %plans[0].path, "processing single workdir");
        vec![check_workdir(meta, &info, &cache, &plans[0])]
    } else {
        info!(count = plans.len(), "running parallel checks");
        run_parallel_checks(meta, &info, &cache, &plans)
    };

    // Join point: every verdict must be in (first error wins) before any
    // snapshot is written.
    let mut processes = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        processes.push(outcome?);
    }

    // Phase B: sequential snapshot writes, in configuration order.
    let mut results: Vec<WorkdirCommitResult> = Vec::with_capacity(processes.len());
    let mut any_changes = false;
    for process in processes {
        let result = process.finish(&info)?;
        any_changes |= result.changed;
        results.push(result);
    }

    if any_changes {
        write_summary_commit(meta, &info, &results)?;
        info!(
            changed = results.iter().filter(|r| r.changed).count(),
            "created meta-repository commit"
        );
    } else if has_meta_changes(meta)? {
        write_summary_commit(meta, &info, &results)?;
        info!("created meta-repository commit (metadata only)");
    } else {
        info!("no changes in any workdir or metadata, skipping meta-repository commit");
    }

    cache.log_stats();
    Ok(())
}

/// Validate every configured path and make sure each one has a bare store
/// and a map entry. The map is append-only: entries for paths that left the
/// configuration stay.
fn prepare_workdirs(meta: &MetaRepo, paths: &[String]) -> Result<Vec<WorkdirPlan>> {
    let mut map = WorkdirMap::load(&meta.map_path()).map_err(Error::from)?;
    let mut plans = Vec::with_capacity(paths.len());

    for path in paths {
        let abs = workdir::validate_path(meta.root(), path)?;
        let name = match map.name_for(path) {
            Some(name) => name.to_string(),
            None => {
                let name = map.generate_name(path);
                create_store(meta, &name, &abs)?;
                map.insert(name.clone(), path);
                debug!(%path, %name, "registered new workdir");
                name
            }
        };
        plans.push(WorkdirPlan {
            path: path.clone(),
            abs,
            name,
        });
    }

    map.save(&meta.map_path())?;
    Ok(plans)
}

/// Lazily create the bare store for a new workdir: bare init, `wmem-wd`
/// remote, initial fetch, and the first meta-branch at the workdir's HEAD.
fn create_store(meta: &MetaRepo, name: &str, abs: &std::path::Path) -> Result<()> {
    let store = BareStore::create(&meta.store_path(name), abs).map_err(SyncError::from)?;
    store.fetch_workdir().map_err(SyncError::from)?;

    let repo = WorkdirRepo::open(abs).map_err(SyncError::from)?;
    let branch = repo.current_branch().map_err(SyncError::from)?;
    let head = repo.head_id().map_err(SyncError::from)?;
    if !store.contains(head).map_err(SyncError::from)? {
        store
            .copy_commit_from(repo.repo(), head)
            .map_err(SyncError::from)?;
    }
    store
        .set_branch(&meta_branch(&branch), head)
        .map_err(SyncError::from)?;
    Ok(())
}

fn check_workdir(
    meta: &MetaRepo,
    info: &CommitInfo,
    cache: &CommitCache,
    plan: &WorkdirPlan,
) -> Result<SyncProcess<Evaluated>> {
    let process = SyncProcess::open(meta, &plan.path, plan.abs.clone(), &plan.name)?
        .ensure_branch()?
        .sync_head_ref()?
        .fetch()?
        .reconcile(info)?
        .evaluate(cache, meta)?;
    Ok(process)
}

fn run_parallel_checks(
    meta: &MetaRepo,
    info: &CommitInfo,
    cache: &CommitCache,
    plans: &[WorkdirPlan],
) -> Vec<Result<SyncProcess<Evaluated>>> {
    std::thread::scope(|scope| {
        let handles: Vec<_> = plans
            .iter()
            .map(|plan| scope.spawn(move || check_workdir(meta, info, cache, plan)))
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(SyncError::WorkerPanicked.into()))
            })
            .collect()
    })
}

/// Stage everything in the meta working tree and commit with the shared
/// uid. The summary may be empty of file changes.
fn write_summary_commit(
    meta: &MetaRepo,
    info: &CommitInfo,
    results: &[WorkdirCommitResult],
) -> Result<()> {
    let message = summary_message(info, results);
    let repo = Repository::open(meta.root()).map_err(MetaError::Git)?;

    let mut index = repo.index().map_err(MetaError::Git)?;
    index
        .add_all(["*"], IndexAddOption::DEFAULT, None)
        .map_err(MetaError::Git)?;
    index.write().map_err(MetaError::Git)?;
    let tree_id = index.write_tree().map_err(MetaError::Git)?;
    let tree = repo.find_tree(tree_id).map_err(MetaError::Git)?;

    let author = info.author.to_signature().map_err(MetaError::Git)?;
    let committer = info.committer.to_signature().map_err(MetaError::Git)?;

    let parent = match repo.head() {
        Ok(head) => Some(head.peel_to_commit().map_err(MetaError::Git)?),
        Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => None,
        Err(e) => return Err(MetaError::Git(e).into()),
    };
    let parents: Vec<_> = parent.iter().collect();

    repo.commit(Some("HEAD"), &author, &committer, &message, &tree, &parents)
        .map_err(MetaError::Git)?;
    Ok(())
}

/// Summary message: the shared prefix/uid block, then one bullet per
/// changed workdir with a 12-character short hash, or a metadata-only note.
fn summary_message(info: &CommitInfo, results: &[WorkdirCommitResult]) -> String {
    let mut message = info.message.clone();
    message.push_str("\n\nMeta wmem-commit of workdir commits");
    let mut any = false;
    for result in results.iter().filter(|r| r.changed) {
        let hash = result.commit.map(|c| c.to_string()).unwrap_or_default();
        let short = &hash[..hash.len().min(12)];
        message.push_str(&format!("\n- `{}` `{}` `{}`", result.name, result.branch, short));
        any = true;
    }
    if !any {
        message.push_str("\n(No workdir changes - metadata only)");
    }
    message
}

/// Any staged, unstaged, or untracked change in the meta working tree.
/// Ignored paths (`repos/`) do not count.
fn has_meta_changes(meta: &MetaRepo) -> Result<bool> {
    let repo = Repository::open(meta.root()).map_err(MetaError::Git)?;
    let mut opts = StatusOptions::new();
    opts.include_untracked(true).recurse_untracked_dirs(true);
    let statuses = repo.statuses(Some(&mut opts)).map_err(MetaError::Git)?;
    Ok(!statuses.is_empty())
}
