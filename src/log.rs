//! History renderer for `git-wmem log`.
//!
//! Walks the meta-repository history and prints one block per recorded
//! invocation: the wmem-uid, the main message, and the known workdirs with
//! the latest meta-branch tip of each.

use git2::Repository;

use crate::commit::is_wmem_uid;
use crate::error::Result;
use crate::git::BareStore;
use crate::meta::{MetaError, MetaRepo};
use crate::workdir::WorkdirMap;

/// Entry point for `git-wmem log`.
pub fn run(meta: &MetaRepo) -> Result<()> {
    let repo = Repository::open(meta.root()).map_err(MetaError::Git)?;
    let map = WorkdirMap::load(&meta.map_path())?;

    let head = repo
        .head()
        .and_then(|h| h.peel_to_commit())
        .map_err(MetaError::Git)?;
    let mut walk = repo.revwalk().map_err(MetaError::Git)?;
    walk.push(head.id()).map_err(MetaError::Git)?;

    for oid in walk {
        let oid = oid.map_err(MetaError::Git)?;
        let commit = repo.find_commit(oid).map_err(MetaError::Git)?;
        let Some(message) = commit.message() else {
            continue;
        };
        let Some(uid) = extract_uid(message) else {
            continue;
        };
        println!("{uid}: {}", main_message(message));
        for (name, path) in map.iter() {
            match latest_store_tip(meta, name) {
                Some(hash) => println!("  {path}: {}...", &hash[..12]),
                None => println!("  {path}: unknown"),
            }
        }
        println!();
    }
    Ok(())
}

/// The uid carried on a `wmem-uid:` line, if any.
fn extract_uid(message: &str) -> Option<&str> {
    for line in message.lines() {
        if let Some(rest) = line.trim().strip_prefix("wmem-uid:") {
            let candidate = rest.trim();
            if is_wmem_uid(candidate) {
                return Some(candidate);
            }
        }
    }
    None
}

/// Everything before the `wmem-uid:` line, trimmed.
fn main_message(message: &str) -> String {
    let mut lines = Vec::new();
    for line in message.lines() {
        if line.trim().starts_with("wmem-uid:") {
            break;
        }
        lines.push(line);
    }
    let main = lines.join("\n").trim().to_string();
    if main.is_empty() {
        "wmem commit".to_string()
    } else {
        main
    }
}

/// Tip of the workdir's most relevant meta-branch: `wmem-br/main`, then
/// `wmem-br/master`, then any meta-branch.
fn latest_store_tip(meta: &MetaRepo, name: &str) -> Option<String> {
    let store = BareStore::open(&meta.store_path(name)).ok()?;
    for branch in ["wmem-br/main", "wmem-br/master"] {
        if let Ok(Some(tip)) = store.try_branch_tip(branch) {
            return Some(tip.to_string());
        }
    }
    let refs = store.repo().references_glob("refs/heads/wmem-br/*").ok()?;
    for reference in refs.flatten() {
        if let Some(target) = reference.target() {
            return Some(target.to_string());
        }
    }
    None
}
