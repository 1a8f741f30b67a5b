//! Shared fixtures: a meta-repository with sibling project repositories,
//! driven through the real `git-wmem` binary.

pub mod git;

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use git2::{Oid, Repository};
use tempfile::TempDir;

pub fn wmem_cmd() -> Command {
    assert_cmd::cargo::cargo_bin_cmd!("git-wmem")
}

/// Test fixture: one meta-repository (`my-wmem1`) plus sibling workdirs,
/// all under a private temp root so `../<name>` paths resolve.
pub struct WmemWorld {
    #[allow(dead_code)]
    root: TempDir,
    pub meta_dir: PathBuf,
}

impl WmemWorld {
    pub fn new() -> Self {
        let root = TempDir::new().expect("temp root");
        wmem_cmd()
            .current_dir(root.path())
            .args(["init", "my-wmem1"])
            .assert()
            .success();
        let meta_dir = root.path().join("my-wmem1");
        Self { root, meta_dir }
    }

    /// Create a sibling git repository with one committed file.
    pub fn add_project(&self, name: &str) -> PathBuf {
        let dir = self.root.path().join(name);
        fs::create_dir(&dir).expect("project dir");
        git::init_repo(&dir);
        fs::write(dir.join("fileA.txt"), format!("{name} content\n")).expect("seed file");
        git::commit_all(&dir, "initial");
        dir
    }

    pub fn configure_paths(&self, paths: &[&str]) {
        fs::write(
            self.meta_dir.join("md/commit-workdir-paths"),
            paths.join("\n"),
        )
        .expect("paths file");
    }

    pub fn run_commit(&self) -> assert_cmd::assert::Assert {
        wmem_cmd().current_dir(&self.meta_dir).arg("commit").assert()
    }

    pub fn bare_repo(&self, name: &str) -> Repository {
        Repository::open(self.meta_dir.join("repos").join(format!("{name}.git")))
            .expect("bare store")
    }

    pub fn store_tip(&self, name: &str, branch: &str) -> Option<Oid> {
        self.bare_repo(name)
            .refname_to_id(&format!("refs/heads/wmem-br/{branch}"))
            .ok()
    }

    pub fn tip_message(&self, name: &str, branch: &str) -> String {
        let repo = self.bare_repo(name);
        let tip = repo
            .refname_to_id(&format!("refs/heads/wmem-br/{branch}"))
            .expect("branch tip");
        repo.find_commit(tip)
            .expect("tip commit")
            .message()
            .expect("utf8 message")
            .to_string()
    }

    pub fn meta_repo(&self) -> Repository {
        Repository::open(&self.meta_dir).expect("meta repo")
    }

    pub fn meta_head_message(&self) -> String {
        let repo = self.meta_repo();
        repo.head()
            .expect("head")
            .peel_to_commit()
            .expect("commit")
            .message()
            .expect("utf8 message")
            .to_string()
    }

    pub fn meta_commit_count(&self) -> usize {
        let repo = self.meta_repo();
        let head = repo.head().expect("head").peel_to_commit().expect("commit");
        let mut walk = repo.revwalk().expect("revwalk");
        walk.push(head.id()).expect("push");
        walk.count()
    }

    pub fn workdir_map(&self) -> serde_json::Value {
        let raw = fs::read_to_string(self.meta_dir.join("md-internal/workdir-map.json"))
            .expect("map file");
        serde_json::from_str(&raw).expect("map json")
    }
}

/// The uid on the first `wmem-uid:` line of a commit message.
pub fn uid_of(message: &str) -> String {
    let line = message
        .lines()
        .find(|l| l.trim().starts_with("wmem-uid:"))
        .unwrap_or_else(|| panic!("no wmem-uid line in message: {message:?}"));
    line.trim()
        .strip_prefix("wmem-uid:")
        .expect("uid prefix")
        .trim()
        .to_string()
}
