//! `git-wmem init` and the preconditions `commit` enforces.

use std::fs;

use predicates::prelude::*;
use tempfile::TempDir;

use crate::fixtures::wmem_cmd;

#[test]
fn init_lays_down_the_meta_repository_skeleton() {
    let root = TempDir::new().expect("temp root");
    wmem_cmd()
        .current_dir(root.path())
        .args(["init", "my-wmem1"])
        .assert()
        .success();

    let meta = root.path().join("my-wmem1");
    assert!(meta.join(".git-wmem").is_file());
    assert_eq!(
        fs::read_to_string(meta.join(".gitignore")).expect("gitignore"),
        "repos/\n"
    );
    assert_eq!(
        fs::read_to_string(meta.join("md/commit-workdir-paths")).expect("paths"),
        ""
    );
    assert_eq!(
        fs::read_to_string(meta.join("md/commit/author")).expect("author"),
        "WMem Git <git-wmem@mj41.cz>"
    );
    assert_eq!(
        fs::read_to_string(meta.join("md/commit/committer")).expect("committer"),
        "WMem Git <git-wmem@mj41.cz>"
    );
    assert_eq!(
        fs::read_to_string(meta.join("md-internal/workdir-map.json")).expect("map"),
        "{}"
    );
    assert!(meta.join("repos").is_dir());

    let repo = git2::Repository::open(&meta).expect("meta repo");
    let head = repo.head().expect("head");
    assert_eq!(head.shorthand(), Some("main"));
    assert_eq!(
        head.peel_to_commit().expect("commit").message(),
        Some("Initialize git-wmem repository `my-wmem1`")
    );
}

#[test]
fn init_rejects_a_non_empty_directory() {
    let root = TempDir::new().expect("temp root");
    let target = root.path().join("busy");
    fs::create_dir(&target).expect("mkdir");
    fs::write(target.join("keep.txt"), "x").expect("file");

    wmem_cmd()
        .current_dir(root.path())
        .args(["init", "busy"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not empty"));
}

#[test]
fn commit_outside_a_meta_repository_fails() {
    let root = TempDir::new().expect("temp root");
    wmem_cmd()
        .current_dir(root.path())
        .arg("commit")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not in a wmem repository"));
}

#[test]
fn commit_with_no_configured_workdirs_fails() {
    let root = TempDir::new().expect("temp root");
    wmem_cmd()
        .current_dir(root.path())
        .args(["init", "my-wmem1"])
        .assert()
        .success();

    wmem_cmd()
        .current_dir(root.path().join("my-wmem1"))
        .arg("commit")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no workdirs configured"));
}

#[test]
fn commit_rejects_invalid_workdir_paths() {
    let root = TempDir::new().expect("temp root");
    wmem_cmd()
        .current_dir(root.path())
        .args(["init", "my-wmem1"])
        .assert()
        .success();
    let meta = root.path().join("my-wmem1");

    for (path, diagnostic) in [
        ("/abs/path", "absolute paths not allowed"),
        ("./inside", "meta-repository paths not allowed"),
        ("plain", "must start with ../"),
        ("../a/../b", "path traversal not allowed"),
        ("../missing", "not accessible"),
    ] {
        fs::write(meta.join("md/commit-workdir-paths"), path).expect("paths");
        wmem_cmd()
            .current_dir(&meta)
            .arg("commit")
            .assert()
            .failure()
            .stderr(predicate::str::contains(diagnostic));
    }
}
