//! The core commit pipeline: registration, snapshots, deletions,
//! idempotence, and the shared per-invocation uid.

use std::fs;

use git2::{Status, StatusOptions};
use predicates::prelude::*;

use crate::fixtures::{WmemWorld, git, uid_of, wmem_cmd};

#[test]
fn first_commit_registers_workdirs_and_records_metadata() {
    let world = WmemWorld::new();
    let project_a = world.add_project("my-projectA");
    world.add_project("my-projectB");
    world.configure_paths(&["../my-projectA", "../my-projectB"]);

    world.run_commit().success();

    // Each bare store tracks the workdir HEAD on both the meta-branch and
    // the head tracker.
    let head_a = git::head_oid(&project_a);
    assert_eq!(world.store_tip("my-projectA", "main"), Some(head_a));
    assert_eq!(
        world
            .bare_repo("my-projectA")
            .refname_to_id("refs/heads/wmem-br/head")
            .ok(),
        Some(head_a)
    );
    assert!(world.store_tip("my-projectB", "main").is_some());

    assert_eq!(
        world.workdir_map(),
        serde_json::json!({
            "my-projectA": "../my-projectA",
            "my-projectB": "../my-projectB",
        })
    );

    // Initial commit plus one metadata summary.
    assert_eq!(world.meta_commit_count(), 2);
    assert!(world.meta_head_message().contains("wmem-uid: wmem-"));
}

#[test]
fn untracked_file_produces_a_snapshot_commit() {
    let world = WmemWorld::new();
    let project_a = world.add_project("my-projectA");
    world.add_project("my-projectB");
    world.configure_paths(&["../my-projectA", "../my-projectB"]);
    world.run_commit().success();

    let tip_a_before = world.store_tip("my-projectA", "main").expect("tip A");
    let tip_b_before = world.store_tip("my-projectB", "main").expect("tip B");

    fs::write(project_a.join("X.txt"), "untracked\n").expect("write");
    world.run_commit().success();

    let tip_a = world.store_tip("my-projectA", "main").expect("tip A");
    assert_ne!(tip_a, tip_a_before);
    let repo_a = world.bare_repo("my-projectA");
    let snapshot = repo_a.find_commit(tip_a).expect("snapshot");
    assert_eq!(snapshot.parent_count(), 1);
    assert_eq!(snapshot.parent_id(0).expect("parent"), tip_a_before);

    let tree = snapshot.tree().expect("tree");
    let entry = tree.get_name("X.txt").expect("X.txt entry");
    assert_eq!(entry.filemode(), 0o100644);

    // The unchanged workdir's store is untouched.
    assert_eq!(world.store_tip("my-projectB", "main"), Some(tip_b_before));
}

#[test]
fn deleted_tracked_file_disappears_from_the_snapshot() {
    let world = WmemWorld::new();
    let project_a = world.add_project("my-projectA");
    world.add_project("my-projectB");
    world.configure_paths(&["../my-projectA", "../my-projectB"]);
    world.run_commit().success();
    fs::write(project_a.join("X.txt"), "untracked\n").expect("write");
    world.run_commit().success();

    let tip_b_before = world.store_tip("my-projectB", "main").expect("tip B");

    // Delete from the filesystem only; no `git rm` in the user's repo.
    fs::remove_file(project_a.join("fileA.txt")).expect("delete");
    world.run_commit().success();

    let repo_a = world.bare_repo("my-projectA");
    let tip_a = world.store_tip("my-projectA", "main").expect("tip A");
    let tree = repo_a.find_commit(tip_a).expect("tip").tree().expect("tree");
    assert!(tree.get_name("fileA.txt").is_none());
    assert!(tree.get_name("X.txt").is_some());

    // The user's own git still sees the deletion.
    let user_repo = git2::Repository::open(&project_a).expect("workdir repo");
    let mut opts = StatusOptions::new();
    opts.include_untracked(true);
    let statuses = user_repo.statuses(Some(&mut opts)).expect("status");
    let deleted = statuses
        .iter()
        .any(|s| s.path() == Some("fileA.txt") && s.status().contains(Status::WT_DELETED));
    assert!(deleted, "workdir git should report fileA.txt as deleted");

    assert_eq!(world.store_tip("my-projectB", "main"), Some(tip_b_before));

    // The summary bullets name only the changed workdir.
    let summary = world.meta_head_message();
    assert!(summary.contains("Meta wmem-commit of workdir commits"));
    assert!(summary.contains("- `my-projectA` `main`"));
    assert!(!summary.contains("- `my-projectB`"));
}

#[test]
fn back_to_back_commits_are_idempotent() {
    let world = WmemWorld::new();
    let project_a = world.add_project("my-projectA");
    world.add_project("my-projectB");
    world.configure_paths(&["../my-projectA", "../my-projectB"]);
    world.run_commit().success();
    fs::write(project_a.join("X.txt"), "untracked\n").expect("write");
    world.run_commit().success();

    let tip_a = world.store_tip("my-projectA", "main");
    let tip_b = world.store_tip("my-projectB", "main");
    let head_tracker = world
        .bare_repo("my-projectA")
        .refname_to_id("refs/heads/wmem-br/head")
        .ok();
    let meta_commits = world.meta_commit_count();

    // Nothing changed on disk: the next run must be a no-op everywhere.
    world.run_commit().success();

    assert_eq!(world.store_tip("my-projectA", "main"), tip_a);
    assert_eq!(world.store_tip("my-projectB", "main"), tip_b);
    assert_eq!(
        world
            .bare_repo("my-projectA")
            .refname_to_id("refs/heads/wmem-br/head")
            .ok(),
        head_tracker
    );
    assert_eq!(world.meta_commit_count(), meta_commits);
}

#[test]
fn every_commit_of_one_invocation_shares_the_uid() {
    let world = WmemWorld::new();
    let project_a = world.add_project("my-projectA");
    world.configure_paths(&["../my-projectA"]);
    world.run_commit().success();

    fs::write(project_a.join("X.txt"), "untracked\n").expect("write");
    world.run_commit().success();

    let summary_uid = uid_of(&world.meta_head_message());
    let snapshot_uid = uid_of(&world.tip_message("my-projectA", "main"));
    assert_eq!(summary_uid, snapshot_uid);

    // The uid has the documented shape: wmem-YYMMDD-HHMMSS-XXXXXXXX.
    assert_eq!(summary_uid.len(), 27);
    assert!(summary_uid.starts_with("wmem-"));
    let fields: Vec<&str> = summary_uid["wmem-".len()..].split('-').collect();
    assert_eq!(fields.len(), 3);
    assert!(fields[0].len() == 6 && fields[0].bytes().all(|b| b.is_ascii_digit()));
    assert!(fields[1].len() == 6 && fields[1].bytes().all(|b| b.is_ascii_digit()));
    assert!(fields[2].len() == 8 && fields[2].bytes().all(|b| b.is_ascii_alphanumeric()));
}

#[test]
fn successive_invocations_mint_different_uids() {
    let world = WmemWorld::new();
    let project_a = world.add_project("my-projectA");
    world.configure_paths(&["../my-projectA"]);

    fs::write(project_a.join("one.txt"), "1\n").expect("write");
    world.run_commit().success();
    let first = uid_of(&world.meta_head_message());

    fs::write(project_a.join("two.txt"), "2\n").expect("write");
    world.run_commit().success();
    let second = uid_of(&world.meta_head_message());

    assert_ne!(first, second);
}

#[test]
fn workdir_map_is_append_only() {
    let world = WmemWorld::new();
    let project_a = world.add_project("my-projectA");
    world.add_project("my-projectB");
    world.configure_paths(&["../my-projectA", "../my-projectB"]);
    world.run_commit().success();

    // Drop projectB from the configuration; its map entry must survive.
    world.configure_paths(&["../my-projectA"]);
    fs::write(project_a.join("more.txt"), "more\n").expect("write");
    world.run_commit().success();

    assert_eq!(
        world.workdir_map(),
        serde_json::json!({
            "my-projectA": "../my-projectA",
            "my-projectB": "../my-projectB",
        })
    );
}

#[test]
fn log_renders_recorded_invocations() {
    let world = WmemWorld::new();
    let project_a = world.add_project("my-projectA");
    world.configure_paths(&["../my-projectA"]);
    fs::write(project_a.join("X.txt"), "x\n").expect("write");
    world.run_commit().success();

    let uid = uid_of(&world.meta_head_message());
    wmem_cmd()
        .current_dir(&world.meta_dir)
        .arg("log")
        .assert()
        .success()
        .stdout(predicate::str::contains(uid))
        .stdout(predicate::str::contains("../my-projectA"));
}

#[test]
fn msg_prefix_leads_every_message() {
    let world = WmemWorld::new();
    let project_a = world.add_project("my-projectA");
    world.configure_paths(&["../my-projectA"]);
    fs::write(world.meta_dir.join("md/commit/msg-prefix"), "daily snapshot\n").expect("prefix");

    fs::write(project_a.join("X.txt"), "x\n").expect("write");
    world.run_commit().success();

    let summary = world.meta_head_message();
    assert!(summary.starts_with("daily snapshot\n\nwmem-uid: wmem-"));
    let snapshot = world.tip_message("my-projectA", "main");
    assert!(snapshot.starts_with("daily snapshot\n\nwmem-uid: wmem-"));
}
