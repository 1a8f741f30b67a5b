//! Snapshot tree content: ignore rules, gitlinks, and object validity.

use std::fs;
use std::path::Path;

use crate::fixtures::{WmemWorld, git};

#[test]
fn gitignored_directories_stay_out_of_snapshots() {
    let world = WmemWorld::new();
    let project_a = world.add_project("my-projectA");
    world.configure_paths(&["../my-projectA"]);
    world.run_commit().success();

    fs::write(project_a.join(".gitignore"), "node_modules/\n").expect("gitignore");
    fs::create_dir_all(project_a.join("node_modules/dep")).expect("mkdir");
    fs::write(project_a.join("node_modules/dep/index.js"), "x\n").expect("dep");
    fs::write(project_a.join("kept.txt"), "kept\n").expect("kept");
    world.run_commit().success();

    let repo = world.bare_repo("my-projectA");
    let tip = world.store_tip("my-projectA", "main").expect("tip");
    let tree = repo.find_commit(tip).expect("tip").tree().expect("tree");

    assert!(tree.get_name("node_modules").is_none());
    assert!(tree.get_name("kept.txt").is_some());
    // Dotfiles other than .git are snapshotted.
    assert!(tree.get_name(".gitignore").is_some());
}

#[test]
fn nested_repositories_become_gitlinks() {
    let world = WmemWorld::new();
    let project_a = world.add_project("my-projectA");
    world.configure_paths(&["../my-projectA"]);
    world.run_commit().success();

    let nested = project_a.join("vendor").join("libx");
    fs::create_dir_all(&nested).expect("mkdir");
    git::init_repo(&nested);
    fs::write(nested.join("lib.rs"), "pub fn x() {}\n").expect("lib");
    let nested_head = git::commit_all(&nested, "nested initial");

    fs::write(project_a.join("marker.txt"), "m\n").expect("marker");
    world.run_commit().success();

    let repo = world.bare_repo("my-projectA");
    let tip = world.store_tip("my-projectA", "main").expect("tip");
    let tree = repo.find_commit(tip).expect("tip").tree().expect("tree");

    let entry = tree
        .get_path(Path::new("vendor/libx"))
        .expect("gitlink entry");
    assert_eq!(entry.filemode(), 0o160000);
    assert_eq!(entry.id(), nested_head);
    assert!(tree.get_path(Path::new("vendor/libx/lib.rs")).is_err());
}

#[test]
fn stores_survive_git_fsck() {
    // Relies on a system git; skip quietly where none is installed.
    if std::process::Command::new("git")
        .arg("--version")
        .output()
        .is_err()
    {
        return;
    }

    let world = WmemWorld::new();
    let project_a = world.add_project("my-projectA");
    world.configure_paths(&["../my-projectA"]);
    world.run_commit().success();
    fs::write(project_a.join("X.txt"), "x\n").expect("write");
    fs::create_dir_all(project_a.join("sub")).expect("sub");
    fs::write(project_a.join("sub/Y.txt"), "y\n").expect("write");
    world.run_commit().success();

    let output = std::process::Command::new("git")
        .args(["fsck", "--full", "--strict"])
        .current_dir(world.meta_dir.join("repos/my-projectA.git"))
        .output()
        .expect("run git fsck");
    assert!(
        output.status.success(),
        "git fsck failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}
