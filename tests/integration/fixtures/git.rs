use std::path::Path;

use git2::{Commit, IndexAddOption, Oid, Repository, RepositoryInitOptions, Signature};

pub fn init_repo(path: &Path) -> Repository {
    let mut opts = RepositoryInitOptions::new();
    opts.initial_head("main");
    let repo = Repository::init_opts(path, &opts).expect("git init failed");
    configure_test_repo(&repo);
    repo
}

fn configure_test_repo(repo: &Repository) {
    let mut cfg = repo.config().expect("open repo config failed");
    cfg.set_str("user.name", "Test").expect("set user.name failed");
    cfg.set_str("user.email", "test@test.com")
        .expect("set user.email failed");
}

/// Stage everything and commit, like `git add -A && git commit`.
pub fn commit_all(path: &Path, message: &str) -> Oid {
    let repo = Repository::open(path).expect("open repo failed");
    let mut index = repo.index().expect("repo index");
    index
        .add_all(["*"], IndexAddOption::DEFAULT, None)
        .expect("index add");
    index.write().expect("index write");
    let tree_id = index.write_tree().expect("write tree");
    let tree = repo.find_tree(tree_id).expect("find tree");
    let sig = Signature::now("Test", "test@test.com").expect("signature");
    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<&Commit> = parent.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
        .expect("commit failed")
}

pub fn create_branch_and_switch(path: &Path, name: &str) {
    let repo = Repository::open(path).expect("open repo failed");
    let head = repo.head().expect("head").peel_to_commit().expect("commit");
    repo.branch(name, &head, false).expect("create branch");
    repo.set_head(&format!("refs/heads/{name}")).expect("set head");
}

pub fn head_oid(path: &Path) -> Oid {
    let repo = Repository::open(path).expect("open repo failed");
    repo.head()
        .expect("head")
        .peel_to_commit()
        .expect("commit")
        .id()
}
