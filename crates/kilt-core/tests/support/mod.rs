//! Shared test fixtures: throwaway git repositories driven through git2.

#![allow(dead_code)]

use std::fs;
use std::path::Path;

use git2::Repository;
use tempfile::TempDir;

/// A temporary git repository with `main` checked out and a test identity
/// configured.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let repo = Repository::init(dir.path()).expect("init repo");
        repo.set_head("refs/heads/main").expect("point head at main");
        let mut config = repo.config().expect("open config");
        config.set_str("user.name", "Kilt Tester").expect("set user.name");
        config
            .set_str("user.email", "kilt@example.invalid")
            .expect("set user.email");
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn git(&self) -> Repository {
        Repository::open(self.path()).expect("reopen repo")
    }

    /// Write `content` to `name`, stage it, and commit on `HEAD`.
    pub fn commit_file(&self, name: &str, content: &str, message: &str) -> String {
        let repo = self.git();
        fs::write(self.path().join(name), content).expect("write file");
        let mut index = repo.index().expect("open index");
        index.add_path(Path::new(name)).expect("stage file");
        index.write().expect("write index");
        let tree_id = index.write_tree().expect("write tree");
        let tree = repo.find_tree(tree_id).expect("find tree");
        let sig = repo.signature().expect("signature");
        let parents = match repo.head() {
            Ok(head) => vec![head.peel_to_commit().expect("peel head")],
            Err(_) => Vec::new(),
        };
        let parent_refs: Vec<&git2::Commit<'_>> = parents.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)
            .expect("commit")
            .to_string()
    }

    /// Create a merge commit on `HEAD` with the given extra parent, keeping
    /// the current tree.
    pub fn merge_commit(&self, message: &str, extra_parent: &str) -> String {
        let repo = self.git();
        let head = repo.head().expect("head").peel_to_commit().expect("peel");
        let extra = repo
            .find_commit(git2::Oid::from_str(extra_parent).expect("oid"))
            .expect("find extra parent");
        let tree = head.tree().expect("head tree");
        let sig = repo.signature().expect("signature");
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[&head, &extra])
            .expect("merge commit")
            .to_string()
    }

    pub fn head_id(&self) -> String {
        self.git()
            .head()
            .expect("head")
            .peel_to_commit()
            .expect("peel head")
            .id()
            .to_string()
    }

    pub fn head_is_detached(&self) -> bool {
        self.git().head_detached().expect("check detached")
    }

    pub fn detach_head(&self) {
        let repo = self.git();
        let oid = repo
            .head()
            .expect("head")
            .peel_to_commit()
            .expect("peel head")
            .id();
        repo.set_head_detached(oid).expect("detach head");
    }

    pub fn branch_tip(&self, name: &str) -> String {
        self.git()
            .find_branch(name, git2::BranchType::Local)
            .expect("find branch")
            .get()
            .peel_to_commit()
            .expect("peel branch")
            .id()
            .to_string()
    }

    pub fn current_branch(&self) -> Option<String> {
        let repo = self.git();
        if repo.head_detached().expect("check detached") {
            return None;
        }
        let head = repo.head().expect("head");
        let name = head.shorthand().map(str::to_string);
        name
    }

    pub fn ref_exists(&self, name: &str) -> bool {
        self.git().find_reference(name).is_ok()
    }

    pub fn read_file(&self, name: &str) -> String {
        fs::read_to_string(self.path().join(name)).expect("read file")
    }

    /// Resolve an in-progress cherry-pick conflict the way a user would:
    /// write the resolved content, stage it, commit it, and clear the
    /// cherry-pick state.
    pub fn resolve_conflict(&self, name: &str, content: &str, message: &str) {
        let repo = self.git();
        fs::write(self.path().join(name), content).expect("write resolution");
        let mut index = repo.index().expect("open index");
        index.add_path(Path::new(name)).expect("stage resolution");
        index.write().expect("write index");
        let tree_id = index.write_tree().expect("write resolved tree");
        let tree = repo.find_tree(tree_id).expect("find resolved tree");
        let head = repo.head().expect("head").peel_to_commit().expect("peel head");
        let sig = repo.signature().expect("signature");
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[&head])
            .expect("commit resolution");
        repo.cleanup_state().expect("cleanup state");
    }

    /// Throw away an in-progress cherry-pick: hard reset to `HEAD` and clear
    /// the repository state.
    pub fn reset_hard(&self) {
        let repo = self.git();
        let head = repo.head().expect("head").peel_to_commit().expect("peel head");
        repo.reset(head.as_object(), git2::ResetType::Hard, None)
            .expect("hard reset");
        repo.cleanup_state().expect("cleanup state");
    }
}
