//! Repository facade.
//!
//! A narrow capability surface over the backing git repository: ref
//! management under `refs/kilt/`, safe checkouts, cherry-picks, metadata
//! commits, and the patchset cache walk. Everything the rework engine does
//! to the repository goes through this module, and every libgit2 failure is
//! translated into an [`Error`] kind here; the rest of the crate never sees
//! a git2 error code.
//!
//! # Reserved refs
//!
//! - `refs/kilt/<branch>/base`: base anchor for a kilt branch.
//! - `refs/kilt/rework/head`: direct ref to the current rework tip.
//! - `refs/kilt/rework/branch`: symbolic ref naming the branch under
//!   rework. Its existence is what "a rework is in progress" means.

pub mod metadata;
pub mod walk;

pub use walk::PatchsetCache;

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use git2::build::CheckoutBuilder;
use git2::{BranchType, ErrorCode, ObjectType, Repository};
use tracing::info;

use crate::error::{Error, Result};
use crate::patchset::Patchset;

const REF_PATH: &str = "refs/kilt";

/// Symbolic ref naming the branch a rework is staged against.
pub const REWORK_BRANCH_REF: &str = "rework/branch";
/// Direct ref recording the rework tip.
pub const REWORK_HEAD_REF: &str = "rework/head";

fn kilt_ref(name: &str) -> String {
    format!("{REF_PATH}/{name}")
}

fn base_ref(branch: &str) -> String {
    format!("{REF_PATH}/{branch}/base")
}

/// Handle to an opened repository with kilt state resolved.
pub struct Repo {
    git: Repository,
    base: String,
    branch: String,
    head: String,
    cache: RefCell<Option<Rc<PatchsetCache>>>,
}

impl std::fmt::Debug for Repo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repo")
            .field("base", &self.base)
            .field("branch", &self.branch)
            .field("head", &self.head)
            .finish_non_exhaustive()
    }
}

impl Repo {
    fn new(git: Repository, base: String, branch: String, head: String) -> Self {
        Self {
            git,
            base,
            branch,
            head,
            cache: RefCell::new(None),
        }
    }

    /// Open the repository at the current working directory and resolve the
    /// kilt branch, base, and rework state.
    pub fn open() -> Result<Self> {
        Self::open_at(".")
    }

    /// Open the repository containing `path`.
    pub fn open_at(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let git = Repository::discover(path)
            .map_err(|err| Error::backing("failed to open repo", err))?;
        let branch = find_kilt_branch(&git)?;
        let head = if check_rework(&git)? {
            kilt_ref(REWORK_HEAD_REF)
        } else {
            branch.clone()
        };
        let base = {
            let base_ref_path = base_ref(&branch);
            let reference = git.find_reference(&base_ref_path).map_err(|err| {
                Error::backing(format!("failed to lookup base {base_ref_path:?}"), err)
            })?;
            let oid = reference
                .target()
                .ok_or_else(|| Error::backing(
                    format!("failed to resolve base {base_ref_path:?}"),
                    git2::Error::from_str("base ref is not direct"),
                ))?;
            oid.to_string()
        };
        Ok(Self::new(git, base, branch, head))
    }

    /// Initialize kilt on the current branch, anchoring the base at
    /// `base_revspec`.
    pub fn init(base_revspec: &str) -> Result<Self> {
        Self::init_at(".", base_revspec)
    }

    /// Initialize kilt in the repository containing `path`.
    pub fn init_at(path: impl AsRef<std::path::Path>, base_revspec: &str) -> Result<Self> {
        let git = Repository::discover(path)
            .map_err(|err| Error::backing("failed to open repo", err))?;
        let branch = find_kilt_branch(&git)?;
        let base_id = {
            let base = git.revparse_single(base_revspec).map_err(|err| {
                Error::backing(format!("failed to parse base {base_revspec:?}"), err)
            })?;
            let base_commit = base
                .peel_to_commit()
                .map_err(|err| Error::backing("base does not name a commit", err))?;
            let base_ref_path = base_ref(&branch);
            git.reference(
                &base_ref_path,
                base_commit.id(),
                false,
                &format!("Creating kilt base reference {base_ref_path}"),
            )
            .map_err(|err| {
                Error::backing(format!("failed to create ref {base_ref_path:?}"), err)
            })?;
            base_commit.id().to_string()
        };
        let head = branch.clone();
        Ok(Self::new(git, base_id, branch, head))
    }

    /// The resolved base commit id.
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    /// The kilt branch name.
    #[must_use]
    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// The working head: the branch name, or the rework head ref while a
    /// rework is in progress.
    #[must_use]
    pub fn head_name(&self) -> &str {
        &self.head
    }

    pub(crate) fn git(&self) -> &Repository {
        &self.git
    }

    // -----------------------------------------------------------------------
    // Kilt refs
    // -----------------------------------------------------------------------

    /// Resolve `refs/kilt/<name>` to its final ref name, or `None` when the
    /// ref does not exist.
    pub fn lookup_kilt_ref(&self, name: &str) -> Result<Option<String>> {
        let path = kilt_ref(name);
        let reference = match self.git.find_reference(&path) {
            Ok(reference) => reference,
            Err(err) if err.code() == ErrorCode::NotFound => return Ok(None),
            Err(err) => return Err(Error::backing(format!("failed to lookup ref {name:?}"), err)),
        };
        let resolved = reference
            .resolve()
            .map_err(|err| Error::backing("failed to resolve ref", err))?;
        Ok(resolved.name().map(str::to_string))
    }

    /// Delete `refs/kilt/<name>`.
    pub fn delete_kilt_ref(&self, name: &str) -> Result<()> {
        let path = kilt_ref(name);
        let mut reference = self
            .git
            .find_reference(&path)
            .map_err(|err| Error::backing(format!("failed to lookup ref {name:?}"), err))?;
        reference
            .delete()
            .map_err(|err| Error::backing(format!("failed to delete ref {name:?}"), err))
    }

    /// Point `refs/kilt/<name>` at the current head commit, overwriting any
    /// previous target.
    pub fn write_ref_head(&self, name: &str) -> Result<()> {
        let oid = self.current_head_commit()?.id();
        let path = kilt_ref(name);
        self.git
            .reference(&path, oid, true, "Updating kilt rework reference")
            .map_err(|err| Error::backing(format!("failed to create ref {path:?}"), err))?;
        Ok(())
    }

    /// Create symbolic `refs/kilt/<name>` pointing at the current branch.
    pub fn write_symbolic_ref_head(&self, name: &str) -> Result<()> {
        if self
            .git
            .head_detached()
            .map_err(|err| Error::backing("failed while checking detached head", err))?
        {
            return Err(Error::DetachedHead);
        }
        let head = self
            .git
            .head()
            .map_err(|err| Error::backing("failed to lookup head", err))?;
        let target = ref_name(&head)?;
        self.write_symbolic_ref(name, &target)
    }

    /// Create symbolic `refs/kilt/<name>` pointing at `refs/heads/<branch>`.
    pub fn write_symbolic_ref_branch(&self, name: &str, branch: &str) -> Result<()> {
        self.write_symbolic_ref(name, &format!("refs/heads/{branch}"))
    }

    fn write_symbolic_ref(&self, name: &str, target: &str) -> Result<()> {
        let path = kilt_ref(name);
        self.git
            .reference_symbolic(&path, target, false, "Updating kilt rework reference")
            .map_err(|err| Error::backing(format!("failed to create ref {path:?}"), err))?;
        Ok(())
    }

    /// Make `HEAD` point at `refs/kilt/<name>`. For non-branch refs this
    /// detaches at the referenced commit.
    pub fn set_head(&self, name: &str) -> Result<()> {
        let path = kilt_ref(name);
        self.git
            .set_head(&path)
            .map_err(|err| Error::backing(format!("failed to set head to {path:?}"), err))
    }

    /// Resolve symbolic `refs/kilt/<name>` and move its target branch to the
    /// current head commit.
    pub fn set_indirect_branch_to_head(&self, name: &str) -> Result<()> {
        let path = kilt_ref(name);
        let reference = self
            .git
            .find_reference(&path)
            .map_err(|err| Error::backing(format!("failed to lookup ref {name:?}"), err))?;
        let mut resolved = reference
            .resolve()
            .map_err(|err| Error::backing("failed to resolve ref", err))?;
        let oid = self.current_head_commit()?.id();
        resolved
            .set_target(oid, "Finishing rework")
            .map_err(|err| Error::backing("failed to move branch to rework head", err))?;
        Ok(())
    }

    /// Point `refs/heads/<branch>` at the current head commit, creating the
    /// branch if needed.
    pub fn set_branch_to_head(&self, branch: &str) -> Result<()> {
        let oid = self.current_head_commit()?.id();
        let path = format!("refs/heads/{branch}");
        self.git
            .reference(&path, oid, true, "Finishing kilt build")
            .map_err(|err| Error::backing(format!("failed to update branch {branch:?}"), err))?;
        Ok(())
    }

    /// Whether a rework is in progress (either rework ref exists).
    pub fn rework_in_progress(&self) -> Result<bool> {
        check_rework(&self.git)
    }

    /// Anchor `refs/kilt/<branch>/base` at the commit `base_revspec` names,
    /// replacing any previous anchor. Used when a build stages a branch
    /// that has no kilt base yet.
    pub fn write_base_ref(&self, branch: &str, base_revspec: &str) -> Result<()> {
        let base = self.git.revparse_single(base_revspec).map_err(|err| {
            Error::backing(format!("failed to parse base {base_revspec:?}"), err)
        })?;
        let commit = base
            .peel_to_commit()
            .map_err(|err| Error::backing("base does not name a commit", err))?;
        let path = base_ref(branch);
        self.git
            .reference(&path, commit.id(), true, "Updating kilt base reference")
            .map_err(|err| Error::backing(format!("failed to create ref {path:?}"), err))?;
        Ok(())
    }

    /// The per-repo state directory, inside the git control directory.
    #[must_use]
    pub fn kilt_directory(&self) -> PathBuf {
        self.git.path().join("kilt")
    }

    /// Directory holding rework queue state files.
    #[must_use]
    pub fn rework_state_dir(&self) -> PathBuf {
        self.kilt_directory().join("rework")
    }

    /// The worktree root; falls back to the current directory for bare
    /// repositories. `dependencies.json` is resolved against this.
    #[must_use]
    pub fn workdir(&self) -> PathBuf {
        self.git
            .workdir()
            .map_or_else(|| PathBuf::from("."), std::path::Path::to_path_buf)
    }

    // -----------------------------------------------------------------------
    // Checkouts
    // -----------------------------------------------------------------------

    /// Check out `revspec` with the safe strategy and detach `HEAD` at it.
    pub fn checkout_rev(&self, revspec: &str) -> Result<()> {
        let object = self
            .git
            .revparse_single(revspec)
            .map_err(|err| Error::backing(format!("failed to parse rev {revspec:?}"), err))?;
        let commit = object
            .peel_to_commit()
            .map_err(|err| Error::backing(format!("rev {revspec:?} is not a commit"), err))?;
        self.checkout_tree_of(commit.as_object())?;
        self.git
            .set_head_detached(commit.id())
            .map_err(|err| Error::backing("failed to detach head", err))?;
        self.cleanup_state()
    }

    /// Check out the kilt base commit.
    pub fn checkout_base(&self) -> Result<()> {
        let base = self.base.clone();
        self.checkout_rev(&base)
    }

    /// Check out the last patch of the named patchset, or its metadata
    /// commit when it has no patches.
    pub fn checkout_patchset(&self, name: &str) -> Result<()> {
        let cache = self.patchset_cache()?;
        let ps = cache
            .get(name)
            .ok_or_else(|| Error::PatchsetNotFound(name.to_string()))?;
        let id = ps
            .patches()
            .last()
            .map(String::as_str)
            .or(ps.metadata_commit())
            .ok_or_else(|| Error::EmptyPatchset(name.to_string()))?
            .to_string();
        self.checkout_rev(&id)
    }

    /// Check out the named local branch and attach `HEAD` to it.
    pub fn checkout_branch(&self, name: &str) -> Result<()> {
        let branch = self
            .git
            .find_branch(name, BranchType::Local)
            .map_err(|err| Error::backing(format!("failed to lookup branch {name:?}"), err))?;
        let reference = branch.into_reference();
        let target = ref_name(&reference)?;
        let tree = reference
            .peel(ObjectType::Tree)
            .map_err(|err| Error::backing("failed to peel branch to tree", err))?;
        self.checkout_tree_of(&tree)?;
        self.git
            .set_head(&target)
            .map_err(|err| Error::backing(format!("failed to set head to {target:?}"), err))?;
        self.cleanup_state()
    }

    /// Resolve symbolic `refs/kilt/<name>` and check out the branch it names.
    pub fn checkout_indirect_branch(&self, name: &str) -> Result<()> {
        let path = kilt_ref(name);
        let reference = self
            .git
            .find_reference(&path)
            .map_err(|err| Error::backing(format!("failed to lookup ref {name:?}"), err))?;
        let resolved = reference
            .resolve()
            .map_err(|err| Error::backing("failed to resolve ref", err))?;
        let target = ref_name(&resolved)?;
        let tree = resolved
            .peel(ObjectType::Tree)
            .map_err(|err| Error::backing("failed to peel ref to tree", err))?;
        self.checkout_tree_of(&tree)?;
        self.git
            .set_head(&target)
            .map_err(|err| Error::backing(format!("failed to set head to {target:?}"), err))?;
        self.cleanup_state()
    }

    fn checkout_tree_of(&self, object: &git2::Object<'_>) -> Result<()> {
        let mut options = CheckoutBuilder::new();
        options.safe();
        self.git
            .checkout_tree(object, Some(&mut options))
            .map_err(|err| Error::backing("checkout refused", err))
    }

    fn cleanup_state(&self) -> Result<()> {
        self.git
            .cleanup_state()
            .map_err(|err| Error::backing("failed to clean up repository state", err))
    }

    // -----------------------------------------------------------------------
    // Commits
    // -----------------------------------------------------------------------

    /// Cherry-pick `id` onto the current head.
    ///
    /// On index conflicts returns [`Error::UserActionRequired`] and leaves
    /// the conflicted index and working tree for the user; otherwise writes
    /// a new commit preserving the original author, committer, and message.
    pub fn cherry_pick_to_head(&self, id: &str) -> Result<()> {
        let object = self
            .git
            .revparse_single(id)
            .map_err(|err| Error::backing(format!("failed to parse rev {id:?}"), err))?;
        let commit = object
            .peel_to_commit()
            .map_err(|err| Error::backing(format!("rev {id:?} is not a commit"), err))?;

        let mut options = git2::CherrypickOptions::new();
        self.git
            .cherrypick(&commit, Some(&mut options))
            .map_err(|err| Error::backing(format!("failed to cherry-pick {id}"), err))?;

        let mut index = self
            .git
            .index()
            .map_err(|err| Error::backing("failed to open index", err))?;
        if index.has_conflicts() {
            return Err(Error::UserActionRequired(id.to_string()));
        }

        let tree_oid = index
            .write_tree()
            .map_err(|err| Error::backing("failed to write index tree", err))?;
        let tree = self
            .git
            .find_tree(tree_oid)
            .map_err(|err| Error::backing("failed to lookup written tree", err))?;
        let parent = self.current_head_commit()?;
        self.git
            .commit(
                Some("HEAD"),
                &commit.author(),
                &commit.committer(),
                commit.message().unwrap_or_default(),
                &tree,
                &[&parent],
            )
            .map_err(|err| Error::backing("failed to create commit", err))?;
        self.cleanup_state()
    }

    /// Record the patchset as a metadata commit on the current head.
    pub fn add_patchset(&self, ps: &Patchset) -> Result<()> {
        self.create_metadata_commit(ps)
    }

    /// Parse the metadata commit `id`, bump its version, and write the new
    /// metadata commit on the current head.
    pub fn update_metadata_for_commit(&self, id: &str) -> Result<()> {
        let object = self
            .git
            .revparse_single(id)
            .map_err(|err| Error::backing(format!("failed to parse rev {id:?}"), err))?;
        let commit = object
            .peel_to_commit()
            .map_err(|err| Error::backing(format!("rev {id:?} is not a commit"), err))?;
        let ps = metadata::patchset_from_metadata(commit.message().unwrap_or_default())?;
        let bumped = Patchset::load(ps.name(), ps.uuid(), ps.version().successor());
        self.create_metadata_commit(&bumped)
    }

    fn create_metadata_commit(&self, ps: &Patchset) -> Result<()> {
        let head = self.current_head_commit()?;
        let signature = self
            .git
            .signature()
            .map_err(|err| Error::backing("failed to get default signature", err))?;
        let tree = head
            .tree()
            .map_err(|err| Error::backing("failed to get commit tree", err))?;
        let message = metadata::metadata_message(ps);
        info!(patchset = %ps.name(), version = %ps.version(), "writing metadata commit");
        self.git
            .commit(Some("HEAD"), &signature, &signature, &message, &tree, &[&head])
            .map_err(|err| Error::backing("failed to create metadata commit", err))?;
        Ok(())
    }

    /// Short id plus summary, for user-facing progress output.
    pub fn describe_commit(&self, id: &str) -> Result<String> {
        let object = self
            .git
            .revparse_single(id)
            .map_err(|err| Error::backing(format!("failed to parse rev {id:?}"), err))?;
        let commit = object
            .peel_to_commit()
            .map_err(|err| Error::backing(format!("rev {id:?} is not a commit"), err))?;
        let short = commit
            .as_object()
            .short_id()
            .map_err(|err| Error::backing("failed to abbreviate commit id", err))?;
        let short = short.as_str().unwrap_or(id);
        Ok(format!("{short} {}", commit.summary().unwrap_or_default()))
    }

    /// Whether the tree behind `refs/kilt/<name>` equals the tree at `HEAD`.
    pub fn compare_tree_to_head(&self, name: &str) -> Result<bool> {
        let ref_tree = self.tree_from_ref(&kilt_ref(name))?;
        let head_tree = self.tree_from_ref("HEAD")?;
        Ok(ref_tree == head_tree)
    }

    fn tree_from_ref(&self, name: &str) -> Result<git2::Oid> {
        let reference = self
            .git
            .find_reference(name)
            .map_err(|err| Error::backing(format!("failed to lookup ref {name:?}"), err))?;
        let resolved = reference
            .resolve()
            .map_err(|err| Error::backing("failed to resolve ref", err))?;
        let tree = resolved
            .peel(ObjectType::Tree)
            .map_err(|err| Error::backing("failed to peel ref to tree", err))?;
        Ok(tree.id())
    }

    // -----------------------------------------------------------------------
    // Patchsets
    // -----------------------------------------------------------------------

    /// The patchset cache for this handle. Built by walking the history on
    /// first call; later calls return the same snapshot.
    pub fn patchset_cache(&self) -> Result<Rc<PatchsetCache>> {
        if let Some(cache) = self.cache.borrow().as_ref() {
            return Ok(Rc::clone(cache));
        }
        let built = Rc::new(walk::build_cache(self)?);
        *self.cache.borrow_mut() = Some(Rc::clone(&built));
        Ok(built)
    }

    /// Find a patchset by name in the cache.
    pub fn find_patchset(&self, name: &str) -> Result<Option<Patchset>> {
        Ok(self.patchset_cache()?.get(name).cloned())
    }

    /// The commit `HEAD` points at right now. This is what ref updates and
    /// new commits are anchored to; during a rework it tracks the detached
    /// head as operations move it.
    fn current_head_commit(&self) -> Result<git2::Commit<'_>> {
        let head = self
            .git
            .head()
            .map_err(|err| Error::backing("failed to lookup head", err))?;
        head.peel_to_commit()
            .map_err(|err| Error::backing("failed to peel head to commit", err))
    }

    /// The commit the resolved working head names: the branch tip, or the
    /// staged rework tip while a rework is in progress. This is where the
    /// patchset walk starts, and it does not move as rework operations
    /// advance the detached `HEAD`.
    pub(crate) fn walk_head_commit(&self) -> Result<git2::Commit<'_>> {
        let reference = match self.git.find_branch(&self.head, BranchType::Local) {
            Ok(branch) => branch.into_reference(),
            Err(err) if err.code() == ErrorCode::NotFound => self
                .git
                .find_reference(&self.head)
                .map_err(|err| {
                    Error::backing(format!("failed to lookup head {:?}", self.head), err)
                })?,
            Err(err) => {
                return Err(Error::backing(
                    format!("failed to lookup head {:?}", self.head),
                    err,
                ))
            }
        };
        reference
            .peel_to_commit()
            .map_err(|err| Error::backing("failed to peel head to commit", err))
    }
}

fn ref_name(reference: &git2::Reference<'_>) -> Result<String> {
    reference.name().map(str::to_string).ok_or_else(|| {
        Error::backing(
            "failed to read ref name",
            git2::Error::from_str("ref name is not valid utf-8"),
        )
    })
}

/// Discover which branch kilt operates on.
///
/// On an attached `HEAD` this is the checked-out branch. On a detached
/// `HEAD` the staged branch is recovered from `refs/kilt/rework/branch` when
/// a rework is in progress; detached without that ref is an error.
fn find_kilt_branch(git: &Repository) -> Result<String> {
    let detached = git
        .head_detached()
        .map_err(|err| Error::backing("failed while checking detached head", err))?;
    if !detached {
        let head = git
            .head()
            .map_err(|err| Error::backing("failed to read head", err))?;
        return shorthand(&head);
    }
    let reference = match git.find_reference(&kilt_ref(REWORK_BRANCH_REF)) {
        Ok(reference) => reference,
        Err(err) if err.code() == ErrorCode::NotFound => return Err(Error::DetachedHead),
        Err(err) => return Err(Error::backing("failed while checking rework branch", err)),
    };
    // Read the symbolic target directly: the named branch may not exist yet
    // while a build is staging it.
    if let Some(target) = reference.symbolic_target() {
        let name = target.strip_prefix("refs/heads/").unwrap_or(target);
        return Ok(name.to_string());
    }
    let resolved = reference
        .resolve()
        .map_err(|err| Error::backing("failed to resolve reference", err))?;
    shorthand(&resolved)
}

fn shorthand(reference: &git2::Reference<'_>) -> Result<String> {
    reference.shorthand().map(str::to_string).ok_or_else(|| {
        Error::backing(
            "failed to get branch name",
            git2::Error::from_str("branch name is not valid utf-8"),
        )
    })
}

/// A rework is in progress when either rework ref exists. The symbolic
/// branch ref is not resolved here: during a build it may name a branch
/// that `Finish` has not created yet.
fn check_rework(git: &Repository) -> Result<bool> {
    for name in [REWORK_BRANCH_REF, REWORK_HEAD_REF] {
        match git.find_reference(&kilt_ref(name)) {
            Ok(_) => return Ok(true),
            Err(err) if err.code() == ErrorCode::NotFound => {}
            Err(err) => return Err(Error::backing("failed to lookup rework ref", err)),
        }
    }
    Ok(false)
}
