//! Rework controller.
//!
//! A rework rebuilds the kilt branch by reapplying patchsets in order on top
//! of the base, folding each patchset's floating patches back into place.
//! Every user command is expressed as a queue of operations; the executor
//! runs them one at a time, bracketing each resumable operation with state
//! file writes so an interrupted run (most commonly a cherry-pick conflict)
//! can be continued or skipped.
//!
//! Rework lifetime, as refs and files:
//!
//! - `refs/kilt/rework/head` tracks the tip being built, and `HEAD` detaches
//!   onto it for the duration;
//! - symbolic `refs/kilt/rework/branch` remembers the branch being reworked;
//!   its existence is the "rework in progress" flag;
//! - `<git>/kilt/rework/queue` (+ `-current`) persist the outer operation
//!   queue, `reworkQueue` (+ `-current`) the per-patchset one.
//!
//! Finishing validates that the rebuilt tree is identical to the original
//! branch tip, moves the branch there, and deletes the refs and state.

use std::collections::HashSet;
use std::rc::Rc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::graph::{DepGraph, DEPENDENCIES_FILE};
use crate::patchset::Patchset;
use crate::queue::{Executor, Operation, Queue};
use crate::repo::{PatchsetCache, Repo, REWORK_BRANCH_REF, REWORK_HEAD_REF};
use crate::state::StateFile;

const OUTER_STEM: &str = "queue";
const NESTED_STEM: &str = "reworkQueue";

// ---------------------------------------------------------------------------
// Target selection
// ---------------------------------------------------------------------------

/// Which patchsets a rework (or build) should act on. Selectors compose as
/// a list; a patchset is selected when any selector matches it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Patchsets with at least one floating patch.
    Floating,
    /// Every patchset.
    All,
    /// The named patchset.
    PatchsetByName(String),
    /// Nothing.
    None,
}

impl Target {
    #[must_use]
    pub fn matches(&self, ps: &Patchset) -> bool {
        match self {
            Self::Floating => !ps.floating_patches().is_empty(),
            Self::All => true,
            Self::PatchsetByName(name) => name == ps.name(),
            Self::None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// A fully prepared rework command: an operation queue bound to a repository
/// plus (for resumable commands) the state files that persist it.
pub struct Command {
    repo: Rc<Repo>,
    executor: Executor,
    state: Option<StateFile>,
}

impl Command {
    fn with_state(repo: Rc<Repo>, state: Option<StateFile>) -> Self {
        Self {
            repo,
            executor: Executor::new(),
            state,
        }
    }

    fn outer_state(repo: &Repo) -> StateFile {
        StateFile::new(repo.rework_state_dir(), OUTER_STEM)
    }

    /// Begin a rework of the selected patchsets and everything that
    /// transitively depends on them.
    pub fn begin(repo: Rc<Repo>, targets: &[Target]) -> Result<Self> {
        let state = Self::outer_state(&repo);
        let mut command = Self::with_state(Rc::clone(&repo), Some(state.clone()));
        register_rework_operations(&mut command.executor, &repo);

        if repo.rework_in_progress()? {
            if !state.read_queue()?.is_empty() {
                return Err(Error::AlreadyInProgress);
            }
        } else {
            command.executor.enqueue("Begin", &[])?;
        }

        let cache = repo.patchset_cache()?;
        let selected = select_reverse_dependents(&repo, &cache, targets)?;
        let target_set: HashSet<Uuid> = selected.iter().map(Patchset::uuid).collect();

        let mut first = true;
        let mut previous: Option<&Patchset> = None;
        for ps in cache.patchsets() {
            if target_set.contains(&ps.uuid()) {
                if first {
                    match previous {
                        Some(prev) => command.executor.enqueue("Checkout", &[prev.name()])?,
                        None => command.executor.enqueue("CheckoutBase", &[])?,
                    }
                    first = false;
                }
                command.executor.enqueue("Rework", &[ps.name()])?;
            } else if !first {
                command.executor.enqueue("Apply", &[ps.name()])?;
            } else {
                previous = Some(ps);
            }
        }
        command.executor.enqueue("UpdateHead", &[])?;
        Ok(command)
    }

    /// Begin a build: apply the selected patchsets and everything they
    /// transitively depend on onto `base`, then move `branch` to the result.
    pub fn begin_build(
        repo: Rc<Repo>,
        base: &str,
        branch: &str,
        targets: &[Target],
    ) -> Result<Self> {
        let state = Self::outer_state(&repo);
        let mut command = Self::with_state(Rc::clone(&repo), Some(state));
        register_build_operations(&mut command.executor, &repo);

        if repo.rework_in_progress()? {
            return Err(Error::AlreadyInProgress);
        }
        command.executor.enqueue("Begin", &[branch, base])?;

        let cache = repo.patchset_cache()?;
        let selected = select_dependents(&repo, &cache, targets)?;
        command.executor.enqueue("Checkout", &[base])?;
        for ps in &selected {
            command.executor.enqueue("Apply", &[ps.name()])?;
        }
        command.executor.enqueue("UpdateHead", &[])?;
        command.executor.enqueue("Finish", &[branch])?;
        Ok(command)
    }

    /// Continue an interrupted rework: the in-flight item first, then the
    /// saved queue.
    pub fn resume(repo: Rc<Repo>) -> Result<Self> {
        Self::resume_with(repo, register_rework_operations)
    }

    /// Continue an interrupted build. Registers the build operation set,
    /// which reads `Checkout` arguments as revspecs rather than patchsets.
    pub fn resume_build(repo: Rc<Repo>) -> Result<Self> {
        Self::resume_with(repo, register_build_operations)
    }

    fn resume_with(
        repo: Rc<Repo>,
        register: fn(&mut Executor, &Rc<Repo>),
    ) -> Result<Self> {
        let state = Self::outer_state(&repo);
        if !repo.rework_in_progress()? {
            return Err(Error::NotInProgress);
        }
        let mut command = Self::with_state(Rc::clone(&repo), Some(state.clone()));
        register(&mut command.executor, &repo);
        command.executor.load_queue(state.read_current()?);
        command.executor.load_queue(state.read_queue()?);
        Ok(command)
    }

    /// Skip the step the rework stopped on, then keep going.
    ///
    /// Drops the persisted in-flight item when there is one, otherwise the
    /// queue head; the internal `Skip` operation clears the nested
    /// per-patchset queue so the abandoned patchset's remaining steps cannot
    /// leak into the next one.
    pub fn skip(repo: Rc<Repo>) -> Result<Self> {
        let state = Self::outer_state(&repo);
        if !repo.rework_in_progress()? {
            return Err(Error::NotInProgress);
        }
        let mut command = Self::with_state(Rc::clone(&repo), Some(state.clone()));
        register_rework_operations(&mut command.executor, &repo);
        command.executor.enqueue("Skip", &[])?;

        let mut queue = state.read_queue()?;
        let current = state.read_current()?;
        if current.is_empty() {
            queue.pop()?;
        } else {
            state.clear_current()?;
        }
        command.executor.load_queue(queue);
        Ok(command)
    }

    /// Abort the rework and return to the original branch.
    pub fn abort(repo: Rc<Repo>) -> Result<Self> {
        let state = Self::outer_state(&repo);
        if !repo.rework_in_progress()? {
            return Err(Error::NotInProgress);
        }
        let mut command = Self::with_state(Rc::clone(&repo), Some(state));
        register_rework_operations(&mut command.executor, &repo);
        command.executor.enqueue("Abort", &[])?;
        Ok(command)
    }

    /// Check that the rework result matches the original branch tree.
    pub fn validate(repo: Rc<Repo>) -> Result<Self> {
        if !repo.rework_in_progress()? {
            return Err(Error::NotInProgress);
        }
        let mut command = Self::with_state(Rc::clone(&repo), None);
        register_rework_operations(&mut command.executor, &repo);
        command.executor.enqueue("Validate", &[])?;
        Ok(command)
    }

    /// Validate (unless forced) and finish: move the branch to the rework
    /// head, check it out, and drop the rework state.
    pub fn finish(repo: Rc<Repo>, force: bool) -> Result<Self> {
        if !repo.rework_in_progress()? {
            return Err(Error::NotInProgress);
        }
        let mut command = Self::with_state(Rc::clone(&repo), None);
        register_rework_operations(&mut command.executor, &repo);
        if !force {
            command.executor.enqueue("Validate", &[])?;
        }
        command.executor.enqueue("Finish", &[])?;
        Ok(command)
    }

    /// The operations still queued.
    #[must_use]
    pub fn queue(&self) -> &Queue {
        self.executor.queue()
    }

    /// Persist the remaining queue. Stateless commands save nothing.
    pub fn save(&self) -> Result<()> {
        match &self.state {
            Some(state) => state.write_queue(self.executor.queue()),
            None => Ok(()),
        }
    }

    /// Execute a single operation, bracketed by current-file writes when the
    /// operation is resumable.
    pub fn execute(&mut self) -> Result<()> {
        if let Some(state) = &self.state {
            if let Some(item) = self.executor.peek() {
                if self.executor.resumable(&item.operation) {
                    state.write_current(item)?;
                }
            }
        }
        self.executor.execute()?;
        if let Some(state) = &self.state {
            state.clear_current()?;
        }
        Ok(())
    }

    /// Execute until the queue drains or an operation fails.
    pub fn execute_all(&mut self) -> Result<()> {
        loop {
            match self.execute() {
                Ok(()) => {}
                Err(Error::Empty) => return Ok(()),
                Err(err) => return Err(err),
            }
        }
    }

    /// Execute everything, then persist whatever is left.
    ///
    /// On success the drained queue clears both state files. On failure the
    /// remaining queue is saved so the command can be continued; a failure
    /// of that save is composed with the original error.
    pub fn run(&mut self) -> Result<()> {
        match self.execute_all() {
            Ok(()) => {
                self.save()?;
                if let Some(state) = &self.state {
                    state.clear_current()?;
                }
                Ok(())
            }
            Err(err) => match self.save() {
                Ok(()) => Err(err),
                Err(save_err) => Err(Error::SaveFailed {
                    save: Box::new(save_err),
                    during: Box::new(err),
                }),
            },
        }
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("repo", &self.repo)
            .field("queue", self.executor.queue())
            .finish_non_exhaustive()
    }
}

/// The outer queue of an in-progress rework, as persisted. For status
/// output.
pub fn remaining_work(repo: &Repo) -> Result<Queue> {
    StateFile::new(repo.rework_state_dir(), OUTER_STEM).read_queue()
}

// ---------------------------------------------------------------------------
// Target selection against the dependency graph
// ---------------------------------------------------------------------------

fn load_dependency_graph(repo: &Repo, cache: &Rc<PatchsetCache>) -> Result<DepGraph> {
    DepGraph::load_file(Rc::clone(cache), &repo.workdir().join(DEPENDENCIES_FILE))
}

/// Selected patchsets plus their transitive reverse dependencies,
/// deduplicated, in cache order.
fn select_reverse_dependents(
    repo: &Repo,
    cache: &Rc<PatchsetCache>,
    targets: &[Target],
) -> Result<Vec<Patchset>> {
    let graph = load_dependency_graph(repo, cache)?;
    Ok(select_with(cache, targets, |ps| {
        graph.transitive_reverse_dependencies(ps)
    }))
}

/// Selected patchsets plus their transitive dependencies, deduplicated, in
/// cache order.
fn select_dependents(
    repo: &Repo,
    cache: &Rc<PatchsetCache>,
    targets: &[Target],
) -> Result<Vec<Patchset>> {
    let graph = load_dependency_graph(repo, cache)?;
    Ok(select_with(cache, targets, |ps| {
        graph.transitive_dependencies(ps)
    }))
}

fn select_with(
    cache: &Rc<PatchsetCache>,
    targets: &[Target],
    expand: impl Fn(&Patchset) -> Vec<Patchset>,
) -> Vec<Patchset> {
    let mut seen: HashSet<Uuid> = HashSet::new();
    let mut selected: Vec<Patchset> = Vec::new();
    for ps in cache.patchsets() {
        if seen.contains(&ps.uuid()) {
            continue;
        }
        if targets.iter().any(|t| t.matches(ps)) {
            seen.insert(ps.uuid());
            selected.push(ps.clone());
            for dep in expand(ps) {
                if seen.insert(dep.uuid()) {
                    selected.push(dep);
                }
            }
        }
    }
    selected.sort_by_key(|ps| cache.index_of(ps.name()).unwrap_or(usize::MAX));
    selected
}

// ---------------------------------------------------------------------------
// Operation registries
// ---------------------------------------------------------------------------

fn require_arg<'a>(args: &'a [String], op: &'static str, what: &'static str) -> Result<&'a str> {
    args.first()
        .map(String::as_str)
        .ok_or(Error::MissingArgument { op, what })
}

fn register_rework_operations(executor: &mut Executor, repo: &Rc<Repo>) {
    let r = Rc::clone(repo);
    executor.register(Operation::new("UpdateHead", false, move |_| {
        r.write_ref_head(REWORK_HEAD_REF)?;
        r.set_head(REWORK_HEAD_REF)
    }));

    let r = Rc::clone(repo);
    executor.register(Operation::new("Validate", false, move |_| {
        if r.compare_tree_to_head(REWORK_BRANCH_REF)? {
            Ok(())
        } else {
            Err(Error::InvalidRework {
                original: "refs/kilt/rework/branch".to_string(),
                reworked: "HEAD".to_string(),
            })
        }
    }));

    let r = Rc::clone(repo);
    executor.register(Operation::new("Finish", false, move |_| finish_rework(&r)));

    let r = Rc::clone(repo);
    executor.register(Operation::new("Abort", false, move |_| abort_rework(&r)));

    let r = Rc::clone(repo);
    executor.register(Operation::new("Begin", false, move |_| start_new_rework(&r)));

    let r = Rc::clone(repo);
    executor.register(Operation::new("Rework", true, move |args| {
        let name = require_arg(args, "Rework", "patchset")?;
        info!(patchset = %name, "reworking patchset");
        rework_patchset(&r, name)
    }));

    let r = Rc::clone(repo);
    executor.register(Operation::new("Skip", true, move |_| {
        info!("clearing nested rework queue");
        skip_nested_queue(&r)
    }));

    let r = Rc::clone(repo);
    executor.register(Operation::new("Checkout", true, move |args| {
        let name = require_arg(args, "Checkout", "patchset")?;
        info!(patchset = %name, "checking out patchset");
        r.checkout_patchset(name)
    }));

    let r = Rc::clone(repo);
    executor.register(Operation::new("CheckoutBase", true, move |_| {
        info!("checking out kilt base");
        r.checkout_base()
    }));

    let r = Rc::clone(repo);
    executor.register(Operation::new("Apply", true, move |args| {
        let name = require_arg(args, "Apply", "patchset")?;
        info!(patchset = %name, "applying patchset");
        apply_patchset(&r, name)
    }));
}

fn register_build_operations(executor: &mut Executor, repo: &Rc<Repo>) {
    let r = Rc::clone(repo);
    executor.register(Operation::new("UpdateHead", false, move |_| {
        r.write_ref_head(REWORK_HEAD_REF)?;
        r.set_head(REWORK_HEAD_REF)
    }));

    let r = Rc::clone(repo);
    executor.register(Operation::new("Finish", false, move |args| {
        let branch = require_arg(args, "Finish", "branch")?;
        finish_build(&r, branch)
    }));

    let r = Rc::clone(repo);
    executor.register(Operation::new("Abort", false, move |_| abort_rework(&r)));

    let r = Rc::clone(repo);
    executor.register(Operation::new("Begin", false, move |args| {
        let branch = require_arg(args, "Begin", "branch")?;
        let base = args
            .get(1)
            .map(String::as_str)
            .ok_or(Error::MissingArgument {
                op: "Begin",
                what: "base",
            })?;
        start_new_build(&r, branch, base)
    }));

    let r = Rc::clone(repo);
    executor.register(Operation::new("Checkout", true, move |args| {
        let rev = require_arg(args, "Checkout", "rev")?;
        info!(rev = %rev, "checking out build base");
        r.checkout_rev(rev)
    }));

    let r = Rc::clone(repo);
    executor.register(Operation::new("Apply", true, move |args| {
        let name = require_arg(args, "Apply", "patchset")?;
        info!(patchset = %name, "applying patchset");
        apply_patchset(&r, name)
    }));
}

fn register_patch_operations(executor: &mut Executor, repo: &Rc<Repo>) {
    let r = Rc::clone(repo);
    executor.register(Operation::new("Apply", true, move |args| {
        let id = require_arg(args, "Apply", "patch")?;
        info!("applying {}", r.describe_commit(id)?);
        r.cherry_pick_to_head(id)
    }));

    let r = Rc::clone(repo);
    executor.register(Operation::new("Cherrypick", true, move |args| {
        let id = require_arg(args, "Cherrypick", "patch")?;
        info!("cherry-picking {}", r.describe_commit(id)?);
        r.cherry_pick_to_head(id)
    }));

    let r = Rc::clone(repo);
    executor.register(Operation::new("UpdateMetadata", true, move |args| {
        let id = require_arg(args, "UpdateMetadata", "commit")?;
        info!("updating metadata {}", r.describe_commit(id)?);
        r.update_metadata_for_commit(id)
    }));

    let r = Rc::clone(repo);
    executor.register(Operation::new("CreateMetadata", true, move |args| {
        let name = require_arg(args, "CreateMetadata", "patchset")?;
        info!(patchset = %name, "creating metadata");
        r.add_patchset(&Patchset::new(name))
    }));
}

// ---------------------------------------------------------------------------
// Rework lifecycle primitives
// ---------------------------------------------------------------------------

fn start_new_rework(repo: &Repo) -> Result<()> {
    repo.write_ref_head(REWORK_HEAD_REF)?;
    repo.write_symbolic_ref_head(REWORK_BRANCH_REF)?;
    repo.set_head(REWORK_HEAD_REF)
}

/// Stage a build: anchor a kilt base for the target branch (so the staged
/// state can be reopened while the branch itself does not exist yet), then
/// record the rework refs against it.
fn start_new_build(repo: &Repo, branch: &str, base: &str) -> Result<()> {
    if repo.rework_in_progress()? {
        return Err(Error::AlreadyInProgress);
    }
    repo.write_base_ref(branch, base)?;
    repo.write_ref_head(REWORK_HEAD_REF)?;
    repo.write_symbolic_ref_branch(REWORK_BRANCH_REF, branch)?;
    repo.set_head(REWORK_HEAD_REF)
}

fn finish_rework(repo: &Repo) -> Result<()> {
    repo.set_indirect_branch_to_head(REWORK_BRANCH_REF)?;
    repo.checkout_indirect_branch(REWORK_BRANCH_REF)?;
    cleanup_rework_state(repo);
    Ok(())
}

fn finish_build(repo: &Repo, branch: &str) -> Result<()> {
    if !repo.rework_in_progress()? {
        return Err(Error::NotInProgress);
    }
    repo.set_branch_to_head(branch)?;
    repo.checkout_branch(branch)?;
    cleanup_rework_state(repo);
    Ok(())
}

fn abort_rework(repo: &Repo) -> Result<()> {
    repo.checkout_indirect_branch(REWORK_BRANCH_REF)?;
    cleanup_rework_state(repo);
    Ok(())
}

/// Delete the rework refs and any leftover queue state. Best effort; a
/// failure here must not mask the outcome of the command that finished.
fn cleanup_rework_state(repo: &Repo) {
    if let Err(err) = repo.delete_kilt_ref(REWORK_BRANCH_REF) {
        warn!("error deleting kilt rework branch ref: {err}");
    }
    if let Err(err) = repo.delete_kilt_ref(REWORK_HEAD_REF) {
        warn!("error deleting kilt rework head ref: {err}");
    }
    let dir = repo.rework_state_dir();
    for stem in [OUTER_STEM, NESTED_STEM] {
        let state = StateFile::new(&dir, stem);
        if let Err(err) = state.clear_queue() {
            warn!(stem, "error clearing queue state: {err}");
        }
        if let Err(err) = state.clear_current() {
            warn!(stem, "error clearing current state: {err}");
        }
    }
}

fn skip_nested_queue(repo: &Repo) -> Result<()> {
    let state = StateFile::new(repo.rework_state_dir(), NESTED_STEM);
    state.clear_queue()?;
    state.clear_current()
}

// ---------------------------------------------------------------------------
// Nested per-patchset controllers
// ---------------------------------------------------------------------------

/// Rework one patchset: refresh its metadata commit, reapply its patches,
/// then fold in its floating patches.
///
/// Runs a nested command persisted under the `reworkQueue` stem. Fresh
/// per-patch steps are only enqueued when no nested state is pending, so a
/// continue after a conflict picks up where the previous run stopped.
fn rework_patchset(repo: &Rc<Repo>, name: &str) -> Result<()> {
    let ps = repo
        .find_patchset(name)?
        .ok_or_else(|| Error::PatchsetNotFound(name.to_string()))?;

    let state = StateFile::new(repo.rework_state_dir(), NESTED_STEM);
    let mut command = Command::with_state(Rc::clone(repo), Some(state.clone()));
    register_patch_operations(&mut command.executor, repo);

    let current = state.read_current()?;
    let queue = state.read_queue()?;
    let fresh = queue.is_empty() && current.is_empty();
    command.executor.load_queue(queue);

    if fresh {
        match ps.metadata_commit() {
            Some(id) => command.executor.enqueue("UpdateMetadata", &[id])?,
            None => command.executor.enqueue("CreateMetadata", &[ps.name()])?,
        }
        for patch in ps.patches() {
            command.executor.enqueue("Apply", &[patch.as_str()])?;
        }
        for patch in ps.floating_patches() {
            command.executor.enqueue("Cherrypick", &[patch.as_str()])?;
        }
    }
    command.run()
}

/// Reapply one patchset unchanged: its metadata commit (when it has one)
/// followed by its patches.
fn apply_patchset(repo: &Rc<Repo>, name: &str) -> Result<()> {
    let ps = repo
        .find_patchset(name)?
        .ok_or_else(|| Error::PatchsetNotFound(name.to_string()))?;

    let state = StateFile::new(repo.rework_state_dir(), NESTED_STEM);
    let mut command = Command::with_state(Rc::clone(repo), Some(state.clone()));
    register_patch_operations(&mut command.executor, repo);

    let current = state.read_current()?;
    let queue = state.read_queue()?;
    let fresh = queue.is_empty() && current.is_empty();
    command.executor.load_queue(queue);

    if fresh {
        if let Some(id) = ps.metadata_commit() {
            command.executor.enqueue("Apply", &[id])?;
        }
        for patch in ps.patches() {
            command.executor.enqueue("Apply", &[patch.as_str()])?;
        }
    }
    command.run()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
