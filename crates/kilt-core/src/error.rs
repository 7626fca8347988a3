//! Central error type for kilt-core.
//!
//! Every error the engine can surface is a variant here, so callers (and the
//! rework executor in particular) can distinguish the cases that matter:
//! [`Error::UserActionRequired`] stops execution but leaves the saved state
//! resumable, [`Error::Empty`] is the executor's normal stop condition, and
//! everything else is fatal for the current command.

use std::path::PathBuf;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A backing-store primitive failed. Always wrapped with context naming
    /// the operation that was attempted.
    #[error("{context}: {source}")]
    BackingStore {
        context: String,
        #[source]
        source: git2::Error,
    },

    /// A cherry-pick hit conflicts; the user has to resolve and continue.
    #[error("conflicts while applying {0}; resolve and commit, then continue (or skip)")]
    UserActionRequired(String),

    /// Validation found the rework tree differing from the staged branch.
    #[error("rework tree doesn't match: git diff-tree -p {original} {reworked}")]
    InvalidRework { original: String, reworked: String },

    #[error("no rework in progress")]
    NotInProgress,

    #[error("rework already in progress")]
    AlreadyInProgress,

    #[error("must not be on a detached head")]
    DetachedHead,

    #[error("invalid operation {0:?}")]
    UnknownOperation(String),

    /// The operation queue is empty. `execute_all` swallows this.
    #[error("no items in queue")]
    Empty,

    /// A state file exists but could not be decoded.
    #[error("corrupt state file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("operation {op}: no {what} specified")]
    MissingArgument { op: &'static str, what: &'static str },

    #[error("can't add {0:?} as a dependency of itself")]
    SelfDep(String),

    #[error("can't add {dep:?} as a dependency of preceding patchset {ps:?}")]
    OutOfOrder { ps: String, dep: String },

    #[error("{dep:?} already exists as a dependency of {ps:?}")]
    DuplicateDep { ps: String, dep: String },

    #[error("patchset {ps:?} does not depend on patchset {dep:?}")]
    NoSuchDep { ps: String, dep: String },

    /// The dependency graph contains a directed cycle; the payload lists the
    /// distinct patchset names on the witness cycle in discovery order.
    #[error("cycle in dependencies: {}", .0.join(", "))]
    Cycle(Vec<String>),

    /// The dependencies file exists but could not be loaded.
    #[error("failed to load {path}: {reason}")]
    DependencyFile { path: PathBuf, reason: String },

    #[error("error parsing patchset metadata: {0}")]
    MetadataParse(String),

    #[error("patchset {0:?} not found")]
    PatchsetNotFound(String),

    #[error("patchset {0:?} has no commits to check out")]
    EmptyPatchset(String),

    /// Saving the remaining queue failed while another error was already
    /// being surfaced; both causes are reported.
    #[error("failed to save queue: {save}; during error: {during}")]
    SaveFailed {
        save: Box<Error>,
        during: Box<Error>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap a git2 failure with the operation that was being attempted.
    pub fn backing(context: impl Into<String>, source: git2::Error) -> Self {
        Self::BackingStore {
            context: context.into(),
            source,
        }
    }
}
