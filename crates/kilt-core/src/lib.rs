#![forbid(unsafe_code)]
//! kilt-core library.
//!
//! Kilt manages named, versioned groups of patches ("patchsets") layered on
//! top of a moving base commit in a git repository. The crate is organized
//! around the rework engine: a resumable operation queue that rebuilds a
//! branch by reapplying patchsets in order, persisting its position between
//! steps so a conflict or crash can be continued exactly where it stopped.
//!
//! # Conventions
//!
//! - **Errors**: every fallible API returns [`Result`] with the central
//!   [`Error`] enum; backing-store failures carry a context string.
//! - **Logging**: `tracing` macros (`info!` for operation progress, `warn!`
//!   for degraded metadata parsing during history walks).

pub mod error;
pub mod graph;
pub mod patchset;
pub mod queue;
pub mod repo;
pub mod rework;
pub mod state;

pub use error::{Error, Result};
pub use patchset::{Patchset, Version};
pub use repo::{PatchsetCache, Repo};
