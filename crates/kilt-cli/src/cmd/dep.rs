//! `kilt add-dep` / `kilt rm-dep`: edit the patchset dependency graph.
//!
//! The graph lives in `dependencies.json` at the worktree root. Edits are
//! validated against the patchset cache (dependencies must precede their
//! dependents on the branch, and the graph must stay acyclic) before the
//! file is rewritten.

use std::fs;
use std::rc::Rc;

use anyhow::{bail, Context};
use clap::Args;

use kilt_core::graph::{DepGraph, DEPENDENCIES_FILE};
use kilt_core::Repo;

#[derive(Args, Debug)]
pub struct AddDepArgs {
    /// Patchset receiving the dependencies.
    pub patchset: String,

    /// One or more patchsets it depends on.
    #[arg(required = true)]
    pub dependencies: Vec<String>,
}

#[derive(Args, Debug)]
pub struct RmDepArgs {
    /// Patchset losing the dependencies.
    pub patchset: String,

    /// One or more dependencies to remove.
    #[arg(required = true)]
    pub dependencies: Vec<String>,
}

enum EditOp {
    Add,
    Remove,
}

pub fn run_add(args: &AddDepArgs) -> anyhow::Result<()> {
    run_edit(EditOp::Add, &args.patchset, &args.dependencies)
}

pub fn run_rm(args: &RmDepArgs) -> anyhow::Result<()> {
    run_edit(EditOp::Remove, &args.patchset, &args.dependencies)
}

fn run_edit(op: EditOp, patchset: &str, dependencies: &[String]) -> anyhow::Result<()> {
    let repo = Repo::open()?;
    let cache = repo.patchset_cache()?;
    let path = repo.workdir().join(DEPENDENCIES_FILE);
    let mut graph = DepGraph::load_file(Rc::clone(&cache), &path)?;

    let Some(ps) = cache.get(patchset) else {
        bail!("patchset {patchset:?} not found");
    };
    for name in dependencies {
        let Some(dep) = cache.get(name) else {
            bail!("patchset {name:?} not found");
        };
        match op {
            EditOp::Add => graph.add(ps, dep)?,
            EditOp::Remove => graph.remove(ps, dep)?,
        }
    }
    graph.validate().context("invalid dependency graph")?;

    fs::write(&path, graph.marshal_json()?)
        .with_context(|| format!("failed to write {}", path.display()))?;

    match op {
        EditOp::Add => println!(
            "Added {} dependency(ies) to {patchset}",
            dependencies.len()
        ),
        EditOp::Remove => println!(
            "Removed {} dependency(ies) from {patchset}",
            dependencies.len()
        ),
    }
    Ok(())
}
