//! `kilt init`: anchor the kilt base on the current branch.

use anyhow::Context;
use clap::Args;

use kilt_core::Repo;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Base revision; every commit on top of it is managed by kilt.
    pub base: String,
}

pub fn run(args: &InitArgs) -> anyhow::Result<()> {
    let repo = Repo::init(&args.base).context("failed to initialize kilt")?;
    println!(
        "Initialized kilt on branch {} with base commit {}",
        repo.branch(),
        repo.base()
    );
    Ok(())
}
