//! `kilt new`: create a patchset as a metadata commit on the branch.

use anyhow::Context;
use clap::Args;

use kilt_core::{Patchset, Repo};

#[derive(Args, Debug)]
pub struct NewArgs {
    /// Name of the patchset to create.
    pub name: String,
}

pub fn run(args: &NewArgs) -> anyhow::Result<()> {
    if args.name.is_empty() || args.name.contains(char::is_whitespace) {
        anyhow::bail!("patchset name must be non-empty and contain no whitespace");
    }
    let repo = Repo::open().context("failed to open repo")?;
    let ps = Patchset::new(args.name.clone());
    repo.add_patchset(&ps).context("failed to add patchset")?;
    println!("Created patchset {} ({})", ps.name(), ps.uuid());
    Ok(())
}
