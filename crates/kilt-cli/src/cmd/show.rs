//! `kilt show`: metadata and patch listing for one patchset.

use anyhow::bail;
use clap::Args;

use kilt_core::Repo;

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Name of the patchset to show.
    pub patchset: String,
}

pub fn run(args: &ShowArgs) -> anyhow::Result<()> {
    let repo = Repo::open()?;
    let Some(ps) = repo.find_patchset(&args.patchset)? else {
        bail!("patchset {} not found", args.patchset);
    };

    println!(
        "Patchset {}, Version {}, UUID {}",
        ps.name(),
        ps.version(),
        ps.uuid()
    );
    println!(
        "Metadata commit id {}",
        ps.metadata_commit().unwrap_or("(none)")
    );

    if !ps.patches().is_empty() {
        println!("Patches in patchset:");
        for patch in ps.patches() {
            println!("\t{}", repo.describe_commit(patch)?);
        }
    }
    if !ps.floating_patches().is_empty() {
        println!("Floating patches:");
        for patch in ps.floating_patches() {
            println!("\t{}", repo.describe_commit(patch)?);
        }
    }
    Ok(())
}
