//! `kilt status`: current branch, rework progress, and patchsets needing
//! attention.

use clap::Args;

use kilt_core::repo::metadata::UNKNOWN_PATCHSET;
use kilt_core::{rework, Repo};

#[derive(Args, Debug)]
pub struct StatusArgs {}

pub fn run(_args: &StatusArgs) -> anyhow::Result<()> {
    let repo = Repo::open()?;
    println!(
        "On kilt branch {} with base commit {}",
        repo.branch(),
        repo.base()
    );

    if repo.rework_in_progress()? {
        println!("Rework in progress.");
        print_remaining_work(&repo)?;
        return Ok(());
    }

    let cache = repo.patchset_cache()?;
    let mut needs_rework = false;
    for ps in cache.patchsets() {
        if ps.name() == UNKNOWN_PATCHSET {
            continue;
        }
        if ps.metadata_commit().is_none() {
            println!("Patchset {:?} missing metadata commit.", ps.name());
            if let Some(first) = ps.patches().first() {
                println!("First commit: {}", repo.describe_commit(first)?);
            }
        }
        let floating = ps.floating_patches();
        if !floating.is_empty() {
            needs_rework = true;
            println!("Patchset {:?} needs rework; floating patches found:", ps.name());
            for patch in floating.iter().rev() {
                println!("\t{}", repo.describe_commit(patch)?);
            }
        }
    }
    if needs_rework {
        println!(
            "Rework patchsets individually using kilt rework -p <patchset>, or rework all\n\
             patches using kilt rework"
        );
    }

    if let Some(unknown) = cache.get(UNKNOWN_PATCHSET) {
        println!("Patches found belonging to unknown patchset:");
        for patch in unknown.floating_patches().iter().rev() {
            println!("\t{}", repo.describe_commit(patch)?);
        }
        println!("Please assign these patches to a patchset by adding a \"Patchset-Name:\" footer.");
    }
    Ok(())
}

fn print_remaining_work(repo: &Repo) -> anyhow::Result<()> {
    let queue = rework::remaining_work(repo)?;
    if queue.is_empty() {
        println!("All work complete. Use kilt rework --finish to validate and finish the rework.");
        return Ok(());
    }
    println!("Remaining work:");
    for item in queue.iter() {
        println!("\t{}", item.marshal_text());
    }
    println!(
        "Use kilt rework --continue to perform the next operation, or manually perform\n\
         the operation and use kilt rework --skip to skip execution."
    );
    Ok(())
}
