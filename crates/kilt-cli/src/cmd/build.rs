//! `kilt build`: apply a patchset closure onto a chosen base.

use std::rc::Rc;

use anyhow::bail;
use clap::Args;

use kilt_core::rework::{Command, Target};
use kilt_core::Repo;

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Continue an interrupted build.
    #[arg(long = "continue", group = "mode")]
    pub cont: bool,

    /// Abort the build and return to the original branch.
    #[arg(long, group = "mode")]
    pub abort: bool,

    /// Patchset to build (repeatable); dependencies are pulled in
    /// automatically.
    #[arg(short = 'p', long = "patchset", value_name = "PATCHSET")]
    pub patchsets: Vec<String>,

    /// Base revision to build on.
    #[arg(short, long)]
    pub base: Option<String>,

    /// Branch to fast-forward to the result.
    #[arg(long)]
    pub branch: Option<String>,
}

pub fn run(args: &BuildArgs) -> anyhow::Result<()> {
    let repo = Rc::new(Repo::open()?);

    let mut command = if args.cont {
        Command::resume_build(repo)?
    } else if args.abort {
        Command::abort(repo)?
    } else {
        let Some(base) = args.base.as_deref() else {
            bail!("must specify a valid base");
        };
        let Some(branch) = args.branch.as_deref() else {
            bail!("must specify a target branch");
        };
        if args.patchsets.is_empty() {
            bail!("must specify at least one patchset");
        }
        let targets: Vec<Target> = args
            .patchsets
            .iter()
            .cloned()
            .map(Target::PatchsetByName)
            .collect();
        Command::begin_build(repo, base, branch, &targets)?
    };

    command.run()?;
    Ok(())
}
