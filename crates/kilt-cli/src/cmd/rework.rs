//! `kilt rework`: drive the rework state machine.
//!
//! Without a mode flag this begins a rework of the selected patchsets
//! (defaulting to those with floating patches). `--continue`, `--skip`,
//! `--abort`, `--validate`, and `--finish` operate on an in-progress rework.

use std::rc::Rc;

use clap::Args;

use kilt_core::rework::{Command, Target};
use kilt_core::Repo;

#[derive(Args, Debug)]
pub struct ReworkArgs {
    /// Continue an interrupted rework.
    #[arg(long = "continue", group = "mode")]
    pub cont: bool,

    /// Skip the step the rework stopped on, then continue.
    #[arg(long, group = "mode")]
    pub skip: bool,

    /// Abort the rework and return to the original branch.
    #[arg(long, group = "mode")]
    pub abort: bool,

    /// Check that the rework result matches the original branch.
    #[arg(long, group = "mode")]
    pub validate: bool,

    /// Validate and finish the rework, moving the branch to the result.
    #[arg(long, group = "mode")]
    pub finish: bool,

    /// Finish without validating.
    #[arg(long, requires = "finish")]
    pub force: bool,

    /// Rework the named patchset (repeatable).
    #[arg(short = 'p', long = "patchset", value_name = "PATCHSET")]
    pub patchsets: Vec<String>,

    /// Rework every patchset.
    #[arg(long)]
    pub all: bool,
}

impl ReworkArgs {
    fn targets(&self) -> Vec<Target> {
        if !self.patchsets.is_empty() {
            self.patchsets
                .iter()
                .cloned()
                .map(Target::PatchsetByName)
                .collect()
        } else if self.all {
            vec![Target::All]
        } else {
            vec![Target::Floating]
        }
    }
}

pub fn run(args: &ReworkArgs) -> anyhow::Result<()> {
    let repo = Rc::new(Repo::open()?);

    let mut command = if args.cont {
        Command::resume(repo)?
    } else if args.skip {
        Command::skip(repo)?
    } else if args.abort {
        Command::abort(repo)?
    } else if args.validate {
        Command::validate(repo)?
    } else if args.finish {
        Command::finish(repo, args.force)?
    } else {
        Command::begin(repo, &args.targets())?
    };

    command.run()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        args: ReworkArgs,
    }

    #[test]
    fn default_target_is_floating() {
        let w = Wrapper::parse_from(["test"]);
        assert_eq!(w.args.targets(), vec![Target::Floating]);
    }

    #[test]
    fn all_flag_selects_everything() {
        let w = Wrapper::parse_from(["test", "--all"]);
        assert_eq!(w.args.targets(), vec![Target::All]);
    }

    #[test]
    fn patchset_flags_select_by_name_and_win_over_all() {
        let w = Wrapper::parse_from(["test", "-p", "foo", "--patchset", "bar", "--all"]);
        assert_eq!(
            w.args.targets(),
            vec![
                Target::PatchsetByName("foo".to_string()),
                Target::PatchsetByName("bar".to_string()),
            ]
        );
    }

    #[test]
    fn mode_flags_are_mutually_exclusive() {
        assert!(Wrapper::try_parse_from(["test", "--continue", "--abort"]).is_err());
        assert!(Wrapper::try_parse_from(["test", "--finish", "--skip"]).is_err());
    }

    #[test]
    fn force_requires_finish() {
        assert!(Wrapper::try_parse_from(["test", "--force"]).is_err());
        assert!(Wrapper::try_parse_from(["test", "--finish", "--force"]).is_ok());
    }
}
