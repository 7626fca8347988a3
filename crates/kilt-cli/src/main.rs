#![forbid(unsafe_code)]

mod cmd;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "kilt",
    version,
    about = "kilt is a patchset management tool",
    long_about = "kilt is a tool for managing patches and patchsets layered on top of a \
                  moving base revision."
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Initialize branch to work with kilt",
        long_about = "Initialize the current branch to work with kilt. Pass in a <base> \
                      specified in the form of a git revision. Every commit on top of <base> \
                      can be managed by kilt."
    )]
    Init(cmd::init::InitArgs),

    #[command(
        about = "Create a new patchset",
        long_about = "Create a new patchset in the current repo. Pass in the patchset name as \
                      the first positional argument."
    )]
    New(cmd::new::NewArgs),

    #[command(about = "Show the current kilt branch and rework status")]
    Status(cmd::status::StatusArgs),

    #[command(about = "Show metadata and patches of a patchset")]
    Show(cmd::show::ShowArgs),

    #[command(
        about = "Rework the patches belonging to patchsets",
        long_about = "Rework patchsets, allowing patches to be redistributed and re-ordered in \
                      the branch. The rework command creates a working area detached from the \
                      current kilt branch where modifications can be staged without changing \
                      the original branch.\n\nKilt examines the patchsets in the branch, \
                      determines which patches need to be reworked, and creates a queue of \
                      operations that the user drives with --continue, --skip, and --abort. \
                      Once the user is finished, --finish verifies that the rework is valid \
                      and moves the kilt branch to the result. A rework is valid if its end \
                      state is identical to the initial state: the diff between them is empty."
    )]
    Rework(cmd::rework::ReworkArgs),

    #[command(
        about = "Build a new tree from selected patchsets",
        long_about = "Apply the selected patchsets (and everything they depend on) onto a \
                      given base, then fast-forward a branch to the result."
    )]
    Build(cmd::build::BuildArgs),

    #[command(
        about = "Add a dependency to a patchset",
        long_about = "Add one or more dependencies to a patchset. Pass in multiple patchset \
                      names to include multiple dependencies."
    )]
    AddDep(cmd::dep::AddDepArgs),

    #[command(
        about = "Remove a dependency from a patchset",
        long_about = "Remove one or more dependencies from a patchset. Pass in multiple \
                      patchset names to remove multiple dependencies."
    )]
    RmDep(cmd::dep::RmDepArgs),
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_env("KILT_LOG").unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match &cli.command {
        Commands::Init(args) => cmd::init::run(args),
        Commands::New(args) => cmd::new::run(args),
        Commands::Status(args) => cmd::status::run(args),
        Commands::Show(args) => cmd::show::run(args),
        Commands::Rework(args) => cmd::rework::run(args),
        Commands::Build(args) => cmd::build::run(args),
        Commands::AddDep(args) => cmd::dep::run_add(args),
        Commands::RmDep(args) => cmd::dep::run_rm(args),
    };

    if let Err(err) = result {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::parse_from(["kilt", "init", "HEAD~3"]);
        assert!(matches!(cli.command, Commands::Init(_)));

        let cli = Cli::parse_from(["kilt", "rework", "--all"]);
        assert!(matches!(cli.command, Commands::Rework(_)));

        let cli = Cli::parse_from(["kilt", "add-dep", "a", "b"]);
        assert!(matches!(cli.command, Commands::AddDep(_)));
    }

    #[test]
    fn verbose_flag_is_global() {
        let cli = Cli::parse_from(["kilt", "status", "--verbose"]);
        assert!(cli.verbose);
    }
}
