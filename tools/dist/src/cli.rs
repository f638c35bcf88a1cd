//! Command-line interface definitions for dist.

use clap::{ArgAction, Parser, Subcommand};

use crate::pool::DEFAULT_JOBS;
use crate::verbose::{self, VerboseArg};

/// Bootstrap build orchestrator for the toolchain.
#[derive(Parser)]
#[command(name = "dist", about)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Increase verbosity; repeatable.
    #[arg(short = 'v', action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Set verbosity: `true`, `false`, or a level.
    #[arg(
        long = "v",
        value_name = "LEVEL",
        global = true,
        value_parser = verbose::parse_verbose_arg
    )]
    pub verbosity: Option<VerboseArg>,

    /// Maximum number of subprocess jobs running at once.
    #[arg(long, short = 'j', global = true, default_value_t = DEFAULT_JOBS)]
    pub jobs: usize,
}

impl Cli {
    /// The verbosity level from `-v` flags followed by `--v=`.
    pub fn verbose_level(&self) -> u8 {
        let mut args = vec![VerboseArg::Increment; usize::from(self.verbose)];
        args.extend(self.verbosity);
        verbose::fold(&args)
    }
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Rebuild everything, from the seed toolchain to the installed tree.
    Bootstrap(BootstrapArgs),
    /// Install packages or commands.
    Install(InstallArgs),
    /// Remove generated and built files.
    Clean(CleanArgs),
    /// Print the environment.
    Env(EnvArgs),
    /// List supported platforms.
    List(ListArgs),
    /// Print the toolchain version.
    Version,
    /// Print the installation banner.
    Banner,
}

/// Arguments for the `bootstrap` subcommand.
#[derive(Parser)]
pub struct BootstrapArgs {
    /// Rebuild all.
    #[arg(short = 'a')]
    pub rebuild_all: bool,

    /// Enable debugging of the bootstrap process.
    #[arg(short = 'd')]
    pub debug: bool,

    /// Do not print the banner.
    #[arg(long)]
    pub no_banner: bool,
}

/// Arguments for the `install` subcommand.
#[derive(Parser)]
pub struct InstallArgs {
    /// Rebuild all.
    #[arg(short = 'a')]
    pub rebuild_all: bool,

    /// Targets relative to `$GOROOT/src` (default: the current directory).
    pub dirs: Vec<String>,
}

/// Arguments for the `clean` subcommand.
#[derive(Parser)]
pub struct CleanArgs {
    /// Also remove installed packages, tools and the cached version.
    #[arg(short = 'a')]
    pub rebuild_all: bool,
}

/// Arguments for the `env` subcommand.
#[derive(Parser)]
pub struct EnvArgs {
    /// Emit an updated PATH.
    #[arg(short = 'p')]
    pub path: bool,

    /// Emit plan 9 syntax.
    #[arg(short = '9', conflicts_with = "windows")]
    pub plan9: bool,

    /// Emit windows syntax.
    #[arg(short = 'w')]
    pub windows: bool,
}

/// Arguments for the `list` subcommand.
#[derive(Parser)]
pub struct ListArgs {
    /// Produce JSON output.
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_forms() {
        let cli = Cli::parse_from(["dist", "-vv", "list"]);
        assert_eq!(cli.verbose_level(), 2);
        let cli = Cli::parse_from(["dist", "-v", "--v=false", "list"]);
        assert_eq!(cli.verbose_level(), 0);
        let cli = Cli::parse_from(["dist", "--v=3", "version"]);
        assert_eq!(cli.verbose_level(), 3);
        let cli = Cli::parse_from(["dist", "-v", "--v=true", "version"]);
        assert_eq!(cli.verbose_level(), 2);
    }

    #[test]
    fn bootstrap_flags() {
        let cli = Cli::parse_from(["dist", "bootstrap", "-a", "--no-banner", "-j", "8"]);
        assert_eq!(cli.jobs, 8);
        let Command::Bootstrap(args) = cli.command else {
            panic!("expected bootstrap");
        };
        assert!(args.rebuild_all && args.no_banner && !args.debug);
    }

    #[test]
    fn env_syntaxes_conflict() {
        assert!(Cli::try_parse_from(["dist", "env", "-9", "-w"]).is_err());
        let cli = Cli::parse_from(["dist", "env", "-p", "-9"]);
        let Command::Env(args) = cli.command else {
            panic!("expected env");
        };
        assert!(args.path && args.plan9);
    }

    #[test]
    fn install_takes_dirs() {
        let cli = Cli::parse_from(["dist", "install", "runtime", "cmd/go"]);
        let Command::Install(args) = cli.command else {
            panic!("expected install");
        };
        assert_eq!(args.dirs, ["runtime", "cmd/go"]);
        assert_eq!(cli.jobs, DEFAULT_JOBS);
    }
}
