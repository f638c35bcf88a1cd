//! Toolchain bootstrap orchestrator.
//!
//! Builds a self-hosting compiler toolchain from a seed toolchain, through
//! successive generations, to a fixed point.
//!
//! Pipeline: read environment → seed build (toolchain1) → install
//!           go_bootstrap → go install generations → staleness checks.

mod artifact;
mod bootstrap;
mod clean;
mod cli;
mod config;
mod constraint;
mod generate;
mod imports;
mod install;
mod platform;
mod pool;
mod shutdown;
mod stale;
mod tool_cmd;
mod verbose;
mod version;

#[cfg(all(test, unix))]
mod testutil;

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;

use crate::config::{BuildEnv, EnvSyntax};
use crate::install::Installer;
use crate::pool::Pool;
use crate::shutdown::{Abort, AtExit};
use crate::tool_cmd::JobFailed;

fn main() -> ExitCode {
    let cli = cli::Cli::parse();
    verbose::init(cli.verbose_level());

    let abort = Arc::new(Abort::new());
    let at_exit = AtExit::new();
    let result = dispatch(&cli, &abort, &at_exit);

    let code = match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // A tripped abort holds the first failure; anything returned
            // afterwards is a consequence of it.
            let mut cause = abort.take_cause().unwrap_or(err);
            // Pool jobs echo their own output; direct runs have not.
            if let Some(failed) = cause.downcast_mut::<JobFailed>() {
                failed.echo_output();
            }
            eprintln!("dist: {cause:#}");
            ExitCode::from(2)
        }
    };
    at_exit.run();
    code
}

fn dispatch(cli: &cli::Cli, abort: &Arc<Abort>, at_exit: &AtExit) -> Result<()> {
    match cli.command {
        cli::Command::List(ref args) => cmd_list(args),
        cli::Command::Bootstrap(ref args) => {
            let mut env = load_env(at_exit)?;
            env.rebuild_all = args.rebuild_all;
            let pool = Arc::new(Pool::new(cli.jobs, Arc::clone(abort))?);
            let opts = bootstrap::Options {
                debug: args.debug,
                no_banner: args.no_banner,
            };
            let result = bootstrap::run(Arc::new(env), Arc::clone(&pool), &opts);
            pool.shutdown();
            result
        }
        cli::Command::Install(ref args) => {
            let mut env = load_env(at_exit)?;
            env.rebuild_all = args.rebuild_all;
            cmd_install(env, &args.dirs, cli.jobs, abort)
        }
        cli::Command::Clean(ref args) => {
            let mut env = load_env(at_exit)?;
            env.rebuild_all = args.rebuild_all;
            clean::clean(&env)
        }
        cli::Command::Env(ref args) => cmd_env(&load_env(at_exit)?, args),
        cli::Command::Version => {
            println!("{}", version::find_version(&load_env(at_exit)?)?);
            Ok(())
        }
        cli::Command::Banner => {
            bootstrap::banner(&load_env(at_exit)?, &mut std::io::stdout().lock())
        }
    }
}

/// Read the environment and schedule removal of the work dir.
fn load_env(at_exit: &AtExit) -> Result<BuildEnv> {
    let env = BuildEnv::from_env()?;
    let work = env.work_dir.clone();
    at_exit.register(move || {
        if let Err(err) = clean::remove_dir_all_if_exists(&work) {
            eprintln!("dist: {err:#}");
        }
    });
    Ok(env)
}

fn cmd_install(env: BuildEnv, dirs: &[String], jobs: usize, abort: &Arc<Abort>) -> Result<()> {
    let dirs = if dirs.is_empty() {
        vec![default_target(&env)?]
    } else {
        dirs.to_vec()
    };
    let pool = Arc::new(Pool::new(jobs, Arc::clone(abort))?);
    let installer = Installer::new(Arc::new(env), Arc::clone(&pool));
    for dir in &dirs {
        installer.start_install(dir);
    }
    let result = dirs.iter().try_for_each(|dir| installer.install(dir));
    installer.join();
    pool.shutdown();
    result
}

/// The current directory as a target path relative to `$GOROOT/src`.
fn default_target(env: &BuildEnv) -> Result<String> {
    let cwd = std::env::current_dir().context("cannot determine current directory")?;
    let src = env.root.join("src");
    let cwd = cwd.canonicalize().unwrap_or(cwd);
    let src = src.canonicalize().unwrap_or(src);
    let Ok(rel) = cwd.strip_prefix(&src) else {
        bail!("current directory {} is not under {}", cwd.display(), src.display());
    };
    let parts: Vec<_> = rel.iter().map(|c| c.to_string_lossy()).collect();
    if parts.is_empty() {
        bail!("current directory {} is not under {}", cwd.display(), src.display());
    }
    Ok(parts.join("/"))
}

fn cmd_env(env: &BuildEnv, args: &cli::EnvArgs) -> Result<()> {
    let syntax = if args.plan9 {
        EnvSyntax::Plan9
    } else if args.windows {
        EnvSyntax::Windows
    } else {
        EnvSyntax::Sh
    };
    let mut out = std::io::stdout().lock();
    for (key, value) in env.report(|k| std::env::var(k).ok(), args.path) {
        out.write_all(syntax.format(key, &value).as_bytes())?;
    }
    Ok(())
}

fn cmd_list(args: &cli::ListArgs) -> Result<()> {
    if args.json {
        println!("{}", platform::list_json()?);
    } else {
        for (p, _) in platform::listed_platforms() {
            println!("{p}");
        }
    }
    Ok(())
}
