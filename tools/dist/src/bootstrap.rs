//! The bootstrap sequence.
//!
//! ```text
//! toolchain1   = seed toolchain builds the toolchain commands
//! go_bootstrap = toolchain1 + our installer build cmd/go
//! toolchain2   = go_bootstrap rebuilds the toolchain with toolchain1
//! toolchain3   = go_bootstrap force-rebuilds it with toolchain2
//! std, cmd     = go_bootstrap builds everything (host first when crossing)
//! ```
//!
//! toolchain1 carries no build identifiers, so toolchain2 is needed to get
//! them; toolchain3 is forced so release and development builds behave
//! alike. After every `go install` generation the go command's own
//! staleness query must report nothing: a self-hosting toolchain has to
//! reach a fixed point.

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail, ensure};

use crate::clean::{self, remove_dir_all_if_exists};
use crate::config::BuildEnv;
use crate::generate::remove_if_exists;
use crate::install::Installer;
use crate::pool::{Pool, WaitGroup};
use crate::stale;
use crate::tool_cmd::{Job, OutputMode};
use crate::verbose::{self, Timer, timelog, vprintln};
use crate::version;

/// The toolchain commands every generation rebuilds.
pub const TOOLCHAIN: &[&str] = &["cmd/asm", "cmd/cgo", "cmd/compile", "cmd/link"];

/// Tool binaries from before the per-platform tool directory existed.
const OLD_TOOLS: &[&str] = &[
    "5a", "5c", "5g", "5l", "6a", "6c", "6g", "6l", "8a", "8c", "8g", "8l", "9a", "9c", "9g",
    "9l", "6cov", "6nm", "6prof", "cgo", "ebnflint", "goapi", "gofix", "goinstall", "gomake",
    "gopack", "gopprof", "gotest", "gotype", "govet", "goyacc", "quietgcc",
];

/// Directories that must not exist in a release tree.
const UNRELEASED: &[&str] = &["src/cmd/newlink", "src/cmd/objwriter", "src/debug/goobj", "src/old"];

/// Marker the go command prints for each stale target.
const STALE_MARKER: &str = "\tSTALE ";

#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Build `cmd/buildid` too and keep a copy of each generation's compiler.
    pub debug: bool,
    pub no_banner: bool,
}

/// Run the whole sequence.
///
/// `env.rebuild_all` comes from `-a`. The returned error is the first
/// failure; a background failure surfaces as an abort.
pub fn run(env: Arc<BuildEnv>, pool: Arc<Pool>, opts: &Options) -> Result<()> {
    timelog("start", "dist bootstrap");
    let _timer = Timer::start("bootstrap");

    let mut toolchain: Vec<&str> = TOOLCHAIN.to_vec();
    if opts.debug {
        toolchain.push("cmd/buildid");
    }

    let old_pkg = env.root.join("src/pkg");
    if old_pkg.is_dir() {
        bail!(
            "\n\nThe Go package sources have moved to $GOROOT/src.\n\
             *** {} still exists. ***\n\
             It probably contains stale files that may confuse the build.\n\
             Please (check what's there and) remove it and try again.",
            old_pkg.display()
        );
    }

    if env.rebuild_all {
        clean::clean(&env)?;
    }
    setup(&env)?;

    timelog("build", "toolchain1");
    check_cc(&env)?;
    build_toolchain1(&env, &pool, &toolchain)?;

    let old_bin = bin_files(&env.root.join("bin"))?;

    // go_bootstrap runs here, so it is built for the host.
    let host = Arc::new(env.with_target(env.host.clone()));
    timelog("build", "go_bootstrap");
    println!("Building Go bootstrap cmd/go (go_bootstrap) using Go toolchain1.");
    let installer = Installer::new(Arc::clone(&host), Arc::clone(&pool));
    // runtime is not visible in the import clauses; it also publishes textflag.h.
    let built = installer.install("runtime").and_then(|()| installer.install("cmd/go"));
    installer.join();
    built?;
    pool.abort().check()?;
    if verbose::at_least(1) {
        println!();
    }

    let go_bootstrap = env.tool("go_bootstrap");
    let cmd_go = env.bin_dir.join(format!("go{}", env.exe));
    let mut snapshots = Vec::new();
    if opts.debug {
        snapshots.push(snapshot_compiler(&env, 1)?);
    }

    phase(&host, "toolchain2", "Building Go toolchain2 using go_bootstrap and Go toolchain1.");
    let mut args = vec!["-i"];
    args.extend(&toolchain);
    go_install(&host, &go_bootstrap, &args)?;
    if opts.debug {
        print_build_id(&host)?;
        snapshots.push(snapshot_compiler(&env, 2)?);
    }

    phase(&host, "toolchain3", "Building Go toolchain3 using go_bootstrap and Go toolchain2.");
    let mut args = vec!["-a", "-i"];
    args.extend(&toolchain);
    go_install(&host, &go_bootstrap, &args)?;
    if opts.debug {
        print_build_id(&host)?;
        snapshots.push(snapshot_compiler(&env, 3)?);
    }
    let mut fixed: Vec<&str> = toolchain.clone();
    fixed.push("runtime/internal/sys");
    check_not_stale(&host, &go_bootstrap, &fixed)?;

    if env.is_cross() {
        phase(
            &host,
            "host toolchain",
            &format!("Building packages and commands for host, {}.", env.host),
        );
        go_install(&host, &go_bootstrap, &["std", "cmd"])?;
        check_not_stale(&host, &go_bootstrap, &["std", "cmd"])?;
        check_not_stale(&host, &cmd_go, &["std", "cmd"])?;

        phase(
            &env,
            "target toolchain",
            &format!("Building packages and commands for target, {}.", env.target),
        );
    } else {
        phase(
            &env,
            "toolchain",
            &format!("Building packages and commands for {}.", env.target),
        );
    }

    let targets: &[&str] = if env.target.os == "js" && env.target.arch == "wasm" {
        // The commands cannot run there.
        &["std"]
    } else {
        &["std", "cmd"]
    };
    go_install(&env, &go_bootstrap, targets)?;
    check_not_stale(&env, &go_bootstrap, targets)?;
    check_not_stale(&env, &cmd_go, targets)?;
    if opts.debug {
        print_build_id(&env)?;
        check_not_stale(&env, &go_bootstrap, &fixed)?;
        snapshots.push(snapshot_compiler(&env, 4)?);
        report_snapshots(&snapshots)?;
    }

    check_bin_dir(&env, &old_bin)?;

    remove_if_exists(&go_bootstrap)?;
    if !opts.no_banner {
        banner(&env, &mut std::io::stdout().lock())?;
    }
    timelog("end", "dist bootstrap");
    Ok(())
}

fn phase(env: &BuildEnv, name: &str, message: &str) {
    timelog("build", name);
    if verbose::at_least(1) {
        println!();
    }
    vprintln!(2, "gcflags={:?} ldflags={:?}", env.gcflags, env.ldflags);
    println!("{message}");
}

/// Create the output directories, wiping build outputs under `-a`.
fn setup(env: &BuildEnv) -> Result<()> {
    let mkdir = |p: &Path| {
        fs::create_dir_all(p).with_context(|| format!("creating {}", p.display()))
    };
    let fresh = |p: &Path| -> Result<()> {
        if env.rebuild_all {
            remove_dir_all_if_exists(p)?;
        }
        mkdir(p)
    };

    mkdir(&env.root.join("bin"))?;
    let pkg = env.root.join("pkg");
    mkdir(&pkg)?;
    fresh(&pkg.join(env.host.dir_name()))?;
    if env.is_cross() {
        fresh(&pkg.join(env.target.dir_name()))?;
    }
    // dist's own build cache, separate from the user's.
    fresh(&pkg.join("obj/go-build"))?;
    fresh(&env.tool_dir)?;

    remove_dir_all_if_exists(&env.root.join("bin/tool"))?;
    for old in OLD_TOOLS {
        remove_if_exists(&env.root.join("bin").join(old))?;
    }
    // A $GOBIN holding an old-style compiler gets the old tools cleared too.
    if "56789".chars().any(|c| env.bin_dir.join(format!("{c}g")).is_file()) {
        for old in OLD_TOOLS {
            remove_if_exists(&env.bin_dir.join(old))?;
        }
    }

    let v = version::find_version(env)?;
    if v.starts_with("release.") || (v.starts_with("go") && !v.contains("beta")) {
        for dir in UNRELEASED {
            let p = env.root.join(dir);
            ensure!(!p.is_dir(), "{} should not exist in release build", p.display());
        }
    }
    Ok(())
}

/// Make sure the C compiler runs when cgo is going to need it.
fn check_cc(env: &BuildEnv) -> Result<()> {
    if !env.need_cc() {
        return Ok(());
    }
    let cc = env.cc.fallback();
    let words: Vec<&str> = cc.split_whitespace().collect();
    let Some((program, flags)) = words.split_first() else {
        bail!("empty $CC");
    };
    let checked = Job::new(*program)
        .args(flags)
        .arg("--help")
        .mode(OutputMode::Capture)
        .run();
    if let Err(err) = checked {
        let output = err
            .downcast_ref::<crate::tool_cmd::JobFailed>()
            .map(|f| f.output.trim_end().to_string())
            .filter(|o| !o.is_empty())
            .map(|o| format!("\nCommand output:\n\n{o}"))
            .unwrap_or_default();
        bail!(
            "cannot invoke C compiler {cc:?}: {err}\n\n\
             Go needs a system C compiler for use with cgo.\n\
             To set a C compiler, set CC=the-compiler.\n\
             To disable cgo, set CGO_ENABLED=0.\n{output}"
        );
    }
    Ok(())
}

/// Build the toolchain commands with the seed toolchain.
fn build_toolchain1(env: &BuildEnv, pool: &Pool, toolchain: &[&str]) -> Result<()> {
    let seed_root = &env.bootstrap_root;
    let seed_go = seed_root.join(format!("bin/go{}", env.exe));
    ensure!(
        seed_go.is_file(),
        "cannot find {}\nSet $GOROOT_BOOTSTRAP to a working Go tree >= Go 1.4.",
        seed_go.display()
    );
    println!("Building Go toolchain1 using {}.", seed_root.display());

    let mut vars = env.with_target(env.host.clone()).child_env();
    vars.retain(|(k, _)| k != "GOROOT" && k != "GOCACHE");
    vars.push(("GOROOT".into(), seed_root.display().to_string()));
    vars.push(("GOBIN".into(), String::new()));
    vars.push(("GO111MODULE".into(), "off".into()));

    let src = env.root.join("src");
    let group = WaitGroup::new();
    for dir in toolchain {
        let name = dir.rsplit('/').next().unwrap_or(dir);
        let out = env.tool(name);
        let mut job = Job::new(&seed_go)
            .arg("build")
            .arg(format!("-gcflags={}", env.boot_gcflags))
            .arg("-o")
            .arg(&out)
            .arg(format!("./{dir}"))
            .dir(&src)
            .envs(vars.iter().cloned())
            .mode(OutputMode::Show)
            .expect_output(&out);
        if verbose::at_least(1) {
            job = job.arg("-v");
        }
        pool.submit(&group, job)?;
    }
    pool.drain(&group)?;
    pool.abort().check()
}

/// Variables for a go command run against `env`'s target.
fn go_env(env: &BuildEnv) -> Vec<(String, String)> {
    let mut vars = env.child_env();
    vars.push(("CC".into(), env.cc.lookup(&env.target).to_string()));
    vars
}

/// `go install` the given arguments with the generation's flags.
pub fn go_install(env: &BuildEnv, go: &Path, args: &[&str]) -> Result<()> {
    let mut job = Job::new(go)
        .arg("install")
        .arg(format!("-gcflags=all={}", env.gcflags))
        .arg(format!("-ldflags=all={}", env.ldflags));
    if verbose::at_least(1) {
        job = job.arg("-v");
    }
    job.args(args)
        .dir(&env.root)
        .envs(go_env(env))
        .mode(OutputMode::Inherit)
        .run()?;
    Ok(())
}

/// Fail if the go command at `go` considers any of `targets` stale.
pub fn check_not_stale(env: &BuildEnv, go: &Path, targets: &[&str]) -> Result<()> {
    let out = Job::new(go)
        .arg("list")
        .arg(format!("-gcflags=all={}", env.gcflags))
        .arg(format!("-ldflags=all={}", env.ldflags))
        .arg("-f={{if .Stale}}\tSTALE {{.ImportPath}}: {{.StaleReason}}{{end}}")
        .args(targets)
        .dir(&env.root)
        .envs(go_env(env))
        .mode(OutputMode::Capture)
        .run()?;
    if !out.contains(STALE_MARKER) {
        return Ok(());
    }

    // Show the cache hash inputs for the likeliest culprit.
    for target in ["runtime/internal/sys", "cmd/dist", "cmd/link"] {
        if out.contains(&format!("STALE {target}")) {
            let detail = Job::new(go)
                .args(["list", "-f={{.ImportPath}} {{.Stale}}", target])
                .dir(&env.root)
                .envs(go_env(env))
                .envs([("GODEBUG".to_string(), "gocachehash=1".to_string())])
                .mode(OutputMode::Capture)
                .run()?;
            print!("{detail}");
            break;
        }
    }
    bail!(
        "unexpected stale targets reported by {} list \
         -gcflags=\"{}\" -ldflags=\"{}\" for {:?}:\n{}",
        go.display(),
        env.gcflags,
        env.ldflags,
        targets,
        out
    );
}

/// File names currently in `bin`, without the executable suffix.
fn bin_files(bin: &Path) -> Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    let entries = match fs::read_dir(bin) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
        Err(e) => return Err(e).with_context(|| format!("reading {}", bin.display())),
    };
    for entry in entries {
        let entry = entry.with_context(|| format!("reading {}", bin.display()))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        names.insert(name.strip_suffix(".exe").unwrap_or(&name).to_string());
    }
    Ok(names)
}

/// Only the go command, gofmt and the cross-compiled bin directory may
/// have appeared in `$GOROOT/bin`.
fn check_bin_dir(env: &BuildEnv, before: &BTreeSet<String>) -> Result<()> {
    let cross_dir = env.target.dir_name();
    for name in bin_files(&env.root.join("bin"))? {
        if before.contains(&name) || name == "go" || name == "gofmt" || name == cross_dir {
            continue;
        }
        bail!("unexpected new file in $GOROOT/bin: {name}");
    }
    Ok(())
}

/// Print the compiler's full version and keep a copy as `compile<n>`.
fn snapshot_compiler(env: &BuildEnv, n: u32) -> Result<PathBuf> {
    let compile = env.tool("compile");
    Job::new(&compile)
        .arg("-V=full")
        .mode(OutputMode::Inherit)
        .run()?;
    let copy = env.tool(&format!("compile{n}"));
    vprintln!(2, "cp {} {}", compile.display(), copy.display());
    fs::copy(&compile, &copy)
        .with_context(|| format!("copying {} to {}", compile.display(), copy.display()))?;
    Ok(copy)
}

fn print_build_id(env: &BuildEnv) -> Result<()> {
    let sys = env.pkg_dir().join("runtime/internal/sys.a");
    Job::new(env.tool("buildid"))
        .arg(&sys)
        .mode(OutputMode::Inherit)
        .run()?;
    Ok(())
}

/// Report whether consecutive self-built compilers are identical.
fn report_snapshots(snapshots: &[PathBuf]) -> Result<()> {
    let hashes = snapshots
        .iter()
        .map(|p| stale::hash_file(p))
        .collect::<Result<Vec<_>>>()?;
    for (i, pair) in hashes.windows(2).enumerate() {
        let verdict = if pair[0] == pair[1] { "match" } else { "differ" };
        println!("compile{} and compile{}: {verdict}", i + 1, i + 2);
        vprintln!(2, "  {}\n  {}", pair[0], pair[1]);
    }
    Ok(())
}

/// The closing message, with a hint when `$GOBIN` is not on `$PATH`.
pub fn banner(env: &BuildEnv, out: &mut impl Write) -> Result<()> {
    if verbose::at_least(1) {
        writeln!(out)?;
    }
    writeln!(out, "---")?;
    writeln!(out, "Installed Go for {} in {}", env.target, env.root.display())?;
    writeln!(out, "Installed commands in {}", env.bin_dir.display())?;

    let moving = !same_file(&env.root_final, &env.root);
    if !moving && env.host.os != "plan9" {
        let sep = if env.host.os == "windows" { ';' } else { ':' };
        let path = std::env::var("PATH").unwrap_or_default();
        let bin = env.bin_dir.display().to_string();
        if !path.split(sep).any(|p| p == bin) {
            writeln!(out, "*** You need to add {bin} to your PATH.")?;
        }
    }
    if moving {
        writeln!(
            out,
            "\nThe binaries expect {} to be copied or moved to {}",
            env.root.display(),
            env.root_final.display()
        )?;
    }
    Ok(())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
