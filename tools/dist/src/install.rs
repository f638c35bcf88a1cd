//! Package installer.
//!
//! Installs one target directory (relative to `$GOROOT/src`) at a time:
//! a library becomes `pkg/<os>_<arch>/<dir>.a`, a command becomes a binary
//! in the tool directory. Dependencies found in the import clauses are
//! installed first, concurrently.
//!
//! Each target is built at most once per run. The first caller for a path
//! creates its completion ticket and spawns the build; later callers wait
//! on the existing ticket. A failed build trips the process-wide abort
//! before its ticket closes, so waiters never mistake a failure for
//! success.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use anyhow::{Context, Result, bail};

use crate::artifact::archive;
use crate::config::BuildEnv;
use crate::generate::{self, remove_if_exists};
use crate::imports;
use crate::pool::{Pool, WaitGroup};
use crate::shutdown::{Abort, Latch, lock};
use crate::stale::{self, SourceSet};
use crate::tool_cmd::{Job, OutputMode};
use crate::verbose::{self, vprintln};

/// Packages the bootstrap build must never depend on: they need cgo.
const CGO_ONLY: &[&str] = &["net", "os/user", "crypto/x509"];

/// Built into the compiler; nothing to install.
const BUILTIN: &str = "unsafe";

/// Assembler headers the runtime publishes for other packages.
const RUNTIME_HEADERS: &[&str] = &["textflag.h", "funcdata.h", "asm_ppc64x.h"];

/// Files removed when a build step exits, however it exits.
#[derive(Default)]
struct CleanList(Vec<PathBuf>);

impl CleanList {
    fn push(&mut self, path: PathBuf) {
        self.0.push(path);
    }
}

impl Drop for CleanList {
    fn drop(&mut self) {
        for path in &self.0 {
            vprintln!(3, "rm {}", path.display());
            let _ = fs::remove_file(path);
        }
    }
}

/// Closes a ticket when the build thread exits, including by panic.
struct CloseOnExit {
    ticket: Arc<Latch>,
    abort: Arc<Abort>,
    dir: String,
}

impl Drop for CloseOnExit {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.abort
                .trip(anyhow::anyhow!("install {} panicked", self.dir));
        }
        self.ticket.close();
    }
}

/// How a target is produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetKind {
    /// Packed into an archive.
    Library,
    /// Linked into an executable.
    Command,
}

impl TargetKind {
    /// Commands live directly under `cmd/`; their internal packages and
    /// everything else are libraries.
    pub fn of(dir: &str) -> Self {
        if dir.starts_with("cmd/") && !dir.contains("/internal/") {
            Self::Command
        } else {
            Self::Library
        }
    }
}

/// The package name a target compiles as.
pub fn package_name(dir: &str) -> &str {
    if dir.starts_with("cmd/") && dir.matches('/').count() == 1 {
        "main"
    } else {
        dir
    }
}

/// Installs targets, sharing one memo table and one job pool.
pub struct Installer {
    env: Arc<BuildEnv>,
    pool: Arc<Pool>,
    memo: Mutex<HashMap<String, Arc<Latch>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Installer {
    pub fn new(env: Arc<BuildEnv>, pool: Arc<Pool>) -> Arc<Self> {
        Arc::new(Self {
            env,
            pool,
            memo: Mutex::new(HashMap::new()),
            threads: Mutex::new(Vec::new()),
        })
    }

    pub fn env(&self) -> &BuildEnv {
        &self.env
    }

    fn abort(&self) -> &Arc<Abort> {
        self.pool.abort()
    }

    /// Start installing `dir` in the background unless it already is.
    ///
    /// Returns the target's completion ticket.
    pub fn start_install(self: &Arc<Self>, dir: &str) -> Arc<Latch> {
        let mut memo = lock(&self.memo);
        if let Some(ticket) = memo.get(dir) {
            return Arc::clone(ticket);
        }
        let ticket = Arc::new(Latch::new());
        memo.insert(dir.to_string(), Arc::clone(&ticket));
        drop(memo);

        let this = Arc::clone(self);
        let target = dir.to_string();
        let thread_ticket = Arc::clone(&ticket);
        let spawned = std::thread::Builder::new()
            .name(format!("install {dir}"))
            .spawn(move || {
                let _guard = CloseOnExit {
                    ticket: thread_ticket,
                    abort: Arc::clone(this.abort()),
                    dir: target.clone(),
                };
                if let Err(err) = this.run_install(&target) {
                    this.abort().trip(err);
                }
            });
        match spawned {
            Ok(handle) => lock(&self.threads).push(handle),
            Err(err) => self.never_started(dir, &ticket, err),
        }
        ticket
    }

    /// Fail a target whose build thread could not be created.
    ///
    /// The abort goes up before the ticket closes.
    fn never_started(&self, dir: &str, ticket: &Latch, err: std::io::Error) {
        let err = anyhow::Error::new(err).context(format!("cannot start install of {dir}"));
        self.abort().trip(err);
        ticket.close();
    }

    /// Install `dir` and wait for it.
    pub fn install(self: &Arc<Self>, dir: &str) -> Result<()> {
        let ticket = self.start_install(dir);
        ticket.wait(self.abort())?;
        self.abort().check()
    }

    /// Join every build thread started so far.
    pub fn join(&self) {
        loop {
            let handles = std::mem::take(&mut *lock(&self.threads));
            if handles.is_empty() {
                return;
            }
            for h in handles {
                let _ = h.join();
            }
        }
    }

    /// Artifact path for target `dir`.
    pub fn artifact(&self, dir: &str) -> PathBuf {
        match TargetKind::of(dir) {
            TargetKind::Library => self.env.pkg_dir().join(format!("{dir}.a")),
            TargetKind::Command => {
                let name = dir.rsplit('/').next().unwrap_or(dir);
                let name = if name == "go" { "go_bootstrap" } else { name };
                self.env.tool(name)
            }
        }
    }

    fn job(&self, program: PathBuf, dir: &Path) -> Job {
        Job::new(program)
            .dir(dir)
            .envs(self.env.child_env())
            .mode(OutputMode::Show)
    }

    /// Candidate source files for `dir`: directory entries plus the extra
    /// dependencies, sorted and without duplicates. Obsolete generated
    /// files are deleted as they are found.
    fn source_files(&self, dir: &str, src: &Path) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(src).with_context(|| format!("reading {}", src.display()))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("reading {}", src.display()))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if stale::keep_dir_entry(&name) && !generate::delete_on_sight(&entry.path())? {
                names.push(name);
            }
        }
        names.extend(generate::extra_deps(dir).map(str::to_string));
        names.sort();
        names.dedup();
        Ok(names.into_iter().map(|n| src.join(n)).collect())
    }

    fn run_install(self: &Arc<Self>, dir: &str) -> Result<()> {
        if CGO_ONLY.contains(&dir) {
            bail!("go_bootstrap cannot depend on cgo package {dir}");
        }
        if dir == BUILTIN {
            return Ok(());
        }
        let env = &*self.env;

        if verbose::at_least(1) {
            if env.is_cross() {
                eprintln!("{dir} ({})", env.target);
            } else {
                eprintln!("{dir}");
            }
        }

        let work = env.work_dir.join(dir);
        let src = env.src_dir(dir);
        let kind = TargetKind::of(dir);
        let target = self.artifact(dir);
        if kind == TargetKind::Library {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }

        let files = self.source_files(dir, &src)?;
        let set = SourceSet::scan(files, dir, &env.target, &target, env.rebuild_all)?;
        if !set.needs_build() {
            vprintln!(3, "{dir} is up to date");
            return Ok(());
        }

        if dir == "runtime" {
            let include = env.root.join("pkg/include");
            fs::create_dir_all(&include)
                .with_context(|| format!("creating {}", include.display()))?;
            for h in RUNTIME_HEADERS {
                vprintln!(2, "cp {} {}", src.join(h).display(), include.join(h).display());
                fs::copy(src.join(h), include.join(h))
                    .with_context(|| format!("copying {}", src.join(h).display()))?;
            }
        }

        generate::resolve(env, &src, &set)?;

        let mut deps: Vec<String> = Vec::new();
        for file in &set.go_files {
            for dep in imports::read_imports(file)? {
                if !deps.contains(&dep) {
                    deps.push(dep);
                }
            }
        }
        for dep in &deps {
            self.start_install(dep);
        }
        for dep in &deps {
            self.install(dep)?;
        }

        if env.is_cross() {
            // The files are generated; the go command does the build.
            vprintln!(2, "skip build for cross-compile {dir}");
            return Ok(());
        }

        fs::create_dir_all(&work).with_context(|| format!("creating {}", work.display()))?;
        let mut clean = CleanList::default();

        let mut asm_args: Vec<String> = vec![
            "-I".into(),
            work.display().to_string(),
            "-I".into(),
            env.root.join("pkg/include").display().to_string(),
            "-D".into(),
            format!("GOOS_{}", env.target.os),
            "-D".into(),
            format!("GOARCH_{}", env.target.arch),
            "-D".into(),
            format!("GOOS_GOARCH_{}_{}", env.target.os, env.target.arch),
        ];
        match env.target.arch.as_str() {
            "mips" | "mipsle" => asm_args.extend(["-D".into(), format!("GOMIPS_{}", env.mips)]),
            "mips64" | "mips64le" => {
                asm_args.extend(["-D".into(), format!("GOMIPS64_{}", env.mips64)]);
            }
            _ => {}
        }
        let asm_header = work.join("go_asm.h");

        // Symbol ABIs of the assembly, for the compiler.
        let symabis = if set.asm_files.is_empty() {
            None
        } else {
            let symabis = work.join("symabis");
            fs::write(&asm_header, "")
                .with_context(|| format!("cannot write empty {}", asm_header.display()))?;
            let job = self
                .job(env.tool("asm"), &src)
                .args(&asm_args)
                .args(["-gensymabis", "-o"])
                .arg(&symabis)
                .args(&set.asm_files)
                .expect_output(&symabis);
            self.pool.run_one(job)?;
            Some(symabis)
        };

        // All Go files go to the compiler at once. With assembly present
        // this also writes go_asm.h, which the assembly needs.
        let fragment = work.join("_go_.a");
        clean.push(fragment.clone());
        let mut compile = self
            .job(env.tool("compile"), &src)
            .args(["-std", "-pack", "-o"])
            .arg(&fragment)
            .args(["-p", package_name(dir)])
            .args(env.boot_gcflags.split_whitespace());
        if dir == "runtime" {
            compile = compile.arg("-+");
        }
        if !set.asm_files.is_empty() {
            compile = compile.arg("-asmhdr").arg(&asm_header);
        }
        if let Some(symabis) = &symabis {
            compile = compile.arg("-symabis").arg(symabis);
        }
        if dir == "runtime" || dir == "runtime/internal/atomic" {
            // Other packages' assembly references these; wrap everything.
            compile = compile.arg("-allabis");
        }
        let compile = compile.args(&set.go_files).expect_output(&fragment);
        self.pool.run_one(compile)?;

        let group = WaitGroup::new();
        let mut objects = Vec::with_capacity(set.asm_files.len());
        for file in &set.asm_files {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let obj = work.join(format!("{}o", name.strip_suffix('s').unwrap_or(&name)));
            let job = self
                .job(env.tool("asm"), &src)
                .args(&asm_args)
                .arg("-o")
                .arg(&obj)
                .arg(file)
                .expect_output(&obj);
            self.pool.submit(&group, job)?;
            clean.push(obj.clone());
            objects.push(obj);
        }
        self.pool.drain(&group)?;
        self.abort().check()?;

        remove_if_exists(&target)?;
        match kind {
            TargetKind::Library => archive::pack(&target, Some(&fragment), &objects)?,
            TargetKind::Command => {
                let link = self
                    .job(env.tool("link"), &work)
                    .arg("-o")
                    .arg(&target)
                    .arg(&fragment)
                    .args(&objects)
                    .expect_output(&target);
                self.pool.run_one(link)?;
            }
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::pool::DEFAULT_JOBS;
    use crate::shutdown::Aborted;
    use crate::testutil::FakeTree;
    use crate::tool_cmd::JobFailed;
    use std::time::{Duration, Instant};

    fn installer(tree: &FakeTree) -> Arc<Installer> {
        let pool = Pool::new(DEFAULT_JOBS, Arc::new(Abort::new())).unwrap();
        Installer::new(Arc::new(tree.env.clone()), Arc::new(pool))
    }

    /// a -> b, c; b -> d; c -> d.
    fn diamond(tree: &FakeTree) {
        tree.package("a", &[("a.go", "package a\n\nimport (\n\t\"b\"\n\t\"c\"\n)\n")]);
        tree.package("b", &[("b.go", "package b\n\nimport \"d\"\n")]);
        tree.package("c", &[("c.go", "package c\n\nimport \"d\"\n")]);
        tree.package("d", &[("d.go", "package d\n\nimport \"unsafe\"\n")]);
    }

    #[test]
    fn target_kinds() {
        assert_eq!(TargetKind::of("fmt"), TargetKind::Library);
        assert_eq!(TargetKind::of("cmd/go"), TargetKind::Command);
        assert_eq!(TargetKind::of("cmd/go/internal/cfg"), TargetKind::Library);
        assert_eq!(package_name("cmd/asm"), "main");
        assert_eq!(package_name("cmd/asm/internal/lex"), "cmd/asm/internal/lex");
        assert_eq!(package_name("runtime"), "runtime");
    }

    #[test]
    fn dependencies_finish_before_dependents() {
        let tree = FakeTree::new();
        diamond(&tree);
        let inst = installer(&tree);
        inst.install("a").unwrap();
        inst.join();

        assert!(tree.position("end d") < tree.position("start b"));
        assert!(tree.position("end d") < tree.position("start c"));
        assert!(tree.position("end b") < tree.position("start a"));
        assert!(tree.position("end c") < tree.position("start a"));
        for pkg in ["a", "b", "c", "d"] {
            assert!(tree.env.pkg_dir().join(format!("{pkg}.a")).is_file(), "{pkg}");
        }
    }

    #[test]
    fn concurrent_requests_build_once() {
        let tree = FakeTree::new();
        diamond(&tree);
        let inst = installer(&tree);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let inst = Arc::clone(&inst);
                let dir = if i % 2 == 0 { "a" } else { "b" };
                std::thread::spawn(move || inst.install(dir))
            })
            .collect();
        for h in handles {
            h.join().unwrap().unwrap();
        }
        inst.join();

        let lines = tree.log_lines();
        for pkg in ["a", "b", "c", "d"] {
            let starts = lines.iter().filter(|l| **l == format!("start {pkg}")).count();
            assert_eq!(starts, 1, "{pkg}: {lines:?}");
        }
    }

    #[test]
    fn rerun_without_changes_runs_no_jobs() {
        let tree = FakeTree::new();
        diamond(&tree);
        installer(&tree).install("a").unwrap();

        let again = installer(&tree);
        again.install("a").unwrap();
        again.join();
        assert_eq!(again.pool.jobs_run(), 0);

        let mut forced = tree.env.clone();
        forced.rebuild_all = true;
        let pool = Pool::new(DEFAULT_JOBS, Arc::new(Abort::new())).unwrap();
        let forced = Installer::new(Arc::new(forced), Arc::new(pool));
        forced.install("a").unwrap();
        assert_eq!(forced.pool.jobs_run(), 4);
    }

    #[test]
    fn up_to_date_dependent_does_not_recheck_its_dependencies() {
        let tree = FakeTree::new();
        diamond(&tree);
        installer(&tree).install("a").unwrap();

        let c = tree.env.src_dir("c").join("c.go");
        let future = std::time::SystemTime::now() + Duration::from_secs(60);
        fs::File::options().write(true).open(&c).unwrap().set_modified(future).unwrap();

        // `a` itself is fresh, so it returns before visiting `c`.
        let again = installer(&tree);
        again.install("a").unwrap();
        again.join();
        assert_eq!(again.pool.jobs_run(), 0);

        // Asking for `c` directly rebuilds just `c`; `d` is still fresh.
        again.install("c").unwrap();
        again.join();
        assert_eq!(again.pool.jobs_run(), 1);
    }

    #[test]
    fn assembly_is_assembled_and_packed() {
        let tree = FakeTree::new();
        tree.package(
            "runtime",
            &[
                ("proc.go", "package runtime\n"),
                ("asm_amd64.s", "TEXT ·x(SB),0,$0\n"),
                ("asm_arm64.s", "TEXT ·x(SB),0,$0\n"),
                ("textflag.h", "#define NOSPLIT 4\n"),
                ("funcdata.h", ""),
                ("asm_ppc64x.h", ""),
                ("_scratch.go", "package runtime\n"),
            ],
        );
        let inst = installer(&tree);
        inst.install("runtime").unwrap();

        let lines = tree.log_lines();
        assert!(lines.contains(&"symabis symabis".to_string()), "{lines:?}");
        assert!(lines.contains(&"asm asm_amd64.o".to_string()), "{lines:?}");
        assert!(!lines.iter().any(|l| l.contains("arm64")), "{lines:?}");
        assert!(tree.position("symabis symabis") < tree.position("start runtime"));
        assert!(tree.position("end runtime") < tree.position("asm asm_amd64.o"));

        let data = fs::read(tree.env.pkg_dir().join("runtime.a")).unwrap();
        let members = archive::members(&data).unwrap();
        assert_eq!(members.last().unwrap().name, "asm_amd64.o");
        assert!(tree.env.root.join("pkg/include/textflag.h").is_file());
        // Intermediate files are cleaned up.
        assert!(!tree.env.work_dir.join("runtime/_go_.a").exists());
        assert!(!tree.env.work_dir.join("runtime/asm_amd64.o").exists());
    }

    #[test]
    fn the_go_command_links_as_go_bootstrap() {
        let tree = FakeTree::new();
        tree.package("cmd/go", &[("main.go", "package main\n\nimport \"d\"\n")]);
        tree.package("d", &[("d.go", "package d\n")]);
        let inst = installer(&tree);
        inst.install("cmd/go").unwrap();
        assert!(tree.env.tool("go_bootstrap").is_file());
        assert!(tree.log_lines().contains(&"link go_bootstrap".to_string()));
        assert!(tree.position("end d") < tree.position("start main"));
    }

    #[test]
    fn generated_files_are_created_before_compiling() {
        let tree = FakeTree::new();
        tree.package("runtime/internal/sys", &[("arch.go", "package sys\n")]);
        let inst = installer(&tree);
        inst.install("runtime/internal/sys").unwrap();
        let z = tree.env.src_dir("runtime/internal/sys").join("zversion.go");
        assert!(fs::read_to_string(z).unwrap().contains("go1.12-test"));
    }

    #[test]
    fn obsolete_generated_files_are_deleted_while_listing() {
        let tree = FakeTree::new();
        tree.package("cmd/internal/obj/x86", &[("a.go", "package x86\n"), ("anames6.c", "")]);
        let inst = installer(&tree);
        inst.install("cmd/internal/obj/x86").unwrap();
        let src = tree.env.src_dir("cmd/internal/obj/x86");
        assert!(!src.join("anames6.c").exists());
        assert!(src.join("a.go").exists());
        assert!(tree.env.pkg_dir().join("cmd/internal/obj/x86.a").is_file());
    }

    #[test]
    fn cgo_packages_are_rejected() {
        let tree = FakeTree::new();
        tree.package("a", &[("a.go", "package a\n\nimport \"os/user\"\n")]);
        let inst = installer(&tree);
        assert!(inst.install("a").is_err());
        let cause = inst.abort().take_cause().unwrap();
        assert_eq!(cause.to_string(), "go_bootstrap cannot depend on cgo package os/user");
    }

    #[test]
    fn missing_dependency_directory_is_fatal() {
        let tree = FakeTree::new();
        tree.package("a", &[("a.go", "package a\n\nimport \"nowhere\"\n")]);
        let inst = installer(&tree);
        let err = inst.install("a").unwrap_err();
        assert!(err.is::<Aborted>());
        let cause = inst.abort().take_cause().unwrap();
        assert!(format!("{cause:#}").contains("nowhere"), "{cause:#}");
    }

    #[test]
    fn failing_compile_aborts_every_waiter() {
        let tree = FakeTree::new();
        tree.package("top", &[("top.go", "package top\n\nimport (\n\t\"bad\"\n\t\"slow\"\n)\n")]);
        tree.package("bad", &[("bad.go", "package bad\n")]);
        tree.package("slow", &[("slow.go", "package slow\n\nimport \"d\"\n")]);
        tree.package("d", &[("d.go", "package d\n")]);
        let inst = installer(&tree);

        let start = Instant::now();
        let waiters: Vec<_> = ["top", "slow", "bad"]
            .into_iter()
            .map(|dir| {
                let inst = Arc::clone(&inst);
                (dir, std::thread::spawn(move || inst.install(dir)))
            })
            .collect();
        for (dir, w) in waiters {
            let result = w.join().unwrap();
            // `slow` may finish before the failure lands.
            if dir != "slow" {
                assert!(result.is_err(), "{dir}");
            }
        }
        inst.join();
        assert!(start.elapsed() < Duration::from_secs(10));

        let cause = inst.abort().take_cause().unwrap();
        let failed = cause.downcast_ref::<JobFailed>().unwrap();
        assert!(failed.output.contains("syntax error"));
        assert!(!tree.log_lines().contains(&"start top".to_string()));
    }

    #[test]
    fn unstarted_build_is_never_read_as_success() {
        let tree = FakeTree::new();
        let inst = installer(&tree);
        let ticket = Arc::new(Latch::new());
        lock(&inst.memo).insert("a".to_string(), Arc::clone(&ticket));

        inst.never_started("a", &ticket, std::io::Error::other("out of threads"));
        assert!(ticket.is_closed());
        let err = inst.install("a").unwrap_err();
        assert!(err.is::<Aborted>(), "{err:#}");
        let cause = inst.abort().take_cause().unwrap();
        assert!(format!("{cause:#}").contains("cannot start install of a"), "{cause:#}");
    }

    #[test]
    fn cross_builds_only_generate() {
        let tree = FakeTree::new();
        let mut env = tree.env.clone();
        env.target = crate::platform::Platform::new("windows", "amd64");
        tree.package("go/build", &[("build.go", "package build\n")]);
        let pool = Pool::new(DEFAULT_JOBS, Arc::new(Abort::new())).unwrap();
        let inst = Installer::new(Arc::new(env), Arc::new(pool));
        inst.install("go/build").unwrap();
        assert!(tree.env.src_dir("go/build").join("zcgo.go").is_file());
        assert!(tree.log_lines().is_empty());
    }
}
