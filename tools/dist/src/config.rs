//! Build environment resolution.
//!
//! Reads the platform and directory settings from the process environment
//! exactly once at startup and freezes them into a [`BuildEnv`], which is
//! passed by reference to every component. Child processes receive the
//! settings they need explicitly through [`BuildEnv::child_env`]; the
//! parent environment is never mutated.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail, ensure};

use crate::platform::{self, Platform};

/// Per-platform compiler selection for one variable (e.g. `CC`).
///
/// Precedence, most specific first: `$CC_FOR_<os>_<arch>`, then
/// `$CC_FOR_TARGET` (for every platform other than the host when
/// cross-compiling), then `$CC`, then the built-in default.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompilerEnv {
    fallback: String,
    per_platform: BTreeMap<String, String>,
}

impl CompilerEnv {
    /// Resolve the settings for `name` using `lookup` to read variables.
    pub fn resolve(
        name: &str,
        default: &str,
        host: &Platform,
        target: &Platform,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let mut fallback = default.to_string();
        let mut per_platform = BTreeMap::new();

        if let Some(v) = get(name) {
            fallback = v;
        }
        if let Some(v) = get(&format!("{name}_FOR_TARGET")) {
            if host != target {
                per_platform.insert(host.to_string(), fallback.clone());
            }
            fallback = v;
        }
        for os in platform::KNOWN_OSES {
            for arch in platform::KNOWN_ARCHES {
                if let Some(v) = get(&format!("{name}_FOR_{os}_{arch}")) {
                    per_platform.insert(format!("{os}/{arch}"), v);
                }
            }
        }

        Self {
            fallback,
            per_platform,
        }
    }

    /// The setting that applies to `platform`.
    pub fn lookup(&self, platform: &Platform) -> &str {
        self.per_platform
            .get(&platform.to_string())
            .map_or(self.fallback.as_str(), String::as_str)
    }

    /// The setting for platforms with no specific override.
    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    /// All explicit per-platform overrides, keyed by `os/arch`.
    pub fn overrides(&self) -> &BTreeMap<String, String> {
        &self.per_platform
    }
}

/// Immutable build settings for one `dist` invocation.
#[derive(Clone, Debug)]
pub struct BuildEnv {
    /// Toolchain source root (`$GOROOT`).
    pub root: PathBuf,
    /// Where the installed toolchain will finally live (`$GOROOT_FINAL`).
    pub root_final: PathBuf,
    /// Command output directory (`$GOBIN`).
    pub bin_dir: PathBuf,
    /// Directory holding the compiler, assembler and linker.
    pub tool_dir: PathBuf,
    /// Scratch directory for intermediate objects, removed at exit.
    pub work_dir: PathBuf,
    pub host: Platform,
    pub target: Platform,
    /// Floating-point variant for arm.
    pub arm: String,
    /// Instruction-set variant for 386.
    pub i386: String,
    /// Floating-point ABI for mips/mipsle.
    pub mips: String,
    /// Floating-point ABI for mips64/mips64le.
    pub mips64: String,
    pub extlink_enabled: Option<String>,
    /// Compiler flags for packages `dist` builds itself.
    pub boot_gcflags: String,
    /// Compiler flags for the self-built generations.
    pub gcflags: String,
    /// Extra linker flags.
    pub ldflags: String,
    pub cc: CompilerEnv,
    /// `$CGO_ENABLED`, if set.
    pub cgo_enabled: Option<String>,
    /// Root of the seed toolchain used to build toolchain1.
    pub bootstrap_root: PathBuf,
    /// Rebuild everything regardless of timestamps.
    pub rebuild_all: bool,
    /// Executable suffix for host binaries.
    pub exe: &'static str,
}

impl BuildEnv {
    /// A build environment with defaults for everything but the layout.
    pub fn new(root: PathBuf, host: Platform, target: Platform, work_dir: PathBuf) -> Self {
        let tool_dir = root.join("pkg/tool").join(host.dir_name());
        let exe = if host.os == "windows" { ".exe" } else { "" };
        let cc = CompilerEnv::resolve("CC", "gcc", &host, &target, |_| None);
        Self {
            root_final: root.clone(),
            bin_dir: root.join("bin"),
            bootstrap_root: root.join("bootstrap"),
            tool_dir,
            work_dir,
            arm: "7".into(),
            i386: "sse2".into(),
            mips: "hardfloat".into(),
            mips64: "hardfloat".into(),
            extlink_enabled: None,
            boot_gcflags: String::new(),
            gcflags: String::new(),
            ldflags: String::new(),
            cc,
            cgo_enabled: None,
            rebuild_all: false,
            exe,
            root,
            host,
            target,
        }
    }

    /// Read the build environment from the process environment.
    ///
    /// Creates the scratch work directory; the caller registers its removal.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let Some(root) = get("GOROOT") else {
            bail!("$GOROOT must be set");
        };
        let root = clean_path(Path::new(&root));

        let native = Platform::native();
        let host_os = get("GOHOSTOS").unwrap_or(native.os);
        let host_arch = get("GOHOSTARCH").unwrap_or(native.arch);
        ensure!(platform::is_known_os(&host_os), "unknown $GOHOSTOS {host_os}");
        ensure!(platform::is_known_arch(&host_arch), "unknown $GOHOSTARCH {host_arch}");
        let host = Platform::new(host_os, host_arch);

        let os = get("GOOS").unwrap_or_else(|| host.os.clone());
        ensure!(platform::is_known_os(&os), "unknown $GOOS {os}");
        let arch = get("GOARCH").unwrap_or_else(|| host.arch.clone());
        ensure!(platform::is_known_arch(&arch), "unknown $GOARCH {arch}");
        let target = Platform::new(os, arch);

        let all_bash = root.join("src/all.bash");
        ensure!(
            all_bash.is_file(),
            "$GOROOT is not set correctly or not exported\n\tGOROOT={}\n\t{} does not exist",
            root.display(),
            all_bash.display()
        );

        let extlink_enabled = get("GO_EXTLINK_ENABLED");
        if let Some(v) = &extlink_enabled {
            ensure!(v == "0" || v == "1", "unknown $GO_EXTLINK_ENABLED {v}");
        }

        let work_dir = create_work_dir(get("GOTMPDIR").map(PathBuf::from))?;

        let mut env = Self::new(root, host, target, work_dir);
        if let Some(v) = get("GOROOT_FINAL") {
            env.root_final = PathBuf::from(v);
        }
        if let Some(v) = get("GOBIN") {
            env.bin_dir = PathBuf::from(v);
        }
        env.arm = get("GOARM").unwrap_or_else(|| detect_arm(&env.host, &env.target));
        env.i386 = get("GO386").unwrap_or_else(|| detect_386().into());
        env.mips = get("GOMIPS").unwrap_or_else(|| "hardfloat".into());
        env.mips64 = get("GOMIPS64").unwrap_or_else(|| "hardfloat".into());
        env.extlink_enabled = extlink_enabled;
        env.boot_gcflags = get("BOOT_GO_GCFLAGS").unwrap_or_default();
        env.gcflags = get("GO_GCFLAGS").unwrap_or_default();
        env.ldflags = get("GO_LDFLAGS").unwrap_or_default();
        env.cc = CompilerEnv::resolve("CC", "gcc", &env.host, &env.target, &lookup);
        env.cgo_enabled = get("CGO_ENABLED");
        env.bootstrap_root = match get("GOROOT_BOOTSTRAP") {
            Some(v) => PathBuf::from(v),
            None => {
                let home = get("HOME")
                    .or_else(|| get("USERPROFILE"))
                    .context("cannot locate seed toolchain: set $GOROOT_BOOTSTRAP")?;
                PathBuf::from(home).join("go1.4")
            }
        };
        Ok(env)
    }

    /// Whether the target differs from the host.
    pub fn is_cross(&self) -> bool {
        self.host != self.target
    }

    /// A copy of this environment building for `target`.
    pub fn with_target(&self, target: Platform) -> Self {
        Self {
            target,
            ..self.clone()
        }
    }

    /// Installed package directory for the current target.
    pub fn pkg_dir(&self) -> PathBuf {
        self.root.join("pkg").join(self.target.dir_name())
    }

    /// Source directory of target `dir`.
    pub fn src_dir(&self, dir: &str) -> PathBuf {
        self.root.join("src").join(dir)
    }

    /// Path of a tool binary in the tool directory.
    pub fn tool(&self, name: &str) -> PathBuf {
        self.tool_dir.join(format!("{name}{}", self.exe))
    }

    /// Variables passed to every child process.
    pub fn child_env(&self) -> Vec<(String, String)> {
        let mut vars = vec![
            ("GO386".into(), self.i386.clone()),
            ("GOARCH".into(), self.target.arch.clone()),
            ("GOARM".into(), self.arm.clone()),
            ("GOHOSTARCH".into(), self.host.arch.clone()),
            ("GOHOSTOS".into(), self.host.os.clone()),
            ("GOOS".into(), self.target.os.clone()),
            ("GOMIPS".into(), self.mips.clone()),
            ("GOMIPS64".into(), self.mips64.clone()),
            ("GOROOT".into(), self.root.display().to_string()),
            ("GOROOT_FINAL".into(), self.root_final.display().to_string()),
            (
                "GOCACHE".into(),
                self.root.join("pkg/obj/go-build").display().to_string(),
            ),
            ("LANG".into(), "C".into()),
            ("LANGUAGE".into(), "en_US.UTF8".into()),
        ];
        if let Some(v) = &self.extlink_enabled {
            vars.push(("GO_EXTLINK_ENABLED".into(), v.clone()));
        }
        vars
    }

    /// Whether the toolchain build needs a working C compiler.
    pub fn need_cc(&self) -> bool {
        match self.cgo_enabled.as_deref() {
            Some("1") => true,
            Some("0") => false,
            _ => self.host.cgo_enabled(),
        }
    }
}

/// Output syntax for `dist env`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvSyntax {
    Sh,
    Plan9,
    Windows,
}

impl EnvSyntax {
    /// One assignment line, terminator included.
    pub fn format(self, key: &str, value: &str) -> String {
        match self {
            Self::Sh => format!("{key}=\"{value}\"\n"),
            Self::Plan9 => format!("{key}='{value}'\n"),
            Self::Windows => format!("set {key}={value}\r\n"),
        }
    }
}

impl BuildEnv {
    /// The variables `dist env` reports, in order.
    ///
    /// Pass-through variables are read with `lookup`; with `with_path`, an
    /// updated `PATH` with the bin dir in front is added.
    pub fn report(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
        with_path: bool,
    ) -> Vec<(&'static str, String)> {
        let get = |k: &str| lookup(k).unwrap_or_default();
        let mut vars = vec![
            ("GOARCH", self.target.arch.clone()),
            ("GOBIN", self.bin_dir.display().to_string()),
            ("GOCACHE", get("GOCACHE")),
            ("GODEBUG", get("GODEBUG")),
            ("GOHOSTARCH", self.host.arch.clone()),
            ("GOHOSTOS", self.host.os.clone()),
            ("GOOS", self.target.os.clone()),
            ("GOPROXY", get("GOPROXY")),
            ("GOROOT", self.root.display().to_string()),
            ("GOTMPDIR", get("GOTMPDIR")),
            ("GOTOOLDIR", self.tool_dir.display().to_string()),
        ];
        match self.target.arch.as_str() {
            "arm" => vars.push(("GOARM", self.arm.clone())),
            "386" => vars.push(("GO386", self.i386.clone())),
            "mips" | "mipsle" => vars.push(("GOMIPS", self.mips.clone())),
            "mips64" | "mips64le" => vars.push(("GOMIPS64", self.mips64.clone())),
            _ => {}
        }
        if with_path {
            let sep = if self.host.os == "windows" { ";" } else { ":" };
            let path = format!("{}{sep}{}", self.bin_dir.display(), get("PATH"));
            vars.push(("PATH", path));
        }
        vars
    }
}

/// Lexically normalize a path (drop `.` and trailing separators).
fn clean_path(path: &Path) -> PathBuf {
    path.components().collect()
}

/// Create a fresh scratch directory under `base` (or the system temp dir).
///
/// The directory outlives this call; its removal is an at-exit action.
fn create_work_dir(base: Option<PathBuf>) -> Result<PathBuf> {
    let base = base.unwrap_or_else(std::env::temp_dir);
    let dir = tempfile::Builder::new()
        .prefix("go-tool-dist-")
        .tempdir_in(&base)
        .with_context(|| format!("cannot create work dir in {}", base.display()))?;
    Ok(dir.keep())
}

/// Floating-point variant for arm when `$GOARM` is unset.
fn detect_arm(host: &Platform, target: &Platform) -> String {
    if matches!(target.os.as_str(), "nacl" | "darwin" | "android") {
        return "7".into();
    }
    if host.arch != "arm" || target.os != host.os || target.os == "freebsd" {
        return "5".into();
    }
    let cpuinfo = std::fs::read_to_string("/proc/cpuinfo").unwrap_or_default();
    if cpuinfo.contains("vfpv3") {
        "7".into()
    } else if cpuinfo.contains("vfp") {
        "6".into()
    } else {
        "5".into()
    }
}

/// Instruction-set variant for 386 when `$GO386` is unset.
fn detect_386() -> &'static str {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    {
        if std::arch::is_x86_feature_detected!("sse2") {
            return "sse2";
        }
        "387"
    }
    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
    {
        "sse2"
    }
}
