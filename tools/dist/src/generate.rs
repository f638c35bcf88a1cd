//! Generated source files.
//!
//! A few sources are produced by `dist` itself rather than checked in.
//! [`GEN_TABLE`] maps a file-name prefix to its generator, first match
//! wins; entries without a generator name obsolete files that are deleted
//! whenever they are seen. [`DEP_TABLE`] adds the generated files to the
//! targets that need them, so they take part in staleness checks even
//! before they exist.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::config::BuildEnv;
use crate::platform::PLATFORMS;
use crate::stale::SourceSet;
use crate::verbose::vprintln;
use crate::version;

/// Writes the generated file at `file` for the target source dir `dir`.
pub type Generator = fn(&BuildEnv, &Path, &Path) -> Result<()>;

pub struct GenRule {
    pub prefix: &'static str,
    /// `None` marks a file that is deleted on sight.
    pub generator: Option<Generator>,
}

pub const GEN_TABLE: &[GenRule] = &[
    GenRule { prefix: "zdefaultcc.go", generator: Some(gen_default_cc) },
    GenRule { prefix: "zosarch.go", generator: Some(gen_os_arch) },
    GenRule { prefix: "zversion.go", generator: Some(gen_version) },
    GenRule { prefix: "zcgo.go", generator: Some(gen_cgo) },
    GenRule { prefix: "enam.c", generator: None },
    GenRule { prefix: "anames5.c", generator: None },
    GenRule { prefix: "anames6.c", generator: None },
    GenRule { prefix: "anames8.c", generator: None },
    GenRule { prefix: "anames9.c", generator: None },
];

/// Extra source files per target, relative to the target's directory.
///
/// A key ending in `/` applies to every target under it.
pub const DEP_TABLE: &[(&str, &[&str])] = &[
    ("cmd/go/internal/cfg", &["zdefaultcc.go", "zosarch.go"]),
    ("runtime/internal/sys", &["zversion.go"]),
    ("go/build", &["zcgo.go"]),
];

/// Directories whose generated files and binaries `clean` removes.
pub const CLEAN_LIST: &[&str] =
    &["runtime/internal/sys", "cmd/cgo", "cmd/go/internal/cfg", "go/build"];

/// Generated files in the runtime package directory.
pub const RUNTIME_GENERATED: &[&str] = &["zaexperiment.h", "zversion.go"];

/// The first rule whose prefix matches `name`.
pub fn rule_for(name: &str) -> Option<&'static GenRule> {
    GEN_TABLE.iter().find(|r| name.starts_with(r.prefix))
}

/// Remove `path` if its name marks an obsolete generated file.
///
/// Returns whether the file was one; such files never join a build.
pub fn delete_on_sight(path: &Path) -> Result<bool> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if !matches!(rule_for(&name), Some(GenRule { generator: None, .. })) {
        return Ok(false);
    }
    vprintln!(3, "rm {}", path.display());
    remove_if_exists(path)?;
    Ok(true)
}

/// Extra files listed for target `dir`.
pub fn extra_deps(dir: &str) -> impl Iterator<Item = &'static str> {
    DEP_TABLE
        .iter()
        .filter(move |(prefix, _)| {
            dir == *prefix || (prefix.ends_with('/') && dir.starts_with(prefix))
        })
        .flat_map(|(_, deps)| deps.iter().copied())
}

/// Regenerate the generated files in `set` and fail on any other file
/// that does not exist.
pub fn resolve(env: &BuildEnv, src_dir: &Path, set: &SourceSet) -> Result<()> {
    for path in &set.files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match rule_for(&name) {
            Some(GenRule { generator: Some(generate), .. }) => {
                vprintln!(2, "generate {}", path.display());
                generate(env, src_dir, path)
                    .with_context(|| format!("generating {}", path.display()))?;
            }
            _ if set.missing.contains(path) => bail!("missing file {}", path.display()),
            _ => {}
        }
    }
    Ok(())
}

/// Write `contents` to `path` unless it already holds exactly that.
///
/// Returns whether the file was written. Leaving identical files alone
/// keeps their timestamps, so regenerating does not make targets stale.
pub fn write_if_changed(path: &Path, contents: &str) -> Result<bool> {
    if fs::read(path).is_ok_and(|old| old == contents.as_bytes()) {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("writing {}", path.display()))?;
    Ok(true)
}

pub fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("removing {}", path.display())),
    }
}

fn header(src_dir: &Path) -> String {
    let pkg = src_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("// Code generated by dist; DO NOT EDIT.\n\npackage {pkg}\n\n")
}

/// Default C compiler per platform, from the `CC` settings.
fn gen_default_cc(env: &BuildEnv, src_dir: &Path, file: &Path) -> Result<()> {
    let mut out = header(src_dir);
    out.push_str("const DefaultPkgConfig = `pkg-config`\n\n");
    out.push_str("func DefaultCC(goos, goarch string) string {\n");
    out.push_str("\tswitch goos + `/` + goarch {\n");
    for (platform, cc) in env.cc.overrides() {
        let _ = writeln!(out, "\tcase {platform:?}:\n\t\treturn {cc:?}");
    }
    out.push_str("\t}\n");
    let _ = writeln!(out, "\treturn {:?}\n}}", env.cc.fallback());
    write_if_changed(file, &out)?;
    Ok(())
}

/// The supported platform table.
fn gen_os_arch(_env: &BuildEnv, src_dir: &Path, file: &Path) -> Result<()> {
    let mut plats: Vec<_> = PLATFORMS.to_vec();
    plats.sort_unstable();

    let mut out = header(src_dir);
    out.push_str("var OSArchSupportsCgo = map[string]bool{\n");
    for (platform, cgo) in plats {
        let _ = writeln!(out, "\t{platform:?}: {cgo},");
    }
    out.push_str("}\n");
    write_if_changed(file, &out)?;
    Ok(())
}

/// Version string, install root and default platform for the runtime.
fn gen_version(env: &BuildEnv, src_dir: &Path, file: &Path) -> Result<()> {
    let version = version::find_version(env)?;
    let guard = if env.gcflags.split_whitespace().any(|f| f == "-N") { 2 } else { 1 };

    let mut out = header(src_dir);
    let _ = writeln!(out, "const TheVersion = `{version}`");
    let _ = writeln!(out, "const DefaultGoroot = `{}`", env.root_final.display());
    let _ = writeln!(out, "const DefaultGOOS = `{}`", env.target.os);
    let _ = writeln!(out, "const DefaultGOARCH = `{}`", env.target.arch);
    let _ = writeln!(out, "const StackGuardMultiplier = {guard}");
    write_if_changed(file, &out)?;
    Ok(())
}

/// Default cgo setting for the package loader.
fn gen_cgo(env: &BuildEnv, src_dir: &Path, file: &Path) -> Result<()> {
    let mut out = header(src_dir);
    let _ = writeln!(
        out,
        "const defaultCGO_ENABLED = {:?}",
        env.cgo_enabled.as_deref().unwrap_or("")
    );
    write_if_changed(file, &out)?;
    Ok(())
}
