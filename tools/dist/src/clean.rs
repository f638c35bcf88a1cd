//! Removal of generated files and, with `-a`, of everything built.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};

use crate::config::BuildEnv;
use crate::generate::{CLEAN_LIST, GEN_TABLE, RUNTIME_GENERATED, remove_if_exists};
use crate::verbose::vprintln;

/// Remove a directory tree if it exists.
pub fn remove_dir_all_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => {
            vprintln!(3, "rm -rf {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("removing {}", path.display())),
    }
}

/// Remove generated sources and binaries; with `env.rebuild_all`, also the
/// installed packages, tools, object cache and cached version.
pub fn clean(env: &BuildEnv) -> Result<()> {
    for dir in CLEAN_LIST {
        let path = env.src_dir(dir);
        let entries = match fs::read_dir(&path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        for entry in entries {
            let entry = entry.with_context(|| format!("reading {}", path.display()))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if GEN_TABLE.iter().any(|rule| name.starts_with(rule.prefix)) {
                remove_if_exists(&entry.path())?;
            }
        }
        // A binary left behind by `go build` in the command's directory.
        if let Some(cmd) = dir.strip_prefix("cmd/") {
            remove_if_exists(&path.join(cmd))?;
        }
    }

    let runtime = env.src_dir("runtime");
    for name in RUNTIME_GENERATED {
        remove_if_exists(&runtime.join(name))?;
    }

    if env.rebuild_all {
        let pkg = env.root.join("pkg");
        remove_dir_all_if_exists(&pkg.join("obj").join(env.host.dir_name()))?;
        for platform in [&env.host, &env.target] {
            let dir = platform.dir_name();
            remove_dir_all_if_exists(&pkg.join(&dir))?;
            remove_dir_all_if_exists(&pkg.join(format!("{dir}_race")))?;
        }
        remove_dir_all_if_exists(&env.tool_dir)?;
        remove_if_exists(&env.root.join("VERSION.cache"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Platform;

    fn tree() -> (tempfile::TempDir, BuildEnv) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("go");
        let env = BuildEnv::new(
            root,
            Platform::new("linux", "amd64"),
            Platform::new("linux", "arm"),
            dir.path().join("work"),
        );
        (dir, env)
    }

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "x").unwrap();
    }

    #[test]
    fn removes_generated_files_only() {
        let (_dir, env) = tree();
        let cfg = env.src_dir("cmd/go/internal/cfg");
        touch(&cfg.join("zdefaultcc.go"));
        touch(&cfg.join("zosarch.go"));
        touch(&cfg.join("cfg.go"));
        touch(&env.src_dir("cmd/cgo").join("cgo"));
        touch(&env.src_dir("cmd/cgo").join("main.go"));
        touch(&env.src_dir("runtime").join("zversion.go"));
        touch(&env.root.join("VERSION.cache"));

        clean(&env).unwrap();

        assert!(!cfg.join("zdefaultcc.go").exists());
        assert!(!cfg.join("zosarch.go").exists());
        assert!(cfg.join("cfg.go").exists());
        assert!(!env.src_dir("cmd/cgo").join("cgo").exists());
        assert!(env.src_dir("cmd/cgo").join("main.go").exists());
        assert!(!env.src_dir("runtime").join("zversion.go").exists());
        assert!(env.root.join("VERSION.cache").exists());
    }

    #[test]
    fn rebuild_all_removes_build_outputs() {
        let (_dir, mut env) = tree();
        env.rebuild_all = true;
        let pkg = env.root.join("pkg");
        for d in ["linux_amd64", "linux_arm", "linux_amd64_race", "obj/linux_amd64"] {
            touch(&pkg.join(d).join("x.a"));
        }
        touch(&env.tool("compile"));
        touch(&env.root.join("VERSION.cache"));
        touch(&pkg.join("include/textflag.h"));

        clean(&env).unwrap();

        for d in ["linux_amd64", "linux_arm", "linux_amd64_race", "obj/linux_amd64"] {
            assert!(!pkg.join(d).exists(), "{d}");
        }
        assert!(!env.tool_dir.exists());
        assert!(!env.root.join("VERSION.cache").exists());
        assert!(pkg.join("include/textflag.h").exists());
    }
}
