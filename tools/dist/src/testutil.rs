//! Fake source trees and toolchains for tests.
//!
//! The fake compiler, assembler and linker are shell scripts that log
//! every invocation to a file and write a plausible output. Scripts are
//! installed by a child `cp` so that no descriptor for an executable is
//! ever open in the test process while other threads fork.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, SystemTime};

use tempfile::TempDir;

use crate::config::BuildEnv;
use crate::platform::Platform;

const COMPILE: &str = r#"#!/bin/sh
out=; pkg=
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out=$2; shift ;;
    -p) pkg=$2; shift ;;
    -asmhdr) : > "$2"; shift ;;
    -symabis) shift ;;
  esac
  shift
done
echo "start $pkg" >> @LOG@
sleep 0.1
if [ "$pkg" = bad ]; then echo "bad.go:1: syntax error"; exit 1; fi
printf '!<arch>\n' > "$out"
echo "end $pkg" >> @LOG@
"#;

const ASM: &str = r#"#!/bin/sh
out=; mode=asm
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out=$2; shift ;;
    -I|-D) shift ;;
    -gensymabis) mode=symabis ;;
  esac
  shift
done
echo "$mode $(basename "$out")" >> @LOG@
echo obj > "$out"
"#;

const LINK: &str = r#"#!/bin/sh
out=
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out=$2; shift ;;
  esac
  shift
done
echo "link $(basename "$out")" >> @LOG@
echo bin > "$out"
"#;

/// Install `body` as an executable script at `path`.
pub fn install_script(path: &Path, body: &str) {
    let src = path.with_extension("src");
    fs::write(&src, body).unwrap();
    let status = Command::new("/bin/sh")
        .args(["-c", "cp \"$0\" \"$1\" && chmod 755 \"$1\""])
        .arg(&src)
        .arg(path)
        .status()
        .unwrap();
    assert!(status.success());
}

/// A throwaway `$GOROOT` with fake tools in its tool directory.
pub struct FakeTree {
    _dir: TempDir,
    pub env: BuildEnv,
    pub log: PathBuf,
}

impl FakeTree {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("go");
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/all.bash"), "#!/bin/sh\n").unwrap();
        fs::write(root.join("VERSION"), "go1.12-test\n").unwrap();
        let work = dir.path().join("work");
        fs::create_dir_all(&work).unwrap();

        let p = Platform::new("linux", "amd64");
        let env = BuildEnv::new(root, p.clone(), p, work);
        fs::create_dir_all(&env.tool_dir).unwrap();

        let log = dir.path().join("log");
        fs::write(&log, "").unwrap();
        let tree = Self { _dir: dir, env, log };
        for (name, body) in [("compile", COMPILE), ("asm", ASM), ("link", LINK)] {
            tree.tool(name, body);
        }
        tree
    }

    /// Install a tool script; `@LOG@` expands to the log path.
    pub fn tool(&self, name: &str, body: &str) {
        let body = body.replace("@LOG@", &self.log.display().to_string());
        install_script(&self.env.tool(name), &body);
    }

    /// Write source files for target `dir`, dated an hour ago.
    pub fn package(&self, dir: &str, files: &[(&str, &str)]) {
        let src = self.env.src_dir(dir);
        fs::create_dir_all(&src).unwrap();
        let old = SystemTime::now() - Duration::from_secs(3600);
        for (name, body) in files {
            let path = src.join(name);
            fs::write(&path, body).unwrap();
            fs::File::options()
                .write(true)
                .open(&path)
                .unwrap()
                .set_modified(old)
                .unwrap();
        }
    }

    pub fn log_lines(&self) -> Vec<String> {
        fs::read_to_string(&self.log)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn position(&self, line: &str) -> usize {
        let lines = self.log_lines();
        lines
            .iter()
            .position(|l| l == line)
            .unwrap_or_else(|| panic!("{line:?} not in {lines:?}"))
    }
}
