//! Toolchain version discovery.
//!
//! Order of precedence: a non-empty `$GOROOT/VERSION`, then the
//! `VERSION.cache` left by an earlier run, then git. The git-derived
//! string is written back to `VERSION.cache`.

use std::path::Path;

use anyhow::{Result, bail};

use crate::config::BuildEnv;
use crate::generate::write_if_changed;
use crate::tool_cmd::Job;

/// The version string for this tree.
pub fn find_version(env: &BuildEnv) -> Result<String> {
    let root = &env.root;

    if let Ok(v) = std::fs::read_to_string(root.join("VERSION")) {
        let v = v.trim_end();
        if !v.is_empty() {
            return Ok(v.to_string());
        }
    }

    let cache = root.join("VERSION.cache");
    if let Ok(v) = std::fs::read_to_string(&cache) {
        return Ok(v.trim_end().to_string());
    }

    if !is_git_repo(root) {
        bail!("FAILED: not a Git repo; must put a VERSION file in $GOROOT");
    }

    let branch = git(root, &["rev-parse", "--abbrev-ref", "HEAD"])?;
    let (mut tag, precise) = if branch.starts_with("release-branch.") {
        let range = format!("master..{branch}");
        let log = git(root, &["log", "--decorate=full", "--format=format:%d", range.as_str()])?;
        branch_tag(&branch, &log)
    } else {
        ("devel".to_string(), false)
    };
    if !precise {
        // The tag does not name HEAD; pin it with the commit and date.
        tag.push_str(&git(root, &["log", "-n", "1", "--format=format: +%h %cd", "HEAD"])?);
    }

    write_if_changed(&cache, &tag)?;
    Ok(tag)
}

/// The nearest tag in a `git log --decorate=full` listing of a release
/// branch, and whether it names the newest commit.
pub fn branch_tag(branch: &str, log: &str) -> (String, bool) {
    const TAG_REF: &str = " refs/tags/";
    for (row, line) in log.lines().enumerate() {
        let Some(i) = line.find(TAG_REF) else {
            continue;
        };
        let rest = &line[i + TAG_REF.len()..];
        let Some(end) = rest.find([',', ')']) else {
            continue;
        };
        return (rest[..end].to_string(), row == 0);
    }
    (branch.to_string(), false)
}

fn is_git_repo(root: &Path) -> bool {
    let Ok(dir) = Job::new("git").args(["rev-parse", "--git-dir"]).dir(root).run() else {
        return false;
    };
    let dir = Path::new(dir.trim_end());
    if dir.is_absolute() {
        dir.is_dir()
    } else {
        root.join(dir).is_dir()
    }
}

fn git(root: &Path, args: &[&str]) -> Result<String> {
    let out = Job::new("git").args(args).dir(root).run()?;
    Ok(out.trim_end().to_string())
}
