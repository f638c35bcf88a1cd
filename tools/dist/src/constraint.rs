//! Build-constraint evaluation.
//!
//! Decides whether a source file takes part in a build for a given target
//! platform, from its file name (`_os`, `_arch`, `_test` segments) and from
//! the `// +build` directive comments at the top of the file.

use std::path::Path;

use anyhow::{Context, Result};

use crate::platform::{self, Platform};

/// Compiler-name tag that is always satisfied.
const COMPILER_TAG: &str = "gc";

/// Tag that marks files belonging to the bootstrap build.
const BOOTSTRAP_TAG: &str = "cmd_go_bootstrap";

/// Legacy release tag that is always satisfied.
const LEGACY_VERSION_TAG: &str = "go1.1";

/// Command directories whose `package main` files are still compiled.
const MAIN_PACKAGE_DIRS: &[&str] = &["cmd/go", "cmd/cgo"];

/// Reads `file` and reports whether it should be built as part of `dir`.
pub fn should_build_file(file: &Path, dir: &str, target: &Platform) -> Result<bool> {
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if !name_matches(&name, target) {
        return Ok(false);
    }
    let bytes = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    Ok(contents_match(&String::from_utf8_lossy(&bytes), dir, target))
}

/// Whether the file name alone allows the file into the build.
pub fn name_matches(name: &str, target: &Platform) -> bool {
    let excluded_by = |tokens: &[&str], wanted: &str, satisfies: fn(&str, &str) -> bool| {
        tokens
            .iter()
            .filter(|tok| !satisfies(wanted, tok))
            .any(|tok| has_suffix_segment(name, tok))
    };

    if excluded_by(platform::KNOWN_OSES, &target.os, platform::os_satisfies) {
        return false;
    }
    if excluded_by(platform::KNOWN_ARCHES, &target.arch, |a, b| a == b) {
        return false;
    }

    !name.contains("_test")
}

/// Whether `name` contains `_<tok>` followed by `.`, `_`, or the end.
fn has_suffix_segment(name: &str, tok: &str) -> bool {
    let bytes = name.as_bytes();
    name.match_indices(tok).any(|(i, _)| {
        if i == 0 || bytes[i - 1] != b'_' {
            return false;
        }
        let end = i + tok.len();
        end == bytes.len() || bytes[end] == b'.' || bytes[end] == b'_'
    })
}

/// Whether the package clause and `+build` lines allow the file.
///
/// Scanning stops at the first line that is not a comment.
pub fn contents_match(contents: &str, dir: &str, target: &Platform) -> bool {
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let code = match line.find("//") {
            Some(i) if i > 0 => line[..i].trim(),
            _ => line,
        };
        if code == "package documentation" {
            return false;
        }
        if code == "package main" && !MAIN_PACKAGE_DIRS.contains(&dir) {
            return false;
        }

        let Some(comment) = line.strip_prefix("//") else {
            break;
        };
        if !comment.contains("+build") {
            continue;
        }
        let mut fields = comment.split_whitespace();
        if fields.next() != Some("+build") {
            continue;
        }
        if !fields.any(|group| match_group(group, target)) {
            return false;
        }
    }
    true
}

/// A comma-separated group matches when every tag in it matches.
pub fn match_group(group: &str, target: &Platform) -> bool {
    group.split(',').all(|tag| match_tag(tag, target))
}

/// Whether a single tag (`x` or `!x`) holds for `target`.
pub fn match_tag(tag: &str, target: &Platform) -> bool {
    if tag.is_empty() {
        return false;
    }
    if let Some(rest) = tag.strip_prefix('!') {
        if rest.is_empty() || rest.starts_with('!') {
            return false;
        }
        return !match_tag(rest, target);
    }
    tag == COMPILER_TAG
        || tag == BOOTSTRAP_TAG
        || tag == LEGACY_VERSION_TAG
        || tag == target.arch
        || platform::os_satisfies(&target.os, tag)
}
