//! Staleness tracking by modification time.
//!
//! A target is stale when its artifact is missing, when any participating
//! source is newer than the artifact, or when a full rebuild is forced.
//! Sources that do not exist yet are not an error here: they are recorded
//! as missing and resolved later, only if the target actually needs work.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use crate::constraint;
use crate::platform::Platform;

/// Source suffixes that take part in a build.
pub const SOURCE_SUFFIXES: &[&str] = &[".s", ".go"];

/// Modification time of `path`, or `None` if it cannot be read.
pub fn mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Whether a file modified at `source` is newer than a target at `target`.
///
/// A missing source is never newer; any existing source is newer than a
/// missing target.
pub fn is_newer(source: Option<SystemTime>, target: Option<SystemTime>) -> bool {
    match (source, target) {
        (Some(s), Some(t)) => s > t,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

/// Drop names that look like editor or scratch files.
///
/// Hidden files are always dropped; a leading `_` only disqualifies
/// `.go` files since some real assembly helpers start with `_`.
pub fn keep_dir_entry(name: &str) -> bool {
    !name.starts_with('.') && !(name.starts_with('_') && name.ends_with(".go"))
}

/// The sources of one target, classified and checked against its artifact.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SourceSet {
    /// Every participating file, in input order.
    pub files: Vec<PathBuf>,
    pub go_files: Vec<PathBuf>,
    pub asm_files: Vec<PathBuf>,
    /// Participating files that do not exist on disk.
    pub missing: Vec<PathBuf>,
    /// Whether the artifact needs rebuilding.
    pub stale: bool,
}

impl SourceSet {
    /// Filter and classify `files` for target `dir`, building for `target`,
    /// against the artifact at `artifact`.
    pub fn scan(
        files: Vec<PathBuf>,
        dir: &str,
        target: &Platform,
        artifact: &Path,
        rebuild_all: bool,
    ) -> Result<Self> {
        let artifact_time = mtime(artifact);
        let mut set = SourceSet {
            stale: rebuild_all || artifact_time.is_none(),
            ..Self::default()
        };

        for path in files {
            let name = path.to_string_lossy();
            if !SOURCE_SUFFIXES.iter().any(|suf| name.ends_with(suf)) {
                continue;
            }
            let t = mtime(&path);
            // Archives carry members for several platforms; never filter them.
            if t.is_some()
                && !name.ends_with(".a")
                && !constraint::should_build_file(&path, dir, target)?
            {
                continue;
            }

            if name.ends_with(".go") {
                set.go_files.push(path.clone());
            } else if name.ends_with(".s") {
                set.asm_files.push(path.clone());
            }
            if is_newer(t, artifact_time) {
                set.stale = true;
            }
            if t.is_none() {
                set.missing.push(path.clone());
            }
            set.files.push(path);
        }

        // Nothing to compile means nothing to rebuild.
        if set.files.is_empty() {
            set.stale = false;
        }
        Ok(set)
    }

    /// Whether the target has any work to do.
    pub fn needs_build(&self) -> bool {
        !self.files.is_empty() && self.stale
    }
}

/// SHA-256 of a file's contents as a hex string.
pub fn hash_file(path: &Path) -> Result<String> {
    let data = fs::read(path)
        .with_context(|| format!("failed to read file for hashing: {}", path.display()))?;
    Ok(hash_bytes(&data))
}

pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn set_mtime(path: &Path, t: SystemTime) {
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(t)
            .unwrap();
    }

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let p = dir.join(name);
        fs::write(&p, body).unwrap();
        p
    }

    fn linux() -> Platform {
        Platform::new("linux", "amd64")
    }

    #[test]
    fn newer_ordering() {
        let t = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        let later = t + Duration::from_secs(1);
        assert!(is_newer(Some(later), Some(t)));
        assert!(!is_newer(Some(t), Some(t)));
        assert!(is_newer(Some(t), None));
        assert!(!is_newer(None, None));
        assert!(!is_newer(None, Some(t)));
    }

    #[test]
    fn editor_files_are_dropped() {
        assert!(!keep_dir_entry(".x.go.swp"));
        assert!(!keep_dir_entry("_scratch.go"));
        assert!(keep_dir_entry("_helper.s"));
        assert!(keep_dir_entry("main.go"));
    }

    #[test]
    fn staleness_follows_mtimes() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a.go", "package p\n");
        let s = write(dir.path(), "asm_amd64.s", "TEXT x(SB)\n");
        let art = write(dir.path(), "p.a", "!<arch>\n");

        let base = SystemTime::now() - Duration::from_secs(3600);
        set_mtime(&a, base);
        set_mtime(&s, base);
        set_mtime(&art, base + Duration::from_secs(10));

        let files = vec![a.clone(), s.clone()];
        let set = SourceSet::scan(files.clone(), "p", &linux(), &art, false).unwrap();
        assert_eq!(set.go_files, vec![a.clone()]);
        assert_eq!(set.asm_files, vec![s.clone()]);
        assert!(!set.stale);
        assert!(!set.needs_build());

        let forced = SourceSet::scan(files.clone(), "p", &linux(), &art, true).unwrap();
        assert!(forced.needs_build());

        set_mtime(&s, base + Duration::from_secs(20));
        let set = SourceSet::scan(files, "p", &linux(), &art, false).unwrap();
        assert!(set.needs_build());
    }

    #[test]
    fn missing_artifact_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a.go", "package p\n");
        let set = SourceSet::scan(vec![a], "p", &linux(), &dir.path().join("p.a"), false).unwrap();
        assert!(set.needs_build());
    }

    #[test]
    fn filtered_and_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a.go", "package p\n");
        let win = write(dir.path(), "a_windows.go", "package p\n");
        let doc = write(dir.path(), "README", "hi");
        let generated = dir.path().join("zversion.go");

        let set = SourceSet::scan(
            vec![a.clone(), win, doc, generated.clone()],
            "p",
            &linux(),
            &dir.path().join("p.a"),
            false,
        )
        .unwrap();
        assert_eq!(set.files, vec![a.clone(), generated.clone()]);
        assert_eq!(set.go_files, vec![a, generated.clone()]);
        assert_eq!(set.missing, vec![generated]);
    }

    #[test]
    fn no_sources_means_up_to_date() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("p.a");
        let set = SourceSet::scan(Vec::new(), "p", &linux(), &artifact, true).unwrap();
        assert!(!set.needs_build());
    }

    #[test]
    fn hashes_are_stable() {
        assert_eq!(
            hash_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        let dir = tempfile::tempdir().unwrap();
        let p = write(dir.path(), "f", "abc");
        assert_eq!(hash_file(&p).unwrap(), hash_bytes(b"abc"));
    }
}
