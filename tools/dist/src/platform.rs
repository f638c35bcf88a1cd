//! Known operating systems, architectures, and the supported platform table.

use std::fmt;

use anyhow::{Context, Result};
use serde::Serialize;

/// The known architectures.
pub const KNOWN_ARCHES: &[&str] = &[
    "386", "amd64", "amd64p32", "arm", "arm64", "mips", "mipsle", "mips64", "mips64le", "ppc64",
    "ppc64le", "riscv64", "s390x", "sparc64", "wasm",
];

/// The known operating systems.
pub const KNOWN_OSES: &[&str] = &[
    "darwin",
    "dragonfly",
    "js",
    "linux",
    "android",
    "solaris",
    "freebsd",
    "nacl",
    "netbsd",
    "openbsd",
    "plan9",
    "windows",
    "aix",
];

/// Every supported `os/arch` pair and whether cgo is enabled on it.
pub const PLATFORMS: &[(&str, bool)] = &[
    ("aix/ppc64", false),
    ("darwin/386", true),
    ("darwin/amd64", true),
    ("darwin/arm", true),
    ("darwin/arm64", true),
    ("dragonfly/amd64", true),
    ("freebsd/386", true),
    ("freebsd/amd64", true),
    ("freebsd/arm", false),
    ("linux/386", true),
    ("linux/amd64", true),
    ("linux/arm", true),
    ("linux/arm64", true),
    ("linux/ppc64", false),
    ("linux/ppc64le", true),
    ("linux/mips", true),
    ("linux/mipsle", true),
    ("linux/mips64", true),
    ("linux/mips64le", true),
    ("linux/riscv64", true),
    ("linux/s390x", true),
    ("linux/sparc64", true),
    ("android/386", true),
    ("android/amd64", true),
    ("android/arm", true),
    ("android/arm64", true),
    ("js/wasm", false),
    ("nacl/386", false),
    ("nacl/amd64p32", false),
    ("nacl/arm", false),
    ("netbsd/386", true),
    ("netbsd/amd64", true),
    ("netbsd/arm", true),
    ("openbsd/386", true),
    ("openbsd/amd64", true),
    ("openbsd/arm", true),
    ("plan9/386", false),
    ("plan9/amd64", false),
    ("plan9/arm", false),
    ("solaris/amd64", true),
    ("windows/386", true),
    ("windows/amd64", true),
    ("windows/arm", false),
];

/// Platforms that are supported but not complete yet; hidden from `list`.
pub const INCOMPLETE: &[&str] = &["linux/riscv64", "linux/sparc64"];

/// An (OS, architecture) pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl Platform {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// The platform of the running `dist` binary.
    pub fn native() -> Self {
        let os = match std::env::consts::OS {
            "macos" => "darwin",
            other => other,
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "x86" => "386",
            "aarch64" => "arm64",
            "powerpc64" => "ppc64",
            "mips64" if cfg!(target_endian = "little") => "mips64le",
            "mips" if cfg!(target_endian = "little") => "mipsle",
            other => other,
        };
        Self::new(os, arch)
    }

    /// `os_arch`, the directory-name form used under `pkg/`.
    pub fn dir_name(&self) -> String {
        format!("{}_{}", self.os, self.arch)
    }

    /// Whether cgo is enabled by default on this platform.
    pub fn cgo_enabled(&self) -> bool {
        let key = self.to_string();
        PLATFORMS
            .iter()
            .find(|(p, _)| *p == key)
            .is_some_and(|(_, cgo)| *cgo)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}

/// Whether building for `target_os` also satisfies files tagged `tag_os`.
///
/// The alias is one-directional: an android build accepts linux files,
/// a linux build does not accept android files.
pub fn os_satisfies(target_os: &str, tag_os: &str) -> bool {
    target_os == tag_os || (target_os == "android" && tag_os == "linux")
}

pub fn is_known_os(os: &str) -> bool {
    KNOWN_OSES.contains(&os)
}

pub fn is_known_arch(arch: &str) -> bool {
    KNOWN_ARCHES.contains(&arch)
}

/// Supported, complete platforms in sorted order.
pub fn listed_platforms() -> Vec<(&'static str, bool)> {
    let mut plats: Vec<(&str, bool)> = PLATFORMS
        .iter()
        .copied()
        .filter(|(p, _)| !INCOMPLETE.contains(p))
        .collect();
    plats.sort_by(|a, b| a.0.cmp(b.0));
    plats
}

/// One row of `dist list --json`.
#[derive(Debug, Serialize)]
pub struct PlatformInfo {
    #[serde(rename = "GOOS")]
    pub os: &'static str,
    #[serde(rename = "GOARCH")]
    pub arch: &'static str,
    #[serde(rename = "CgoSupported")]
    pub cgo_supported: bool,
}

/// The listed platforms as tab-indented JSON.
pub fn list_json() -> Result<String> {
    let rows: Vec<PlatformInfo> = listed_platforms()
        .into_iter()
        .map(|(p, cgo)| {
            let (os, arch) = p.split_once('/').unwrap_or((p, ""));
            PlatformInfo { os, arch, cgo_supported: cgo }
        })
        .collect();

    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
    rows.serialize(&mut ser).context("json marshal error")?;
    String::from_utf8(out).context("json output is not UTF-8")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_listing_uses_go_field_names() {
        let text = list_json().unwrap();
        assert!(text.starts_with("[\n\t{\n\t\t\"GOOS\": \"aix\",\n\t\t\"GOARCH\": \"ppc64\",\n"));
        let rows: Vec<serde_json::Value> = serde_json::from_str(&text).unwrap();
        assert_eq!(rows.len(), listed_platforms().len());
        let linux = rows
            .iter()
            .find(|r| r["GOOS"] == "linux" && r["GOARCH"] == "amd64")
            .unwrap();
        assert_eq!(linux["CgoSupported"], true);
    }

    #[test]
    fn android_alias_is_one_way() {
        assert!(os_satisfies("android", "linux"));
        assert!(!os_satisfies("linux", "android"));
        assert!(os_satisfies("linux", "linux"));
    }

    #[test]
    fn listing_hides_incomplete_ports() {
        let plats = listed_platforms();
        assert!(plats.iter().all(|(p, _)| *p != "linux/riscv64"));
        assert!(plats.windows(2).all(|w| w[0].0 < w[1].0));
        assert!(plats.contains(&("linux/amd64", true)));
    }

    #[test]
    fn cgo_table_lookup() {
        assert!(Platform::new("linux", "amd64").cgo_enabled());
        assert!(!Platform::new("js", "wasm").cgo_enabled());
        assert!(!Platform::new("nowhere", "amd64").cgo_enabled());
    }
}
