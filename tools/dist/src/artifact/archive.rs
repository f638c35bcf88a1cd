//! Unix `ar` archive packing.
//!
//! The compiler writes each package as an archive; assembled objects are
//! appended to it as extra members. Each member is a 60-byte text header
//! followed by the raw bytes, padded to an even length:
//!
//! ```text
//! name     16  left-justified, truncated
//! mtime    12  always 0
//! uid       6  always 0
//! gid       6  always 0
//! mode      8  octal, always 644
//! size     10  decimal byte count
//! end       2  "`\n"
//! ```

use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};

/// Size of a member header in bytes.
pub const HEADER_LEN: usize = 60;

const MEMBER_MODE: u32 = 0o644;

/// Member name for an object path: the last element after either `/` or `\`.
pub fn member_name(path: &str) -> &str {
    let i = path.rfind(['/', '\\']).map_or(0, |i| i + 1);
    &path[i..]
}

/// The header for a member called `name` holding `len` bytes.
pub fn header(name: &str, len: usize) -> String {
    let name: String = name.chars().take(16).collect();
    let mut h = String::with_capacity(HEADER_LEN);
    let _ = write!(h, "{name:<16}{:<12}{:<6}{:<6}{MEMBER_MODE:<8o}{len:<10}`\n", 0, 0, 0);
    h
}

/// Append one member to `buf`.
pub fn append_member(buf: &mut Vec<u8>, name: &str, data: &[u8]) {
    buf.extend_from_slice(header(name, data.len()).as_bytes());
    buf.extend_from_slice(data);
    if data.len() % 2 != 0 {
        buf.push(0);
    }
}

/// Write `base` (if any) followed by every file in `extra` to `dst`.
///
/// The whole archive is assembled in memory and moved into place in one
/// rename, so a failure never leaves a partial file at `dst`.
pub fn pack(dst: &Path, base: Option<&Path>, extra: &[impl AsRef<Path>]) -> Result<()> {
    let mut buf = match base {
        Some(base) => std::fs::read(base)
            .with_context(|| format!("reading archive {}", base.display()))?,
        None => Vec::new(),
    };

    for file in extra {
        let file = file.as_ref();
        let data = std::fs::read(file)
            .with_context(|| format!("reading object {}", file.display()))?;
        let path = file.to_string_lossy();
        append_member(&mut buf, member_name(&path), &data);
    }

    let mut tmp = dst.as_os_str().to_owned();
    tmp.push(".tmp");
    std::fs::write(&tmp, &buf).with_context(|| format!("writing {}", dst.display()))?;
    std::fs::rename(&tmp, dst).with_context(|| format!("writing {}", dst.display()))?;
    Ok(())
}

/// One member of an archive, as read back by [`members`].
#[cfg(test)]
#[derive(Debug, PartialEq, Eq)]
pub struct Member {
    pub name: String,
    pub size: usize,
    /// Offset of the member's data.
    pub offset: usize,
}

/// Parse the member table of an archive, with or without the global
/// `!<arch>\n` magic.
#[cfg(test)]
pub fn members(data: &[u8]) -> Result<Vec<Member>> {
    use anyhow::{bail, ensure};

    let mut pos = if data.starts_with(b"!<arch>\n") { 8 } else { 0 };
    let mut out = Vec::new();
    while pos < data.len() {
        ensure!(pos + HEADER_LEN <= data.len(), "truncated header at {pos}");
        let hdr = &data[pos..pos + HEADER_LEN];
        if &hdr[58..60] != b"`\n" {
            bail!("bad header terminator at {pos}");
        }
        let field = |a: usize, b: usize| String::from_utf8_lossy(&hdr[a..b]).trim_end().to_string();
        let name = field(0, 16);
        let size: usize = field(48, 58).parse().context("bad member size")?;
        let offset = pos + HEADER_LEN;
        ensure!(offset + size <= data.len(), "truncated member {name}");
        out.push(Member { name, size, offset });
        pos = offset + size + size % 2;
    }
    Ok(out)
}
