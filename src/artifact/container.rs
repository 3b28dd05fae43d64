//! `.deb` container (`ar` archive) writing and reading.
//!
//! A binary package is an `ar` archive with exactly three members, in
//! order: `debian-binary`, `control.tar.gz`, `data.tar.gz`. Members use the
//! common `ar` header layout:
//!
//! ```text
//! offset  size  field
//!      0    16  name (space padded)
//!     16    12  mtime (decimal)
//!     28     6  uid (decimal)
//!     34     6  gid (decimal)
//!     40     8  mode (octal)
//!     48    10  size (decimal)
//!     58     2  "`\n"
//! ```
//!
//! Member data is padded with `\n` to an even length.

use crate::error::{IoResultExt, PackageError, Result};
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::info;

pub const AR_MAGIC: &[u8; 8] = b"!<arch>\n";
pub const DEBIAN_BINARY_MEMBER: &str = "debian-binary";
pub const CONTROL_MEMBER: &str = "control.tar.gz";
pub const DATA_MEMBER: &str = "data.tar.gz";
/// Contents of the `debian-binary` member.
pub const FORMAT_VERSION: &[u8] = b"2.0\n";

const HEADER_LEN: usize = 60;
const NAME_LEN: usize = 16;
const HEADER_END: &[u8; 2] = b"`\n";
const MEMBER_MODE: u32 = 0o100644;

/// A member read back from an `ar` archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArMember {
    pub name: String,
    pub data: Vec<u8>,
}

/// Write an `ar` archive with `members` in the given order.
pub fn write_ar<W: Write>(writer: &mut W, members: &[(&str, &[u8])], mtime: u64) -> Result<()> {
    writer
        .write_all(AR_MAGIC)
        .io_context(|| "writing ar magic".to_string())?;
    for (name, data) in members {
        let header = member_header(name, data.len() as u64, mtime)?;
        writer
            .write_all(&header)
            .io_context(|| format!("writing ar header for {name}"))?;
        writer
            .write_all(data)
            .io_context(|| format!("writing ar member {name}"))?;
        if data.len() % 2 == 1 {
            writer
                .write_all(b"\n")
                .io_context(|| format!("padding ar member {name}"))?;
        }
    }
    Ok(())
}

/// Write the final package to `output`.
///
/// The archive is written to a temporary file beside `output` and renamed
/// into place only after every byte is on disk, so `output` is either
/// absent, its previous contents, or the complete new package.
pub fn write_package(output: &Path, control: &[u8], data: &[u8], mtime: u64) -> Result<()> {
    let parent = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::env::current_dir().io_context(|| "resolving current directory".to_string())?,
    };
    fs::create_dir_all(&parent)
        .io_context(|| format!("Failed to create directory: {}", parent.display()))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".debforge-")
        .suffix(".deb.tmp")
        .tempfile_in(&parent)
        .io_context(|| format!("creating temporary file in {}", parent.display()))?;

    let members: [(&str, &[u8]); 3] = [
        (DEBIAN_BINARY_MEMBER, FORMAT_VERSION),
        (CONTROL_MEMBER, control),
        (DATA_MEMBER, data),
    ];
    write_ar(tmp.as_file_mut(), &members, mtime)?;
    tmp.as_file()
        .sync_all()
        .io_context(|| format!("syncing {}", tmp.path().display()))?;

    tmp.persist(output)
        .map_err(|e| e.error)
        .io_context(|| format!("publishing {}", output.display()))?;

    info!(path = %output.display(), "wrote package");
    Ok(())
}

/// Read every member of the `ar` archive at `path`.
pub fn read_members(path: &Path) -> Result<Vec<ArMember>> {
    let bytes = fs::read(path).io_context(|| format!("reading {}", path.display()))?;
    parse_ar(&bytes).map_err(|reason| PackageError::Archive {
        path: path.to_path_buf(),
        reason,
    })
}

/// Parse an in-memory `ar` archive.
pub fn parse_ar(bytes: &[u8]) -> std::result::Result<Vec<ArMember>, String> {
    let mut rest = bytes
        .strip_prefix(&AR_MAGIC[..])
        .ok_or_else(|| "missing !<arch> magic".to_string())?;

    let mut members = Vec::new();
    while !rest.is_empty() {
        if rest.len() < HEADER_LEN {
            return Err(format!("truncated header after {} members", members.len()));
        }
        let (header, body) = rest.split_at(HEADER_LEN);
        if &header[58..60] != HEADER_END {
            return Err(format!("bad header terminator for member {}", members.len()));
        }

        let name = std::str::from_utf8(&header[..NAME_LEN])
            .map_err(|_| "member name is not UTF-8".to_string())?
            .trim_end()
            .trim_end_matches('/')
            .to_string();
        let size: usize = std::str::from_utf8(&header[48..58])
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .ok_or_else(|| format!("bad size field for member {name}"))?;

        if body.len() < size {
            return Err(format!("member {name} is truncated"));
        }
        let (data, tail) = body.split_at(size);
        members.push(ArMember {
            name,
            data: data.to_vec(),
        });

        rest = if size % 2 == 1 && !tail.is_empty() {
            &tail[1..]
        } else {
            tail
        };
    }
    Ok(members)
}

fn member_header(name: &str, size: u64, mtime: u64) -> Result<Vec<u8>> {
    if name.is_empty() || name.len() > NAME_LEN {
        return Err(PackageError::validation(
            "member name",
            format!("'{name}' must be 1 to {NAME_LEN} bytes"),
        ));
    }
    let header = format!(
        "{name:<16}{mtime:<12}{uid:<6}{gid:<6}{mode:<8o}{size:<10}`\n",
        uid = 0,
        gid = 0,
        mode = MEMBER_MODE,
    );
    if header.len() != HEADER_LEN {
        return Err(PackageError::validation(
            "member header",
            format!("field overflow for member {name}"),
        ));
    }
    Ok(header.into_bytes())
}
