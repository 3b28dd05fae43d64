//! File-hash manifest (`md5sums`).
//!
//! The manifest lists every regular file of a staged tree with its MD5
//! digest. It is embedded verbatim in the control archive, so it must
//! describe the data archive exactly: paths are sorted byte-wise and any
//! unreadable file aborts the whole walk.

use crate::error::{IoResultExt, PackageError, Result};
use md5::{Digest, Md5};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Component, Path};
use tracing::debug;
use walkdir::WalkDir;

/// Name of the manifest member inside the control archive.
pub const MANIFEST_FILE_NAME: &str = "md5sums";

/// Relative path → hex MD5 digest, ordered by path bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: BTreeMap<String, String>,
}

impl Manifest {
    /// Hash every regular file below `root`.
    ///
    /// Symlinks and directories are skipped. The result does not depend on
    /// the order in which the filesystem yields entries.
    pub fn from_dir(root: &Path) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for ent in WalkDir::new(root).follow_links(false) {
            let ent = ent.io_context(|| format!("walking {}", root.display()))?;
            if !ent.file_type().is_file() {
                continue;
            }
            let rel = relative_posix_path(root, ent.path())?;
            let digest = md5_file(ent.path())?;
            debug!(path = %rel, %digest, "hashed");
            entries.insert(rel, digest);
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Digest recorded for `path`, if listed.
    pub fn get(&self, path: &str) -> Option<&str> {
        self.entries.get(path).map(String::as_str)
    }

    /// Entries in manifest order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(p, d)| (p.as_str(), d.as_str()))
    }

    /// Render as `<digest>  <path>\n` lines.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (path, digest) in &self.entries {
            out.push_str(digest);
            out.push_str("  ");
            out.push_str(path);
            out.push('\n');
        }
        out
    }

    /// Write the rendered manifest to `path`.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        fs::write(path, self.render()).io_context(|| format!("writing {}", path.display()))
    }
}

/// Hex MD5 digest of a file's contents.
pub fn md5_file(path: &Path) -> Result<String> {
    let f = File::open(path).io_context(|| format!("opening {}", path.display()))?;
    let mut r = BufReader::new(f);
    let mut hasher = Md5::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = r
            .read(&mut buf)
            .io_context(|| format!("reading {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// `path` relative to `root`, joined with `/`.
///
/// Fails for paths outside `root` and for names that are not UTF-8, since
/// the manifest is a text file.
pub(crate) fn relative_posix_path(root: &Path, path: &Path) -> Result<String> {
    let rel = path.strip_prefix(root).map_err(|_| {
        PackageError::validation(
            "path",
            format!("{} is not under {}", path.display(), root.display()),
        )
    })?;

    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str().ok_or_else(|| {
                    PackageError::validation(
                        "path",
                        format!("{} is not valid UTF-8", path.display()),
                    )
                })?;
                parts.push(part);
            }
            Component::CurDir => {}
            _ => {
                return Err(PackageError::validation(
                    "path",
                    format!("unexpected component in {}", rel.display()),
                ))
            }
        }
    }
    Ok(parts.join("/"))
}
