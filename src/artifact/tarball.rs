//! Deterministic tar archive creation.
//!
//! Entries are emitted in sorted order with ownership normalised to
//! `root:root` (uid/gid 0) and every timestamp set to a fixed epoch, so the
//! same tree always yields the same bytes regardless of who built it.

use crate::error::{IoResultExt, Result};
use crate::manifest::relative_posix_path;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tar::{Builder as TarBuilder, EntryType, Header};
use tracing::warn;
use walkdir::WalkDir;

/// Width of the name and link-name fields in a tar header.
const NAME_FIELD_LEN: usize = 100;
/// Name of GNU long-name and long-link records.
const LONG_LINK_NAME: &[u8] = b"././@LongLink";

/// How entries are laid out in an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TarOptions {
    /// Emit a `./` root entry and prefix every path with `./`, as package
    /// managers expect for control and data members.
    pub dot_prefix: bool,
    /// Modification time stamped on every entry.
    pub mtime: u64,
}

impl TarOptions {
    /// Layout for `control.tar.gz` and `data.tar.gz`.
    pub fn package(mtime: u64) -> Self {
        Self {
            dot_prefix: true,
            mtime,
        }
    }

    /// Bare relative paths at epoch 0 (cache archives).
    pub fn plain() -> Self {
        Self {
            dot_prefix: false,
            mtime: 0,
        }
    }
}

/// Build a gzip-compressed tar of `src_dir` in memory.
pub fn build_tar_gz(src_dir: &Path, opts: &TarOptions) -> Result<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::best());
    let mut builder = TarBuilder::new(encoder);
    append_tree(&mut builder, src_dir, opts)?;

    let encoder = builder
        .into_inner()
        .io_context(|| format!("finalizing tar of {}", src_dir.display()))?;
    encoder
        .finish()
        .io_context(|| format!("compressing {}", src_dir.display()))
}

/// Write a zstd-compressed tar of `src_dir` to `out_path`.
pub fn create_tar_zst(src_dir: &Path, out_path: &Path) -> Result<()> {
    let out = File::create(out_path)
        .io_context(|| format!("Failed to create {}", out_path.display()))?;
    let encoder = zstd::stream::Encoder::new(out, 3)
        .io_context(|| format!("Failed to start zstd stream for {}", out_path.display()))?;
    let mut builder = TarBuilder::new(encoder);
    append_tree(&mut builder, src_dir, &TarOptions::plain())?;

    let encoder = builder
        .into_inner()
        .io_context(|| "Failed to finalize tar builder".to_string())?;
    let file = encoder
        .finish()
        .io_context(|| format!("Failed to finish zstd stream for {}", out_path.display()))?;
    file.sync_all()
        .io_context(|| format!("Failed to sync {}", out_path.display()))?;
    Ok(())
}

/// Extract a zstd-compressed tar into `dest`.
pub fn unpack_tar_zst(archive: &Path, dest: &Path) -> Result<()> {
    let f = File::open(archive).io_context(|| format!("Failed to open {}", archive.display()))?;
    let decoder = zstd::stream::Decoder::new(f)
        .io_context(|| format!("Failed to read zstd stream {}", archive.display()))?;
    let mut tar = tar::Archive::new(decoder);
    tar.unpack(dest)
        .io_context(|| format!("Failed to unpack {}", archive.display()))
}

/// Append every entry below `src_dir` to `builder`.
///
/// Siblings are visited in file-name order. Regular files, directories,
/// and symlinks are stored; sockets, fifos, and devices are skipped.
pub fn append_tree<W: Write>(
    builder: &mut TarBuilder<W>,
    src_dir: &Path,
    opts: &TarOptions,
) -> Result<()> {
    if opts.dot_prefix {
        let md = fs::symlink_metadata(src_dir)
            .io_context(|| format!("Failed to stat {}", src_dir.display()))?;
        let mut header = normalized_header(EntryType::Directory, mode_of(&md), opts.mtime, 0)?;
        append_named(builder, &mut header, "./", None, io::empty())?;
    }

    for ent in WalkDir::new(src_dir)
        .follow_links(false)
        .sort_by_file_name()
        .min_depth(1)
    {
        let ent = ent.io_context(|| format!("walking {}", src_dir.display()))?;
        let rel = relative_posix_path(src_dir, ent.path())?;
        let name = if opts.dot_prefix {
            format!("./{rel}")
        } else {
            rel
        };

        let md = ent
            .metadata()
            .io_context(|| format!("Failed to stat {}", ent.path().display()))?;
        let ft = ent.file_type();

        if ft.is_dir() {
            let mut header = normalized_header(EntryType::Directory, mode_of(&md), opts.mtime, 0)?;
            append_named(builder, &mut header, &format!("{name}/"), None, io::empty())?;
        } else if ft.is_symlink() {
            let target = fs::read_link(ent.path())
                .io_context(|| format!("Failed to read symlink {}", ent.path().display()))?;
            let mut header = normalized_header(EntryType::Symlink, 0o777, opts.mtime, 0)?;
            let target = target.as_os_str().as_bytes();
            append_named(builder, &mut header, &name, Some(target), io::empty())?;
        } else if ft.is_file() {
            let f = File::open(ent.path())
                .io_context(|| format!("Failed to open {}", ent.path().display()))?;
            let mut header =
                normalized_header(EntryType::Regular, mode_of(&md), opts.mtime, md.len())?;
            append_named(builder, &mut header, &name, None, f.take(md.len()))?;
        } else {
            warn!(path = %ent.path().display(), "skipping special file");
        }
    }
    Ok(())
}

fn mode_of(md: &fs::Metadata) -> u32 {
    md.permissions().mode() & 0o7777
}

fn normalized_header(entry_type: EntryType, mode: u32, mtime: u64, size: u64) -> Result<Header> {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mode(mode);
    header.set_size(size);
    header.set_mtime(mtime);
    header.set_uid(0);
    header.set_gid(0);
    header
        .set_username("root")
        .io_context(|| "setting tar owner name".to_string())?;
    header
        .set_groupname("root")
        .io_context(|| "setting tar group name".to_string())?;
    Ok(header)
}

/// Append with `name` (and the symlink target, if any) written verbatim.
///
/// `Header::set_path` normalises away a leading `./`, so the name bytes are
/// placed directly. Names or link targets that overflow their header field
/// are preceded by GNU long-name / long-link records.
fn append_named<W: Write, R: Read>(
    builder: &mut TarBuilder<W>,
    header: &mut Header,
    name: &str,
    link_target: Option<&[u8]>,
    data: R,
) -> Result<()> {
    if let Some(target) = link_target {
        if target.len() > NAME_FIELD_LEN {
            append_long_record(builder, EntryType::GNULongLink, target, name)?;
        }
        write_field(&mut header.as_old_mut().linkname, target);
    }

    let bytes = name.as_bytes();
    if bytes.len() > NAME_FIELD_LEN {
        append_long_record(builder, EntryType::GNULongName, bytes, name)?;
    }

    write_name_field(header, bytes);
    header.set_cksum();
    builder
        .append(header, data)
        .io_context(|| format!("writing tar entry {name}"))
}

fn append_long_record<W: Write>(
    builder: &mut TarBuilder<W>,
    kind: EntryType,
    value: &[u8],
    name: &str,
) -> Result<()> {
    let mut long = normalized_header(kind, 0o644, 0, value.len() as u64 + 1)?;
    write_name_field(&mut long, LONG_LINK_NAME);
    long.set_cksum();
    builder
        .append(&long, value.chain(&[0u8][..]))
        .io_context(|| format!("writing long path record for {name}"))
}

fn write_name_field(header: &mut Header, name: &[u8]) {
    write_field(&mut header.as_old_mut().name, name);
}

/// Copy `value` into a fixed-width field, truncating and zero filling.
fn write_field(field: &mut [u8; NAME_FIELD_LEN], value: &[u8]) {
    field.fill(0);
    let n = value.len().min(field.len());
    field[..n].copy_from_slice(&value[..n]);
}
