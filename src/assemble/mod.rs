//! Archive assembly: staging tree → `control.tar.gz` + `data.tar.gz`.
//!
//! All work happens inside a fresh temporary directory. The caller's root
//! and control directories are only read, and nothing outside the
//! temporary area is written, so an aborted assembly leaves no trace.

use crate::artifact::filesystem::{copy_dir_recursive, installed_size_kib, set_mode};
use crate::artifact::tarball::{build_tar_gz, TarOptions};
use crate::control::{resolve_control, ControlMetadata, ControlSource};
use crate::error::{IoResultExt, PackageError, Result};
use crate::manifest::{Manifest, MANIFEST_FILE_NAME};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Control members that dpkg executes and therefore must be executable.
pub const MAINTAINER_SCRIPTS: &[&str] = &["preinst", "postinst", "prerm", "postrm", "config"];

/// Inputs to [`assemble`].
#[derive(Debug, Clone)]
pub struct AssembleRequest<'a> {
    /// Tree mirroring the target filesystem.
    pub root: &'a Path,
    /// Extra control members (maintainer scripts, conffiles, a `control`
    /// record). Skipped when `None` or when the directory does not exist.
    pub control_dir: Option<&'a Path>,
    pub metadata: &'a ControlMetadata,
    /// Timestamp applied to every archive entry.
    pub source_epoch: u64,
    /// Where the temporary staging area is created. Defaults to the system
    /// temp directory.
    pub scratch_dir: Option<&'a Path>,
}

/// The two compressed package members plus what went into them.
#[derive(Debug, Clone)]
pub struct AssembledArchives {
    pub control: Vec<u8>,
    pub data: Vec<u8>,
    pub manifest: Manifest,
    pub control_source: ControlSource,
}

/// Build the control and data archives for a package.
pub fn assemble(req: &AssembleRequest<'_>) -> Result<AssembledArchives> {
    if !req.root.is_dir() {
        return Err(PackageError::validation(
            "root",
            format!("{} is not a directory", req.root.display()),
        ));
    }

    let staging = new_staging_dir(req.scratch_dir)?;
    let data_dir = staging.path().join("data");
    let control_dir = staging.path().join("control");
    debug!(staging = %staging.path().display(), "created staging area");

    copy_dir_recursive(req.root, &data_dir)?;
    stage_control_dir(req.control_dir, &control_dir)?;

    let manifest = Manifest::from_dir(&data_dir)?;
    manifest.write_to(&control_dir.join(MANIFEST_FILE_NAME))?;
    info!(files = manifest.len(), "computed manifest");

    let installed_size = installed_size_kib(&data_dir)?;
    let control_source = resolve_control(&control_dir, req.metadata, Some(installed_size))?;
    normalize_control_modes(&control_dir)?;

    let opts = TarOptions::package(req.source_epoch);
    let control = build_tar_gz(&control_dir, &opts)?;
    let data = build_tar_gz(&data_dir, &opts)?;
    info!(
        control_bytes = control.len(),
        data_bytes = data.len(),
        "assembled archives"
    );

    Ok(AssembledArchives {
        control,
        data,
        manifest,
        control_source,
    })
}

fn new_staging_dir(scratch: Option<&Path>) -> Result<tempfile::TempDir> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("debforge-assemble-");
    match scratch {
        Some(dir) => {
            fs::create_dir_all(dir)
                .io_context(|| format!("Failed to create directory: {}", dir.display()))?;
            builder
                .tempdir_in(dir)
                .io_context(|| format!("creating staging area in {}", dir.display()))
        }
        None => builder
            .tempdir()
            .io_context(|| "creating staging area".to_string()),
    }
}

fn stage_control_dir(overrides: Option<&Path>, dest: &Path) -> Result<()> {
    match overrides {
        Some(dir) if dir.is_dir() => {
            debug!(dir = %dir.display(), "copying control overrides");
            copy_dir_recursive(dir, dest)
        }
        _ => fs::create_dir_all(dest)
            .io_context(|| format!("Failed to create directory: {}", dest.display())),
    }
}

/// Maintainer scripts become `0755`, every other control member `0644`.
fn normalize_control_modes(control_dir: &Path) -> Result<()> {
    for entry in fs::read_dir(control_dir)
        .io_context(|| format!("Failed to read directory: {}", control_dir.display()))?
    {
        let entry =
            entry.io_context(|| format!("Failed to read directory: {}", control_dir.display()))?;
        let ft = entry
            .file_type()
            .io_context(|| format!("Failed to stat: {}", entry.path().display()))?;
        if !ft.is_file() {
            continue;
        }
        let name = entry.file_name();
        let mode = if MAINTAINER_SCRIPTS.iter().any(|s| name == *s) {
            0o755
        } else {
            0o644
        };
        set_mode(&entry.path(), mode)?;
    }
    Ok(())
}
