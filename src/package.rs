//! The packaging pipeline: staging root + metadata → `.deb` on disk.

use crate::artifact::container::write_package;
use crate::assemble::{assemble, AssembleRequest};
use crate::config::EngineConfig;
use crate::control::{ControlMetadata, ControlSource};
use crate::error::{IoResultExt, PackageError, Result};
use crate::manifest::Manifest;
use std::path::{Path, PathBuf};
use tracing::info;

/// Inputs to [`build_package`].
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Tree mirroring the target filesystem.
    pub root: PathBuf,
    /// Optional directory of control overrides (`debian/`).
    pub control_dir: Option<PathBuf>,
    pub metadata: ControlMetadata,
    /// Package file to create. Replaced if it already exists.
    pub output: PathBuf,
}

impl BuildRequest {
    pub fn new(root: impl Into<PathBuf>, metadata: ControlMetadata, output: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            control_dir: None,
            metadata,
            output: output.into(),
        }
    }

    pub fn with_control_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.control_dir = Some(dir.into());
        self
    }
}

/// Summary of a written package.
#[derive(Debug, Clone)]
pub struct BuiltPackage {
    pub path: PathBuf,
    pub manifest: Manifest,
    pub control_source: ControlSource,
    pub size_bytes: u64,
}

/// Assemble and write a package.
///
/// Required fields are checked before anything touches the filesystem. On
/// any failure no file exists at `output` (or the previous one is left
/// untouched).
pub fn build_package(config: &EngineConfig, req: &BuildRequest) -> Result<BuiltPackage> {
    validate_request(req)?;

    let archives = assemble(&AssembleRequest {
        root: &req.root,
        control_dir: req.control_dir.as_deref(),
        metadata: &req.metadata,
        source_epoch: config.source_epoch,
        scratch_dir: Some(&config.work_dir),
    })?;

    write_package(&req.output, &archives.control, &archives.data, config.source_epoch)?;
    let size_bytes = std::fs::metadata(&req.output)
        .io_context(|| format!("Failed to stat {}", req.output.display()))?
        .len();

    info!(
        package = %req.metadata.name,
        version = %req.metadata.version,
        path = %req.output.display(),
        size_bytes,
        "built package"
    );

    Ok(BuiltPackage {
        path: req.output.clone(),
        manifest: archives.manifest,
        control_source: archives.control_source,
        size_bytes,
    })
}

fn validate_request(req: &BuildRequest) -> Result<()> {
    if is_empty_path(&req.output) {
        return Err(PackageError::validation("output", "must not be empty"));
    }
    if is_empty_path(&req.root) {
        return Err(PackageError::validation("root", "must not be empty"));
    }
    req.metadata.validate()
}

fn is_empty_path(path: &Path) -> bool {
    path.as_os_str().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::container::{read_members, CONTROL_MEMBER, DATA_MEMBER, DEBIAN_BINARY_MEMBER};
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, EngineConfig, BuildRequest) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        fs::create_dir_all(root.join("usr/local/bin")).unwrap();
        fs::write(root.join("usr/local/bin/hello"), "hi").unwrap();
        let config = EngineConfig::new(tmp.path().join("work")).with_cache_dir(tmp.path().join("cache"));
        let req = BuildRequest::new(
            root,
            ControlMetadata::new("demo", "1.0.0").with_vendor("acme"),
            tmp.path().join("out/demo.deb"),
        );
        (tmp, config, req)
    }

    #[test]
    fn writes_three_member_container() {
        let (_tmp, config, req) = setup();
        let built = build_package(&config, &req).unwrap();
        assert_eq!(built.control_source, ControlSource::Generated);
        assert_eq!(built.manifest.len(), 1);
        assert_eq!(built.size_bytes, fs::metadata(&built.path).unwrap().len());

        let members = read_members(&built.path).unwrap();
        let names: Vec<_> = members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, [DEBIAN_BINARY_MEMBER, CONTROL_MEMBER, DATA_MEMBER]);
        assert_eq!(members[0].data, b"2.0\n");
    }

    #[test]
    fn empty_version_fails_before_output() {
        let (_tmp, config, mut req) = setup();
        req.metadata.version.clear();
        let err = build_package(&config, &req).unwrap_err();
        assert!(matches!(err, PackageError::Validation { field: "version", .. }));
        assert!(!req.output.exists());
        assert!(!config.work_dir.exists());
    }

    #[test]
    fn empty_output_is_rejected() {
        let (_tmp, config, mut req) = setup();
        req.output = PathBuf::new();
        let err = build_package(&config, &req).unwrap_err();
        assert!(matches!(err, PackageError::Validation { field: "output", .. }));
    }

    #[test]
    fn existing_output_is_replaced() {
        let (_tmp, config, req) = setup();
        fs::create_dir_all(req.output.parent().unwrap()).unwrap();
        fs::write(&req.output, "old").unwrap();
        build_package(&config, &req).unwrap();
        assert_eq!(read_members(&req.output).unwrap().len(), 3);
    }

    #[test]
    fn sockets_and_long_symlinks_in_root() {
        let (_tmp, config, req) = setup();
        fs::create_dir_all(req.root.join("run")).unwrap();
        let _listener = std::os::unix::net::UnixListener::bind(req.root.join("run/app.sock")).unwrap();
        fs::create_dir_all(req.root.join("usr/lib")).unwrap();
        let target = format!("/opt/{}/libfoo.so.1", "x".repeat(120));
        std::os::unix::fs::symlink(&target, req.root.join("usr/lib/libfoo.so")).unwrap();

        let built = build_package(&config, &req).unwrap();
        assert_eq!(built.manifest.len(), 1);

        let members = read_members(&built.path).unwrap();
        let mut data = tar::Archive::new(flate2::read::GzDecoder::new(&members[2].data[..]));
        let mut links = Vec::new();
        let mut names = Vec::new();
        for entry in data.entries().unwrap() {
            let entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().into_owned();
            if let Some(link) = entry.link_name().unwrap() {
                links.push((name.clone(), link.to_string_lossy().into_owned()));
            }
            names.push(name);
        }
        assert_eq!(links, vec![("./usr/lib/libfoo.so".to_string(), target)]);
        assert!(!names.iter().any(|n| n.ends_with("app.sock")));
    }

    #[test]
    fn rebuild_is_byte_identical() {
        let (tmp, config, req) = setup();
        build_package(&config, &req).unwrap();
        let first = fs::read(&req.output).unwrap();

        let mut again = req.clone();
        again.output = tmp.path().join("out/again.deb");
        build_package(&config, &again).unwrap();
        assert_eq!(first, fs::read(&again.output).unwrap());
    }
}
