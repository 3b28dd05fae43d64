//! Filesystem utilities for staging areas.
//!
//! Copying trees into isolated staging directories, publishing finished
//! files by rename, and measuring staged content.

use crate::error::{IoResultExt, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

/// Recursively copy a directory, preserving symlinks.
///
/// Unlike `fs::copy`, this properly handles:
/// - Nested directories
/// - Symbolic links (preserved, not followed)
/// - File permissions
///
/// Sockets, fifos, and device nodes are skipped with a warning.
///
/// `src` is only read; `dst` is created if missing.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    if !dst.exists() {
        fs::create_dir_all(dst)
            .io_context(|| format!("Failed to create directory: {}", dst.display()))?;
    }

    for entry in
        fs::read_dir(src).io_context(|| format!("Failed to read directory: {}", src.display()))?
    {
        let entry = entry.io_context(|| format!("Failed to read directory: {}", src.display()))?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        let file_type = entry
            .file_type()
            .io_context(|| format!("Failed to stat: {}", src_path.display()))?;

        if file_type.is_symlink() {
            let target = fs::read_link(&src_path)
                .io_context(|| format!("Failed to read symlink: {}", src_path.display()))?;
            if dst_path.exists() || dst_path.is_symlink() {
                fs::remove_file(&dst_path)
                    .io_context(|| format!("Failed to replace: {}", dst_path.display()))?;
            }
            std::os::unix::fs::symlink(&target, &dst_path)
                .io_context(|| format!("Failed to create symlink: {}", dst_path.display()))?;
        } else if file_type.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else if file_type.is_file() {
            fs::copy(&src_path, &dst_path)
                .io_context(|| format!("Failed to copy file: {}", src_path.display()))?;
        } else {
            warn!(path = %src_path.display(), "skipping special file");
        }
    }

    Ok(())
}

/// Atomically move a file by renaming, with fallback to copy+delete.
///
/// The fallback is not atomic; callers publishing into a directory should
/// stage the source on the same filesystem.
pub fn atomic_move(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .io_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            // Different filesystem (EXDEV).
            fs::copy(src, dst).io_context(|| {
                format!("Failed to copy {} to {}", src.display(), dst.display())
            })?;
            fs::remove_file(src).io_context(|| format!("Failed to remove {}", src.display()))?;
            Ok(())
        }
    }
}

/// Apparent size of all regular files and symlinks under `root`, in KiB
/// (rounded up), as reported by `Installed-Size`.
pub fn installed_size_kib(root: &Path) -> Result<u64> {
    let mut bytes = 0u64;
    for ent in WalkDir::new(root).follow_links(false) {
        let ent = ent.io_context(|| format!("walking {}", root.display()))?;
        let ft = ent.file_type();
        if ft.is_file() || ft.is_symlink() {
            let md = ent
                .metadata()
                .io_context(|| format!("Failed to stat: {}", ent.path().display()))?;
            bytes += md.len();
        }
    }
    Ok(bytes.div_ceil(1024))
}

/// Force a file's permission bits.
pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .io_context(|| format!("Failed to chmod {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copy_dir_recursive() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");

        fs::create_dir_all(src.join("subdir")).unwrap();
        fs::write(src.join("file.txt"), "hello").unwrap();
        fs::write(src.join("subdir/nested.txt"), "world").unwrap();
        std::os::unix::fs::symlink("file.txt", src.join("link")).unwrap();

        copy_dir_recursive(&src, &dst).unwrap();

        assert!(dst.join("file.txt").exists());
        assert!(dst.join("subdir/nested.txt").exists());
        assert!(dst.join("link").is_symlink());
        assert_eq!(fs::read_link(dst.join("link")).unwrap().to_str().unwrap(), "file.txt");
        // Source is untouched.
        assert_eq!(fs::read_to_string(src.join("file.txt")).unwrap(), "hello");
    }

    #[test]
    fn copy_skips_sockets() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("run")).unwrap();
        fs::write(src.join("run/keep"), "k").unwrap();
        let _listener = std::os::unix::net::UnixListener::bind(src.join("run/app.sock")).unwrap();

        let dst = temp.path().join("dst");
        copy_dir_recursive(&src, &dst).unwrap();
        assert_eq!(fs::read_to_string(dst.join("run/keep")).unwrap(), "k");
        assert!(fs::symlink_metadata(dst.join("run/app.sock")).is_err());
    }

    #[test]
    fn copy_preserves_executable_bit() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("run"), "#!/bin/sh\n").unwrap();
        set_mode(&src.join("run"), 0o755).unwrap();

        let dst = temp.path().join("dst");
        copy_dir_recursive(&src, &dst).unwrap();
        let mode = fs::metadata(dst.join("run")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_atomic_move() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src.txt");
        let dst = temp.path().join("nested/dst.txt");

        fs::write(&src, "content").unwrap();
        atomic_move(&src, &dst).unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read_to_string(&dst).unwrap(), "content");
    }

    #[test]
    fn installed_size_rounds_up() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a"), vec![0u8; 1025]).unwrap();
        fs::write(temp.path().join("b"), "hi").unwrap();
        assert_eq!(installed_size_kib(temp.path()).unwrap(), 2);

        let empty = TempDir::new().unwrap();
        assert_eq!(installed_size_kib(empty.path()).unwrap(), 0);
    }
}
