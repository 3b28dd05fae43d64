//! Engine configuration.
//!
//! A single [`EngineConfig`] is built at startup and passed by reference to
//! every component that needs a directory or a reproducibility setting.

use std::path::{Path, PathBuf};

/// Default install prefix for dependency environments, relative to `/`.
pub const DEFAULT_INSTALL_PREFIX: &str = "usr/local";

/// Default per-project working directory name.
pub const DEFAULT_WORK_DIR: &str = ".debforge";

/// Subdirectory of the user cache directory holding dependency environments.
pub const DEFAULT_CACHE_SUBDIR: &str = "debforge";

/// Settings shared by the whole assembly pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Prefix (relative to the package root) that dependency environments
    /// are installed under.
    pub install_prefix: PathBuf,
    /// Scratch directory for per-invocation staging areas.
    pub work_dir: PathBuf,
    /// Root of the dependency cache.
    pub cache_dir: PathBuf,
    /// Modification time written into every archive entry.
    pub source_epoch: u64,
}

impl EngineConfig {
    /// Configuration rooted at `work_dir` with the default prefix and cache.
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            install_prefix: PathBuf::from(DEFAULT_INSTALL_PREFIX),
            work_dir: work_dir.into(),
            cache_dir: default_cache_dir(),
            source_epoch: 0,
        }
    }

    /// Configuration for a project directory (`<project>/.debforge`).
    pub fn for_project(project_dir: &Path) -> Self {
        Self::new(project_dir.join(DEFAULT_WORK_DIR))
    }

    pub fn with_install_prefix(mut self, prefix: impl Into<PathBuf>) -> Self {
        self.install_prefix = prefix.into();
        self
    }

    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    pub fn with_source_epoch(mut self, epoch: u64) -> Self {
        self.source_epoch = epoch;
        self
    }
}

/// `~/.cache/debforge`, falling back to `/tmp/debforge` when the platform has
/// no cache directory.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(DEFAULT_CACHE_SUBDIR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_config_uses_hidden_work_dir() {
        let cfg = EngineConfig::for_project(Path::new("/srv/app"));
        assert_eq!(cfg.work_dir, PathBuf::from("/srv/app/.debforge"));
        assert_eq!(cfg.install_prefix, PathBuf::from("usr/local"));
        assert_eq!(cfg.source_epoch, 0);
    }

    #[test]
    fn builders_override_defaults() {
        let cfg = EngineConfig::new("/w")
            .with_install_prefix("opt")
            .with_cache_dir("/c")
            .with_source_epoch(1_700_000_000);
        assert_eq!(cfg.install_prefix, PathBuf::from("opt"));
        assert_eq!(cfg.cache_dir, PathBuf::from("/c"));
        assert_eq!(cfg.source_epoch, 1_700_000_000);
    }

    #[test]
    fn default_cache_dir_ends_with_crate_subdir() {
        assert!(default_cache_dir().ends_with(DEFAULT_CACHE_SUBDIR));
    }
}
