//! Project directories driven by a `debforge.toml` file.
//!
//! A project looks like:
//!
//! ```text
//! debforge.toml
//! root/            files destined for `/`
//! debian/          control overrides (maintainer scripts, conffiles, control)
//! requirements.txt optional dependency specification
//! ```

use crate::artifact::filesystem::copy_dir_recursive;
use crate::config::EngineConfig;
use crate::control::{
    ControlMetadata, DEFAULT_ARCHITECTURE, DEFAULT_DESCRIPTION, DEFAULT_HOMEPAGE,
    DEFAULT_LICENSE, DEFAULT_MAINTAINER, DEFAULT_PRIORITY, DEFAULT_SECTION,
};
use crate::env_cache::{CacheOutcome, CommandEnvironmentBuilder, DependencyCache, EnvironmentBuilder};
use crate::error::{IoResultExt, PackageError, Result};
use crate::package::{build_package, BuildRequest, BuiltPackage};
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const PROJECT_FILE_NAME: &str = "debforge.toml";
const DEFAULT_ROOT_DIR: &str = "root";
const DEFAULT_DEBIAN_DIR: &str = "debian";
const DEFAULT_DIST_DIR: &str = "dist";
const INITIAL_VERSION: &str = "0.1.0";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProjectToml {
    package: PackageToml,
    #[serde(default)]
    paths: PathsToml,
    #[serde(default)]
    build: BuildToml,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PackageToml {
    name: String,
    version: String,
    vendor: Option<String>,
    depends: Option<Vec<String>>,
    maintainer: Option<String>,
    architecture: Option<String>,
    license: Option<String>,
    section: Option<String>,
    priority: Option<String>,
    homepage: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PathsToml {
    root: Option<PathBuf>,
    debian: Option<PathBuf>,
    output: Option<PathBuf>,
    requirements: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct BuildToml {
    install_prefix: Option<PathBuf>,
    source_epoch: Option<u64>,
    cache_dir: Option<PathBuf>,
    environment_builder: Option<String>,
}

/// A loaded project with every path resolved against the project directory.
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    pub dir: PathBuf,
    pub metadata: ControlMetadata,
    pub root: PathBuf,
    pub debian_dir: PathBuf,
    pub output: PathBuf,
    pub requirements: Option<PathBuf>,
    pub install_prefix: Option<PathBuf>,
    pub source_epoch: Option<u64>,
    pub cache_dir: Option<PathBuf>,
    /// Command line with `{spec}`/`{target}` placeholders.
    pub environment_builder: Option<String>,
}

impl ProjectConfig {
    /// Read `<dir>/debforge.toml`.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(PROJECT_FILE_NAME);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(PackageError::ProjectNotFound { path });
            }
            Err(e) => {
                return Err(e).io_context(|| format!("reading {}", path.display()));
            }
        };
        Self::parse(dir, &path, &text)
    }

    fn parse(dir: &Path, path: &Path, text: &str) -> Result<Self> {
        let parsed: ProjectToml = toml::from_str(text).map_err(|e| PackageError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let pkg = parsed.package;
        let mut metadata = ControlMetadata::new(pkg.name.trim(), pkg.version.trim());
        metadata.vendor = pkg.vendor.unwrap_or_default();
        metadata.depends = pkg
            .depends
            .unwrap_or_default()
            .into_iter()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .collect();
        let or_default = |value: Option<String>, default: &str| value.unwrap_or_else(|| default.to_string());
        metadata.maintainer = or_default(pkg.maintainer, DEFAULT_MAINTAINER);
        metadata.architecture = or_default(pkg.architecture, DEFAULT_ARCHITECTURE);
        metadata.license = or_default(pkg.license, DEFAULT_LICENSE);
        metadata.section = or_default(pkg.section, DEFAULT_SECTION);
        metadata.priority = or_default(pkg.priority, DEFAULT_PRIORITY);
        metadata.homepage = or_default(pkg.homepage, DEFAULT_HOMEPAGE);
        metadata.description = or_default(pkg.description, DEFAULT_DESCRIPTION);

        let resolve = |p: PathBuf| if p.is_absolute() { p } else { dir.join(p) };
        let paths = parsed.paths;
        let output = paths
            .output
            .map(resolve)
            .unwrap_or_else(|| dir.join(DEFAULT_DIST_DIR).join(metadata.package_file_name()));

        Ok(Self {
            dir: dir.to_path_buf(),
            root: resolve(paths.root.unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT_DIR))),
            debian_dir: resolve(paths.debian.unwrap_or_else(|| PathBuf::from(DEFAULT_DEBIAN_DIR))),
            output,
            requirements: paths.requirements.map(resolve),
            install_prefix: parsed.build.install_prefix,
            source_epoch: parsed.build.source_epoch,
            cache_dir: parsed.build.cache_dir.map(resolve),
            environment_builder: parsed.build.environment_builder,
            metadata,
        })
    }

    /// Engine settings for this project; project-file values override the
    /// defaults.
    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::for_project(&self.dir);
        if let Some(prefix) = &self.install_prefix {
            config = config.with_install_prefix(prefix);
        }
        if let Some(epoch) = self.source_epoch {
            config = config.with_source_epoch(epoch);
        }
        if let Some(cache_dir) = &self.cache_dir {
            config = config.with_cache_dir(cache_dir);
        }
        config
    }

    /// Where the dependency environment lands inside the package.
    pub fn environment_path(&self, config: &EngineConfig) -> PathBuf {
        config.install_prefix.join(&self.metadata.name)
    }
}

/// Create a new project skeleton in `dir`.
///
/// Fails with [`PackageError::Conflict`] if `dir` already holds a project
/// file; existing `root/` and `debian/` directories are left alone.
pub fn init_project(dir: &Path, name: &str) -> Result<PathBuf> {
    let path = dir.join(PROJECT_FILE_NAME);
    if path.exists() {
        return Err(PackageError::conflict(&path));
    }
    ControlMetadata::new(name, INITIAL_VERSION).validate()?;

    for sub in [DEFAULT_ROOT_DIR, DEFAULT_DEBIAN_DIR] {
        let d = dir.join(sub);
        fs::create_dir_all(&d).io_context(|| format!("Failed to create directory: {}", d.display()))?;
    }
    fs::write(&path, project_template(name))
        .io_context(|| format!("writing {}", path.display()))?;
    info!(project = %dir.display(), name, "initialised project");
    Ok(path)
}

fn project_template(name: &str) -> String {
    format!(
        r#"[package]
name = "{name}"
version = "{INITIAL_VERSION}"
vendor = ""
depends = []
description = "{DEFAULT_DESCRIPTION}"

[paths]
root = "{DEFAULT_ROOT_DIR}"
debian = "{DEFAULT_DEBIAN_DIR}"
# requirements = "requirements.txt"

[build]
# install_prefix = "usr/local"
# environment_builder = "pip install --no-deps --target {{target}} -r {{spec}}"
"#
    )
}

/// Result of [`package_project`].
#[derive(Debug, Clone)]
pub struct ProjectBuild {
    pub package: BuiltPackage,
    /// Set when the project has a dependency specification.
    pub environment: Option<CacheOutcome>,
}

/// Build the project's package.
///
/// `root/` is copied into a staging tree. When a requirements file is
/// configured, the dependency environment is materialised through the cache
/// under `<install_prefix>/<name>` in that tree. `builder` overrides the
/// project's `environment_builder` command.
pub fn package_project(
    config: &EngineConfig,
    project: &ProjectConfig,
    builder: Option<&dyn EnvironmentBuilder>,
) -> Result<ProjectBuild> {
    project.metadata.validate()?;
    if !project.root.is_dir() {
        return Err(PackageError::validation(
            "root",
            format!("{} is not a directory", project.root.display()),
        ));
    }

    // Resolve the builder before any work so a missing tool fails fast.
    let command_builder;
    let env_builder: Option<&dyn EnvironmentBuilder> = match (&project.requirements, builder) {
        (None, _) => None,
        (Some(_), Some(b)) => Some(b),
        (Some(_), None) => {
            let cmd = project.environment_builder.as_deref().ok_or_else(|| {
                PackageError::validation(
                    "environment_builder",
                    "a requirements file is configured but no environment builder is set",
                )
            })?;
            command_builder = CommandEnvironmentBuilder::from_command_line(cmd)?;
            Some(&command_builder)
        }
    };

    fs::create_dir_all(&config.work_dir)
        .io_context(|| format!("Failed to create directory: {}", config.work_dir.display()))?;
    let stage = tempfile::Builder::new()
        .prefix("stage-")
        .tempdir_in(&config.work_dir)
        .io_context(|| format!("creating staging tree in {}", config.work_dir.display()))?;
    let stage_root = stage.path().join("root");
    copy_dir_recursive(&project.root, &stage_root)?;

    let environment = match (&project.requirements, env_builder) {
        (Some(requirements), Some(builder)) => {
            let spec = fs::read_to_string(requirements)
                .io_context(|| format!("reading {}", requirements.display()))?;
            let cache = DependencyCache::open(&config.cache_dir)?;
            let dest = stage_root.join(project.environment_path(config));
            debug!(dest = %dest.display(), "materialising dependency environment");
            Some(cache.materialize(&spec, &dest, builder)?)
        }
        _ => None,
    };

    let request = BuildRequest::new(&stage_root, project.metadata.clone(), &project.output)
        .with_control_dir(&project.debian_dir);
    let package = build_package(config, &request)?;

    Ok(ProjectBuild {
        package,
        environment,
    })
}

/// What [`clean_project`] removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub work_dir_removed: bool,
    pub cache_entries_removed: Option<usize>,
}

/// Remove the project's work directory and, optionally, every cache entry.
pub fn clean_project(config: &EngineConfig, clear_cache: bool) -> Result<CleanReport> {
    let mut report = CleanReport::default();
    if config.work_dir.exists() {
        fs::remove_dir_all(&config.work_dir)
            .io_context(|| format!("Failed to remove {}", config.work_dir.display()))?;
        report.work_dir_removed = true;
    }
    if clear_cache {
        let cache = DependencyCache::open(&config.cache_dir)?;
        report.cache_entries_removed = Some(cache.clear()?);
    }
    Ok(report)
}
