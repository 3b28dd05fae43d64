use anyhow::{Context, Result};
use debforge::control::{parse_depends_list, ControlMetadata};
use debforge::project::{clean_project, init_project, package_project, ProjectConfig};
use debforge::{build_package, BuildRequest, CacheOutcome, EngineConfig, PackageError};
use std::fs;
use std::path::{Path, PathBuf};

use crate::BuildArgs;

/// Reproducible-builds convention for the archive timestamp.
const SOURCE_DATE_EPOCH: &str = "SOURCE_DATE_EPOCH";

pub(crate) fn cmd_init(dir: Option<PathBuf>, name: Option<String>) -> Result<()> {
    let dir = project_dir(dir)?;
    let name = match name {
        Some(name) => name,
        None => default_package_name(&dir)?,
    };
    let path = init_project(&dir, &name)
        .with_context(|| format!("initialising project in '{}'", dir.display()))?;
    println!("Created {}", path.display());
    Ok(())
}

pub(crate) fn cmd_package(
    dir: Option<PathBuf>,
    output: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    force: bool,
) -> Result<()> {
    let dir = project_dir(dir)?;
    let mut project = ProjectConfig::load(&dir)?;
    if let Some(output) = output {
        project.output = output;
    }

    let mut config = project.engine_config();
    if let Some(cache_dir) = cache_dir {
        config = config.with_cache_dir(cache_dir);
    }
    apply_source_date_epoch(&mut config)?;
    ensure_output_free(&project.output, force)?;

    let built = package_project(&config, &project, None)
        .with_context(|| format!("packaging project '{}'", dir.display()))?;
    match built.environment {
        Some(CacheOutcome::Hit) => println!("Dependency environment restored from cache"),
        Some(CacheOutcome::Built) => println!("Dependency environment built and cached"),
        None => {}
    }
    println!(
        "Built {} ({} files, {} bytes)",
        built.package.path.display(),
        built.package.manifest.len(),
        built.package.size_bytes
    );
    Ok(())
}

pub(crate) fn cmd_build(args: BuildArgs) -> Result<()> {
    let mut depends = args.depends;
    if let Some(file) = &args.depends_file {
        let text = fs::read_to_string(file)
            .with_context(|| format!("reading dependency list '{}'", file.display()))?;
        depends.extend(parse_depends_list(&text));
    }

    let mut metadata = ControlMetadata::new(args.name, args.version).with_vendor(args.vendor);
    metadata.depends = depends
        .into_iter()
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .collect();
    if let Some(arch) = args.architecture {
        metadata.architecture = arch;
    }
    if let Some(maintainer) = args.maintainer {
        metadata.maintainer = maintainer;
    }
    if let Some(description) = args.description {
        metadata.description = description;
    }
    metadata.validate()?;

    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from(metadata.package_file_name()));
    ensure_output_free(&output, args.force)?;

    let work_dir = match args.work_dir {
        Some(dir) => dir,
        None => std::env::temp_dir().join("debforge"),
    };
    let mut config = EngineConfig::new(work_dir);
    apply_source_date_epoch(&mut config)?;

    let mut request = BuildRequest::new(args.root, metadata, output);
    if let Some(debian_dir) = args.debian_dir {
        request = request.with_control_dir(debian_dir);
    }
    let built = build_package(&config, &request)?;
    println!(
        "Built {} ({} files, {} bytes)",
        built.path.display(),
        built.manifest.len(),
        built.size_bytes
    );
    Ok(())
}

pub(crate) fn cmd_clean(dir: Option<PathBuf>, cache: bool, cache_dir: Option<PathBuf>) -> Result<()> {
    let dir = project_dir(dir)?;
    let mut config = match ProjectConfig::load(&dir) {
        Ok(project) => project.engine_config(),
        Err(PackageError::ProjectNotFound { .. }) => EngineConfig::for_project(&dir),
        Err(e) => return Err(e.into()),
    };
    if let Some(cache_dir) = cache_dir {
        config = config.with_cache_dir(cache_dir);
    }

    let report = clean_project(&config, cache)?;
    if report.work_dir_removed {
        println!("Removed {}", config.work_dir.display());
    }
    if let Some(n) = report.cache_entries_removed {
        println!("Removed {n} cached environment(s) from {}", config.cache_dir.display());
    }
    Ok(())
}

fn project_dir(dir: Option<PathBuf>) -> Result<PathBuf> {
    match dir {
        Some(dir) => Ok(dir),
        None => std::env::current_dir().context("resolving current directory"),
    }
}

fn default_package_name(dir: &Path) -> Result<String> {
    let abs = if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        std::env::current_dir()
            .context("resolving current directory")?
            .join(dir)
    };
    let name = abs
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_ascii_lowercase().replace('_', "-"))
        .unwrap_or_default();
    if name.is_empty() {
        return Err(PackageError::validation("name", "cannot derive a package name; pass --name").into());
    }
    Ok(name)
}

fn ensure_output_free(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        return Err(anyhow::Error::new(PackageError::conflict(output))
            .context("refusing to overwrite (pass --force to replace it)"));
    }
    Ok(())
}

fn apply_source_date_epoch(config: &mut EngineConfig) -> Result<()> {
    if let Ok(value) = std::env::var(SOURCE_DATE_EPOCH) {
        let epoch = value.trim().parse::<u64>().map_err(|_| {
            PackageError::validation("SOURCE_DATE_EPOCH", format!("'{value}' is not a Unix timestamp"))
        })?;
        config.source_epoch = epoch;
    }
    Ok(())
}
