//! Environment builders: the expensive step the cache exists to skip.

use crate::error::{IoResultExt, PackageError, Result};
use crate::preflight::resolve_tool;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::info;

/// Placeholder replaced by the path of a file holding the specification.
pub const SPEC_PLACEHOLDER: &str = "{spec}";
/// Placeholder replaced by the directory to populate.
pub const TARGET_PLACEHOLDER: &str = "{target}";

/// Populates a directory from a dependency specification.
pub trait EnvironmentBuilder {
    /// Fill `target` (an existing, empty directory) from `spec`.
    fn build(&self, spec: &str, target: &Path) -> Result<()>;
}

impl<F> EnvironmentBuilder for F
where
    F: Fn(&str, &Path) -> Result<()>,
{
    fn build(&self, spec: &str, target: &Path) -> Result<()> {
        self(spec, target)
    }
}

/// Runs an external installer, e.g.
/// `pip install --no-deps --target {target} -r {spec}`.
#[derive(Debug, Clone)]
pub struct CommandEnvironmentBuilder {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandEnvironmentBuilder {
    /// Parse a whitespace-separated command line and locate its program.
    ///
    /// Fails with [`PackageError::Environment`] when the program is not on
    /// `PATH`, before anything is built.
    pub fn from_command_line(command: &str) -> Result<Self> {
        let mut words = command.split_whitespace();
        let program = words
            .next()
            .ok_or_else(|| PackageError::validation("environment builder", "command is empty"))?;
        let program = resolve_tool(program)?;
        Ok(Self {
            program,
            args: words.map(str::to_string).collect(),
        })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn expand_args(&self, spec_file: &Path, target: &Path) -> Vec<String> {
        let spec_file = spec_file.display().to_string();
        let target = target.display().to_string();
        self.args
            .iter()
            .map(|arg| {
                arg.replace(SPEC_PLACEHOLDER, &spec_file)
                    .replace(TARGET_PLACEHOLDER, &target)
            })
            .collect()
    }
}

impl EnvironmentBuilder for CommandEnvironmentBuilder {
    fn build(&self, spec: &str, target: &Path) -> Result<()> {
        let spec_file = tempfile::Builder::new()
            .prefix("debforge-spec-")
            .tempfile()
            .io_context(|| "creating specification file".to_string())?;
        fs::write(spec_file.path(), spec)
            .io_context(|| format!("writing {}", spec_file.path().display()))?;

        let args = self.expand_args(spec_file.path(), target);
        info!(program = %self.program.display(), ?args, "building environment");

        let status = Command::new(&self.program)
            .args(&args)
            .status()
            .io_context(|| format!("running {}", self.program.display()))?;
        if !status.success() {
            return Err(PackageError::BuildFailed {
                reason: format!("{} exited with {status}", self.program.display()),
            });
        }
        Ok(())
    }
}
