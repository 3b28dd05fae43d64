//! Control record generation.
//!
//! A package's `control` file is either supplied by the caller (copied in
//! from the control override directory and passed through untouched) or
//! synthesized from [`ControlMetadata`] with fixed defaults for every field
//! the caller did not set.

use crate::error::{IoResultExt, PackageError, Result};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tracing::info;

/// Name of the control record inside the control archive.
pub const CONTROL_FILE_NAME: &str = "control";

pub const DEFAULT_ARCHITECTURE: &str = "all";
pub const DEFAULT_MAINTAINER: &str = "<root@localhost>";
pub const DEFAULT_SECTION: &str = "default";
pub const DEFAULT_PRIORITY: &str = "extra";
pub const DEFAULT_LICENSE: &str = "unknown";
pub const DEFAULT_VENDOR: &str = "unknown";
pub const DEFAULT_HOMEPAGE: &str = "http://localhost";
pub const DEFAULT_DESCRIPTION: &str = "no description given";

/// Package metadata used to synthesize a control record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMetadata {
    pub name: String,
    pub version: String,
    /// May be empty; rendered as [`DEFAULT_VENDOR`].
    pub vendor: String,
    /// Dependency entries in declaration order.
    pub depends: Vec<String>,
    pub maintainer: String,
    pub architecture: String,
    pub license: String,
    pub section: String,
    pub priority: String,
    pub homepage: String,
    /// First line is the synopsis; further lines form the extended description.
    pub description: String,
}

impl ControlMetadata {
    /// Metadata with every optional field at its default.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            vendor: String::new(),
            depends: Vec::new(),
            maintainer: DEFAULT_MAINTAINER.to_string(),
            architecture: DEFAULT_ARCHITECTURE.to_string(),
            license: DEFAULT_LICENSE.to_string(),
            section: DEFAULT_SECTION.to_string(),
            priority: DEFAULT_PRIORITY.to_string(),
            homepage: DEFAULT_HOMEPAGE.to_string(),
            description: DEFAULT_DESCRIPTION.to_string(),
        }
    }

    pub fn with_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = vendor.into();
        self
    }

    /// Set dependencies from a newline-delimited list.
    pub fn with_depends_text(mut self, text: &str) -> Self {
        self.depends = parse_depends_list(text);
        self
    }

    /// Check the fields assembly cannot proceed without.
    ///
    /// Only structural checks are made: required fields are present, the
    /// package name uses the package-name charset, and no single-line field
    /// contains a line break that would corrupt the record.
    pub fn validate(&self) -> Result<()> {
        validate_package_name(&self.name)?;

        if self.version.trim().is_empty() {
            return Err(PackageError::validation("version", "must not be empty"));
        }
        if self.version.chars().any(char::is_whitespace) {
            return Err(PackageError::validation(
                "version",
                format!("'{}' must not contain whitespace", self.version),
            ));
        }

        let single_line = [
            ("vendor", &self.vendor),
            ("maintainer", &self.maintainer),
            ("architecture", &self.architecture),
            ("license", &self.license),
            ("section", &self.section),
            ("priority", &self.priority),
            ("homepage", &self.homepage),
        ];
        for (field, value) in single_line {
            if value.contains('\n') {
                return Err(PackageError::validation(field, "must be a single line"));
            }
        }
        if let Some(dep) = self.depends.iter().find(|d| d.contains('\n')) {
            return Err(PackageError::validation(
                "depends",
                format!("entry '{}' spans lines", dep.escape_debug()),
            ));
        }
        Ok(())
    }

    /// The `Depends` value: entries joined with `, `.
    pub fn depends_field(&self) -> String {
        self.depends.join(", ")
    }

    /// Render the control record.
    ///
    /// `installed_size_kib` adds an `Installed-Size` field when known. An
    /// empty dependency list omits `Depends` entirely.
    pub fn render(&self, installed_size_kib: Option<u64>) -> String {
        let vendor = if self.vendor.trim().is_empty() {
            DEFAULT_VENDOR
        } else {
            self.vendor.as_str()
        };

        let mut out = String::new();
        let _ = writeln!(out, "Package: {}", self.name);
        let _ = writeln!(out, "Version: {}", self.version);
        let _ = writeln!(out, "License: {}", self.license);
        let _ = writeln!(out, "Vendor: {vendor}");
        let _ = writeln!(out, "Architecture: {}", self.architecture);
        let _ = writeln!(out, "Maintainer: {}", self.maintainer);
        if !self.depends.is_empty() {
            let _ = writeln!(out, "Depends: {}", self.depends_field());
        }
        let _ = writeln!(out, "Section: {}", self.section);
        let _ = writeln!(out, "Priority: {}", self.priority);
        let _ = writeln!(out, "Homepage: {}", self.homepage);
        if let Some(kib) = installed_size_kib {
            let _ = writeln!(out, "Installed-Size: {kib}");
        }
        out.push_str(&render_description(&self.description));
        out
    }

    /// Conventional file name: `<name>_<version>_<arch>.deb`.
    pub fn package_file_name(&self) -> String {
        format!("{}_{}_{}.deb", self.name, self.version, self.architecture)
    }
}

/// Where the control record in a staging area came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSource {
    /// The caller's own `control` file was kept as-is.
    Supplied,
    /// A record was generated from metadata.
    Generated,
}

/// Ensure `control_dir` holds a control record.
///
/// An existing `control` file always wins and is never rewritten. Any
/// other kind of entry named `control` is rejected.
pub fn resolve_control(
    control_dir: &Path,
    metadata: &ControlMetadata,
    installed_size_kib: Option<u64>,
) -> Result<ControlSource> {
    let path = control_dir.join(CONTROL_FILE_NAME);
    if path.is_file() {
        info!(path = %path.display(), "using supplied control record");
        return Ok(ControlSource::Supplied);
    }
    if fs::symlink_metadata(&path).is_ok() {
        return Err(PackageError::validation(
            "control",
            format!("{} exists but is not a regular file", path.display()),
        ));
    }

    metadata.validate()?;
    fs::write(&path, metadata.render(installed_size_kib))
        .io_context(|| format!("writing {}", path.display()))?;
    info!(package = %metadata.name, "generated control record");
    Ok(ControlSource::Generated)
}

/// Split a newline-delimited dependency list, dropping blank lines.
pub fn parse_depends_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Newline-delimited list → `Depends` value.
pub fn format_depends(text: &str) -> String {
    parse_depends_list(text).join(", ")
}

fn validate_package_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(PackageError::validation("name", "must not be empty"));
    }
    let mut chars = name.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    let rest_ok = chars.all(|c| {
        c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '+' | '-' | '.')
    });
    if name.len() < 2 || !first_ok || !rest_ok {
        return Err(PackageError::validation(
            "name",
            format!(
                "'{name}' must be at least two characters of [a-z0-9+.-], starting with a letter or digit"
            ),
        ));
    }
    Ok(())
}

fn render_description(description: &str) -> String {
    let mut lines = description.lines();
    let synopsis = lines
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_DESCRIPTION);

    let mut out = format!("Description: {synopsis}\n");
    for line in lines {
        if line.trim().is_empty() {
            out.push_str(" .\n");
        } else {
            out.push(' ');
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}
