//! Preflight checks for host tooling.
//!
//! Packaging itself needs no external tools, but dependency environments are
//! built by an external program. Checking for it up front turns a cryptic
//! spawn failure halfway through a build into an [`PackageError::Environment`]
//! before any work starts.
//!
//! # Example
//!
//! ```rust
//! use debforge::preflight::{command_exists, check_required_tools};
//!
//! if !command_exists("pip") {
//!     println!("pip not installed");
//! }
//!
//! let tools = &[("sh", "dash"), ("cp", "coreutils")];
//! if let Err(e) = check_required_tools(tools) {
//!     eprintln!("{}", e);
//! }
//! ```

use crate::error::{PackageError, Result};
use std::path::PathBuf;

/// Check if a command exists on the host system.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Locate `tool` on `PATH`.
pub fn resolve_tool(tool: &str) -> Result<PathBuf> {
    which::which(tool).map_err(|e| PackageError::Environment {
        tool: tool.to_string(),
        reason: format!("{e}; install it or put it on PATH"),
    })
}

/// Check that specific tools are available.
///
/// Each tuple is `(command, package)`; all missing tools are reported
/// together.
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let missing: Vec<_> = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool))
        .collect();

    if missing.is_empty() {
        return Ok(());
    }

    Err(PackageError::Environment {
        tool: missing
            .iter()
            .map(|(t, _)| *t)
            .collect::<Vec<_>>()
            .join(", "),
        reason: missing
            .iter()
            .map(|(t, p)| format!("{t} (install: {p})"))
            .collect::<Vec<_>>()
            .join("; "),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_exists() {
        assert!(command_exists("ls"));
        assert!(!command_exists("definitely_not_a_real_command_12345"));
    }

    #[test]
    fn test_check_required_tools_success() {
        let tools = &[("ls", "coreutils"), ("cat", "coreutils")];
        assert!(check_required_tools(tools).is_ok());
    }

    #[test]
    fn test_check_required_tools_failure() {
        let tools = &[("ls", "coreutils"), ("nonexistent_command_xyz", "fake-package")];
        let err = check_required_tools(tools).unwrap_err();
        assert!(matches!(err, PackageError::Environment { .. }));
        let msg = err.to_string();
        assert!(msg.contains("nonexistent_command_xyz"));
        assert!(msg.contains("fake-package"));
        assert!(!msg.contains("coreutils"));
    }

    #[test]
    fn resolve_tool_finds_sh() {
        assert!(resolve_tool("sh").unwrap().is_absolute());
    }
}
