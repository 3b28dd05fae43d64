//! Error types for package assembly.
//!
//! Every fallible engine operation returns [`PackageError`]. The variants
//! follow the failure classes a caller needs to tell apart: bad input,
//! missing host tooling, I/O failures, and collisions with existing output.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors produced by the package assembly engine.
#[derive(Debug, Error)]
pub enum PackageError {
    /// A required field is missing or malformed. Raised before any side effect.
    #[error("invalid {field}: {reason}")]
    Validation {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// A required external tool or collaborator is unavailable.
    #[error("{tool} is not available: {reason}")]
    Environment {
        /// The missing tool.
        tool: String,
        /// How to resolve it.
        reason: String,
    },

    /// The environment builder ran but did not succeed.
    #[error("environment build failed: {reason}")]
    BuildFailed {
        /// Description of the failure.
        reason: String,
    },

    /// A copy, compress, or write step failed.
    #[error("{context}: {source}")]
    Io {
        /// What the engine was doing.
        context: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The target already exists and will not be overwritten.
    #[error("{} already exists", path.display())]
    Conflict {
        /// The colliding path.
        path: PathBuf,
    },

    /// No project file where one was expected.
    #[error("no project file at {}; run `debforge init` first", path.display())]
    ProjectNotFound {
        /// Where the project file was looked for.
        path: PathBuf,
    },

    /// A project file could not be parsed.
    #[error("invalid project file {}: {reason}", path.display())]
    Config {
        /// Path of the project file.
        path: PathBuf,
        /// Parser message.
        reason: String,
    },

    /// A package container is not a well-formed `ar` archive.
    #[error("malformed archive {}: {reason}", path.display())]
    Archive {
        /// Path of the archive being read.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// A committed cache entry failed verification.
    #[error("corrupt cache entry {key}: {reason}")]
    CorruptCache {
        /// The cache key.
        key: String,
        /// What failed to verify.
        reason: String,
    },
}

impl PackageError {
    /// Shorthand for a [`PackageError::Validation`].
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`PackageError::Conflict`].
    pub fn conflict(path: impl AsRef<Path>) -> Self {
        Self::Conflict {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Process exit status for this error.
    ///
    /// Validation failures exit with `1`, matching usage errors; every other
    /// failure exits with `2`.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Validation { .. } => 1,
            _ => 2,
        }
    }
}

/// Result type alias using [`PackageError`].
pub type Result<T> = std::result::Result<T, PackageError>;

/// Attach a description to an I/O result, converting it to [`PackageError::Io`].
pub trait IoResultExt<T> {
    /// Wrap the error with the message produced by `f`.
    fn io_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> IoResultExt<T> for std::result::Result<T, io::Error> {
    fn io_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|source| PackageError::Io {
            context: f(),
            source,
        })
    }
}

impl<T> IoResultExt<T> for std::result::Result<T, walkdir::Error> {
    fn io_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|err| PackageError::Io {
            context: f(),
            source: io::Error::from(err),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_exits_with_one() {
        let err = PackageError::validation("name", "must not be empty");
        assert_eq!(err.exit_code(), 1);
        assert_eq!(err.to_string(), "invalid name: must not be empty");
    }

    #[test]
    fn other_errors_exit_with_two() {
        let err = PackageError::conflict("/tmp/out.deb");
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("/tmp/out.deb"));
    }

    #[test]
    fn missing_project_is_distinct_from_bad_project() {
        let err = PackageError::ProjectNotFound {
            path: PathBuf::from("/srv/app/debforge.toml"),
        };
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("debforge init"));
        assert!(!matches!(err, PackageError::Config { .. }));
    }

    #[test]
    fn io_context_preserves_source() {
        let result: std::result::Result<(), io::Error> =
            Err(io::Error::new(io::ErrorKind::NotFound, "gone"));
        let err = result
            .io_context(|| "reading root".to_string())
            .unwrap_err();
        assert!(err.to_string().starts_with("reading root"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
