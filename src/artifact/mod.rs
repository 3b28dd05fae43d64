//! Archive builders for binary packages.
//!
//! This module provides the pieces a `.deb` is made of:
//! - [`filesystem`] - Staging-area copies, atomic publish, size accounting
//! - [`tarball`] - Deterministic tar archives (gzip for packages, zstd for the cache)
//! - [`container`] - The outer `ar` container holding the version marker and both tarballs

pub mod container;
pub mod filesystem;
pub mod tarball;
