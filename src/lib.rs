//! Deterministic `.deb` package assembly.
//!
//! Turns a staged filesystem tree (files destined for `/`) plus control
//! metadata into a Debian binary package:
//!
//! - **Manifest hashing** - `md5sums` over every regular file in the tree
//! - **Control metadata** - pass-through or synthesized `control` record
//! - **Archive assembly** - `control.tar.gz` and `data.tar.gz` with root
//!   ownership and normalised timestamps
//! - **Container writing** - the outer `ar` archive, published atomically
//! - **Dependency cache** - content-addressed store for expensive
//!   dependency-environment builds
//!
//! # Architecture
//!
//! ```text
//! root/ + ControlMetadata
//!     │
//!     ├── manifest::Manifest::from_dir      → md5sums
//!     ├── control::resolve_control          → control
//!     ├── assemble::assemble                → control.tar.gz, data.tar.gz
//!     └── artifact::container::write_package → name_version_arch.deb
//!
//! env_cache::DependencyCache (consulted by project::package_project
//! before the environment builder runs)
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use debforge::{build_package, BuildRequest, ControlMetadata, EngineConfig};
//!
//! let config = EngineConfig::new("/tmp/debforge-work");
//! let metadata = ControlMetadata::new("demo", "1.0.0").with_vendor("acme");
//! let request = BuildRequest::new("root", metadata, "demo_1.0.0_all.deb");
//! let built = build_package(&config, &request)?;
//! println!("wrote {}", built.path.display());
//! # Ok::<(), debforge::PackageError>(())
//! ```

pub mod artifact;
pub mod assemble;
pub mod config;
pub mod control;
pub mod env_cache;
pub mod error;
pub mod manifest;
pub mod package;
pub mod preflight;
pub mod project;

pub use config::EngineConfig;
pub use control::{ControlMetadata, ControlSource};
pub use env_cache::{cache_key, CacheKey, CacheOutcome, DependencyCache, EnvironmentBuilder};
pub use error::{PackageError, Result};
pub use manifest::Manifest;
pub use package::{build_package, BuildRequest, BuiltPackage};
pub use project::{clean_project, init_project, package_project, ProjectConfig};
