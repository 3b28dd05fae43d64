//! Content-addressed cache of dependency environments.
//!
//! Building a dependency environment (running a package installer into a
//! directory) is slow. Its result is fully determined by the dependency
//! specification, so the cache keys a `tar.zst` of the built tree by the
//! SHA-256 of the specification text.
//!
//! Layout under the cache root:
//!
//! ```text
//! envs/<key>.tar.zst   archived environment
//! envs/<key>.json      entry record; written last, marks the entry committed
//! tmp/                 in-flight archives and builds
//! locks/<key>.lock     per-key advisory lock
//! ```
//!
//! Entries never expire. A key collision after unrelated changes is
//! possible only if callers put inputs into the environment that the
//! specification does not capture.

pub mod builder;

pub use builder::{CommandEnvironmentBuilder, EnvironmentBuilder};

use crate::artifact::filesystem::atomic_move;
use crate::artifact::tarball::{create_tar_zst, unpack_tar_zst};
use crate::error::{IoResultExt, PackageError, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

const ARCHIVE_SUFFIX: &str = "tar.zst";
const RECORD_SUFFIX: &str = "json";

/// SHA-256 of a dependency specification, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for the full specification text.
    pub fn from_spec(spec: &str) -> Self {
        Self(format!("{:x}", Sha256::digest(spec.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CacheKey {
    type Error = PackageError;

    fn try_from(value: String) -> Result<Self> {
        if is_hex_64(&value) {
            Ok(Self(value.to_ascii_lowercase()))
        } else {
            Err(PackageError::validation(
                "cache key",
                format!("'{value}' is not a 64-digit hex digest"),
            ))
        }
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hash a dependency specification into a cache key.
pub fn cache_key(spec: &str) -> CacheKey {
    CacheKey::from_spec(spec)
}

/// Persisted description of a committed entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub key: CacheKey,
    /// SHA-256 of the archive file, checked on restore.
    pub archive_sha256: String,
    pub size_bytes: u64,
    /// RFC 3339 UTC timestamp.
    pub stored_at: String,
}

/// A committed entry resolved from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEnvironment {
    pub record: EntryRecord,
    pub archive_path: PathBuf,
}

/// What [`DependencyCache::materialize`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Restored from an existing entry; the builder was not run.
    Hit,
    /// Built, stored, then restored.
    Built,
}

/// Cache rooted at a directory (by default `~/.cache/debforge`).
#[derive(Debug, Clone)]
pub struct DependencyCache {
    root: PathBuf,
}

impl DependencyCache {
    /// Open (and create if needed) the cache at `root`.
    pub fn open(root: &Path) -> Result<Self> {
        let cache = Self {
            root: root.to_path_buf(),
        };
        cache.ensure_layout()?;
        Ok(cache)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_layout(&self) -> Result<()> {
        for dir in [self.envs_dir(), self.tmp_dir(), self.locks_dir()] {
            fs::create_dir_all(&dir)
                .io_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }

    fn envs_dir(&self) -> PathBuf {
        self.root.join("envs")
    }

    fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    /// Canonical archive path for `key`.
    pub fn archive_path(&self, key: &CacheKey) -> PathBuf {
        self.envs_dir().join(format!("{key}.{ARCHIVE_SUFFIX}"))
    }

    fn record_path(&self, key: &CacheKey) -> PathBuf {
        self.envs_dir().join(format!("{key}.{RECORD_SUFFIX}"))
    }

    fn lock_path(&self, key: &CacheKey) -> PathBuf {
        self.locks_dir().join(format!("{key}.lock"))
    }

    /// Committed entry for `key`, if any.
    ///
    /// An archive without a record is an interrupted store and is treated
    /// as absent.
    pub fn lookup(&self, key: &CacheKey) -> Result<Option<CachedEnvironment>> {
        let record_path = self.record_path(key);
        if !record_path.is_file() {
            return Ok(None);
        }

        let bytes = fs::read(&record_path)
            .io_context(|| format!("Failed to read {}", record_path.display()))?;
        let record: EntryRecord =
            serde_json::from_slice(&bytes).map_err(|e| PackageError::CorruptCache {
                key: key.to_string(),
                reason: format!("unreadable record {}: {e}", record_path.display()),
            })?;

        let archive_path = self.archive_path(key);
        if !archive_path.is_file() {
            warn!(%key, "cache record has no archive; ignoring");
            return Ok(None);
        }
        Ok(Some(CachedEnvironment {
            record,
            archive_path,
        }))
    }

    /// Archive `env_dir` and publish it under `key`.
    ///
    /// The archive is written under `tmp/` and renamed into place; the record
    /// is published after it. Concurrent stores of the same key are
    /// serialised, and the loser reuses the winner's entry.
    pub fn store(&self, key: &CacheKey, env_dir: &Path) -> Result<CachedEnvironment> {
        if !env_dir.is_dir() {
            return Err(PackageError::validation(
                "environment",
                format!("{} is not a directory", env_dir.display()),
            ));
        }

        let _lock = self.acquire_lock(key)?;
        if let Some(existing) = self.lookup(key)? {
            debug!(%key, "entry committed by another process");
            return Ok(existing);
        }

        let tmp_archive = tempfile::Builder::new()
            .prefix(&format!("{key}-"))
            .suffix(&format!(".{ARCHIVE_SUFFIX}"))
            .tempfile_in(self.tmp_dir())
            .io_context(|| format!("creating temporary archive in {}", self.tmp_dir().display()))?
            .into_temp_path();
        create_tar_zst(env_dir, &tmp_archive)?;
        let (archive_sha256, size_bytes) = sha256_file(&tmp_archive)?;

        let archive_path = self.archive_path(key);
        atomic_move(&tmp_archive, &archive_path)?;

        let record = EntryRecord {
            key: key.clone(),
            archive_sha256,
            size_bytes,
            stored_at: now_rfc3339(),
        };
        self.write_record(&record)?;
        info!(%key, size_bytes, "stored environment");

        Ok(CachedEnvironment {
            record,
            archive_path,
        })
    }

    /// Extract `entry` into `dest`, replacing whatever is there.
    ///
    /// The archive hash is verified first. Extraction goes to a sibling
    /// temporary directory that is renamed over `dest` once complete.
    pub fn restore(&self, entry: &CachedEnvironment, dest: &Path) -> Result<()> {
        let (actual, _) = sha256_file(&entry.archive_path)?;
        if actual != entry.record.archive_sha256 {
            return Err(PackageError::CorruptCache {
                key: entry.record.key.to_string(),
                reason: format!(
                    "archive hash mismatch: expected {}, found {actual}",
                    entry.record.archive_sha256
                ),
            });
        }

        let parent = dest.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)
            .io_context(|| format!("Failed to create directory: {}", parent.display()))?;
        let extract = tempfile::Builder::new()
            .prefix(".debforge-extract-")
            .tempdir_in(parent)
            .io_context(|| format!("creating extraction area in {}", parent.display()))?;
        unpack_tar_zst(&entry.archive_path, extract.path())?;

        if dest.exists() {
            fs::remove_dir_all(dest)
                .io_context(|| format!("Failed to remove {}", dest.display()))?;
        }
        let extracted = extract.keep();
        fs::rename(&extracted, dest).io_context(|| {
            format!(
                "Failed to move extracted dir {} to {}",
                extracted.display(),
                dest.display()
            )
        })?;
        debug!(key = %entry.record.key, dest = %dest.display(), "restored environment");
        Ok(())
    }

    /// Populate `dest` for `spec`, building only on a cache miss.
    ///
    /// The entry is keyed by [`cache_key`] of `spec`. Both paths finish by
    /// restoring from the archive, so a hit and a fresh build produce
    /// identical trees.
    pub fn materialize(
        &self,
        spec: &str,
        dest: &Path,
        builder: &dyn EnvironmentBuilder,
    ) -> Result<CacheOutcome> {
        let key = &cache_key(spec);
        if let Some(entry) = self.lookup(key)? {
            info!(%key, "dependency cache hit");
            self.restore(&entry, dest)?;
            return Ok(CacheOutcome::Hit);
        }

        info!(%key, "dependency cache miss; building environment");
        let build_dir = tempfile::Builder::new()
            .prefix("build-")
            .tempdir_in(self.tmp_dir())
            .io_context(|| format!("creating build area in {}", self.tmp_dir().display()))?;
        builder.build(spec, build_dir.path())?;

        let entry = self.store(key, build_dir.path())?;
        self.restore(&entry, dest)?;
        Ok(CacheOutcome::Built)
    }

    /// All committed entries, newest first.
    pub fn entries(&self) -> Result<Vec<CachedEnvironment>> {
        let dir = self.envs_dir();
        let mut out = Vec::new();
        for ent in fs::read_dir(&dir).io_context(|| format!("Failed to read {}", dir.display()))? {
            let ent = ent.io_context(|| format!("Failed to read {}", dir.display()))?;
            let path = ent.path();
            if path.extension().and_then(|s| s.to_str()) != Some(RECORD_SUFFIX) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Ok(key) = CacheKey::try_from(stem.to_string()) else {
                continue;
            };
            if let Some(entry) = self.lookup(&key)? {
                out.push(entry);
            }
        }
        out.sort_by(|a, b| {
            b.record
                .stored_at
                .cmp(&a.record.stored_at)
                .then_with(|| a.record.key.cmp(&b.record.key))
        });
        Ok(out)
    }

    /// Remove every entry and any leftover temporary files.
    /// Returns the number of committed entries removed.
    pub fn clear(&self) -> Result<usize> {
        let removed = self.entries()?.len();
        for dir in [self.envs_dir(), self.tmp_dir()] {
            if dir.exists() {
                fs::remove_dir_all(&dir)
                    .io_context(|| format!("Failed to remove {}", dir.display()))?;
            }
        }
        self.ensure_layout()?;
        info!(removed, root = %self.root.display(), "cleared dependency cache");
        Ok(removed)
    }

    fn write_record(&self, record: &EntryRecord) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(record).map_err(|e| PackageError::CorruptCache {
            key: record.key.to_string(),
            reason: format!("serializing record: {e}"),
        })?;
        let tmp = tempfile::Builder::new()
            .prefix("record-")
            .tempfile_in(self.tmp_dir())
            .io_context(|| format!("creating temporary record in {}", self.tmp_dir().display()))?
            .into_temp_path();
        fs::write(&tmp, bytes).io_context(|| format!("writing {}", tmp.display()))?;
        atomic_move(&tmp, &self.record_path(&record.key))
    }

    fn acquire_lock(&self, key: &CacheKey) -> Result<CacheLock> {
        let lock_path = self.lock_path(key);

        // Lock files are never unlinked. Unlinking a still-locked file lets a
        // second process create a new file at the same path and take a
        // separate exclusive lock.
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .io_context(|| format!("Failed to create lock file: {}", lock_path.display()))?;
        file.lock_exclusive()
            .io_context(|| format!("Failed to lock {}", lock_path.display()))?;
        Ok(CacheLock { file })
    }
}

/// Holds the per-key lock until dropped.
#[derive(Debug)]
struct CacheLock {
    file: File,
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

fn sha256_file(path: &Path) -> Result<(String, u64)> {
    let f = File::open(path).io_context(|| format!("Failed to open {}", path.display()))?;
    let mut r = BufReader::new(f);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = r
            .read(&mut buf)
            .io_context(|| format!("Failed to read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((format!("{:x}", hasher.finalize()), size))
}

fn is_hex_64(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tempfile::TempDir;
    use walkdir::WalkDir;

    const FLASK_KEY: &str = "7d9d506375f509f9b42ebc3408536a48bcdf4e99385620608a6c49b8a521c003";

    fn env_tree(tmp: &Path) -> PathBuf {
        let env = tmp.join("env");
        fs::create_dir_all(env.join("lib/python/flask")).unwrap();
        fs::write(env.join("lib/python/flask/__init__.py"), "VERSION = '1.0'\n").unwrap();
        env
    }

    fn snapshot(dir: &Path) -> Vec<(String, Vec<u8>)> {
        let mut out: Vec<_> = WalkDir::new(dir)
            .min_depth(1)
            .into_iter()
            .map(|e| e.unwrap())
            .map(|e| {
                let rel = e.path().strip_prefix(dir).unwrap().to_string_lossy().into_owned();
                let data = if e.file_type().is_file() {
                    fs::read(e.path()).unwrap()
                } else {
                    Vec::new()
                };
                (rel, data)
            })
            .collect();
        out.sort();
        out
    }

    #[test]
    fn key_is_stable_sha256() {
        assert_eq!(cache_key("flask==1.0"), cache_key("flask==1.0"));
        assert_eq!(cache_key("flask==1.0").as_str(), FLASK_KEY);
        assert_ne!(cache_key("flask==1.0"), cache_key("flask==1.1"));
    }

    #[test]
    fn key_parsing_rejects_non_hex() {
        assert!(CacheKey::try_from("../etc/passwd".to_string()).is_err());
        assert!(CacheKey::try_from(FLASK_KEY.to_string()).is_ok());
    }

    #[test]
    fn store_then_lookup_returns_entry() {
        let tmp = TempDir::new().unwrap();
        let cache = DependencyCache::open(&tmp.path().join("cache")).unwrap();
        let key = cache_key("flask==1.0");
        assert!(cache.lookup(&key).unwrap().is_none());

        let stored = cache.store(&key, &env_tree(tmp.path())).unwrap();
        let found = cache.lookup(&key).unwrap().unwrap();
        assert_eq!(found, stored);
        assert_eq!(found.archive_path, cache.archive_path(&key));
        assert!(found.record.size_bytes > 0);
    }

    #[test]
    fn interrupted_store_is_invisible() {
        let tmp = TempDir::new().unwrap();
        let cache = DependencyCache::open(&tmp.path().join("cache")).unwrap();
        let key = cache_key("flask==1.0");

        // Archive published but the process died before the record.
        fs::write(cache.archive_path(&key), b"partial").unwrap();
        // And a half-written temp archive.
        fs::write(cache.tmp_dir().join("leftover.tar.zst"), b"par").unwrap();

        assert!(cache.lookup(&key).unwrap().is_none());
        assert!(cache.entries().unwrap().is_empty());

        // A later store replaces the orphan.
        cache.store(&key, &env_tree(tmp.path())).unwrap();
        assert!(cache.lookup(&key).unwrap().is_some());
    }

    #[test]
    fn failed_store_leaves_no_entry() {
        let tmp = TempDir::new().unwrap();
        let cache = DependencyCache::open(&tmp.path().join("cache")).unwrap();
        let key = cache_key("x");
        assert!(cache.store(&key, &tmp.path().join("missing")).is_err());
        assert!(cache.lookup(&key).unwrap().is_none());
        assert!(!cache.archive_path(&key).exists());
    }

    #[test]
    fn materialize_builds_once() {
        let tmp = TempDir::new().unwrap();
        let cache = DependencyCache::open(&tmp.path().join("cache")).unwrap();
        let calls = Cell::new(0);
        let builder = |spec: &str, target: &Path| -> Result<()> {
            calls.set(calls.get() + 1);
            fs::create_dir_all(target.join("site")).unwrap();
            fs::write(target.join("site/requirements.txt"), spec).unwrap();
            Ok(())
        };

        let key = cache_key("flask==1.0");
        assert!(cache.lookup(&key).unwrap().is_none());
        let first = tmp.path().join("first");
        let second = tmp.path().join("second");

        assert_eq!(
            cache.materialize("flask==1.0", &first, &builder).unwrap(),
            CacheOutcome::Built
        );
        assert_eq!(
            cache.materialize("flask==1.0", &second, &builder).unwrap(),
            CacheOutcome::Hit
        );
        assert_eq!(calls.get(), 1);
        assert_eq!(snapshot(&first), snapshot(&second));
        assert!(cache.lookup(&key).unwrap().is_some());
    }

    #[test]
    fn failing_builder_publishes_nothing() {
        let tmp = TempDir::new().unwrap();
        let cache = DependencyCache::open(&tmp.path().join("cache")).unwrap();
        let builder = |_: &str, _: &Path| -> Result<()> {
            Err(PackageError::BuildFailed {
                reason: "boom".to_string(),
            })
        };
        let key = cache_key("broken");
        let dest = tmp.path().join("dest");
        assert!(cache.materialize("broken", &dest, &builder).is_err());
        assert!(cache.lookup(&key).unwrap().is_none());
        assert!(!dest.exists());
    }

    #[test]
    fn restore_replaces_existing_destination() {
        let tmp = TempDir::new().unwrap();
        let cache = DependencyCache::open(&tmp.path().join("cache")).unwrap();
        let key = cache_key("flask==1.0");
        let entry = cache.store(&key, &env_tree(tmp.path())).unwrap();

        let dest = tmp.path().join("dest");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("stale"), "old").unwrap();
        cache.restore(&entry, &dest).unwrap();

        assert!(!dest.join("stale").exists());
        assert!(dest.join("lib/python/flask/__init__.py").is_file());
    }

    #[test]
    fn corrupted_archive_is_detected() {
        let tmp = TempDir::new().unwrap();
        let cache = DependencyCache::open(&tmp.path().join("cache")).unwrap();
        let key = cache_key("flask==1.0");
        let entry = cache.store(&key, &env_tree(tmp.path())).unwrap();
        fs::write(&entry.archive_path, b"tampered").unwrap();

        let err = cache.restore(&entry, &tmp.path().join("dest")).unwrap_err();
        assert!(matches!(err, PackageError::CorruptCache { .. }));
    }

    #[test]
    fn clear_removes_entries() {
        let tmp = TempDir::new().unwrap();
        let cache = DependencyCache::open(&tmp.path().join("cache")).unwrap();
        let env = env_tree(tmp.path());
        cache.store(&cache_key("a"), &env).unwrap();
        cache.store(&cache_key("b"), &env).unwrap();
        assert_eq!(cache.entries().unwrap().len(), 2);

        assert_eq!(cache.clear().unwrap(), 2);
        assert!(cache.entries().unwrap().is_empty());
        assert!(cache.lookup(&cache_key("a")).unwrap().is_none());
    }

    #[test]
    fn second_store_reuses_committed_entry() {
        let tmp = TempDir::new().unwrap();
        let cache = DependencyCache::open(&tmp.path().join("cache")).unwrap();
        let key = cache_key("flask==1.0");
        let first = cache.store(&key, &env_tree(tmp.path())).unwrap();
        let second = cache.store(&key, &env_tree(tmp.path())).unwrap();
        assert_eq!(first, second);
    }
}
