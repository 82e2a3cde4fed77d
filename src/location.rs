//! Index placement and cross-process locking.
//!
//! Every repository gets one index directory holding `metadata.json`,
//! `index.db` and a `lock` file. Indexing and dropping take an exclusive
//! advisory lock on `lock`; searches take a shared one.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use fs2::FileExt;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Error, Result};

/// Name of the per-repository index directory.
pub const INDEX_DIR_NAME: &str = ".codesearch";
pub const METADATA_FILE: &str = "metadata.json";
pub const INDEX_FILE: &str = "index.db";
pub const LOCK_FILE: &str = "lock";
pub const AUX_INDEX_FILE: &str = "data.index";

/// Overrides where index directories are placed.
pub const INDEX_ROOT_ENV: &str = "CODESEARCH_INDEX_ROOT";

/// Resolved on-disk location of one repository's index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexLocation {
    repo_root: PathBuf,
    index_dir: PathBuf,
}

impl IndexLocation {
    /// Resolve the index location for a repository root, honouring
    /// `CODESEARCH_INDEX_ROOT`.
    pub fn for_repo(repo_root: impl AsRef<Path>) -> Result<Self> {
        let override_root = std::env::var_os(INDEX_ROOT_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        Self::resolve(repo_root.as_ref(), override_root.as_deref())
    }

    fn resolve(repo_root: &Path, override_root: Option<&Path>) -> Result<Self> {
        let repo_root = canonical_root(repo_root)?;
        let index_dir = match override_root {
            Some(base) => base.join(external_dir_name(&repo_root)),
            None => repo_root.join(INDEX_DIR_NAME),
        };
        Ok(Self {
            repo_root,
            index_dir,
        })
    }

    /// Place the index in an explicit directory.
    pub fn with_index_dir(repo_root: impl AsRef<Path>, index_dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            repo_root: canonical_root(repo_root.as_ref())?,
            index_dir: index_dir.into(),
        })
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.index_dir.join(METADATA_FILE)
    }

    pub fn index_path(&self) -> PathBuf {
        self.index_dir.join(INDEX_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.index_dir.join(LOCK_FILE)
    }

    pub fn aux_index_path(&self) -> PathBuf {
        self.index_dir.join(AUX_INDEX_FILE)
    }

    /// Whether a committed index exists at this location.
    pub fn exists(&self) -> bool {
        self.index_path().is_file() || self.metadata_path().is_file()
    }

    /// Fail with `NotFound` unless a committed index exists.
    pub fn require_index(&self) -> Result<()> {
        if self.exists() {
            Ok(())
        } else {
            Err(Error::NotFound {
                path: self.index_dir.clone(),
                what: "index",
            })
        }
    }
}

fn canonical_root(repo_root: &Path) -> Result<PathBuf> {
    if !repo_root.is_dir() {
        return Err(Error::NotFound {
            path: repo_root.to_path_buf(),
            what: "repository",
        });
    }
    repo_root.canonicalize().map_err(|e| Error::io(repo_root, e))
}

fn external_dir_name(repo_root: &Path) -> String {
    let name = repo_root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "root".to_string());
    let digest = Sha256::digest(repo_root.to_string_lossy().as_bytes());
    format!("{}-{}", name, &hex::encode(digest)[..12])
}

/// Bounded retry policy for lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRetry {
    /// Extra attempts after the first one.
    pub attempts: u32,
    pub initial_backoff: Duration,
}

impl LockRetry {
    pub const NONE: LockRetry = LockRetry {
        attempts: 0,
        initial_backoff: Duration::from_millis(0),
    };

    pub fn new(attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            attempts,
            initial_backoff,
        }
    }
}

impl Default for LockRetry {
    fn default() -> Self {
        Self::NONE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Held advisory lock on an index directory; released on drop.
#[derive(Debug)]
pub struct IndexLock {
    file: File,
    mode: LockMode,
    path: PathBuf,
}

impl IndexLock {
    /// Take the writer lock, creating the index directory if needed.
    pub fn exclusive(location: &IndexLocation, retry: LockRetry) -> Result<Self> {
        fs::create_dir_all(location.index_dir()).map_err(|e| Error::io(location.index_dir(), e))?;
        Self::acquire(location, LockMode::Exclusive, retry)
    }

    /// Take a reader lock. Never creates the index directory.
    pub fn shared(location: &IndexLocation, retry: LockRetry) -> Result<Self> {
        if !location.index_dir().is_dir() {
            return Err(Error::NotFound {
                path: location.index_dir().to_path_buf(),
                what: "index",
            });
        }
        Self::acquire(location, LockMode::Shared, retry)
    }

    fn acquire(location: &IndexLocation, mode: LockMode, retry: LockRetry) -> Result<Self> {
        let path = location.lock_path();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| Error::io(&path, e))?;

        let mut backoff = retry.initial_backoff;
        let mut attempt = 0;
        loop {
            let res = match mode {
                LockMode::Shared => FileExt::try_lock_shared(&file),
                LockMode::Exclusive => FileExt::try_lock_exclusive(&file),
            };
            match res {
                Ok(()) => {
                    debug!("Acquired {:?} lock on {}", mode, path.display());
                    return Ok(Self { file, mode, path });
                }
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    if attempt >= retry.attempts {
                        return Err(Error::IndexBusy {
                            path: location.index_dir().to_path_buf(),
                        });
                    }
                    attempt += 1;
                    debug!("Lock busy on {}, retry {attempt} in {backoff:?}", path.display());
                    thread::sleep(backoff);
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) => return Err(Error::io(&path, e)),
            }
        }
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for IndexLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!("Released {:?} lock on {}", self.mode, self.path.display());
    }
}
