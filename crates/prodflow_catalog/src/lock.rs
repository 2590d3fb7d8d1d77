//! Advisory lock files for destructive catalog operations.
//!
//! A lock is a file next to the work it protects. It carries the owner's pid
//! and timestamp and is held with an exclusive `fs2` lock while alive. A lock
//! file older than the configured maximum age is treated as abandoned and
//! taken over.
//!
//! Uses the `fs2` crate for cross-platform file locking (MSRV 1.75 compatible).

use chrono::Utc;
use fs2::FileExt;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from lock operations.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Lock {path} is held by another process (age {}s)", .age.as_secs())]
    Locked { path: PathBuf, age: Duration },

    #[error("Failed to create lock file: {0}")]
    CreateFailed(#[source] io::Error),

    #[error("Failed to acquire lock: {0}")]
    AcquireFailed(#[source] io::Error),
}

#[derive(Serialize)]
struct LockContents {
    pid: u32,
    timestamp: String,
    purpose: String,
}

/// Holds an advisory lock; the lock file is removed on drop.
pub struct LockGuard {
    _file: File,
    path: PathBuf,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("path", &self.path).finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        debug!("Releasing lock: {}", self.path.display());
        if let Err(e) = fs::remove_file(&self.path) {
            debug!("Failed to remove lock file {}: {}", self.path.display(), e);
        }
    }
}

/// Lock file path for a protected resource.
///
/// Examples:
/// - `/data/DST_CALO_dstlist` → `/data/DST_CALO_dstlist.lock`
/// - `/data/catalog.sqlite3` → `/data/catalog.sqlite3.lock`
pub fn lock_path_for(resource: &Path) -> PathBuf {
    let mut name = resource.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

fn lock_age(path: &Path) -> io::Result<Option<Duration>> {
    match fs::metadata(path) {
        Ok(meta) => {
            let modified = meta.modified()?;
            Ok(Some(
                SystemTime::now()
                    .duration_since(modified)
                    .unwrap_or(Duration::ZERO),
            ))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Try to take the lock at `path` without blocking.
///
/// An existing lock younger than `max_age` yields [`LockError::Locked`]; an
/// older one is removed and replaced.
pub fn acquire(path: &Path, max_age: Duration, purpose: &str) -> Result<LockGuard, LockError> {
    if let Some(age) = lock_age(path).map_err(LockError::AcquireFailed)? {
        if age < max_age {
            return Err(LockError::Locked {
                path: path.to_path_buf(),
                age,
            });
        }
        warn!(
            path = %path.display(),
            age_secs = age.as_secs(),
            "Taking over stale lock"
        );
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(LockError::AcquireFailed(e)),
        }
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(LockError::CreateFailed)?;
        }
    }

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| {
            if e.kind() == io::ErrorKind::AlreadyExists {
                LockError::Locked {
                    path: path.to_path_buf(),
                    age: Duration::ZERO,
                }
            } else {
                LockError::CreateFailed(e)
            }
        })?;

    file.try_lock_exclusive().map_err(|e| {
        if e.kind() == io::ErrorKind::WouldBlock {
            LockError::Locked {
                path: path.to_path_buf(),
                age: Duration::ZERO,
            }
        } else {
            LockError::AcquireFailed(e)
        }
    })?;

    let contents = LockContents {
        pid: std::process::id(),
        timestamp: Utc::now().to_rfc3339(),
        purpose: purpose.to_string(),
    };
    let payload = serde_json::to_vec_pretty(&contents)
        .map_err(|e| LockError::CreateFailed(io::Error::new(io::ErrorKind::Other, e)))?;
    file.write_all(&payload).map_err(LockError::CreateFailed)?;
    file.flush().map_err(LockError::CreateFailed)?;

    info!(path = %path.display(), purpose, "Acquired lock");
    Ok(LockGuard {
        _file: file,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn lock_path_appends_suffix() {
        assert_eq!(
            lock_path_for(Path::new("/data/DST_CALO_dstlist")),
            PathBuf::from("/data/DST_CALO_dstlist.lock")
        );
        assert_eq!(
            lock_path_for(Path::new("/data/catalog.sqlite3")),
            PathBuf::from("/data/catalog.sqlite3.lock")
        );
    }

    #[test]
    fn second_acquire_is_refused_until_release() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("purge.lock");

        let guard = acquire(&path, Duration::from_secs(1800), "purge").unwrap();
        assert!(path.exists());
        let err = acquire(&path, Duration::from_secs(1800), "purge").unwrap_err();
        assert!(matches!(err, LockError::Locked { .. }));

        drop(guard);
        assert!(!path.exists());
        acquire(&path, Duration::from_secs(1800), "purge").unwrap();
    }

    #[test]
    fn stale_lock_is_taken_over() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("purge.lock");
        fs::write(&path, "{}").unwrap();

        // Any existing file is at least zero seconds old.
        let guard = acquire(&path, Duration::ZERO, "purge").unwrap();
        let contents = fs::read_to_string(guard.path()).unwrap();
        assert!(contents.contains("\"pid\""));
    }
}
