//! Cross-process restore lock.
//!
//! An advisory `flock` on a well-known file. A restore holds it for its whole duration;
//! scheduled and manual backups only probe it and skip when it is taken. Every
//! acquisition opens a fresh file description, so two `RestoreLock` values on the same
//! path exclude each other even inside one process.

use crate::utils::errors::LockError;
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const LOCK_FILE_NAME: &str = "restore.lock";

const RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Well-known lock location: the user cache directory, falling back to the temp dir.
pub fn default_lock_path() -> PathBuf {
    let preferred = dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("pgkeep");

    match std::fs::create_dir_all(&preferred) {
        Ok(()) => preferred.join(LOCK_FILE_NAME),
        Err(e) => {
            warn!(
                "Cannot create lock directory {}: {}, using temp dir",
                preferred.display(),
                e
            );
            std::env::temp_dir().join(LOCK_FILE_NAME)
        }
    }
}

pub struct RestoreLock {
    path: PathBuf,
    retry_interval: Duration,
    held: Mutex<Option<Flock<File>>>,
}

impl RestoreLock {
    pub fn new() -> Self {
        Self::at(default_lock_path())
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            retry_interval: RETRY_INTERVAL,
            held: Mutex::new(None),
        }
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until the lock is acquired. Not reentrant: calling it again while this
    /// instance holds the lock waits forever.
    pub async fn acquire(&self) -> Result<(), LockError> {
        loop {
            if let Some(lock) = self.try_lock()? {
                *self.held() = Some(lock);
                info!("Restore lock acquired: {}", self.path.display());
                return Ok(());
            }
            debug!("Restore lock busy, retrying in {:?}", self.retry_interval);
            tokio::time::sleep(self.retry_interval).await;
        }
    }

    /// Release the lock if this instance holds it; no-op otherwise.
    pub fn release(&self) -> Result<(), LockError> {
        let Some(lock) = self.held().take() else {
            return Ok(());
        };
        lock.unlock().map_err(|(_, source)| LockError::Unlock {
            path: self.path.clone(),
            source,
        })?;
        info!("Restore lock released: {}", self.path.display());
        Ok(())
    }

    /// Acquire and return a guard that releases on drop
    pub async fn hold(&self) -> Result<RestoreGuard<'_>, LockError> {
        self.acquire().await?;
        Ok(RestoreGuard { lock: self })
    }

    /// Whether the lock is currently held by anyone, this instance included.
    ///
    /// Never blocks. If the probe itself fails the lock is reported as held, so
    /// callers err on the side of skipping a backup.
    pub fn probe(&self) -> bool {
        match self.try_lock() {
            Ok(Some(lock)) => {
                if let Err((_, e)) = lock.unlock() {
                    warn!("Failed to release probe lock: {}", e);
                }
                false
            }
            Ok(None) => true,
            Err(e) => {
                warn!("Restore lock probe failed, assuming held: {}", e);
                true
            }
        }
    }

    fn try_lock(&self) -> Result<Option<Flock<File>>, LockError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|source| LockError::Open {
                path: self.path.clone(),
                source,
            })?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => Ok(Some(lock)),
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => Ok(None),
            Err((_, source)) => Err(LockError::Lock {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn held(&self) -> MutexGuard<'_, Option<Flock<File>>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RestoreLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases the restore lock when dropped.
pub struct RestoreGuard<'a> {
    lock: &'a RestoreLock,
}

impl Drop for RestoreGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.release() {
            warn!("{}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn lock_pair(dir: &TempDir) -> (RestoreLock, RestoreLock) {
        let path = dir.path().join(LOCK_FILE_NAME);
        (
            RestoreLock::at(&path).with_retry_interval(Duration::from_millis(20)),
            RestoreLock::at(&path).with_retry_interval(Duration::from_millis(20)),
        )
    }

    #[tokio::test]
    async fn test_probe_reflects_holder() {
        let dir = TempDir::new().unwrap();
        let (restore, backup) = lock_pair(&dir);

        assert!(!backup.probe());
        restore.acquire().await.unwrap();
        assert!(backup.probe());
        assert!(restore.probe());

        restore.release().unwrap();
        assert!(!backup.probe());
    }

    #[tokio::test]
    async fn test_probe_does_not_take_the_lock() {
        let dir = TempDir::new().unwrap();
        let (a, b) = lock_pair(&dir);

        assert!(!a.probe());
        assert!(!a.probe());
        tokio::time::timeout(Duration::from_secs(1), b.acquire())
            .await
            .expect("probe must not leave the lock held")
            .unwrap();
        b.release().unwrap();
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let dir = TempDir::new().unwrap();
        let (first, second) = lock_pair(&dir);
        let second = std::sync::Arc::new(second);

        first.acquire().await.unwrap();
        let waiter = {
            let second = second.clone();
            tokio::spawn(async move { second.acquire().await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!waiter.is_finished());

        first.release().unwrap();
        tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(first.probe());
        second.release().unwrap();
    }

    #[tokio::test]
    async fn test_release_without_acquire_is_noop() {
        let dir = TempDir::new().unwrap();
        let (lock, _) = lock_pair(&dir);
        lock.release().unwrap();
        lock.release().unwrap();
    }

    #[tokio::test]
    async fn test_guard_releases_on_drop() {
        let dir = TempDir::new().unwrap();
        let (a, b) = lock_pair(&dir);
        {
            let _guard = a.hold().await.unwrap();
            assert!(b.probe());
        }
        assert!(!b.probe());
    }

    #[test]
    fn test_default_path_is_writable() {
        let path = default_lock_path();
        assert_eq!(path.file_name().unwrap(), LOCK_FILE_NAME);
        assert!(path.parent().unwrap().is_dir());
    }
}
