//! Exclusive cross-process lock around the engine's shared working files.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::error::{MosaicError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Advisory lock file. Separate handles conflict even inside one process,
/// so concurrent tasks serialize the same way concurrent processes do.
#[derive(Debug, Clone)]
pub struct GenerationLock {
    path: PathBuf,
    poll_interval: Duration,
}

/// Held lock. Released when dropped, including on error and cancellation.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl GenerationLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), poll_interval: POLL_INTERVAL }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until the lock is held or `wait` elapses.
    pub fn acquire(&self, wait: Duration) -> Result<LockGuard> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.path)?;

        let started = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!("Acquired generation lock {} after {:?}", self.path.display(), started.elapsed());
                    return Ok(LockGuard { file, path: self.path.clone() });
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                    if started.elapsed() >= wait {
                        warn!("Generation lock {} still busy after {:?}", self.path.display(), wait);
                        return Err(MosaicError::LockTimeout(wait));
                    }
                    std::thread::sleep(self.poll_interval);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// `acquire` on the blocking pool.
    pub async fn acquire_async(&self, wait: Duration) -> Result<LockGuard> {
        let lock = self.clone();
        tokio::task::spawn_blocking(move || lock.acquire(wait)).await?
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release generation lock {}: {}", self.path.display(), e);
        } else {
            debug!("Released generation lock {}", self.path.display());
        }
    }
}
