//! Per-application advisory run lock.
//!
//! `flock(LOCK_EX | LOCK_NB)` on `<state_dir>/locks/<app>.lock`. The lock is
//! released when the guard drops or the process dies, so a crashed run never
//! leaves a stale lock behind.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::paths;

#[derive(Debug)]
pub struct AppLock {
    file: File,
    path: PathBuf,
}

impl AppLock {
    /// Take the lock without blocking. Fails with `run.locked` when another
    /// process holds it.
    pub fn acquire(state_dir: &Path, app: &str) -> Result<Self> {
        let path = paths::lock(state_dir, app);
        if let Some(parent) = path.parent() {
            crate::utils::io::ensure_dir(parent, "create lock directory")?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| {
                Error::internal_io(e.to_string(), Some(format!("open {}", path.display())))
            })?;

        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
                return Err(Error::run_locked(app, path.display().to_string()));
            }
            return Err(Error::internal_io(
                err.to_string(),
                Some(format!("lock {}", path.display())),
            ));
        }

        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for AppLock {
    fn drop(&mut self) {
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}
