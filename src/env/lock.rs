//! Advisory lock serializing lifecycle operations on one environment root.
//!
//! The lock is a sibling file `<root>.lock` held with an exclusive `flock`.
//! Waiters poll until a deadline instead of blocking forever, and lock files
//! older than the stale threshold are treated as abandoned and removed.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::error::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Lock file path for an environment root.
pub fn lock_path(root: &Path) -> PathBuf {
    let mut name = root
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "env".into());
    name.push(".lock");
    root.with_file_name(name)
}

fn is_stale_lock(lock_path: &Path, stale_after: Duration) -> bool {
    if let Ok(metadata) = std::fs::metadata(lock_path)
        && let Ok(modified) = metadata.modified()
        && let Ok(age) = SystemTime::now().duration_since(modified)
    {
        return age > stale_after;
    }
    false
}

/// RAII guard: releases the lock and deletes the lock file when dropped.
#[derive(Debug)]
pub struct EnvLock {
    file: File,
    path: PathBuf,
}

impl EnvLock {
    /// Acquire the lock for `root`, waiting at most `timeout`.
    pub fn acquire(root: &Path, timeout: Duration, stale_after: Duration) -> Result<Self> {
        let path = lock_path(root);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        let started = Instant::now();
        loop {
            if is_stale_lock(&path, stale_after) {
                warn!(lock = %path.display(), "removing stale environment lock");
                let _ = std::fs::remove_file(&path);
            }

            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)
                .map_err(|e| Error::io(&path, e))?;

            // The previous holder unlinks the file on release, so a lock won on
            // an unlinked inode does not count.
            if file.try_lock_exclusive().is_ok() && still_linked(&file, &path) {
                let mut lock = EnvLock { file, path };
                lock.record_holder();
                debug!(lock = %lock.path.display(), waited = ?started.elapsed(), "environment lock acquired");
                return Ok(lock);
            }
            drop(file);

            let waited = started.elapsed();
            if waited >= timeout {
                return Err(Error::LockTimeout { path, waited });
            }
            thread::sleep(POLL_INTERVAL.min(timeout - waited));
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn record_holder(&mut self) {
        let _ = self.file.set_len(0);
        let _ = writeln!(self.file, "{}", std::process::id());
    }
}

impl Drop for EnvLock {
    fn drop(&mut self) {
        // An expired lock may have been replaced by another holder's file.
        if still_linked(&self.file, &self.path) {
            let _ = std::fs::remove_file(&self.path);
        }
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(unix)]
fn still_linked(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (file.metadata(), std::fs::metadata(path)) {
        (Ok(held), Ok(on_disk)) => held.dev() == on_disk.dev() && held.ino() == on_disk.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn still_linked(_file: &File, path: &Path) -> bool {
    path.exists()
}
