//! Cross-process instance lock.
//!
//! One advisory `fcntl` lock file serializes mutating operations across
//! processes. Within a process the lock is re-entrant: nested
//! acquisitions bump a reference count and only the outermost release
//! performs the OS unlock. When the lock file cannot be opened for
//! writing the handle degrades to read mode, which still allows shared
//! acquisition for read-only commands.

use std::cell::Cell;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use nix::fcntl::{FcntlArg, fcntl};
use nix::libc;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Lock file name relative to the install root's run directory.
pub const LOCK_FILE_NAME: &str = ".ferrite-instance-lockfile";

/// Acquisition mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    /// Shared lock for read-only commands.
    Read,
    /// Exclusive lock, failing immediately when contended.
    Write,
    /// Exclusive lock, blocking until the holder releases.
    WriteWait,
}

/// Handle on the instance lock file.
pub struct InstanceLock {
    file: File,
    path: PathBuf,
    writable: bool,
    refs: Cell<u32>,
}

impl InstanceLock {
    /// What: Open (creating if needed) the lock file.
    ///
    /// Inputs:
    /// - `path`: Well-known lock file location.
    ///
    /// Output:
    /// - A handle that can be acquired in read or write mode.
    ///
    /// Details:
    /// - Opens read-write with mode 0644; on a permission failure falls
    ///   back to a read-only open of the same path, which restricts the
    ///   handle to shared acquisition.
    pub fn open(path: &Path) -> Result<Self> {
        match OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
        {
            Ok(file) => Ok(Self {
                file,
                path: path.to_path_buf(),
                writable: true,
                refs: Cell::new(0),
            }),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                let file = File::open(path).map_err(|e| Error::io(path, e))?;
                debug!(path = %path.display(), "lock file opened read-only");
                Ok(Self {
                    file,
                    path: path.to_path_buf(),
                    writable: false,
                    refs: Cell::new(0),
                })
            }
            Err(e) => Err(Error::io(path, e)),
        }
    }

    /// What: Acquire the lock, re-entrantly within this process.
    ///
    /// Inputs:
    /// - `mode`: Shared, exclusive, or exclusive-waiting.
    ///
    /// Output:
    /// - A guard whose drop releases this acquisition. Only the final
    ///   release unlocks at the OS level.
    ///
    /// Details:
    /// - Requesting write on a read-only handle fails `LockReadOnly`.
    /// - A contended non-waiting exclusive request fails `LockBusy`.
    /// - A nested acquisition never re-enters the OS.
    pub fn acquire(&self, mode: LockMode) -> Result<LockGuard<'_>> {
        if matches!(mode, LockMode::Write | LockMode::WriteWait) && !self.writable {
            return Err(Error::LockReadOnly {
                path: self.path.clone(),
            });
        }

        if self.refs.get() == 0 {
            self.os_lock(mode)?;
        }
        self.refs.set(self.refs.get() + 1);
        Ok(LockGuard { lock: self })
    }

    /// What: Acquire exclusively, escalating to a waiting acquisition.
    ///
    /// Output:
    /// - A guard, after possibly blocking behind another process.
    ///
    /// Details:
    /// - Mirrors the interactive path: try without waiting, then log and
    ///   block. Callers that must fail fast use [`Self::acquire`] with
    ///   [`LockMode::Write`] directly.
    pub fn acquire_write_waiting(&self) -> Result<LockGuard<'_>> {
        match self.acquire(LockMode::Write) {
            Ok(guard) => Ok(guard),
            Err(Error::LockBusy { .. }) => {
                warn!(path = %self.path.display(), "waiting for instance lock");
                self.acquire(LockMode::WriteWait)
            }
            Err(e) => Err(e),
        }
    }

    /// Whether the handle can take the exclusive lock at all.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    fn os_lock(&self, mode: LockMode) -> Result<()> {
        let lock_type = match mode {
            LockMode::Read => libc::F_RDLCK,
            LockMode::Write | LockMode::WriteWait => libc::F_WRLCK,
        };
        let fl = flock_for(lock_type);
        let arg = match mode {
            LockMode::WriteWait => FcntlArg::F_SETLKW(&fl),
            _ => FcntlArg::F_SETLK(&fl),
        };
        fcntl(&self.file, arg).map_err(|errno| match errno {
            nix::errno::Errno::EACCES | nix::errno::Errno::EAGAIN => Error::LockBusy {
                path: self.path.clone(),
            },
            other => Error::io(&self.path, std::io::Error::from(other)),
        })?;
        Ok(())
    }

    fn release(&self) {
        let refs = self.refs.get();
        debug_assert!(refs > 0, "lock released more often than acquired");
        if refs == 0 {
            return;
        }
        self.refs.set(refs - 1);
        if refs == 1 {
            let fl = flock_for(libc::F_UNLCK);
            let _ = fcntl(&self.file, FcntlArg::F_SETLK(&fl));
        }
    }
}

/// RAII guard for one acquisition of the instance lock.
pub struct LockGuard<'a> {
    lock: &'a InstanceLock,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

/// Build a whole-file `flock` record of the given type.
fn flock_for(lock_type: i32) -> libc::flock {
    // Zeroed l_start/l_len covers the whole file from SEEK_SET.
    let mut fl: libc::flock = unsafe { std::mem::zeroed() };
    fl.l_type = lock_type as i16;
    fl.l_whence = libc::SEEK_SET as i16;
    fl
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_is_reentrant() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lockfile");
        let lock = InstanceLock::open(&path).unwrap();

        let outer = lock.acquire(LockMode::Write).unwrap();
        let inner = lock.acquire(LockMode::Write).unwrap();
        assert_eq!(lock.refs.get(), 2);
        drop(inner);
        assert_eq!(lock.refs.get(), 1);
        drop(outer);
        assert_eq!(lock.refs.get(), 0);
    }

    #[test]
    fn lock_can_be_reacquired_after_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lockfile");
        let lock = InstanceLock::open(&path).unwrap();

        drop(lock.acquire(LockMode::Write).unwrap());
        drop(lock.acquire(LockMode::Read).unwrap());
        let _guard = lock.acquire_write_waiting().unwrap();
    }

    #[test]
    fn nested_read_then_more_reads_share_one_os_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lockfile");
        let lock = InstanceLock::open(&path).unwrap();

        let a = lock.acquire(LockMode::Read).unwrap();
        let b = lock.acquire(LockMode::Read).unwrap();
        let c = lock.acquire(LockMode::Read).unwrap();
        assert_eq!(lock.refs.get(), 3);
        drop((a, b, c));
        assert_eq!(lock.refs.get(), 0);
    }
}
