//! Single-writer lock for the publication run.
//!
//! A plain lock file holding the owner's PID. Acquisition is
//! `create_new`, so two concurrent publishers race on the filesystem,
//! not in memory. When the file already exists the holder recorded in it
//! is sent SIGTERM and the file is removed once, on the assumption that
//! a leftover lock outlives a crashed run; the second attempt must then
//! succeed or the acquisition fails.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum LockError {
    #[error("Lock {path} held by pid {pid}")]
    Held { path: PathBuf, pid: String },

    #[error("Lock {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Held for the duration of a publication run; releases on drop.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        match Self::try_create(path) {
            Ok(lock) => Ok(lock),
            Err(source) if source.kind() == io::ErrorKind::AlreadyExists => {
                let pid = fs::read_to_string(path).unwrap_or_default();
                warn!(path = %path.display(), pid = %pid.trim(), "stale lock, evicting holder");
                Self::evict(pid.trim());
                if let Err(source) = fs::remove_file(path) {
                    if source.kind() != io::ErrorKind::NotFound {
                        return Err(LockError::Io {
                            path: path.to_owned(),
                            source,
                        });
                    }
                }
                Self::try_create(path).map_err(|source| {
                    if source.kind() == io::ErrorKind::AlreadyExists {
                        LockError::Held {
                            path: path.to_owned(),
                            pid,
                        }
                    } else {
                        LockError::Io {
                            path: path.to_owned(),
                            source,
                        }
                    }
                })
            }
            Err(source) => Err(LockError::Io {
                path: path.to_owned(),
                source,
            }),
        }
    }

    fn try_create(path: &Path) -> io::Result<Self> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        write!(file, "{}", std::process::id())?;
        debug!(path = %path.display(), "lock acquired");
        Ok(LockFile {
            path: path.to_owned(),
        })
    }

    /// Best effort: a holder that is already gone or not ours to signal
    /// is fine, the remove decides.
    fn evict(pid: &str) {
        #[cfg(unix)]
        if let Ok(pid) = pid.parse::<i32>() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            if pid > 0 && pid != std::process::id() as i32 {
                let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);
            }
        }
        #[cfg(not(unix))]
        let _ = pid;
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to release lock");
        }
    }
}
