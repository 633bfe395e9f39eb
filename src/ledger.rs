//! Run ledger
//!
//! A single plain-text integer (the "day" counter) stored at a well-known path.
//! Access goes through a [`LedgerLease`], an exclusive lock file created next to
//! the ledger and removed when the lease drops, so no two runs ever hold the
//! counter at the same time. A lock whose recorded holder is no longer running
//! is reclaimed. Commits write a sibling temp file, fsync it and rename it over
//! the ledger.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use sysinfo::{Pid, System};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Value reported when the ledger file is missing or unreadable.
pub const INITIAL_DAY: u64 = 1;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger {} is held by another run (lock file {})", .path.display(), .lock.display())]
    Locked { path: PathBuf, lock: PathBuf },

    #[error("ledger {} I/O failed: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LedgerError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunLedger {
    path: PathBuf,
}

impl RunLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> PathBuf {
        sibling(&self.path, "lock")
    }

    /// Current value without taking the lock. Used for reporting only.
    pub fn peek(&self) -> u64 {
        read_day(&self.path)
    }

    /// Take exclusive ownership of the ledger for one run.
    pub fn acquire(&self) -> Result<LedgerLease, LedgerError> {
        let lock = self.lock_path();
        if let Some(parent) = lock.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| LedgerError::io(parent, err))?;
        }
        match self.create_lock(&lock) {
            Err(LedgerError::Locked { .. }) => {
                let Some(holder) = dead_holder(&lock) else {
                    return Err(LedgerError::Locked {
                        path: self.path.clone(),
                        lock,
                    });
                };
                warn!(lock = %lock.display(), holder, "reclaiming lock left by a dead run");
                fs::remove_file(&lock).map_err(|err| LedgerError::io(&lock, err))?;
                self.create_lock(&lock)
            }
            other => other,
        }
    }

    fn create_lock(&self, lock: &Path) -> Result<LedgerLease, LedgerError> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(lock) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(LedgerError::Locked {
                    path: self.path.clone(),
                    lock: lock.to_path_buf(),
                })
            }
            Err(err) => return Err(LedgerError::io(lock, err)),
        };
        let _ = writeln!(file, "{}", std::process::id());
        debug!(lock = %lock.display(), "ledger lock acquired");
        Ok(LedgerLease {
            path: self.path.clone(),
            lock: lock.to_path_buf(),
        })
    }
}

/// Pid recorded in `lock` when that process is gone. An unreadable or empty
/// lock may belong to a run that has not written its pid yet, so it is kept.
fn dead_holder(lock: &Path) -> Option<u32> {
    let pid: u32 = fs::read_to_string(lock).ok()?.trim().parse().ok()?;
    if pid == std::process::id() {
        return None;
    }
    let mut system = System::new();
    (!system.refresh_process(Pid::from_u32(pid))).then_some(pid)
}

/// Exclusive hold on a [`RunLedger`]. The lock file is removed on drop.
#[derive(Debug)]
pub struct LedgerLease {
    path: PathBuf,
    lock: PathBuf,
}

impl LedgerLease {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> u64 {
        read_day(&self.path)
    }

    /// Atomically replace the stored value with `day`.
    pub fn commit(&self, day: u64) -> Result<(), LedgerError> {
        let tmp = sibling(&self.path, "tmp");
        let write = || -> io::Result<()> {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)?;
            file.write_all(day.to_string().as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)
        };
        write().map_err(|err| {
            let _ = fs::remove_file(&tmp);
            LedgerError::io(&self.path, err)
        })?;
        info!(ledger = %self.path.display(), day, "ledger committed");
        Ok(())
    }
}

impl Drop for LedgerLease {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.lock) {
            warn!(lock = %self.lock.display(), %err, "failed to release ledger lock");
        }
    }
}

fn read_day(path: &Path) -> u64 {
    match fs::read_to_string(path) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(ledger = %path.display(), "unparsable ledger, starting at {INITIAL_DAY}");
            INITIAL_DAY
        }),
        Err(_) => INITIAL_DAY,
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_or_garbage_ledger_reads_as_one() {
        let dir = tempdir().unwrap();
        let ledger = RunLedger::new(dir.path().join("day_counter.txt"));
        assert_eq!(ledger.peek(), 1);
        fs::write(ledger.path(), "not a number").unwrap();
        assert_eq!(ledger.acquire().unwrap().read(), 1);
    }

    #[test]
    fn commit_replaces_value_and_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("day_counter.txt");
        fs::write(&path, "5\n").unwrap();
        let ledger = RunLedger::new(&path);
        let lease = ledger.acquire().unwrap();
        assert_eq!(lease.read(), 5);
        lease.commit(6).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "6");
        assert!(!dir.path().join("day_counter.txt.tmp").exists());
    }

    #[test]
    fn second_acquire_fails_until_lease_drops() {
        let dir = tempdir().unwrap();
        let ledger = RunLedger::new(dir.path().join("day_counter.txt"));
        let lease = ledger.acquire().unwrap();
        assert!(ledger.lock_path().exists());
        assert!(matches!(ledger.acquire(), Err(LedgerError::Locked { .. })));
        drop(lease);
        assert!(!ledger.lock_path().exists());
        assert!(ledger.acquire().is_ok());
    }

    #[test]
    fn lock_of_a_dead_run_is_reclaimed() {
        let dir = tempdir().unwrap();
        let ledger = RunLedger::new(dir.path().join("day_counter.txt"));
        fs::write(ledger.lock_path(), format!("{}\n", u32::MAX - 7)).unwrap();

        let lease = ledger.acquire().unwrap();
        let holder = fs::read_to_string(ledger.lock_path()).unwrap();
        assert_eq!(holder.trim(), std::process::id().to_string());
        drop(lease);
        assert!(!ledger.lock_path().exists());
    }

    #[test]
    fn lock_without_a_pid_is_respected() {
        let dir = tempdir().unwrap();
        let ledger = RunLedger::new(dir.path().join("day_counter.txt"));
        fs::write(ledger.lock_path(), "").unwrap();
        assert!(matches!(ledger.acquire(), Err(LedgerError::Locked { .. })));
        assert!(ledger.lock_path().exists());
    }
}
