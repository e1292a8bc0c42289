//! Lock Manager (C6).
//!
//! File-based cross-process mutual exclusion per device, with stale-owner
//! detection by a process liveness probe (spec.md §4.6). The lock file is
//! the single source of truth for "this device is claimed on this host" —
//! callers must never cache "we hold it" in memory (spec.md §9).

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::error::LockError;

/// Returns the path a device's lock file would live at.
pub fn lock_path(lock_dir: &Path, sanitized_name: &str) -> PathBuf {
    lock_dir.join(format!("{sanitized_name}.lock"))
}

/// "Process alive" probe. Conservative: on error other than "no such
/// process" we report live, since an indeterminate probe must never cause
/// us to steal a lock that is in fact still held (spec.md §4.6).
#[cfg(unix)]
pub fn is_process_alive(pid: i32) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid), None::<Signal>) {
        Ok(()) => true,
        Err(nix::errno::Errno::ESRCH) => false,
        Err(_) => true,
    }
}

#[cfg(not(unix))]
pub fn is_process_alive(_pid: i32) -> bool {
    // No null-signal probe available; conservatively assume live per
    // spec.md §4.6 ("if unsure, treat as live").
    true
}

/// Parse the pid recorded in a lock file's contents. Whitespace-tolerant.
pub fn parse_owner(contents: &str) -> Option<i32> {
    contents.trim().parse::<i32>().ok()
}

fn read_owner_from_path(path: &Path) -> Result<Option<i32>, LockError> {
    let mut contents = String::new();
    match File::open(path) {
        Ok(mut f) => {
            f.read_to_string(&mut contents)
                .map_err(|source| LockError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(LockError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    }
    match parse_owner(&contents) {
        Some(pid) => Ok(Some(pid)),
        None => Err(LockError::Corrupt {
            path: path.to_path_buf(),
        }),
    }
}

/// `ReadOwner(path) -> pid`.
pub fn read_owner(path: &Path) -> Result<Option<i32>, LockError> {
    read_owner_from_path(path)
}

fn write_pid_create_new(path: &Path, pid: i32) -> std::io::Result<()> {
    let mut f = OpenOptions::new().write(true).create_new(true).open(path)?;
    writeln!(f, "{pid}")?;
    Ok(())
}

/// `Acquire(path)`. Succeeds iff no file exists at `path`, or the existing
/// file's recorded owner is not a live process — in which case the stale
/// file is replaced. Atomic create is mandatory: the file is never read
/// while being written by a concurrent acquirer.
pub fn acquire(path: &Path, sanitized_name: &str, our_pid: i32) -> Result<(), LockError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| LockError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    match write_pid_create_new(path, our_pid) {
        Ok(()) => return Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
        Err(source) => {
            return Err(LockError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    }

    // A file already exists: check whether its owner is still alive.
    let existing_pid = match read_owner_from_path(path)? {
        Some(pid) => pid,
        None => {
            // File vanished between create_new failing and our read; retry once.
            return write_pid_create_new(path, our_pid).map_err(|source| LockError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    if is_process_alive(existing_pid) {
        return Err(LockError::Contention {
            name: sanitized_name.to_string(),
            pid: existing_pid,
        });
    }

    // Stale claim: replace it. Write to a sibling temp file then rename,
    // so a concurrent reader never observes a half-written file.
    let tmp_path = path.with_extension("lock.tmp");
    {
        let mut f = File::create(&tmp_path).map_err(|source| LockError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        writeln!(f, "{our_pid}").map_err(|source| LockError::Io {
            path: tmp_path.clone(),
            source,
        })?;
    }
    fs::rename(&tmp_path, path).map_err(|source| LockError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// `Release(path)`. No-op if the file does not exist.
pub fn release(path: &Path) -> Result<(), LockError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(LockError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn acquire_creates_file_with_own_pid() {
        let dir = tempdir().unwrap();
        let path = lock_path(dir.path(), "USB_Audio_Device");
        acquire(&path, "USB_Audio_Device", 12345).unwrap();
        assert_eq!(read_owner(&path).unwrap(), Some(12345));
    }

    #[test]
    fn acquire_fails_against_live_owner() {
        let dir = tempdir().unwrap();
        let path = lock_path(dir.path(), "dev");
        // Our own pid is always alive, a convenient stand-in for "live".
        let our_pid = std::process::id() as i32;
        acquire(&path, "dev", our_pid).unwrap();
        let err = acquire(&path, "dev", our_pid + 1).unwrap_err();
        assert!(matches!(err, LockError::Contention { .. }));
    }

    #[test]
    fn acquire_steals_stale_lock() {
        let dir = tempdir().unwrap();
        let path = lock_path(dir.path(), "dev");
        // A pid that (almost certainly) does not exist.
        std::fs::write(&path, "999999\n").unwrap();
        acquire(&path, "dev", std::process::id() as i32).unwrap();
        assert_eq!(
            read_owner(&path).unwrap(),
            Some(std::process::id() as i32)
        );
    }

    #[test]
    fn release_deletes_file() {
        let dir = tempdir().unwrap();
        let path = lock_path(dir.path(), "dev");
        acquire(&path, "dev", 1).unwrap();
        assert!(path.exists());
        release(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn release_is_noop_when_absent() {
        let dir = tempdir().unwrap();
        let path = lock_path(dir.path(), "dev");
        release(&path).unwrap();
    }

    #[test]
    fn read_owner_tolerates_whitespace() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dev.lock");
        std::fs::write(&path, "  12345  \n").unwrap();
        assert_eq!(read_owner(&path).unwrap(), Some(12345));
    }
}
