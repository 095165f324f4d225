//! Advisory instance lock.
//!
//! One orchestrator at a time per root. The lock file lives in the library
//! directory and is held for the lifetime of the returned guard; the OS
//! releases it if the process dies.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use fs4::FileExt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("another kiln instance is running (lock held: {0})")]
    Held(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Exclusive advisory lock, released on drop.
#[derive(Debug)]
pub struct LockFile {
    file: File,
    path: PathBuf,
}

impl LockFile {
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                return Err(LockError::Held(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        }
        let _ = writeln!(file, "{}", std::process::id());
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn acquire_creates_parent_and_writes_pid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("var/lib/kiln/kiln.lock");
        let lock = LockFile::acquire(&path).unwrap();
        assert_eq!(lock.path(), path);
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.trim(), std::process::id().to_string());
    }

    #[test]
    fn second_acquire_in_same_process_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kiln.lock");
        let _held = LockFile::acquire(&path).unwrap();
        // flock(2) locks are per open file description, so a second open
        // handle in this process contends just like another process would.
        match LockFile::acquire(&path) {
            Err(LockError::Held(p)) => assert_eq!(p, path),
            other => panic!("expected Held, got {other:?}"),
        }
    }

    #[test]
    fn lock_is_released_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kiln.lock");
        drop(LockFile::acquire(&path).unwrap());
        LockFile::acquire(&path).unwrap();
    }
}
